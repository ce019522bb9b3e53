pub mod completeness;
pub mod jwt;
pub mod kyc_service;
pub mod notification_service;
pub mod review_service;
pub mod stripe_gateway;
