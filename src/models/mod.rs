pub mod audit;
pub mod beneficial_owner;
pub mod organization;
