pub mod validation;
pub mod webhook;
