pub mod engine;
pub mod profiles;
