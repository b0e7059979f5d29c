pub mod database;
pub mod kv;
pub mod settings;

pub use database::{init_app_db, Db};
