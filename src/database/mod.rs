pub mod local;

pub use local::{init_app_db, Db};
