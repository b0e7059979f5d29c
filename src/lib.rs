pub mod audio_input;
pub mod broadcast;
pub mod clock;
pub mod compositor;
pub mod database;
pub mod fixtures;
pub mod midi;
pub mod models;
pub mod modulation;
pub mod output;
pub mod persistence;
pub mod render_engine;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod timeline;

pub use render_engine::{EngineConfig, RenderEngine};
pub use store::DmxStore;
