use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Default)]
#[ts(export, export_to = "../../src/bindings/mix.ts")]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Testing,
    Performance,
}

impl AppMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "testing" => Some(AppMode::Testing),
            "performance" => Some(AppMode::Performance),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq)]
#[ts(export, export_to = "../../src/bindings/mix.ts")]
#[serde(rename_all = "lowercase")]
pub enum ClockSourceKind {
    External,
    Internal,
}

/// One read of the active beat clock.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/mix.ts")]
#[serde(rename_all = "camelCase")]
pub struct ClockReading {
    pub beat: f64,
    /// Position within the bar, `[0, 1)`.
    pub phase: f64,
    pub bar_number: u32,
    pub beat_in_bar: u32,
    pub tempo: f64,
    pub is_playing: bool,
    pub source: ClockSourceKind,
}

/// Mixer state pushed to observers after every emission.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/mix.ts")]
#[serde(rename_all = "camelCase")]
pub struct MixState {
    pub mode: AppMode,
    pub is_playing: bool,
    pub current_beat: u32,
    pub beat_in_set: u32,
    pub active_set_id: Option<String>,
    pub pending_set_id: Option<String>,
    pub master_dimmer: f64,
    pub blackout: bool,
    pub clock: ClockReading,
    pub frame: Vec<u8>,
}
