use crate::database::local::settings as db;
use crate::models::audio::{clamp_percent, AudioBand};
use crate::models::mix::AppMode;
use crate::output::{DEFAULT_BAUD_RATE, DEFAULT_HARDWARE_CHANNELS};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    pub serial_port: Option<String>,
    pub serial_baud: u32,
    pub hardware_channels: usize,
    pub audio_port: Option<String>,
    pub midi_input: Option<String>,
    pub quantum: u32,
    pub internal_tempo: f64,
    pub app_mode: AppMode,
    pub link_enabled: bool,
    pub loop_current: bool,
    pub global_audio_enabled: bool,
    pub audio_band: AudioBand,
    pub audio_sensitivity: f64,
    pub audio_min_level: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self::from_map(&HashMap::new())
    }
}

fn non_empty(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag(map: &HashMap<String, String>, key: &str, default: bool) -> bool {
    map.get(key).map(|v| v == "true").unwrap_or(default)
}

impl AppSettings {
    /// Parse the stored key/value map. Missing or malformed values fall back
    /// to their defaults; numeric values are clamped.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self {
            serial_port: non_empty(map, "serial_port"),
            serial_baud: map
                .get("serial_baud")
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_BAUD_RATE),
            hardware_channels: map
                .get("hardware_channels")
                .and_then(|v| v.parse::<usize>().ok())
                .map(|v| v.clamp(1, 512))
                .unwrap_or(DEFAULT_HARDWARE_CHANNELS),
            audio_port: non_empty(map, "audio_port"),
            midi_input: non_empty(map, "midi_input"),
            quantum: map
                .get("quantum")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(beatlink::DEFAULT_QUANTUM),
            internal_tempo: map
                .get("internal_tempo")
                .and_then(|v| v.parse::<f64>().ok())
                .map(crate::clock::internal::clamp_tempo)
                .unwrap_or(crate::clock::internal::DEFAULT_TEMPO),
            app_mode: map
                .get("app_mode")
                .and_then(|v| AppMode::parse(v))
                .unwrap_or_default(),
            link_enabled: flag(map, "link_enabled", true),
            loop_current: flag(map, "loop_current", true),
            global_audio_enabled: flag(map, "global_audio_enabled", false),
            audio_band: map
                .get("audio_band")
                .and_then(|v| AudioBand::parse(v))
                .unwrap_or_default(),
            audio_sensitivity: map
                .get("audio_sensitivity")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| !v.is_nan())
                .map(|v| v.clamp(0.0, 200.0))
                .unwrap_or(100.0),
            audio_min_level: map
                .get("audio_min_level")
                .and_then(|v| v.parse::<f64>().ok())
                .map(clamp_percent)
                .unwrap_or(0.0),
        }
    }
}

pub async fn get_all_settings(pool: &SqlitePool) -> Result<AppSettings, String> {
    let map = db::get_all_settings(pool).await?;
    Ok(AppSettings::from_map(&map))
}

pub async fn update_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<(), String> {
    db::update_setting(pool, key, value).await
}
