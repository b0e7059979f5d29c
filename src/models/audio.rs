use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Hash, Default)]
#[ts(export, export_to = "../../src/bindings/audio.ts")]
#[serde(rename_all = "lowercase")]
pub enum AudioBand {
    #[default]
    Bass,
    Mid,
    High,
}

impl AudioBand {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bass" => Some(AudioBand::Bass),
            "mid" => Some(AudioBand::Mid),
            "high" => Some(AudioBand::High),
            _ => None,
        }
    }
}

/// Band levels from the analyzer, each 0-100.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Default)]
#[ts(export, export_to = "../../src/bindings/audio.ts")]
#[serde(rename_all = "camelCase")]
pub struct AudioLevels {
    pub bass: f64,
    pub mid: f64,
    pub high: f64,
}

impl AudioLevels {
    pub fn new(bass: f64, mid: f64, high: f64) -> Self {
        Self {
            bass: clamp_percent(bass),
            mid: clamp_percent(mid),
            high: clamp_percent(high),
        }
    }

    pub fn get(&self, band: AudioBand) -> f64 {
        match band {
            AudioBand::Bass => self.bass,
            AudioBand::Mid => self.mid,
            AudioBand::High => self.high,
        }
    }
}

pub fn clamp_percent(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

/// Explicit band-to-channel binding for the global audio layer (DMX units).
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/audio.ts")]
#[serde(rename_all = "camelCase")]
pub struct AudioChannelMapping {
    pub id: String,
    pub band: AudioBand,
    pub device_id: String,
    pub channel_offset: u16,
    pub min: u8,
    pub max: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/audio.ts")]
#[serde(rename_all = "camelCase")]
pub struct GlobalAudioConfig {
    pub enabled: bool,
    pub band: AudioBand,
    /// 0-200, 100 is unity.
    pub sensitivity: f64,
    /// Floor added to the level, 0-100.
    pub min_level: f64,
    #[serde(default)]
    pub channel_mappings: Vec<AudioChannelMapping>,
}

impl Default for GlobalAudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            band: AudioBand::Bass,
            sensitivity: 100.0,
            min_level: 0.0,
            channel_mappings: Vec::new(),
        }
    }
}

impl GlobalAudioConfig {
    pub fn set_sensitivity(&mut self, value: f64) {
        self.sensitivity = if value.is_nan() { 100.0 } else { value.clamp(0.0, 200.0) };
    }

    pub fn set_min_level(&mut self, value: f64) {
        self.min_level = clamp_percent(value);
    }

    /// Sensitivity- and floor-adjusted level for one band, 0-100.
    pub fn level(&self, levels: &AudioLevels, band: AudioBand) -> f64 {
        clamp_percent(self.min_level + levels.get(band) * self.sensitivity / 100.0)
    }
}

/// Per-channel clamp applied with the master dimmer.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/audio.ts")]
#[serde(rename_all = "camelCase")]
pub struct DimmerChannelOverride {
    /// 1-indexed DMX channel.
    pub channel: u16,
    pub min: u8,
    pub max: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_clamped() {
        let levels = AudioLevels::new(140.0, -3.0, f64::NAN);
        assert_eq!(levels.bass, 100.0);
        assert_eq!(levels.mid, 0.0);
        assert_eq!(levels.high, 0.0);
    }

    #[test]
    fn global_level_applies_sensitivity_and_floor() {
        let mut config = GlobalAudioConfig::default();
        config.set_sensitivity(150.0);
        config.set_min_level(10.0);
        let levels = AudioLevels::new(40.0, 0.0, 0.0);
        assert!((config.level(&levels, AudioBand::Bass) - 70.0).abs() < 1e-9);

        let loud = AudioLevels::new(90.0, 0.0, 0.0);
        assert_eq!(config.level(&loud, AudioBand::Bass), 100.0);
    }

    #[test]
    fn sensitivity_is_clamped() {
        let mut config = GlobalAudioConfig::default();
        config.set_sensitivity(500.0);
        assert_eq!(config.sensitivity, 200.0);
        config.set_sensitivity(-1.0);
        assert_eq!(config.sensitivity, 0.0);
    }
}
