use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::audio::AudioBand;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Default)]
#[ts(export, export_to = "../../src/bindings/presets.ts")]
#[serde(rename_all = "lowercase")]
pub enum StrobeSpeed {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl StrobeSpeed {
    /// Value inside the strobe band (135-239) encoding this speed.
    pub fn dmx_value(self) -> u8 {
        match self {
            StrobeSpeed::Slow => 150,
            StrobeSpeed::Medium => 180,
            StrobeSpeed::Fast => 220,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Default)]
#[ts(export, export_to = "../../src/bindings/presets.ts")]
#[serde(rename_all = "lowercase")]
pub enum PresetCategory {
    Color,
    Strobe,
    Dimmer,
    #[default]
    Custom,
}

/// Response curve applied to a normalized audio level.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Default)]
#[ts(export, export_to = "../../src/bindings/presets.ts")]
#[serde(rename_all = "lowercase")]
pub enum ResponseCurve {
    #[default]
    Linear,
    Sine,
    Square,
}

impl ResponseCurve {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            ResponseCurve::Linear => x,
            ResponseCurve::Sine => (1.0 - (x * std::f64::consts::PI).cos()) / 2.0,
            ResponseCurve::Square => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Audio gate driving one channel of the preset's devices.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/presets.ts")]
#[serde(rename_all = "camelCase")]
pub struct PresetAudioReactive {
    pub enabled: bool,
    pub band: AudioBand,
    /// Gate level, 0-100.
    pub threshold: f64,
    /// Output floor, percent.
    pub min: f64,
    /// Output ceiling, percent.
    pub max: f64,
    #[serde(default)]
    pub curve: ResponseCurve,
    /// Channel offset within the device profile.
    pub channel: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/presets.ts")]
#[serde(rename_all = "camelCase")]
pub struct PresetValues {
    pub dimmer: u8,
    pub strobe: bool,
    #[serde(default)]
    pub strobe_speed: StrobeSpeed,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
    #[serde(default)]
    pub audio_reactive: Option<PresetAudioReactive>,
}

impl Default for PresetValues {
    fn default() -> Self {
        Self {
            dimmer: 200,
            strobe: false,
            strobe_speed: StrobeSpeed::Medium,
            red: 0,
            green: 0,
            blue: 0,
            white: 0,
            audio_reactive: None,
        }
    }
}

impl PresetValues {
    pub fn rgbw(dimmer: u8, red: u8, green: u8, blue: u8, white: u8) -> Self {
        Self {
            dimmer,
            red,
            green,
            blue,
            white,
            ..Self::default()
        }
    }

    pub fn active_audio(&self) -> Option<&PresetAudioReactive> {
        self.audio_reactive.as_ref().filter(|a| a.enabled)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/presets.ts")]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub profile_id: String,
    pub values: PresetValues,
    #[serde(default)]
    pub is_built_in: bool,
    #[serde(default)]
    pub category: PresetCategory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curves_hit_endpoints() {
        for curve in [ResponseCurve::Linear, ResponseCurve::Sine] {
            assert!(curve.apply(0.0).abs() < 1e-9);
            assert!((curve.apply(1.0) - 1.0).abs() < 1e-9);
        }
        assert!((ResponseCurve::Sine.apply(0.5) - 0.5).abs() < 1e-9);
        assert_eq!(ResponseCurve::Square.apply(0.01), 1.0);
        assert_eq!(ResponseCurve::Square.apply(0.0), 0.0);
    }

    #[test]
    fn strobe_speeds_sit_in_strobe_band() {
        for speed in [StrobeSpeed::Slow, StrobeSpeed::Medium, StrobeSpeed::Fast] {
            let v = speed.dmx_value();
            assert!((135..=239).contains(&v));
        }
    }

    #[test]
    fn disabled_audio_config_is_ignored() {
        let mut values = PresetValues::default();
        values.audio_reactive = Some(PresetAudioReactive {
            enabled: false,
            band: AudioBand::Bass,
            threshold: 10.0,
            min: 0.0,
            max: 100.0,
            curve: ResponseCurve::Linear,
            channel: 0,
        });
        assert!(values.active_audio().is_none());
    }
}
