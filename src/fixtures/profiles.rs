//! Built-in fixture profiles and presets.
//!
//! These are compiled in, merged into the store at load, and never persisted.

use once_cell::sync::Lazy;

use crate::models::devices::{ChannelDefinition, ChannelKind, DeviceProfile, RangeKind, SubRange};
use crate::models::presets::{Preset, PresetCategory, PresetValues, StrobeSpeed};

pub const PINSPOT_RGBW_ID: &str = "pinspot-rgbw-5ch";
pub const BUILTIN_PRESET_PREFIX: &str = "builtin-";

/// Master/strobe bands of the pinspot's first channel.
pub const PINSPOT_OFF: SubRange = SubRange {
    kind: RangeKind::Off,
    min: 0,
    max: 8,
};
pub const PINSPOT_DIMMER: SubRange = SubRange {
    kind: RangeKind::Dimmer,
    min: 9,
    max: 134,
};
pub const PINSPOT_STROBE: SubRange = SubRange {
    kind: RangeKind::Strobe,
    min: 135,
    max: 239,
};
pub const PINSPOT_FULL: SubRange = SubRange {
    kind: RangeKind::Full,
    min: 240,
    max: 255,
};

fn color_channel(offset: u16, name: &str) -> ChannelDefinition {
    ChannelDefinition {
        offset,
        name: name.to_string(),
        kind: ChannelKind::Color,
        min: 0,
        max: 255,
        default_value: 0,
        sub_ranges: Vec::new(),
    }
}

pub static PINSPOT_RGBW: Lazy<DeviceProfile> = Lazy::new(|| DeviceProfile {
    id: PINSPOT_RGBW_ID.to_string(),
    name: "PinSpot LED RGBW".to_string(),
    channel_count: 5,
    channels: vec![
        ChannelDefinition {
            offset: 0,
            name: "Master/Strobe".to_string(),
            kind: ChannelKind::Dimmer,
            min: 0,
            max: 255,
            default_value: 134,
            sub_ranges: vec![PINSPOT_OFF, PINSPOT_DIMMER, PINSPOT_STROBE, PINSPOT_FULL],
        },
        color_channel(1, "Red"),
        color_channel(2, "Green"),
        color_channel(3, "Blue"),
        color_channel(4, "White"),
    ],
});

pub fn builtin_profiles() -> Vec<DeviceProfile> {
    vec![PINSPOT_RGBW.clone()]
}

fn builtin(
    id: &str,
    name: &str,
    category: PresetCategory,
    values: PresetValues,
) -> Preset {
    Preset {
        id: format!("{}{}", BUILTIN_PRESET_PREFIX, id),
        name: name.to_string(),
        profile_id: PINSPOT_RGBW_ID.to_string(),
        values,
        is_built_in: true,
        category,
    }
}

fn strobe(speed: StrobeSpeed) -> PresetValues {
    PresetValues {
        strobe: true,
        strobe_speed: speed,
        ..PresetValues::rgbw(255, 255, 255, 255, 255)
    }
}

pub static BUILTIN_PRESETS: Lazy<Vec<Preset>> = Lazy::new(|| {
    use PresetCategory::*;
    vec![
        builtin("red", "Red", Color, PresetValues::rgbw(255, 255, 0, 0, 0)),
        builtin("green", "Green", Color, PresetValues::rgbw(255, 0, 255, 0, 0)),
        builtin("blue", "Blue", Color, PresetValues::rgbw(255, 0, 0, 255, 0)),
        builtin("white", "White", Color, PresetValues::rgbw(255, 0, 0, 0, 255)),
        builtin("cyan", "Cyan", Color, PresetValues::rgbw(255, 0, 255, 255, 0)),
        builtin("magenta", "Magenta", Color, PresetValues::rgbw(255, 255, 0, 255, 0)),
        builtin("yellow", "Yellow", Color, PresetValues::rgbw(255, 255, 255, 0, 0)),
        builtin("orange", "Orange", Color, PresetValues::rgbw(255, 255, 128, 0, 0)),
        builtin("strobe-slow", "Strobe Slow", Strobe, strobe(StrobeSpeed::Slow)),
        builtin("strobe-med", "Strobe Med", Strobe, strobe(StrobeSpeed::Medium)),
        builtin("strobe-fast", "Strobe Fast", Strobe, strobe(StrobeSpeed::Fast)),
        builtin("dim-25", "25%", Dimmer, PresetValues::rgbw(64, 255, 255, 255, 255)),
        builtin("dim-50", "50%", Dimmer, PresetValues::rgbw(128, 255, 255, 255, 255)),
        builtin("dim-75", "75%", Dimmer, PresetValues::rgbw(192, 255, 255, 255, 255)),
        builtin("full", "Full", Dimmer, PresetValues::rgbw(255, 255, 255, 255, 255)),
    ]
});

pub fn is_builtin_preset(id: &str) -> bool {
    id.starts_with(BUILTIN_PRESET_PREFIX)
}
