use crate::models::devices::{ChannelDefinition, ChannelKind, DeviceProfile, RangeKind};
use crate::models::presets::PresetValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelColour {
    Red,
    Green,
    Blue,
    White,
    None,
}

/// Which RGBW component a colour channel carries, from its name.
pub fn get_colour(channel: &ChannelDefinition) -> ChannelColour {
    let name = channel.name.to_lowercase();
    if name.contains("red") {
        ChannelColour::Red
    } else if name.contains("green") {
        ChannelColour::Green
    } else if name.contains("blue") {
        ChannelColour::Blue
    } else if name.contains("white") {
        ChannelColour::White
    } else {
        ChannelColour::None
    }
}

/// Channel values of a preset laid out on a profile, as `(offset, value)`.
pub fn preset_channels(profile: &DeviceProfile, values: &PresetValues) -> Vec<(u16, u8)> {
    profile
        .channels
        .iter()
        .map(|channel| (channel.offset, map_value(channel, values)))
        .collect()
}

fn map_value(channel: &ChannelDefinition, values: &PresetValues) -> u8 {
    match channel.kind {
        ChannelKind::Dimmer => master_value(channel, values),
        ChannelKind::Strobe => {
            if values.strobe {
                strobe_value(channel, values)
            } else {
                channel.min
            }
        }
        ChannelKind::Color => match get_colour(channel) {
            ChannelColour::Red => values.red,
            ChannelColour::Green => values.green,
            ChannelColour::Blue => values.blue,
            ChannelColour::White => values.white,
            ChannelColour::None => 0,
        },
        ChannelKind::Other => channel.default_value,
    }
}

/// Combined master channel: strobe band when strobing, dimmer band otherwise.
fn master_value(channel: &ChannelDefinition, values: &PresetValues) -> u8 {
    if values.strobe && channel.range(RangeKind::Strobe).is_some() {
        return strobe_value(channel, values);
    }

    match channel.range(RangeKind::Dimmer) {
        Some(range) => {
            let scaled = range.min as f64 + (values.dimmer as f64 / 255.0) * range.span();
            scaled.round() as u8
        }
        None => {
            let span = (channel.max - channel.min) as f64;
            (channel.min as f64 + (values.dimmer as f64 / 255.0) * span).round() as u8
        }
    }
}

fn strobe_value(channel: &ChannelDefinition, values: &PresetValues) -> u8 {
    let v = values.strobe_speed.dmx_value();
    match channel.range(RangeKind::Strobe) {
        Some(range) => v.clamp(range.min, range.max),
        None => v.clamp(channel.min, channel.max),
    }
}

/// Percentage to native channel units: the dimmer band if the channel has one,
/// otherwise the full 0-255 range.
pub fn percent_to_dmx(percent: f64, channel: Option<&ChannelDefinition>) -> u8 {
    let p = crate::models::audio::clamp_percent(percent) / 100.0;
    match channel.and_then(|c| c.range(RangeKind::Dimmer)) {
        Some(range) => (range.min as f64 + p * range.span()).round() as u8,
        None => (p * 255.0).round() as u8,
    }
}
