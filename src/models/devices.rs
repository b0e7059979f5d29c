use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Semantic role of one physical channel.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Hash)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dimmer,
    Strobe,
    Color,
    Other,
}

/// Value band of a multi-function channel.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Hash)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Off,
    Dimmer,
    Strobe,
    Full,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "camelCase")]
pub struct SubRange {
    pub kind: RangeKind,
    pub min: u8,
    pub max: u8,
}

impl SubRange {
    pub fn contains(&self, value: u8) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn span(&self) -> f64 {
        (self.max - self.min) as f64
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "camelCase")]
pub struct ChannelDefinition {
    pub offset: u16,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub min: u8,
    pub max: u8,
    pub default_value: u8,
    /// Value bands for channels that switch function by value.
    #[serde(default)]
    pub sub_ranges: Vec<SubRange>,
}

impl ChannelDefinition {
    /// Which band a raw value falls into, if the channel has bands at all.
    pub fn classify(&self, value: u8) -> Option<RangeKind> {
        self.sub_ranges
            .iter()
            .find(|r| r.contains(value))
            .map(|r| r.kind)
    }

    pub fn range(&self, kind: RangeKind) -> Option<&SubRange> {
        self.sub_ranges.iter().find(|r| r.kind == kind)
    }
}

/// Immutable channel layout template for a type of fixture.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub id: String,
    pub name: String,
    pub channel_count: u16,
    pub channels: Vec<ChannelDefinition>,
}

impl DeviceProfile {
    pub fn channel(&self, offset: u16) -> Option<&ChannelDefinition> {
        self.channels.iter().find(|c| c.offset == offset)
    }

    /// The channel carrying master intensity, if any.
    pub fn dimmer_channel(&self) -> Option<&ChannelDefinition> {
        self.channels.iter().find(|c| c.kind == ChannelKind::Dimmer)
    }

    pub fn color_channels(&self) -> impl Iterator<Item = &ChannelDefinition> {
        self.channels.iter().filter(|c| c.kind == ChannelKind::Color)
    }
}

/// Physical fixture instance patched at a DMX address.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub profile_id: String,
    /// 1-indexed base address.
    pub start_channel: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Device {
    /// 0-indexed frame slot of a channel offset.
    pub fn address(&self, offset: u16) -> usize {
        (self.start_channel.max(1) - 1) as usize + offset as usize
    }
}

/// Devices sharing one profile, addressed together.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/devices.ts")]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub profile_id: String,
    pub device_ids: Vec<String>,
    #[serde(default)]
    pub color: String,
}
