use crate::compositor::active_contributions;
use crate::fixtures::engine::percent_to_dmx;
use crate::models::audio::{AudioLevels, GlobalAudioConfig};
use crate::models::devices::{ChannelDefinition, RangeKind};
use crate::models::presets::PresetAudioReactive;
use crate::models::sets::Set;
use crate::store::DmxStore;

/// Output of one preset audio gate for a band level (0-100).
pub fn preset_audio_value(
    config: &PresetAudioReactive,
    level: f64,
    channel: Option<&ChannelDefinition>,
) -> u8 {
    if level < config.threshold {
        return percent_to_dmx(config.min, channel);
    }

    let range = 100.0 - config.threshold;
    let normalized = if range > 0.0 {
        ((level - config.threshold) / range).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let curved = config.curve.apply(normalized);
    percent_to_dmx(config.min + curved * (config.max - config.min), channel)
}

/// Whether any sounding clip at `beat` carries an enabled audio gate.
pub fn has_preset_audio(store: &DmxStore, set: &Set, beat: f64) -> bool {
    active_contributions(store, set, beat)
        .iter()
        .any(|c| c.preset.values.active_audio().is_some())
}

/// Per-preset layer: overwrite each gated channel of every device the clip drives.
pub fn apply_preset_audio(
    mix: &mut [u8],
    store: &DmxStore,
    set: &Set,
    beat: f64,
    levels: &AudioLevels,
) {
    for contribution in active_contributions(store, set, beat) {
        let Some(config) = contribution.preset.values.active_audio() else {
            continue;
        };
        let level = levels.get(config.band);

        for device in &contribution.devices {
            let idx = device.address(config.channel);
            if idx >= mix.len() {
                continue;
            }
            let channel = store
                .profile(&device.profile_id)
                .and_then(|p| p.channel(config.channel));
            mix[idx] = preset_audio_value(config, level, channel);
        }
    }
}

/// Global layer: explicit channel mappings when configured, otherwise every
/// device's dimmer channel rescaled by the configured band.
pub fn apply_global_audio(
    mix: &mut [u8],
    store: &DmxStore,
    config: &GlobalAudioConfig,
    levels: &AudioLevels,
) {
    if !config.enabled {
        return;
    }

    if !config.channel_mappings.is_empty() {
        for mapping in &config.channel_mappings {
            let Some(device) = store.device(&mapping.device_id) else {
                continue;
            };
            let idx = device.address(mapping.channel_offset);
            if idx >= mix.len() {
                continue;
            }
            let level = config.level(levels, mapping.band) / 100.0;
            let span = mapping.max as f64 - mapping.min as f64;
            mix[idx] = (mapping.min as f64 + level * span).round().clamp(0.0, 255.0) as u8;
        }
        return;
    }

    let level = config.level(levels, config.band) / 100.0;
    for device in &store.devices {
        let Some(dimmer) = store
            .profile(&device.profile_id)
            .and_then(|p| p.dimmer_channel())
        else {
            continue;
        };
        let idx = device.address(dimmer.offset);
        if idx >= mix.len() {
            continue;
        }
        if let Some(v) = scale_intensity(dimmer, mix[idx], level) {
            mix[idx] = v;
        }
    }
}

/// Rescale an intensity value by `scale` (0-1) without leaving its band.
///
/// Returns None for values whose band must not be touched (off, strobe).
pub(crate) fn scale_intensity(channel: &ChannelDefinition, value: u8, scale: f64) -> Option<u8> {
    let dimmer = channel.range(RangeKind::Dimmer);
    match (channel.classify(value), dimmer) {
        (Some(RangeKind::Dimmer), Some(range)) => {
            let intensity = (value - range.min) as f64 / range.span();
            Some((range.min as f64 + intensity * scale * range.span()).round() as u8)
        }
        (Some(RangeKind::Full), Some(range)) => {
            Some((range.min as f64 + scale * range.span()).round() as u8)
        }
        (Some(_), _) => None,
        (None, _) if channel.sub_ranges.is_empty() => {
            let floor = channel.min as f64;
            Some((floor + (value as f64 - floor).max(0.0) * scale).round() as u8)
        }
        (None, _) => None,
    }
}
