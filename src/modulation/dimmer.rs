use crate::models::audio::DimmerChannelOverride;
use crate::models::devices::RangeKind;
use crate::store::DmxStore;

use super::audio::scale_intensity;

pub const MASTER_MAX: f64 = 100.0;

pub fn clamp_master(value: f64) -> f64 {
    if value.is_nan() {
        return MASTER_MAX;
    }
    value.clamp(0.0, MASTER_MAX)
}

/// Scale every device's intensity by the master level (0-100).
///
/// A device whose master channel sits in its strobe band keeps its strobe
/// speed; its colour channels are scaled instead. Overrides then cap their
/// channel at `min + (max - min) * scale`. A no-op at 100%.
pub fn apply_master_dimmer(
    mix: &mut [u8],
    store: &DmxStore,
    master: f64,
    overrides: &[DimmerChannelOverride],
) {
    let master = clamp_master(master);
    if master >= MASTER_MAX {
        return;
    }
    let scale = master / MASTER_MAX;

    for device in &store.devices {
        let Some(profile) = store.profile(&device.profile_id) else {
            continue;
        };
        let Some(dimmer) = profile.dimmer_channel() else {
            continue;
        };
        let idx = device.address(dimmer.offset);
        if idx >= mix.len() {
            continue;
        }

        if dimmer.classify(mix[idx]) == Some(RangeKind::Strobe) {
            for colour in profile.color_channels() {
                let i = device.address(colour.offset);
                if i < mix.len() {
                    mix[i] = (mix[i] as f64 * scale).round() as u8;
                }
            }
        } else if let Some(v) = scale_intensity(dimmer, mix[idx], scale) {
            mix[idx] = v;
        }
    }

    for config in overrides {
        let Some(idx) = (config.channel as usize).checked_sub(1) else {
            continue;
        };
        if idx >= mix.len() {
            continue;
        }
        let span = config.max as f64 - config.min as f64;
        let dimmed = (config.min as f64 + span * scale).round().clamp(0.0, 255.0) as u8;
        mix[idx] = mix[idx].min(dimmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::profiles::PINSPOT_RGBW_ID;

    fn store() -> DmxStore {
        let mut store = DmxStore::default();
        store.add_device("A", PINSPOT_RGBW_ID, 1, vec![]);
        store
    }

    #[test]
    fn full_master_is_noop() {
        let store = store();
        let mut mix = vec![100, 10, 20, 30, 40];
        apply_master_dimmer(&mut mix, &store, 100.0, &[]);
        assert_eq!(mix, vec![100, 10, 20, 30, 40]);
    }

    #[test]
    fn half_master_on_max_dimmer() {
        let store = store();
        let mut mix = vec![134, 255, 0, 0, 0];
        apply_master_dimmer(&mut mix, &store, 50.0, &[]);
        assert_eq!(mix, vec![72, 255, 0, 0, 0]);
    }

    #[test]
    fn zero_master_drives_dimmer_to_band_floor() {
        let store = store();
        let mut mix = vec![100, 255, 255, 255, 255];
        apply_master_dimmer(&mut mix, &store, 0.0, &[]);
        assert_eq!(mix[0], 9);

        let mut full = vec![250, 0, 0, 0, 0];
        apply_master_dimmer(&mut full, &store, 0.0, &[]);
        assert_eq!(full[0], 9);
    }

    #[test]
    fn strobe_scales_colours_not_speed() {
        let store = store();
        let mut mix = vec![180, 255, 128, 0, 255];
        apply_master_dimmer(&mut mix, &store, 50.0, &[]);
        assert_eq!(mix, vec![180, 128, 64, 0, 128]);
    }

    #[test]
    fn dark_devices_stay_dark() {
        let store = store();
        let mut mix = vec![0u8; 5];
        apply_master_dimmer(&mut mix, &store, 30.0, &[]);
        assert_eq!(mix, vec![0u8; 5]);
    }

    #[test]
    fn overrides_only_reduce() {
        let store = DmxStore::default();
        let overrides = vec![
            DimmerChannelOverride {
                channel: 7,
                min: 0,
                max: 200,
            },
            DimmerChannelOverride {
                channel: 8,
                min: 0,
                max: 200,
            },
        ];
        let mut mix = vec![0u8; 10];
        mix[6] = 255;
        mix[7] = 20;
        apply_master_dimmer(&mut mix, &store, 50.0, &overrides);
        assert_eq!(mix[6], 100);
        assert_eq!(mix[7], 20);
    }

    #[test]
    fn master_is_clamped() {
        assert_eq!(clamp_master(140.0), 100.0);
        assert_eq!(clamp_master(-5.0), 0.0);
    }
}
