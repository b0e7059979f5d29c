//! Frame Compositor
//!
//! Resolves a set at one beat into a raw 512-channel frame:
//! - every channel starts dark (nothing carries over between beats)
//! - mute and solo decide which tracks sound
//! - contributions to the same channel add and saturate at 255

use std::collections::BTreeMap;

use crate::fixtures::engine::preset_channels;
use crate::models::devices::Device;
use crate::models::presets::Preset;
use crate::models::sets::{Set, SetClip, SetTrack};
use crate::store::DmxStore;

pub const UNIVERSE_SIZE: usize = 512;

pub type Frame = [u8; UNIVERSE_SIZE];

/// One clip that sounds at the queried beat, resolved to its devices.
pub struct Contribution<'a> {
    pub clip: &'a SetClip,
    pub track: &'a SetTrack,
    pub preset: &'a Preset,
    pub devices: Vec<&'a Device>,
}

/// Clips active at `beat` on audible tracks, with their references resolved.
///
/// Clips whose track or preset no longer exists are skipped.
pub fn active_contributions<'a>(
    store: &'a DmxStore,
    set: &'a Set,
    beat: f64,
) -> Vec<Contribution<'a>> {
    let has_solo = set.has_solo();

    set.active_clips(beat)
        .filter_map(|clip| {
            let track = set.track(&clip.track_id)?;
            if !set.is_audible(track, has_solo) {
                return None;
            }
            let preset = store.preset(&clip.preset_id)?;
            Some(Contribution {
                clip,
                track,
                preset,
                devices: store.target_devices(&track.target),
            })
        })
        .collect()
}

/// Saturating add into one slot; out-of-universe addresses are dropped.
pub fn write_additive(frame: &mut Frame, address: usize, value: u8) {
    if let Some(slot) = frame.get_mut(address) {
        *slot = slot.saturating_add(value);
    }
}

pub fn compose(store: &DmxStore, set: &Set, beat: f64) -> Frame {
    let mut frame: Frame = [0; UNIVERSE_SIZE];

    for contribution in active_contributions(store, set, beat) {
        for device in &contribution.devices {
            let Some(profile) = store.profile(&device.profile_id) else {
                continue;
            };
            for (offset, value) in preset_channels(profile, &contribution.preset.values) {
                write_additive(&mut frame, device.address(offset), value);
            }
        }
    }

    frame
}

/// Frame with one preset written straight onto the given devices.
pub fn preview_frame(store: &DmxStore, preset: &Preset, device_ids: &[String]) -> Frame {
    let mut frame: Frame = [0; UNIVERSE_SIZE];
    for device in device_ids.iter().filter_map(|id| store.device(id)) {
        let Some(profile) = store.profile(&device.profile_id) else {
            continue;
        };
        for (offset, value) in preset_channels(profile, &preset.values) {
            if let Some(slot) = frame.get_mut(device.address(offset)) {
                *slot = value;
            }
        }
    }
    frame
}

/// Devices driven by more than one track at `beat`, with the track names.
///
/// Diagnostic only; mute and solo are ignored so hidden conflicts still show.
pub fn overlapping_devices(
    store: &DmxStore,
    set: &Set,
    beat: f64,
) -> BTreeMap<String, Vec<String>> {
    let mut device_tracks: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for clip in set.active_clips(beat) {
        let Some(track) = set.track(&clip.track_id) else {
            continue;
        };
        for device in store.target_devices(&track.target) {
            device_tracks
                .entry(device.id.clone())
                .or_default()
                .push(track.name.clone());
        }
    }

    device_tracks.retain(|_, tracks| tracks.len() > 1);
    device_tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::profiles::PINSPOT_RGBW_ID;
    use crate::models::sets::TrackTarget;

    struct Rig {
        store: DmxStore,
        set_id: String,
        device: Device,
    }

    impl Rig {
        fn new() -> Self {
            let mut store = DmxStore::default();
            let device = store.add_device("Pin", PINSPOT_RGBW_ID, 1, vec![]);
            let set = store.add_set(None, Some(4));
            Self {
                store,
                set_id: set.id,
                device,
            }
        }

        fn track(&mut self) -> String {
            self.store
                .add_track(&self.set_id, TrackTarget::Device(self.device.id.clone()))
                .unwrap()
                .id
        }

        fn clip(&mut self, track: &str, preset: &str, start: u32, duration: u32) {
            self.store
                .add_clip(&self.set_id, track, preset, start, duration)
                .unwrap();
        }

        fn frame(&self, beat: f64) -> Frame {
            compose(&self.store, self.store.set(&self.set_id).unwrap(), beat)
        }
    }

    #[test]
    fn red_clip_then_auto_blackout() {
        let mut rig = Rig::new();
        let t = rig.track();
        rig.clip(&t, "builtin-red", 1, 2);

        assert_eq!(rig.frame(1.0)[..5], [134, 255, 0, 0, 0]);
        assert_eq!(rig.frame(2.0)[..5], [134, 255, 0, 0, 0]);
        assert_eq!(rig.frame(3.0)[..5], [0, 0, 0, 0, 0]);
        assert_eq!(rig.frame(4.0)[..5], [0, 0, 0, 0, 0]);
    }

    #[test]
    fn compose_is_deterministic() {
        let mut rig = Rig::new();
        let t = rig.track();
        rig.clip(&t, "builtin-orange", 1, 4);
        assert_eq!(rig.frame(2.0), rig.frame(2.0));
    }

    #[test]
    fn tracks_mix_additively() {
        let mut rig = Rig::new();
        let a = rig.track();
        let b = rig.track();
        rig.clip(&a, "builtin-red", 1, 1);
        rig.clip(&b, "builtin-blue", 1, 1);

        let frame = rig.frame(1.0);
        // master 134 + 134 saturates
        assert_eq!(frame[..5], [255, 255, 0, 255, 0]);

        let mut partial = [0u8; UNIVERSE_SIZE];
        write_additive(&mut partial, 10, 100);
        write_additive(&mut partial, 10, 100);
        assert_eq!(partial[10], 200);
        write_additive(&mut partial, 10, 100);
        assert_eq!(partial[10], 255);
    }

    #[test]
    fn muted_track_contributes_nothing() {
        let mut rig = Rig::new();
        let t = rig.track();
        rig.clip(&t, "builtin-red", 1, 1);
        rig.store.toggle_mute(&rig.set_id, &t);
        assert!(rig.frame(1.0).iter().all(|&v| v == 0));
    }

    #[test]
    fn solo_silences_other_tracks() {
        let mut rig = Rig::new();
        let a = rig.track();
        let b = rig.track();
        rig.clip(&a, "builtin-red", 1, 1);
        rig.clip(&b, "builtin-green", 1, 1);
        rig.store.toggle_solo(&rig.set_id, &b);

        assert_eq!(rig.frame(1.0)[..5], [134, 0, 255, 0, 0]);
    }

    #[test]
    fn dangling_references_are_skipped() {
        let mut rig = Rig::new();
        let t = rig.track();
        rig.clip(&t, "builtin-red", 1, 1);
        {
            let set = rig.store.sets.iter_mut().find(|s| s.id == rig.set_id).unwrap();
            set.clips[0].preset_id = "missing".into();
            set.tracks[0].target = TrackTarget::Group("gone".into());
        }
        assert!(rig.frame(1.0).iter().all(|&v| v == 0));
    }

    #[test]
    fn devices_near_the_end_are_truncated() {
        let mut rig = Rig::new();
        let edge = rig.store.add_device("Edge", PINSPOT_RGBW_ID, 510, vec![]);
        let t = rig
            .store
            .add_track(&rig.set_id, TrackTarget::Device(edge.id))
            .unwrap()
            .id;
        rig.clip(&t, "builtin-white", 1, 1);
        let frame = rig.frame(1.0);
        assert_eq!(frame[509], 134);
        assert_eq!(frame[511], 0);
    }

    #[test]
    fn overlap_diagnostic_lists_shared_devices() {
        let mut rig = Rig::new();
        let a = rig.track();
        let b = rig.track();
        rig.clip(&a, "builtin-red", 1, 2);
        rig.clip(&b, "builtin-strobe-fast", 2, 1);
        rig.store.toggle_mute(&rig.set_id, &b);

        let set = rig.store.set(&rig.set_id).unwrap();
        assert!(overlapping_devices(&rig.store, set, 1.0).is_empty());
        let overlaps = overlapping_devices(&rig.store, set, 2.0);
        assert_eq!(overlaps.get(&rig.device.id).map(|t| t.len()), Some(2));
    }

    #[test]
    fn preview_overwrites_instead_of_adding() {
        let rig = Rig::new();
        let preset = rig.store.preset("builtin-cyan").unwrap();
        let targets = [rig.device.id.clone(), rig.device.id.clone()];
        let frame = preview_frame(&rig.store, preset, &targets);
        assert_eq!(frame[..5], [134, 0, 255, 255, 0]);
    }
}
