//! In-memory entity graph: devices, groups, presets, scenes, sets, playlists.
//!
//! Every mutation bumps `revision`; the engine and the persistence task use it
//! as the dirty signal instead of observing individual fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::fixtures::profiles::{builtin_profiles, is_builtin_preset, BUILTIN_PRESETS};
use crate::models::devices::{Device, DeviceProfile, Group};
use crate::models::presets::{Preset, PresetCategory, PresetValues};
use crate::models::sets::{
    normalize_set_length, Playlist, PlaylistEntry, Scene, Set, SetClip, SetTrack, TrackTarget,
    DEFAULT_SET_LENGTH,
};

/// Key of the entity graph document in the kv store.
pub const STORAGE_KEY: &str = "dmx-store-v3";

const TRACK_COLORS: [&str; 8] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#06b6d4", "#3b82f6", "#8b5cf6", "#ec4899",
];

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Persisted form of the graph. Built-ins are not included.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub sets: Vec<Set>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub active_set_id: Option<String>,
    #[serde(default)]
    pub selected_set_id: Option<String>,
}

/// Clamp a clip into `[1, length]`: `start >= 1`, `start + duration - 1 <= length`.
pub fn clamp_clip(start: u32, duration: u32, length: u32) -> (u32, u32) {
    let length = length.max(1);
    let duration = duration.clamp(1, length);
    let start = start.clamp(1, length - duration + 1);
    (start, duration)
}

#[derive(Debug, Clone)]
pub struct DmxStore {
    profiles: HashMap<String, DeviceProfile>,
    pub devices: Vec<Device>,
    pub groups: Vec<Group>,
    pub presets: Vec<Preset>,
    pub scenes: Vec<Scene>,
    pub sets: Vec<Set>,
    pub playlists: Vec<Playlist>,
    pub active_set_id: Option<String>,
    pub selected_set_id: Option<String>,
    revision: u64,
}

impl Default for DmxStore {
    fn default() -> Self {
        Self::from_snapshot(StoreSnapshot::default())
    }
}

impl DmxStore {
    /// Build a store from persisted data, merging in the built-in profiles and presets.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut presets: Vec<Preset> = BUILTIN_PRESETS.clone();
        presets.extend(
            snapshot
                .presets
                .into_iter()
                .filter(|p| !p.is_built_in && !is_builtin_preset(&p.id)),
        );

        Self {
            profiles,
            devices: snapshot.devices,
            groups: snapshot.groups,
            presets,
            scenes: snapshot.scenes,
            sets: snapshot.sets,
            playlists: snapshot.playlists,
            active_set_id: snapshot.active_set_id,
            selected_set_id: snapshot.selected_set_id,
            revision: 0,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            devices: self.devices.clone(),
            groups: self.groups.clone(),
            presets: self
                .presets
                .iter()
                .filter(|p| !p.is_built_in)
                .cloned()
                .collect(),
            scenes: self.scenes.clone(),
            sets: self.sets.clone(),
            playlists: self.playlists.clone(),
            active_set_id: self.active_set_id.clone(),
            selected_set_id: self.selected_set_id.clone(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn profile(&self, id: &str) -> Option<&DeviceProfile> {
        self.profiles.get(id)
    }

    pub fn add_profile(&mut self, profile: DeviceProfile) {
        self.profiles.insert(profile.id.clone(), profile);
        self.touch();
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn preset(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn presets_for_profile(&self, profile_id: &str) -> Vec<&Preset> {
        self.presets
            .iter()
            .filter(|p| p.profile_id == profile_id)
            .collect()
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    pub fn set(&self, id: &str) -> Option<&Set> {
        self.sets.iter().find(|s| s.id == id)
    }

    fn set_mut(&mut self, id: &str) -> Option<&mut Set> {
        self.sets.iter_mut().find(|s| s.id == id)
    }

    pub fn active_set(&self) -> Option<&Set> {
        self.active_set_id.as_deref().and_then(|id| self.set(id))
    }

    pub fn selected_set(&self) -> Option<&Set> {
        self.selected_set_id.as_deref().and_then(|id| self.set(id))
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }

    /// Devices a track target resolves to. Missing ids resolve to nothing.
    pub fn target_devices(&self, target: &TrackTarget) -> Vec<&Device> {
        match target {
            TrackTarget::Device(id) => self.device(id).into_iter().collect(),
            TrackTarget::Group(id) => match self.group(id) {
                Some(group) => self
                    .devices
                    .iter()
                    .filter(|d| group.device_ids.contains(&d.id))
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    fn target_name(&self, target: &TrackTarget) -> Option<String> {
        match target {
            TrackTarget::Device(id) => self.device(id).map(|d| d.name.clone()),
            TrackTarget::Group(id) => self.group(id).map(|g| g.name.clone()),
        }
    }

    // ========================================================================
    // Devices
    // ========================================================================

    pub fn add_device(
        &mut self,
        name: &str,
        profile_id: &str,
        start_channel: u16,
        tags: Vec<String>,
    ) -> Device {
        let device = Device {
            id: new_id(),
            name: name.to_string(),
            profile_id: profile_id.to_string(),
            start_channel: start_channel.clamp(1, 512),
            tags,
        };
        self.devices.push(device.clone());
        self.touch();
        device
    }

    pub fn update_device(&mut self, device: Device) -> bool {
        let Some(existing) = self.devices.iter_mut().find(|d| d.id == device.id) else {
            return false;
        };
        *existing = Device {
            start_channel: device.start_channel.clamp(1, 512),
            ..device
        };
        self.touch();
        true
    }

    /// Removes the device from groups and drops tracks (and their clips) targeting it.
    pub fn remove_device(&mut self, id: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.id != id);
        if self.devices.len() == before {
            return false;
        }
        for group in &mut self.groups {
            group.device_ids.retain(|d| d != id);
        }
        self.remove_tracks_targeting(&TrackTarget::Device(id.to_string()));
        self.touch();
        true
    }

    fn remove_tracks_targeting(&mut self, target: &TrackTarget) {
        for set in &mut self.sets {
            let doomed: Vec<String> = set
                .tracks
                .iter()
                .filter(|t| &t.target == target)
                .map(|t| t.id.clone())
                .collect();
            set.clips.retain(|c| !doomed.contains(&c.track_id));
            set.tracks.retain(|t| &t.target != target);
        }
    }

    // ========================================================================
    // Groups
    // ========================================================================

    pub fn add_group(
        &mut self,
        name: &str,
        profile_id: &str,
        device_ids: Vec<String>,
        color: &str,
    ) -> Group {
        let group = Group {
            id: new_id(),
            name: name.to_string(),
            profile_id: profile_id.to_string(),
            device_ids,
            color: color.to_string(),
        };
        self.groups.push(group.clone());
        self.touch();
        group
    }

    pub fn update_group(&mut self, group: Group) -> bool {
        let Some(existing) = self.groups.iter_mut().find(|g| g.id == group.id) else {
            return false;
        };
        *existing = group;
        self.touch();
        true
    }

    pub fn remove_group(&mut self, id: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g.id != id);
        if self.groups.len() == before {
            return false;
        }
        self.remove_tracks_targeting(&TrackTarget::Group(id.to_string()));
        self.touch();
        true
    }

    // ========================================================================
    // Presets
    // ========================================================================

    pub fn add_preset(
        &mut self,
        name: &str,
        profile_id: &str,
        values: PresetValues,
        category: PresetCategory,
    ) -> Preset {
        let preset = Preset {
            id: new_id(),
            name: name.to_string(),
            profile_id: profile_id.to_string(),
            values,
            is_built_in: false,
            category,
        };
        self.presets.push(preset.clone());
        self.touch();
        preset
    }

    /// Built-in presets are immutable; returns false for them.
    pub fn update_preset(&mut self, preset: Preset) -> bool {
        let Some(existing) = self
            .presets
            .iter_mut()
            .find(|p| p.id == preset.id && !p.is_built_in)
        else {
            return false;
        };
        *existing = Preset {
            is_built_in: false,
            ..preset
        };
        self.touch();
        true
    }

    /// Removes a user preset and every clip referencing it.
    pub fn remove_preset(&mut self, id: &str) -> bool {
        match self.preset(id) {
            Some(p) if !p.is_built_in => {}
            _ => return false,
        }
        self.presets.retain(|p| p.id != id);
        for set in &mut self.sets {
            set.clips.retain(|c| c.preset_id != id);
        }
        self.touch();
        true
    }

    // ========================================================================
    // Scenes
    // ========================================================================

    /// Copy a set's tracks and clips into a new scene with fresh ids.
    pub fn save_set_as_scene(&mut self, set_id: &str, name: &str) -> Option<Scene> {
        let set = self.set(set_id)?;
        let (tracks, clips) = remap_timeline(&set.tracks, &set.clips);
        let scene = Scene {
            id: new_id(),
            name: name.to_string(),
            length: set.length,
            tracks,
            clips,
        };
        self.scenes.push(scene.clone());
        self.touch();
        Some(scene)
    }

    /// Replace a set's timeline with a fresh-id copy of a scene.
    pub fn load_scene_to_set(&mut self, scene_id: &str, set_id: &str) -> bool {
        let Some(scene) = self.scene(scene_id).cloned() else {
            return false;
        };
        let Some(set) = self.set_mut(set_id) else {
            return false;
        };
        let (mut tracks, clips) = remap_timeline(&scene.tracks, &scene.clips);
        for track in &mut tracks {
            track.muted = false;
            track.solo = false;
        }
        set.tracks = tracks;
        set.clips = clips;
        set.length = normalize_set_length(scene.length);
        self.touch();
        true
    }

    pub fn rename_scene(&mut self, id: &str, name: &str) -> bool {
        let Some(scene) = self.scenes.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        scene.name = name.to_string();
        self.touch();
        true
    }

    pub fn remove_scene(&mut self, id: &str) -> bool {
        let before = self.scenes.len();
        self.scenes.retain(|s| s.id != id);
        let removed = self.scenes.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    // ========================================================================
    // Sets
    // ========================================================================

    pub fn add_set(&mut self, name: Option<&str>, length: Option<u32>) -> Set {
        let set = Set {
            id: new_id(),
            name: name.unwrap_or("New Set").to_string(),
            length: normalize_set_length(length.unwrap_or(DEFAULT_SET_LENGTH)),
            tracks: Vec::new(),
            clips: Vec::new(),
        };
        self.sets.push(set.clone());
        self.touch();
        set
    }

    pub fn rename_set(&mut self, id: &str, name: &str) -> bool {
        let Some(set) = self.set_mut(id) else {
            return false;
        };
        set.name = name.to_string();
        self.touch();
        true
    }

    /// Change a set's length. Clips that start past the new end are removed
    /// and clips that run past it are trimmed; nothing moves, so tracks stay
    /// free of overlaps.
    pub fn set_length(&mut self, id: &str, length: u32) -> bool {
        let Some(set) = self.set_mut(id) else {
            return false;
        };
        set.length = normalize_set_length(length);
        let len = set.length;
        set.clips.retain_mut(|clip| {
            if clip.start_beat > len {
                return false;
            }
            let start = clip.start_beat.max(1);
            clip.duration = clip.duration.clamp(1, len - start + 1);
            clip.start_beat = start;
            true
        });
        self.touch();
        true
    }

    /// Removes a set, its playlist entries, and clears active/selected pointers to it.
    pub fn remove_set(&mut self, id: &str) -> bool {
        let before = self.sets.len();
        self.sets.retain(|s| s.id != id);
        if self.sets.len() == before {
            return false;
        }
        for playlist in &mut self.playlists {
            playlist.entries.retain(|e| e.set_id != id);
        }
        if self.selected_set_id.as_deref() == Some(id) {
            self.selected_set_id = None;
        }
        if self.active_set_id.as_deref() == Some(id) {
            self.active_set_id = None;
        }
        self.touch();
        true
    }

    /// Unknown ids are ignored so the active pointer never dangles.
    pub fn set_active(&mut self, id: Option<&str>) -> bool {
        if let Some(id) = id {
            if self.set(id).is_none() {
                return false;
            }
        }
        self.active_set_id = id.map(str::to_string);
        self.touch();
        true
    }

    pub fn select_set(&mut self, id: Option<&str>) -> bool {
        if let Some(id) = id {
            if self.set(id).is_none() {
                return false;
            }
        }
        self.selected_set_id = id.map(str::to_string);
        self.touch();
        true
    }

    /// Move the selection through the set list, wrapping at both ends.
    pub fn cycle_selected(&mut self, forward: bool) -> Option<String> {
        if self.sets.is_empty() {
            return None;
        }
        let count = self.sets.len();
        let current = self
            .selected_set_id
            .as_deref()
            .and_then(|id| self.sets.iter().position(|s| s.id == id));

        let next = match (current, forward) {
            (Some(i), true) => (i + 1) % count,
            (None, true) => 0,
            (Some(0), false) | (None, false) => count - 1,
            (Some(i), false) => i - 1,
        };
        let id = self.sets[next].id.clone();
        self.selected_set_id = Some(id.clone());
        self.touch();
        Some(id)
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Adds a track named after its target. The target must exist.
    pub fn add_track(&mut self, set_id: &str, target: TrackTarget) -> Option<SetTrack> {
        let name = self.target_name(&target)?;
        let set = self.set_mut(set_id)?;
        let track = SetTrack {
            id: new_id(),
            name,
            target,
            color: TRACK_COLORS[set.tracks.len() % TRACK_COLORS.len()].to_string(),
            muted: false,
            solo: false,
        };
        set.tracks.push(track.clone());
        self.touch();
        Some(track)
    }

    pub fn update_track(&mut self, set_id: &str, track: SetTrack) -> bool {
        let Some(set) = self.set_mut(set_id) else {
            return false;
        };
        let Some(existing) = set.tracks.iter_mut().find(|t| t.id == track.id) else {
            return false;
        };
        *existing = track;
        self.touch();
        true
    }

    pub fn remove_track(&mut self, set_id: &str, track_id: &str) -> bool {
        let Some(set) = self.set_mut(set_id) else {
            return false;
        };
        let before = set.tracks.len();
        set.tracks.retain(|t| t.id != track_id);
        if set.tracks.len() == before {
            return false;
        }
        set.clips.retain(|c| c.track_id != track_id);
        self.touch();
        true
    }

    pub fn toggle_mute(&mut self, set_id: &str, track_id: &str) -> Option<bool> {
        let track = self
            .set_mut(set_id)?
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)?;
        track.muted = !track.muted;
        let muted = track.muted;
        self.touch();
        Some(muted)
    }

    pub fn toggle_solo(&mut self, set_id: &str, track_id: &str) -> Option<bool> {
        let track = self
            .set_mut(set_id)?
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)?;
        track.solo = !track.solo;
        let solo = track.solo;
        self.touch();
        Some(solo)
    }

    // ========================================================================
    // Clips
    // ========================================================================

    /// Whether `[start, start + duration)` fits the set and is free on the track.
    pub fn can_place_clip(
        &self,
        set_id: &str,
        track_id: &str,
        start: u32,
        duration: u32,
        exclude_clip: Option<&str>,
    ) -> bool {
        let Some(set) = self.set(set_id) else {
            return false;
        };
        if start < 1 || duration < 1 || start.saturating_add(duration - 1) > set.length {
            return false;
        }
        !set.clips.iter().any(|c| {
            c.track_id == track_id
                && Some(c.id.as_str()) != exclude_clip
                && c.overlaps(start, duration)
        })
    }

    /// Place a clip, clamped into the set. Returns None when the track is
    /// missing or the clamped span overlaps another clip on the track.
    pub fn add_clip(
        &mut self,
        set_id: &str,
        track_id: &str,
        preset_id: &str,
        start: u32,
        duration: u32,
    ) -> Option<SetClip> {
        let set = self.set(set_id)?;
        set.track(track_id)?;
        let (start, duration) = clamp_clip(start, duration, set.length);
        if !self.can_place_clip(set_id, track_id, start, duration, None) {
            return None;
        }

        let clip = SetClip {
            id: new_id(),
            track_id: track_id.to_string(),
            preset_id: preset_id.to_string(),
            start_beat: start,
            duration,
        };
        self.set_mut(set_id)?.clips.push(clip.clone());
        self.touch();
        Some(clip)
    }

    /// Move or resize a clip under the same clamping and overlap rules.
    pub fn move_clip(&mut self, set_id: &str, clip_id: &str, start: u32, duration: u32) -> bool {
        let Some(set) = self.set(set_id) else {
            return false;
        };
        let Some(track_id) = set
            .clips
            .iter()
            .find(|c| c.id == clip_id)
            .map(|c| c.track_id.clone())
        else {
            return false;
        };
        let (start, duration) = clamp_clip(start, duration, set.length);
        if !self.can_place_clip(set_id, &track_id, start, duration, Some(clip_id)) {
            return false;
        }
        let Some(clip) = self
            .set_mut(set_id)
            .and_then(|s| s.clips.iter_mut().find(|c| c.id == clip_id))
        else {
            return false;
        };
        clip.start_beat = start;
        clip.duration = duration;
        self.touch();
        true
    }

    pub fn set_clip_preset(&mut self, set_id: &str, clip_id: &str, preset_id: &str) -> bool {
        let Some(clip) = self
            .set_mut(set_id)
            .and_then(|s| s.clips.iter_mut().find(|c| c.id == clip_id))
        else {
            return false;
        };
        clip.preset_id = preset_id.to_string();
        self.touch();
        true
    }

    pub fn remove_clip(&mut self, set_id: &str, clip_id: &str) -> bool {
        let Some(set) = self.set_mut(set_id) else {
            return false;
        };
        let before = set.clips.len();
        set.clips.retain(|c| c.id != clip_id);
        let removed = set.clips.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    // ========================================================================
    // Playlists
    // ========================================================================

    pub fn add_playlist(&mut self, name: &str, loop_playlist: bool) -> Playlist {
        let playlist = Playlist {
            id: new_id(),
            name: name.to_string(),
            entries: Vec::new(),
            loop_playlist,
        };
        self.playlists.push(playlist.clone());
        self.touch();
        playlist
    }

    pub fn rename_playlist(&mut self, id: &str, name: &str) -> bool {
        let Some(playlist) = self.playlists.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        playlist.name = name.to_string();
        self.touch();
        true
    }

    pub fn add_playlist_entry(
        &mut self,
        playlist_id: &str,
        set_id: &str,
        repeat_count: u32,
    ) -> Option<PlaylistEntry> {
        self.set(set_id)?;
        let playlist = self.playlists.iter_mut().find(|p| p.id == playlist_id)?;
        let entry = PlaylistEntry {
            id: new_id(),
            set_id: set_id.to_string(),
            repeat_count: repeat_count.max(1),
        };
        playlist.entries.push(entry.clone());
        self.touch();
        Some(entry)
    }

    pub fn remove_playlist_entry(&mut self, playlist_id: &str, entry_id: &str) -> bool {
        let Some(playlist) = self.playlists.iter_mut().find(|p| p.id == playlist_id) else {
            return false;
        };
        let before = playlist.entries.len();
        playlist.entries.retain(|e| e.id != entry_id);
        let removed = playlist.entries.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn remove_playlist(&mut self, id: &str) -> bool {
        let before = self.playlists.len();
        self.playlists.retain(|p| p.id != id);
        let removed = self.playlists.len() != before;
        if removed {
            self.touch();
        }
        removed
    }
}

/// Copy tracks and clips with fresh ids, pointing clips at the new track ids.
fn remap_timeline(tracks: &[SetTrack], clips: &[SetClip]) -> (Vec<SetTrack>, Vec<SetClip>) {
    let mut id_map: HashMap<&str, String> = HashMap::new();
    let new_tracks = tracks
        .iter()
        .map(|t| {
            let id = new_id();
            id_map.insert(t.id.as_str(), id.clone());
            SetTrack { id, ..t.clone() }
        })
        .collect();
    let new_clips = clips
        .iter()
        .map(|c| SetClip {
            id: new_id(),
            track_id: id_map
                .get(c.track_id.as_str())
                .cloned()
                .unwrap_or_else(|| c.track_id.clone()),
            ..c.clone()
        })
        .collect();
    (new_tracks, new_clips)
}
