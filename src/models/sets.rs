use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Allowed set lengths in beats.
pub const SET_LENGTHS: [u32; 6] = [1, 2, 4, 8, 16, 32];
pub const DEFAULT_SET_LENGTH: u32 = 8;

/// Snap an arbitrary length to the nearest allowed one (ties go up).
pub fn normalize_set_length(length: u32) -> u32 {
    let mut best = SET_LENGTHS[0];
    for &candidate in &SET_LENGTHS {
        if candidate.abs_diff(length) <= best.abs_diff(length) {
            best = candidate;
        }
    }
    best
}

/// What a track addresses.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq, Eq, Hash)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum TrackTarget {
    Device(String),
    Group(String),
}

impl TrackTarget {
    pub fn id(&self) -> &str {
        match self {
            TrackTarget::Device(id) | TrackTarget::Group(id) => id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(rename_all = "camelCase")]
pub struct SetTrack {
    pub id: String,
    pub name: String,
    pub target: TrackTarget,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
}

/// One preset placed on a track. Beats are 1-indexed.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(rename_all = "camelCase")]
pub struct SetClip {
    pub id: String,
    pub track_id: String,
    pub preset_id: String,
    pub start_beat: u32,
    pub duration: u32,
}

impl SetClip {
    /// Half-open `[start, start + duration)`.
    pub fn is_active_at(&self, beat: f64) -> bool {
        let start = self.start_beat as f64;
        let end = start + self.duration as f64;
        start <= beat && beat < end
    }

    /// Last beat covered, inclusive.
    pub fn end_beat(&self) -> u32 {
        self.start_beat.saturating_add(self.duration).saturating_sub(1)
    }

    pub fn overlaps(&self, start: u32, duration: u32) -> bool {
        let end = start.saturating_add(duration);
        self.start_beat < end && start < self.start_beat.saturating_add(self.duration)
    }
}

/// The live timeline.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(rename_all = "camelCase")]
pub struct Set {
    pub id: String,
    pub name: String,
    pub length: u32,
    #[serde(default)]
    pub tracks: Vec<SetTrack>,
    #[serde(default)]
    pub clips: Vec<SetClip>,
}

impl Set {
    pub fn track(&self, id: &str) -> Option<&SetTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn has_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    pub fn active_clips(&self, beat: f64) -> impl Iterator<Item = &SetClip> {
        self.clips.iter().filter(move |c| c.is_active_at(beat))
    }

    /// Whether a track may sound given the set's mute/solo state.
    pub fn is_audible(&self, track: &SetTrack, has_solo: bool) -> bool {
        !track.muted && (!has_solo || track.solo)
    }
}

/// Reusable blueprint of tracks and clip placements.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub name: String,
    pub length: u32,
    pub tracks: Vec<SetTrack>,
    pub clips: Vec<SetClip>,
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub id: String,
    pub set_id: String,
    pub repeat_count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/sets.ts")]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub entries: Vec<PlaylistEntry>,
    #[serde(default)]
    pub loop_playlist: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(start: u32, duration: u32) -> SetClip {
        SetClip {
            id: "c".into(),
            track_id: "t".into(),
            preset_id: "p".into(),
            start_beat: start,
            duration,
        }
    }

    #[test]
    fn clip_interval_is_half_open() {
        let c = clip(1, 2);
        assert!(c.is_active_at(1.0));
        assert!(c.is_active_at(2.9));
        assert!(!c.is_active_at(3.0));
        assert!(!c.is_active_at(0.5));
        assert_eq!(c.end_beat(), 2);
    }

    #[test]
    fn zero_duration_never_matches() {
        let c = clip(3, 0);
        assert!(!c.is_active_at(3.0));
    }

    #[test]
    fn overlap_detection() {
        let c = clip(3, 2);
        assert!(c.overlaps(4, 1));
        assert!(c.overlaps(1, 3));
        assert!(!c.overlaps(5, 2));
        assert!(!c.overlaps(1, 2));
    }

    #[test]
    fn spans_saturate_at_u32_max() {
        let c = clip(u32::MAX - 2, 4);
        assert_eq!(c.end_beat(), u32::MAX - 1);
        assert!(c.overlaps(u32::MAX - 1, 4));
        assert!(!clip(1, 2).overlaps(u32::MAX, u32::MAX));
    }

    #[test]
    fn set_length_snaps_to_allowed_values() {
        assert_eq!(normalize_set_length(8), 8);
        assert_eq!(normalize_set_length(0), 1);
        assert_eq!(normalize_set_length(3), 4);
        assert_eq!(normalize_set_length(12), 16);
        assert_eq!(normalize_set_length(100), 32);
    }

    #[test]
    fn track_target_serializes_adjacently() {
        let json = serde_json::to_value(TrackTarget::Group("g1".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "group", "id": "g1"}));
    }
}
