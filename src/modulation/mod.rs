//! Modulation pipeline layered over a composed frame, in fixed order:
//! per-preset audio gates, the global audio layer, then the master dimmer.

pub mod audio;
pub mod dimmer;

use serde::{Deserialize, Serialize};

use crate::models::audio::{AudioLevels, DimmerChannelOverride, GlobalAudioConfig};
use crate::models::sets::Set;
use crate::store::DmxStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModulationConfig {
    pub global_audio: GlobalAudioConfig,
    /// 0-100.
    pub master_dimmer: f64,
    pub dimmer_overrides: Vec<DimmerChannelOverride>,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            global_audio: GlobalAudioConfig::default(),
            master_dimmer: dimmer::MASTER_MAX,
            dimmer_overrides: Vec::new(),
        }
    }
}

impl ModulationConfig {
    /// Replaces any existing override for the same channel.
    pub fn add_dimmer_override(&mut self, config: DimmerChannelOverride) {
        self.dimmer_overrides.retain(|c| c.channel != config.channel);
        self.dimmer_overrides.push(config);
    }

    pub fn remove_dimmer_override(&mut self, channel: u16) {
        self.dimmer_overrides.retain(|c| c.channel != channel);
    }
}

/// Run every stage over `mix`. `set` is None when nothing is active.
pub fn apply(
    mix: &mut [u8],
    store: &DmxStore,
    set: Option<&Set>,
    beat: f64,
    levels: &AudioLevels,
    config: &ModulationConfig,
) {
    if let Some(set) = set {
        audio::apply_preset_audio(mix, store, set, beat, levels);
    }
    audio::apply_global_audio(mix, store, &config.global_audio, levels);
    dimmer::apply_master_dimmer(mix, store, config.master_dimmer, &config.dimmer_overrides);
}
