//! Persisted documents: load at startup, write back when a revision moves.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::database::local::{kv, settings as settings_db};
use crate::midi::mapper::STORAGE_KEY as MIDI_MAPPINGS_KEY;
use crate::models::audio::{AudioChannelMapping, DimmerChannelOverride};
use crate::models::midi::MidiMapping;
use crate::render_engine::{EngineConfig, LoopHandle, RenderEngine, Revisions};
use crate::settings::AppSettings;
use crate::store::{DmxStore, StoreSnapshot, STORAGE_KEY as STORE_KEY};

pub const DIMMER_CONFIG_KEY: &str = "dmx-dimmer-config";
pub const AUDIO_MAPPINGS_KEY: &str = "dmx-audio-mappings";
pub const SAVE_INTERVAL: Duration = Duration::from_secs(1);

pub struct LoadedState {
    pub store: DmxStore,
    pub midi_mappings: Vec<MidiMapping>,
    pub dimmer_overrides: Vec<DimmerChannelOverride>,
    pub audio_mappings: Vec<AudioChannelMapping>,
}

impl LoadedState {
    pub fn engine_config(self, settings: &AppSettings) -> (DmxStore, EngineConfig) {
        let mut config = EngineConfig::from_settings(settings);
        config.midi_mappings = self.midi_mappings;
        config.dimmer_overrides = self.dimmer_overrides;
        config.global_audio.channel_mappings = self.audio_mappings;
        (self.store, config)
    }
}

/// A document that no longer parses is logged and replaced by its default.
async fn load_or_default<T>(pool: &SqlitePool, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match kv::load_json::<T>(pool, key).await {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            log::warn!("[Persistence] {}, starting empty", e);
            T::default()
        }
    }
}

pub async fn load_state(pool: &SqlitePool) -> LoadedState {
    let snapshot: StoreSnapshot = load_or_default(pool, STORE_KEY).await;
    let state = LoadedState {
        store: DmxStore::from_snapshot(snapshot),
        midi_mappings: load_or_default(pool, MIDI_MAPPINGS_KEY).await,
        dimmer_overrides: load_or_default(pool, DIMMER_CONFIG_KEY).await,
        audio_mappings: load_or_default(pool, AUDIO_MAPPINGS_KEY).await,
    };
    log::info!(
        "[Persistence] loaded {} devices, {} sets",
        state.store.devices.len(),
        state.store.sets.len()
    );
    state
}

/// Write every document whose revision moved since `last`.
pub async fn save_changed(
    engine: &RenderEngine,
    pool: &SqlitePool,
    last: &mut Revisions,
) -> Result<(), String> {
    let current = engine.revisions();

    if current.store != last.store {
        let snapshot = engine.read_store(|store| store.snapshot());
        kv::save_json(pool, STORE_KEY, &snapshot).await?;
    }
    if current.midi != last.midi {
        let mappings = engine.with_midi_mapper(|mapper| mapper.mappings().to_vec());
        kv::save_json(pool, MIDI_MAPPINGS_KEY, &mappings).await?;
    }
    if current.config != last.config {
        let modulation = engine.modulation();
        kv::save_json(pool, DIMMER_CONFIG_KEY, &modulation.dimmer_overrides).await?;
        kv::save_json(
            pool,
            AUDIO_MAPPINGS_KEY,
            &modulation.global_audio.channel_mappings,
        )
        .await?;
        for (key, value) in engine.settings_entries() {
            settings_db::update_setting(pool, key, &value).await?;
        }
    }

    *last = current;
    Ok(())
}

/// Periodically flush changes; stopping performs one last flush.
pub fn spawn_persistence_loop(engine: RenderEngine, pool: SqlitePool) -> LoopHandle {
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let task = tokio::spawn(async move {
        let mut last = engine.revisions();
        let mut ticker = tokio::time::interval(SAVE_INTERVAL);
        loop {
            let stopping = tokio::select! {
                _ = stop_rx.recv() => true,
                _ = ticker.tick() => false,
            };
            if let Err(e) = save_changed(&engine, &pool, &mut last).await {
                log::error!("[Persistence] {}", e);
            }
            if stopping {
                break;
            }
        }
        log::info!("[Persistence] stopped");
    });
    LoopHandle::new(stop_tx, task)
}
