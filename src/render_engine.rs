//! Render Engine
//!
//! Owns all playback state (store, clocks, scheduler, modulation, output gate)
//! behind one lock. A ~60 Hz tick reads the active beat clock, lets the
//! scheduler switch sets on boundaries, recomposes when something relevant
//! changed, and hands the frame to the output gate. Commands from other tasks
//! (MIDI, audio, control surfaces) go through the same lock, so a tick never
//! observes half-applied state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broadcast::{BroadcastMessage, Broadcaster};
use crate::clock::internal::InternalClock;
use crate::clock::tap::TapTempo;
use crate::clock::{self, BeatClock};
use crate::compositor::{self, Frame};
use crate::midi::mapper::{DimmerSmoother, MidiCommand, MidiMapper, MidiOutcome};
use crate::models::audio::{
    AudioBand, AudioChannelMapping, AudioLevels, DimmerChannelOverride, GlobalAudioConfig,
};
use crate::models::midi::{MidiAction, MidiMapping, MidiMessage};
use crate::models::mix::{AppMode, ClockReading, MixState};
use crate::models::sets::Set;
use crate::modulation::audio::has_preset_audio;
use crate::modulation::dimmer::clamp_master;
use crate::modulation::{self, ModulationConfig};
use crate::output::{OutputGate, OutputHandle, DEFAULT_HARDWARE_CHANNELS};
use crate::scheduler::{BankQueue, QueueScheduler, Transition};
use crate::settings::AppSettings;
use crate::store::DmxStore;
use crate::timeline;

pub const TICK_INTERVAL: Duration = Duration::from_millis(16);
/// Channels carried through modulation before the gate fits them to hardware.
pub const MIX_CHANNELS: usize = 100;

/// Startup configuration, usually derived from [`AppSettings`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub quantum: u32,
    pub internal_tempo: f64,
    pub loop_current: bool,
    pub hardware_channels: usize,
    pub global_audio: GlobalAudioConfig,
    pub dimmer_overrides: Vec<DimmerChannelOverride>,
    pub midi_mappings: Vec<MidiMapping>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantum: beatlink::DEFAULT_QUANTUM,
            internal_tempo: clock::internal::DEFAULT_TEMPO,
            loop_current: true,
            hardware_channels: DEFAULT_HARDWARE_CHANNELS,
            global_audio: GlobalAudioConfig::default(),
            dimmer_overrides: Vec::new(),
            midi_mappings: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            quantum: settings.quantum,
            internal_tempo: settings.internal_tempo,
            loop_current: settings.loop_current,
            hardware_channels: settings.hardware_channels,
            global_audio: GlobalAudioConfig {
                enabled: settings.global_audio_enabled,
                band: settings.audio_band,
                sensitivity: settings.audio_sensitivity,
                min_level: settings.audio_min_level,
                channel_mappings: Vec::new(),
            },
            ..Self::default()
        }
    }
}

/// Change counters for the persisted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Revisions {
    pub store: u64,
    pub midi: u64,
    pub config: u64,
}

/// Everything the recomposition depends on besides audio levels.
#[derive(Debug, Clone, PartialEq)]
struct RenderKey {
    set_id: String,
    beat_in_set: u32,
    store_revision: u64,
    mixer_revision: u64,
}

#[derive(Clone)]
pub struct RenderEngine {
    inner: Arc<Mutex<RenderEngineInner>>,
    broadcaster: Broadcaster,
}

struct RenderEngineInner {
    store: DmxStore,
    mode: AppMode,
    quantum: u32,
    is_playing: bool,
    blackout: bool,
    loop_enabled: bool,

    internal: InternalClock,
    external: Option<Box<dyn BeatClock>>,
    tap: TapTempo,
    last_reading: Option<ClockReading>,

    scheduler: QueueScheduler,
    beat_in_set: u32,

    modulation: ModulationConfig,
    levels: AudioLevels,
    mixer_revision: u64,
    config_revision: u64,

    mapper: MidiMapper,
    smoother: DimmerSmoother,

    gate: OutputGate,
    output: Option<OutputHandle>,
    raw: Option<Frame>,
    last_key: Option<RenderKey>,

    outbox: Vec<BroadcastMessage>,
}

impl Default for RenderEngine {
    fn default() -> Self {
        Self::new(DmxStore::default(), EngineConfig::default())
    }
}

impl RenderEngine {
    pub fn new(store: DmxStore, config: EngineConfig) -> Self {
        let modulation = ModulationConfig {
            global_audio: config.global_audio,
            dimmer_overrides: config.dimmer_overrides,
            ..ModulationConfig::default()
        };
        let inner = RenderEngineInner {
            store,
            mode: AppMode::Testing,
            quantum: config.quantum.max(1),
            is_playing: false,
            blackout: false,
            loop_enabled: true,
            internal: InternalClock::new(config.internal_tempo),
            external: None,
            tap: TapTempo::new(),
            last_reading: None,
            scheduler: QueueScheduler::new(config.loop_current),
            beat_in_set: 1,
            smoother: DimmerSmoother::new(modulation.master_dimmer),
            modulation,
            levels: AudioLevels::default(),
            mixer_revision: 0,
            config_revision: 0,
            mapper: MidiMapper::new(config.midi_mappings),
            gate: OutputGate::new(config.hardware_channels),
            output: None,
            raw: None,
            last_key: None,
            outbox: Vec::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            broadcaster: Broadcaster::new(),
        }
    }

    /// Run `f` under the lock, then publish whatever it queued for observers.
    fn with_inner<R>(&self, f: impl FnOnce(&mut RenderEngineInner) -> R) -> R {
        let (result, outbox) = {
            let mut guard = self.inner.lock().expect("render engine poisoned");
            let result = f(&mut guard);
            (result, std::mem::take(&mut guard.outbox))
        };
        for message in outbox {
            self.broadcaster.publish(message);
        }
        result
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    // ========================================================================
    // Tick
    // ========================================================================

    pub fn tick(&self, now: Instant) {
        self.with_inner(|inner| inner.tick(now));
    }

    /// New band levels. Only the modulation stages re-run, over the cached
    /// composition of the current beat.
    pub fn set_audio_levels(&self, levels: AudioLevels) {
        self.with_inner(|inner| inner.on_audio(levels));
    }

    pub fn audio_levels(&self) -> AudioLevels {
        self.with_inner(|inner| inner.levels)
    }

    // ========================================================================
    // Hardware and clock attachment
    // ========================================================================

    pub fn attach_output(&self, output: OutputHandle) {
        self.with_inner(|inner| {
            log::info!("[SetPlayer] output attached: {}", output.name());
            inner.output = Some(output);
            inner.gate.reset_memo();
        });
    }

    /// Performance mode falls back to testing without an output.
    pub fn detach_output(&self) -> Option<OutputHandle> {
        self.with_inner(|inner| {
            let output = inner.output.take();
            if inner.mode == AppMode::Performance {
                inner.set_mode(AppMode::Testing);
            }
            output
        })
    }

    pub fn has_output(&self) -> bool {
        self.with_inner(|inner| inner.output.is_some())
    }

    pub fn attach_external_clock(&self, clock: Box<dyn BeatClock>) {
        self.with_inner(|inner| {
            inner.external = Some(clock);
            inner.last_key = None;
        });
    }

    pub fn detach_external_clock(&self) {
        self.with_inner(|inner| {
            inner.external = None;
            inner.last_key = None;
            if inner.mode == AppMode::Performance {
                log::warn!("[SetPlayer] external clock gone, running on internal clock");
            }
        });
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub fn play(&self) {
        self.with_inner(|inner| inner.play());
    }

    pub fn stop(&self) {
        self.with_inner(|inner| inner.stop());
    }

    pub fn is_playing(&self) -> bool {
        self.with_inner(|inner| inner.is_playing)
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.with_inner(|inner| {
            inner.loop_enabled = enabled;
            inner.last_key = None;
        });
    }

    pub fn mode(&self) -> AppMode {
        self.with_inner(|inner| inner.mode)
    }

    /// Performance mode needs a hardware output.
    pub fn set_mode(&self, mode: AppMode) -> Result<(), String> {
        self.with_inner(|inner| {
            if mode == AppMode::Performance && inner.output.is_none() {
                return Err("Connect a hardware output before entering performance mode".into());
            }
            inner.set_mode(mode);
            Ok(())
        })
    }

    pub fn trigger_blackout(&self) {
        self.with_inner(|inner| inner.set_blackout(true));
    }

    pub fn release_blackout(&self) {
        self.with_inner(|inner| inner.set_blackout(false));
    }

    pub fn toggle_blackout(&self) -> bool {
        self.with_inner(|inner| {
            let next = !inner.blackout;
            inner.set_blackout(next);
            next
        })
    }

    /// Clamped to 0-100. Forces a fresh transmission.
    pub fn set_master_dimmer(&self, value: f64) -> f64 {
        self.with_inner(|inner| {
            let value = inner.apply_master(value);
            inner.smoother.sync(value);
            inner.gate.reset_memo();
            inner.render_now();
            value
        })
    }

    pub fn master_dimmer(&self) -> f64 {
        self.with_inner(|inner| inner.modulation.master_dimmer)
    }

    // ========================================================================
    // Internal clock and tempo
    // ========================================================================

    pub fn start_internal_clock(&self, now: Instant) {
        self.with_inner(|inner| inner.internal.start(now));
    }

    pub fn stop_internal_clock(&self) {
        self.with_inner(|inner| inner.internal.stop());
    }

    pub fn toggle_internal_clock(&self, now: Instant) -> bool {
        self.with_inner(|inner| {
            if inner.internal.is_running() {
                inner.internal.stop();
            } else {
                inner.internal.start(now);
            }
            inner.internal.is_running()
        })
    }

    /// Advance the internal clock by one beat and run a tick on it, so a
    /// manual step passes through the scheduler like a timed beat.
    pub fn step_internal_clock(&self) {
        self.with_inner(|inner| {
            inner.internal.step();
            inner.tick(Instant::now());
        });
    }

    /// Sets the tempo of whichever clock is active. Returns the clamped value.
    pub fn set_tempo(&self, bpm: f64) -> f64 {
        self.with_inner(|inner| inner.set_tempo(bpm))
    }

    /// Register a tap; once enough taps exist the tempo is applied and returned.
    pub fn tap_tempo(&self, now: Instant) -> Option<f64> {
        self.with_inner(|inner| {
            let bpm = inner.tap.tap(now)?;
            Some(inner.set_tempo(bpm))
        })
    }

    pub fn clock_reading(&self) -> ClockReading {
        self.with_inner(|inner| inner.current_reading())
    }

    // ========================================================================
    // Sets and queue
    // ========================================================================

    /// Immediate switch, regardless of mode.
    pub fn set_active_set(&self, set_id: Option<&str>) -> bool {
        self.with_inner(|inner| inner.set_active_set(set_id))
    }

    /// Beat-quantized in performance mode, immediate otherwise.
    pub fn schedule_switch(&self, set_id: &str) -> bool {
        self.with_inner(|inner| inner.schedule_switch(set_id))
    }

    pub fn delete_set(&self, set_id: &str) -> bool {
        self.with_inner(|inner| {
            let was_active = inner.store.active_set_id.as_deref() == Some(set_id);
            if !inner.store.remove_set(set_id) {
                return false;
            }
            inner.scheduler.forget(set_id);
            if was_active {
                inner.last_key = None;
                inner.render_now();
            }
            true
        })
    }

    pub fn queue_add(&self, set_id: &str) {
        self.with_inner(|inner| inner.scheduler.queue.add(set_id));
    }

    pub fn queue_play_next(&self, set_id: &str) {
        self.with_inner(|inner| inner.scheduler.queue.play_next(set_id));
    }

    pub fn queue_remove(&self, set_id: &str) {
        self.with_inner(|inner| inner.scheduler.queue.remove(set_id));
    }

    pub fn queue_move_up(&self, set_id: &str) {
        self.with_inner(|inner| inner.scheduler.queue.move_up(set_id));
    }

    pub fn queue_move_down(&self, set_id: &str) {
        self.with_inner(|inner| inner.scheduler.queue.move_down(set_id));
    }

    pub fn queue_clear(&self) {
        self.with_inner(|inner| inner.scheduler.queue.clear());
    }

    pub fn toggle_loop_current(&self) -> bool {
        self.with_inner(|inner| {
            inner.config_revision += 1;
            inner.scheduler.queue.toggle_loop()
        })
    }

    pub fn queue(&self) -> BankQueue {
        self.with_inner(|inner| inner.scheduler.queue.clone())
    }

    pub fn pending_set_id(&self) -> Option<String> {
        self.with_inner(|inner| inner.scheduler.pending().map(str::to_string))
    }

    // ========================================================================
    // Store access
    // ========================================================================

    /// Mutate the entity graph. The next tick recomposes if the revision moved.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut DmxStore) -> R) -> R {
        self.with_inner(|inner| f(&mut inner.store))
    }

    pub fn read_store<R>(&self, f: impl FnOnce(&DmxStore) -> R) -> R {
        self.with_inner(|inner| f(&inner.store))
    }

    // ========================================================================
    // Modulation config
    // ========================================================================

    pub fn modulation(&self) -> ModulationConfig {
        self.with_inner(|inner| inner.modulation.clone())
    }

    pub fn set_global_audio_enabled(&self, enabled: bool) {
        self.with_inner(|inner| inner.update_mixer(|m| m.global_audio.enabled = enabled));
    }

    pub fn set_audio_band(&self, band: AudioBand) {
        self.with_inner(|inner| inner.update_mixer(|m| m.global_audio.band = band));
    }

    pub fn set_audio_sensitivity(&self, value: f64) {
        self.with_inner(|inner| inner.update_mixer(|m| m.global_audio.set_sensitivity(value)));
    }

    pub fn set_audio_min_level(&self, value: f64) {
        self.with_inner(|inner| inner.update_mixer(|m| m.global_audio.set_min_level(value)));
    }

    pub fn set_audio_mappings(&self, mappings: Vec<AudioChannelMapping>) {
        self.with_inner(|inner| inner.update_mixer(|m| m.global_audio.channel_mappings = mappings));
    }

    pub fn add_dimmer_override(&self, config: DimmerChannelOverride) {
        self.with_inner(|inner| inner.update_mixer(|m| m.add_dimmer_override(config)));
    }

    pub fn remove_dimmer_override(&self, channel: u16) {
        self.with_inner(|inner| inner.update_mixer(|m| m.remove_dimmer_override(channel)));
    }

    pub fn clear_dimmer_overrides(&self) {
        self.with_inner(|inner| inner.update_mixer(|m| m.dimmer_overrides.clear()));
    }

    // ========================================================================
    // MIDI
    // ========================================================================

    pub fn handle_midi(&self, message: &MidiMessage, now: Instant) -> MidiOutcome {
        self.with_inner(|inner| {
            let outcome = inner.mapper.handle(message);
            if let MidiOutcome::Command(command) = &outcome {
                inner.execute(command.clone(), now);
            }
            outcome
        })
    }

    pub fn start_midi_learning(&self, action: MidiAction) {
        self.with_inner(|inner| inner.mapper.start_learning(action));
    }

    pub fn cancel_midi_learning(&self) {
        self.with_inner(|inner| inner.mapper.cancel_learning());
    }

    pub fn with_midi_mapper<R>(&self, f: impl FnOnce(&mut MidiMapper) -> R) -> R {
        self.with_inner(|inner| f(&mut inner.mapper))
    }

    // ========================================================================
    // Preview and diagnostics
    // ========================================================================

    /// Send one preset on the given devices straight to hardware. Bypasses the
    /// gate memo, so the next regular frame is still compared against what
    /// playback last sent.
    pub fn preview_preset(&self, preset_id: &str, device_ids: &[String]) -> bool {
        self.with_inner(|inner| {
            let Some(preset) = inner.store.preset(preset_id) else {
                return false;
            };
            let frame = compositor::preview_frame(&inner.store, preset, device_ids);
            inner.send_direct(&frame);
            true
        })
    }

    /// Send the raw composition of the current beat, without modulation.
    pub fn preview_current_beat(&self) {
        self.with_inner(|inner| {
            if inner.blackout {
                inner.emit_blackout();
                return;
            }
            let reading = inner.current_reading();
            let Some(beat) = inner.position(&reading) else {
                return;
            };
            let Some(set) = inner.store.active_set() else {
                return;
            };
            let frame = compositor::compose(&inner.store, set, beat as f64);
            inner.send_direct(&frame);
        })
    }

    /// Devices driven by more than one track at the current beat.
    pub fn overlapping_devices(&self) -> BTreeMap<String, Vec<String>> {
        self.with_inner(|inner| {
            let reading = inner.current_reading();
            match (inner.position(&reading), inner.store.active_set()) {
                (Some(beat), Some(set)) => {
                    compositor::overlapping_devices(&inner.store, set, beat as f64)
                }
                _ => BTreeMap::new(),
            }
        })
    }

    pub fn mix_state(&self) -> MixState {
        self.with_inner(|inner| inner.mix_state())
    }

    // ========================================================================
    // Persistence hooks
    // ========================================================================

    pub fn revisions(&self) -> Revisions {
        self.with_inner(|inner| Revisions {
            store: inner.store.revision(),
            midi: inner.mapper.revision(),
            config: inner.config_revision,
        })
    }

    /// Settings rows reflecting the live engine.
    pub fn settings_entries(&self) -> Vec<(&'static str, String)> {
        self.with_inner(|inner| {
            let audio = &inner.modulation.global_audio;
            let mode = match inner.mode {
                AppMode::Testing => "testing",
                AppMode::Performance => "performance",
            };
            let band = match audio.band {
                AudioBand::Bass => "bass",
                AudioBand::Mid => "mid",
                AudioBand::High => "high",
            };
            vec![
                ("app_mode", mode.to_string()),
                ("internal_tempo", inner.internal.tempo().to_string()),
                ("loop_current", inner.scheduler.queue.loop_current.to_string()),
                ("global_audio_enabled", audio.enabled.to_string()),
                ("audio_band", band.to_string()),
                ("audio_sensitivity", audio.sensitivity.to_string()),
                ("audio_min_level", audio.min_level.to_string()),
            ]
        })
    }

    // ========================================================================
    // Loops and lifecycle
    // ========================================================================

    /// Spawn the ~60 Hz tick loop.
    pub fn spawn_tick_loop(&self) -> LoopHandle {
        let engine = self.clone();
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => engine.tick(Instant::now()),
                }
            }
            log::info!("[SetPlayer] tick loop stopped");
        });
        LoopHandle { stop_tx, task }
    }

    /// Feed controller messages into the mapper until the sender closes.
    pub fn spawn_midi_loop(
        &self,
        mut rx: mpsc::UnboundedReceiver<MidiMessage>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                engine.handle_midi(&message, Instant::now());
            }
            log::info!("[MidiMapper] input closed");
        })
    }

    /// Stop playback with a final blackout and halt the internal clock.
    pub fn shutdown(&self) {
        self.with_inner(|inner| {
            inner.scheduler.cancel_pending();
            inner.internal.stop();
            inner.is_playing = false;
            inner.gate.reset_memo();
            inner.emit_blackout();
        });
        log::info!("[SetPlayer] shut down");
    }
}

/// Stop signal plus join handle for a background loop.
pub struct LoopHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn new(stop_tx: mpsc::Sender<()>, task: JoinHandle<()>) -> Self {
        Self { stop_tx, task }
    }

    /// Signal the loop and wait for it to finish its last iteration.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// First `MIX_CHANNELS` of a raw frame with every modulation stage applied.
fn modulate(
    raw: &Frame,
    store: &DmxStore,
    set: &Set,
    beat: u32,
    levels: &AudioLevels,
    config: &ModulationConfig,
) -> Vec<u8> {
    let mut mix = raw[..MIX_CHANNELS].to_vec();
    modulation::apply(&mut mix, store, Some(set), beat as f64, levels, config);
    mix
}

impl RenderEngineInner {
    fn active_clock(&self) -> &dyn BeatClock {
        clock::select(self.mode, &self.internal, self.external.as_deref())
    }

    fn current_reading(&self) -> ClockReading {
        self.active_clock().read()
    }

    /// 1-indexed position in the active set, or None when nothing is active.
    fn position(&self, reading: &ClockReading) -> Option<u32> {
        let set = self.store.active_set()?;
        Some(timeline::beat_in_set(
            reading,
            set.length,
            self.quantum,
            self.loop_enabled,
        ))
    }

    fn tick(&mut self, now: Instant) {
        if self.internal.is_running() {
            self.internal.advance(now);
        }
        if let Some(level) = self.smoother.step() {
            self.apply_master(level);
        }

        let reading = self.current_reading();
        if self.last_reading != Some(reading) {
            self.last_reading = Some(reading);
            self.outbox.push(BroadcastMessage::State(reading));
        }
        if !self.is_playing {
            return;
        }

        if self.mode == AppMode::Performance {
            let beat = timeline::current_beat(&reading);
            let (position, length) = match self.store.active_set() {
                Some(set) => (self.position(&reading).unwrap_or(1), set.length),
                None => (1, 1),
            };
            if let Some(transition) = self.scheduler.on_tick(beat, position, length) {
                self.apply_transition(transition);
            }
        }

        self.render(&reading);
    }

    fn render(&mut self, reading: &ClockReading) {
        if self.blackout {
            self.emit_blackout();
            return;
        }
        let Some(beat) = self.position(reading) else {
            self.emit_blackout();
            return;
        };
        self.beat_in_set = beat;
        if let Some(frame) = self.recompose_if_needed(beat) {
            self.emit(&frame);
        }
    }

    /// Render immediately when playing (commands that must not wait a tick).
    fn render_now(&mut self) {
        if !self.is_playing {
            return;
        }
        let reading = self.current_reading();
        self.render(&reading);
    }

    /// Compose and modulate when the render key moved. Idempotent otherwise.
    fn recompose_if_needed(&mut self, beat: u32) -> Option<Vec<u8>> {
        let set = self.store.active_set()?;
        let key = RenderKey {
            set_id: set.id.clone(),
            beat_in_set: beat,
            store_revision: self.store.revision(),
            mixer_revision: self.mixer_revision,
        };
        if self.last_key.as_ref() == Some(&key) {
            return None;
        }

        let raw = compositor::compose(&self.store, set, beat as f64);
        let frame = modulate(&raw, &self.store, set, beat, &self.levels, &self.modulation);
        self.raw = Some(raw);
        self.last_key = Some(key);
        Some(frame)
    }

    fn on_audio(&mut self, levels: AudioLevels) {
        self.levels = levels;
        if !self.is_playing || self.blackout {
            return;
        }
        let beat = self.beat_in_set;
        let Some(set) = self.store.active_set() else {
            return;
        };
        if !self.modulation.global_audio.enabled
            && !has_preset_audio(&self.store, set, beat as f64)
        {
            return;
        }

        let cached = matches!(
            &self.last_key,
            Some(key) if key.set_id == set.id
                && key.beat_in_set == beat
                && key.store_revision == self.store.revision()
        );
        let fast = match &self.raw {
            Some(raw) if cached => Some(modulate(
                raw,
                &self.store,
                set,
                beat,
                &self.levels,
                &self.modulation,
            )),
            _ => None,
        };
        let frame = match fast {
            Some(frame) => frame,
            None => {
                self.last_key = None;
                match self.recompose_if_needed(beat) {
                    Some(frame) => frame,
                    None => return,
                }
            }
        };
        self.emit(&frame);
    }

    fn emit(&mut self, frame: &[u8]) {
        if let Some(out) = self.gate.emit(frame) {
            if let Some(output) = &self.output {
                if !output.send(out) {
                    self.frame_dropped();
                }
            }
            self.publish_mix();
        }
    }

    fn emit_blackout(&mut self) {
        if let Some(out) = self.gate.blackout() {
            if let Some(output) = &self.output {
                if !output.send(out) {
                    self.frame_dropped();
                }
            }
            self.publish_mix();
        }
    }

    /// The hardware never saw the memoized frame, so the next tick must
    /// compose and transmit again even if nothing changed.
    fn frame_dropped(&mut self) {
        self.gate.reset_memo();
        self.last_key = None;
    }

    /// Fitted to the hardware but outside the memo.
    fn send_direct(&self, frame: &[u8]) {
        if let Some(output) = &self.output {
            let _ = output.send(self.gate.normalize(frame));
        }
    }

    fn publish_mix(&mut self) {
        let state = self.mix_state();
        self.outbox.push(BroadcastMessage::Mix(state));
    }

    fn mix_state(&self) -> MixState {
        let clock = self.last_reading.unwrap_or_else(|| self.current_reading());
        MixState {
            mode: self.mode,
            is_playing: self.is_playing,
            current_beat: timeline::current_beat(&clock),
            beat_in_set: self.beat_in_set,
            active_set_id: self.store.active_set_id.clone(),
            pending_set_id: self.scheduler.pending().map(str::to_string),
            master_dimmer: self.modulation.master_dimmer,
            blackout: self.blackout,
            clock,
            frame: self.gate.last_sent().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    fn play(&mut self) {
        self.is_playing = true;
        self.gate.reset_memo();
        self.last_key = None;
        self.scheduler.reset_position();
        self.render_now();
    }

    fn stop(&mut self) {
        self.is_playing = false;
        self.scheduler.reset_position();
        self.emit_blackout();
    }

    fn set_mode(&mut self, mode: AppMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.config_revision += 1;
        self.last_key = None;
        self.scheduler.reset_position();
        log::info!("[SetPlayer] mode -> {:?}", mode);

        match mode {
            AppMode::Performance => {
                self.internal.stop();
                if self.external.is_none() {
                    log::warn!("[SetPlayer] no external clock, running on internal clock");
                }
                if self.store.active_set().is_some() {
                    self.play();
                }
            }
            AppMode::Testing => self.scheduler.cancel_pending(),
        }
    }

    fn set_blackout(&mut self, blackout: bool) {
        self.blackout = blackout;
        if blackout {
            self.emit_blackout();
        } else if self.is_playing {
            self.last_key = None;
            self.render_now();
        }
    }

    /// Returns the clamped level now in effect.
    fn apply_master(&mut self, value: f64) -> f64 {
        let value = clamp_master(value);
        if (value - self.modulation.master_dimmer).abs() > f64::EPSILON {
            self.modulation.master_dimmer = value;
            self.mixer_revision += 1;
        }
        value
    }

    fn update_mixer(&mut self, f: impl FnOnce(&mut ModulationConfig)) {
        f(&mut self.modulation);
        self.mixer_revision += 1;
        self.config_revision += 1;
    }

    fn set_tempo(&mut self, bpm: f64) -> f64 {
        match (self.mode, self.external.as_mut()) {
            (AppMode::Performance, Some(external)) => external.set_tempo(bpm),
            _ => {
                self.config_revision += 1;
                self.internal.set_tempo(bpm)
            }
        }
    }

    fn switch_to(&mut self, set_id: &str, reason: &str) -> bool {
        if !self.store.set_active(Some(set_id)) {
            log::warn!("[SetPlayer] cannot switch to unknown set {}", set_id);
            return false;
        }
        self.gate.reset_memo();
        self.last_key = None;
        self.raw = None;
        self.scheduler.reset_position();
        log::info!("[SetPlayer] switched to set {} ({})", set_id, reason);
        true
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Pending(id) => {
                self.switch_to(&id, "pending switch");
            }
            Transition::QueueAdvance(id) => {
                self.switch_to(&id, "queue advance");
            }
            Transition::Loop => log::debug!("[SetPlayer] set looped"),
        }
    }

    fn set_active_set(&mut self, set_id: Option<&str>) -> bool {
        let previous = self.store.active_set_id.clone();
        match set_id {
            Some(id) if previous.as_deref() != Some(id) => {
                if !self.switch_to(id, "direct") {
                    return false;
                }
            }
            Some(_) => {}
            None => {
                self.store.set_active(None);
                self.last_key = None;
                self.raw = None;
            }
        }
        self.render_now();
        true
    }

    fn schedule_switch(&mut self, set_id: &str) -> bool {
        if self.store.set(set_id).is_none() {
            return false;
        }
        match self.scheduler.schedule_switch(set_id, self.mode) {
            Some(target) => {
                if self.switch_to(&target, "immediate") {
                    self.render_now();
                }
            }
            None => log::info!("[SetPlayer] switch to {} armed for next beat", set_id),
        }
        true
    }

    fn execute(&mut self, command: MidiCommand, now: Instant) {
        match command {
            MidiCommand::DimmerTarget(target) => self.smoother.set_target(target),
            MidiCommand::ToggleBlackout => {
                let next = !self.blackout;
                self.set_blackout(next);
            }
            MidiCommand::TogglePlay => {
                let testing = self.mode == AppMode::Testing;
                if self.is_playing {
                    self.stop();
                    if testing && self.internal.is_running() {
                        self.internal.stop();
                    }
                } else {
                    self.play();
                    if testing && !self.internal.is_running() {
                        self.internal.start(now);
                    }
                }
            }
            MidiCommand::Stop => {
                self.stop();
                self.internal.stop();
            }
            MidiCommand::SelectNext => {
                self.store.cycle_selected(true);
            }
            MidiCommand::SelectPrev => {
                self.store.cycle_selected(false);
            }
            MidiCommand::Activate => {
                if let Some(id) = self.store.selected_set_id.clone() {
                    self.schedule_switch(&id);
                }
            }
            MidiCommand::Trigger(set_id) => {
                let Some(id) = set_id.or_else(|| self.store.selected_set_id.clone()) else {
                    return;
                };
                if !self.schedule_switch(&id) {
                    return;
                }
                if !self.is_playing {
                    self.play();
                }
                if self.mode == AppMode::Testing && !self.internal.is_running() {
                    self.internal.start(now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::profiles::PINSPOT_RGBW_ID;
    use crate::models::sets::TrackTarget;

    struct Rig {
        engine: RenderEngine,
        rx: mpsc::Receiver<Vec<u8>>,
        set_a: String,
        set_b: String,
    }

    impl Rig {
        /// Set A (4 beats): red on beats 1-2. Set B (4 beats): blue on beat 1-4.
        fn new() -> Self {
            let mut store = DmxStore::default();
            let device = store.add_device("Pin", PINSPOT_RGBW_ID, 1, vec![]);
            let a = store.add_set(Some("A"), Some(4));
            let b = store.add_set(Some("B"), Some(4));
            let ta = store
                .add_track(&a.id, TrackTarget::Device(device.id.clone()))
                .unwrap();
            let tb = store
                .add_track(&b.id, TrackTarget::Device(device.id))
                .unwrap();
            store.add_clip(&a.id, &ta.id, "builtin-red", 1, 2).unwrap();
            store.add_clip(&b.id, &tb.id, "builtin-blue", 1, 4).unwrap();
            store.set_active(Some(&a.id));

            let engine = RenderEngine::new(store, EngineConfig::default());
            let (handle, rx) = OutputHandle::channel("test");
            engine.attach_output(handle);
            Self {
                engine,
                rx,
                set_a: a.id,
                set_b: b.id,
            }
        }

        fn sent(&mut self) -> Vec<Vec<u8>> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                frames.push(frame);
            }
            frames
        }

        fn step(&self) {
            self.engine.step_internal_clock();
            self.engine.tick(Instant::now());
        }
    }

    fn head(frame: &[u8]) -> &[u8] {
        &frame[..5]
    }

    #[test]
    fn play_renders_and_auto_blacks_out() {
        let mut rig = Rig::new();
        rig.engine.play();
        let frames = rig.sent();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), DEFAULT_HARDWARE_CHANNELS);
        assert_eq!(head(&frames[0]), &[134, 255, 0, 0, 0]);

        // beat 2: same frame, suppressed
        rig.step();
        assert!(rig.sent().is_empty());

        // beat 3: nothing active
        rig.step();
        let frames = rig.sent();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|&v| v == 0));
    }

    #[test]
    fn stop_forces_blackout() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.sent();
        rig.engine.stop();
        let frames = rig.sent();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|&v| v == 0));
        // stopped engine stays quiet
        rig.step();
        assert!(rig.sent().is_empty());
    }

    #[test]
    fn blackout_overrides_and_releases() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.sent();

        assert!(rig.engine.toggle_blackout());
        let frames = rig.sent();
        assert!(frames[0].iter().all(|&v| v == 0));
        rig.engine.tick(Instant::now());
        assert!(rig.sent().is_empty());

        rig.engine.release_blackout();
        assert_eq!(head(&rig.sent()[0]), &[134, 255, 0, 0, 0]);
    }

    #[test]
    fn master_dimmer_rescales_and_resends() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.sent();
        assert_eq!(rig.engine.set_master_dimmer(50.0), 50.0);
        assert_eq!(head(&rig.sent()[0]), &[72, 255, 0, 0, 0]);
        assert_eq!(rig.engine.set_master_dimmer(250.0), 100.0);
    }

    #[test]
    fn dropped_frame_is_resent_on_next_tick() {
        let mut rig = Rig::new();
        rig.engine.play();
        // the writer queue holds 8 frames, the later levels are dropped
        for level in 40..=50 {
            rig.engine.set_master_dimmer(level as f64);
        }
        assert_eq!(rig.sent().len(), 8);

        rig.engine.tick(Instant::now());
        let frames = rig.sent();
        assert_eq!(frames.len(), 1);
        assert_eq!(head(&frames[0]), &[72, 255, 0, 0, 0]);

        // delivered, so the unchanged scene is suppressed again
        rig.engine.tick(Instant::now());
        assert!(rig.sent().is_empty());
    }

    #[test]
    fn performance_mode_needs_output() {
        let engine = RenderEngine::default();
        assert!(engine.set_mode(AppMode::Performance).is_err());
        assert_eq!(engine.mode(), AppMode::Testing);
    }

    #[test]
    fn entering_performance_auto_plays() {
        let mut rig = Rig::new();
        rig.engine.set_mode(AppMode::Performance).unwrap();
        assert!(rig.engine.is_playing());
        assert_eq!(head(&rig.sent()[0]), &[134, 255, 0, 0, 0]);
    }

    #[test]
    fn losing_output_leaves_performance() {
        let rig = Rig::new();
        rig.engine.set_mode(AppMode::Performance).unwrap();
        assert!(rig.engine.detach_output().is_some());
        assert_eq!(rig.engine.mode(), AppMode::Testing);
    }

    #[test]
    fn testing_mode_switches_immediately() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.sent();
        assert!(rig.engine.schedule_switch(&rig.set_b));
        assert_eq!(rig.engine.pending_set_id(), None);
        assert_eq!(head(&rig.sent()[0]), &[134, 0, 0, 255, 0]);
        assert!(!rig.engine.schedule_switch("missing"));
    }

    #[test]
    fn performance_switch_waits_for_beat_boundary() {
        let mut rig = Rig::new();
        rig.engine.set_mode(AppMode::Performance).unwrap();
        rig.engine.tick(Instant::now());
        rig.sent();

        rig.engine.schedule_switch(&rig.set_b);
        assert_eq!(rig.engine.pending_set_id(), Some(rig.set_b.clone()));
        assert!(rig.sent().is_empty());

        // still inside beat 1: no cut
        rig.engine.tick(Instant::now());
        rig.engine.tick(Instant::now());
        let state = rig.engine.mix_state();
        assert_eq!(state.beat_in_set, 1);
        assert_eq!(state.active_set_id, Some(rig.set_a.clone()));
        assert_eq!(rig.engine.pending_set_id(), Some(rig.set_b.clone()));
        assert!(rig.sent().is_empty());

        rig.step();
        let state = rig.engine.mix_state();
        assert_eq!(state.beat_in_set, 2);
        assert_eq!(state.active_set_id, Some(rig.set_b.clone()));
        assert_eq!(rig.engine.pending_set_id(), None);
        assert_eq!(head(&rig.sent()[0]), &[134, 0, 0, 255, 0]);
    }

    #[test]
    fn queue_advances_on_wrap() {
        let rig = Rig::new();
        rig.engine.set_mode(AppMode::Performance).unwrap();
        rig.engine.toggle_loop_current();
        rig.engine.queue_add(&rig.set_b);

        rig.engine.tick(Instant::now());
        for _ in 0..3 {
            rig.step();
        }
        assert_eq!(rig.engine.mix_state().active_set_id, Some(rig.set_a.clone()));
        rig.step();
        assert_eq!(rig.engine.mix_state().active_set_id, Some(rig.set_b.clone()));
        assert!(rig.engine.queue().entries.is_empty());
    }

    #[test]
    fn deleting_a_set_clears_it_from_queue() {
        let rig = Rig::new();
        rig.engine.queue_add(&rig.set_b);
        assert!(rig.engine.delete_set(&rig.set_b));
        assert!(rig.engine.queue().entries.is_empty());
        assert!(!rig.engine.delete_set(&rig.set_b));
    }

    #[test]
    fn audio_fast_path_updates_gated_channel() {
        let mut rig = Rig::new();
        rig.engine.set_global_audio_enabled(true);
        rig.engine.play();
        // no signal: global layer drives the dimmer to its band floor
        assert_eq!(head(&rig.sent()[0]), &[9, 255, 0, 0, 0]);

        rig.engine.set_audio_levels(AudioLevels::new(50.0, 0.0, 0.0));
        assert_eq!(head(&rig.sent()[0]), &[72, 255, 0, 0, 0]);

        // mid band does not matter for a bass-driven layer
        rig.engine.set_audio_levels(AudioLevels::new(50.0, 80.0, 0.0));
        assert!(rig.sent().is_empty());
    }

    #[test]
    fn audio_without_reactive_content_is_ignored() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.sent();
        rig.engine.set_audio_levels(AudioLevels::new(90.0, 90.0, 90.0));
        assert!(rig.sent().is_empty());
        assert_eq!(rig.engine.audio_levels().bass, 90.0);
    }

    #[test]
    fn midi_blackout_and_play_toggle() {
        let mut rig = Rig::new();
        let now = Instant::now();
        let play = MidiMessage::NoteOn {
            channel: 1,
            note: 72,
            velocity: 100,
        };
        rig.engine.handle_midi(&play, now);
        assert!(rig.engine.is_playing());
        assert!(rig.engine.clock_reading().is_playing);
        rig.sent();

        let blackout = MidiMessage::NoteOn {
            channel: 1,
            note: 73,
            velocity: 100,
        };
        rig.engine.handle_midi(&blackout, now);
        assert!(rig.engine.mix_state().blackout);
        assert!(rig.sent()[0].iter().all(|&v| v == 0));

        rig.engine.handle_midi(&play, now);
        assert!(!rig.engine.is_playing());
        assert!(!rig.engine.clock_reading().is_playing);
    }

    #[test]
    fn midi_dimmer_eases_over_ticks() {
        let rig = Rig::new();
        let cc = MidiMessage::ControlChange {
            channel: 1,
            controller: 74,
            value: 0,
        };
        rig.engine.handle_midi(&cc, Instant::now());
        assert_eq!(rig.engine.master_dimmer(), 100.0);
        rig.engine.tick(Instant::now());
        assert_eq!(rig.engine.master_dimmer(), 88.0);
        for _ in 0..200 {
            rig.engine.tick(Instant::now());
        }
        assert_eq!(rig.engine.master_dimmer(), 0.0);
    }

    #[test]
    fn midi_trigger_switches_and_plays() {
        let rig = Rig::new();
        rig.engine.with_midi_mapper(|m| {
            m.add_mapping(
                "B",
                crate::models::midi::MidiSelectorKind::Note,
                60,
                1,
                MidiAction::SetTrigger {
                    set_id: Some(rig.set_b.clone()),
                },
            );
        });
        let note = MidiMessage::NoteOn {
            channel: 1,
            note: 60,
            velocity: 1,
        };
        rig.engine.handle_midi(&note, Instant::now());
        assert!(rig.engine.is_playing());
        assert_eq!(rig.engine.mix_state().active_set_id, Some(rig.set_b.clone()));
    }

    #[test]
    fn preview_bypasses_the_memo() {
        let mut rig = Rig::new();
        let device = rig.engine.read_store(|s| s.devices[0].id.clone());
        assert!(rig.engine.preview_preset("builtin-green", &[device.clone()]));
        assert!(rig.engine.preview_preset("builtin-green", &[device]));
        let frames = rig.sent();
        assert_eq!(frames.len(), 2);
        assert_eq!(head(&frames[0]), &[134, 0, 255, 0, 0]);
        assert!(!rig.engine.preview_preset("missing", &[]));

        // playback still transmits its first frame
        rig.engine.play();
        assert_eq!(rig.sent().len(), 1);
    }

    #[test]
    fn store_edits_recompose_on_next_tick() {
        let mut rig = Rig::new();
        rig.engine.play();
        rig.sent();
        let set_a = rig.set_a.clone();
        rig.engine.with_store(|store| {
            let track = store.set(&set_a).unwrap().tracks[0].id.clone();
            store.toggle_mute(&set_a, &track);
        });
        rig.engine.tick(Instant::now());
        assert!(rig.sent()[0].iter().all(|&v| v == 0));
    }

    #[test]
    fn tap_tempo_sets_internal_tempo() {
        let rig = Rig::new();
        let t0 = Instant::now();
        assert_eq!(rig.engine.tap_tempo(t0), None);
        assert_eq!(
            rig.engine.tap_tempo(t0 + Duration::from_millis(400)),
            Some(150.0)
        );
        assert_eq!(rig.engine.clock_reading().tempo, 150.0);
        assert_eq!(rig.engine.set_tempo(1000.0), 300.0);
    }

    #[tokio::test]
    async fn state_updates_reach_subscribers() {
        let rig = Rig::new();
        let mut rx = rig.engine.broadcaster().subscribe();
        rig.engine.play();
        rig.engine.tick(Instant::now());

        let mut saw_mix = false;
        let mut saw_state = false;
        while let Ok(message) = rx.try_recv() {
            match message {
                BroadcastMessage::Mix(state) => {
                    saw_mix = true;
                    assert_eq!(&state.frame[..5], &[134, 255, 0, 0, 0]);
                }
                BroadcastMessage::State(_) => saw_state = true,
            }
        }
        assert!(saw_mix && saw_state);
    }
}
