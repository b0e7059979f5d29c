pub mod session;

#[cfg(feature = "link")]
pub mod rusty;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub use session::{LinkSession, ManualSession};

/// Poll cadence of the client loop (~60 Hz).
pub const POLL_INTERVAL: Duration = Duration::from_millis(16);

pub const DEFAULT_QUANTUM: u32 = 4;
pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 999.0;

/// Events emitted by the link client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum LinkEvent {
    StateChanged(LinkState),
    TempoChanged { tempo: f64 },
    PeersChanged { num_peers: u32 },
    TransportChanged { is_playing: bool },
}

/// Snapshot of the shared musical clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkState {
    pub enabled: bool,
    pub tempo: f64,
    pub beat: f64,
    pub phase: f64,
    pub is_playing: bool,
    pub num_peers: u32,
    pub quantum: u32,
    /// Wall clock (ms since epoch) of the last integer beat change.
    pub last_beat_time: i64,
    /// 1-indexed position in the bar.
    pub beat_in_bar: u32,
    pub bar_number: u64,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            enabled: false,
            tempo: 120.0,
            beat: 0.0,
            phase: 0.0,
            is_playing: false,
            num_peers: 0,
            quantum: DEFAULT_QUANTUM,
            last_beat_time: 0,
            beat_in_bar: 1,
            bar_number: 0,
        }
    }
}

/// Raw values read from a session in one poll.
#[derive(Debug, Clone, Copy)]
pub struct PollSample {
    pub enabled: bool,
    pub beat: f64,
    pub phase: f64,
    pub tempo: f64,
    pub num_peers: u32,
    pub is_playing: bool,
}

impl PollSample {
    pub fn read(session: &dyn LinkSession, quantum: u32) -> Self {
        let q = quantum as f64;
        Self {
            enabled: session.is_enabled(),
            beat: session.beat(q),
            phase: session.phase(q),
            tempo: session.tempo(),
            num_peers: session.num_peers(),
            is_playing: session.is_playing(),
        }
    }
}

/// Position in the bar derived from the raw beat counter.
///
/// Independent of transport state so a stopped clock still reports a valid bar.
pub fn bar_position(beat: f64, quantum: u32) -> (u32, u64) {
    let quantum = quantum.max(1);
    let whole = beat.max(0.0).floor() as u64;
    let beat_in_bar = (whole % quantum as u64) as u32 + 1;
    let bar_number = whole / quantum as u64;
    (beat_in_bar, bar_number)
}

pub fn clamp_tempo(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return MIN_TEMPO;
    }
    bpm.clamp(MIN_TEMPO, MAX_TEMPO)
}

impl LinkState {
    fn new(quantum: u32) -> Self {
        Self {
            quantum,
            ..Self::default()
        }
    }

    /// Fold one poll into the snapshot and return the change events it caused.
    pub fn apply_sample(&mut self, sample: &PollSample, now_ms: i64) -> Vec<LinkEvent> {
        let mut events = Vec::new();

        if (sample.tempo - self.tempo).abs() > f64::EPSILON {
            events.push(LinkEvent::TempoChanged {
                tempo: sample.tempo,
            });
        }
        if sample.num_peers != self.num_peers {
            events.push(LinkEvent::PeersChanged {
                num_peers: sample.num_peers,
            });
        }
        if sample.is_playing != self.is_playing {
            events.push(LinkEvent::TransportChanged {
                is_playing: sample.is_playing,
            });
        }

        let beat = sample.beat.max(0.0);
        if beat.floor() != self.beat.floor() {
            self.last_beat_time = now_ms;
        }

        let (beat_in_bar, bar_number) = bar_position(beat, self.quantum);
        self.enabled = sample.enabled;
        self.tempo = sample.tempo;
        self.beat = beat;
        self.phase = sample.phase;
        self.is_playing = sample.is_playing;
        self.num_peers = sample.num_peers;
        self.beat_in_bar = beat_in_bar;
        self.bar_number = bar_number;

        events.push(LinkEvent::StateChanged(self.clone()));
        events
    }
}

/// Polls a [`LinkSession`] and republishes its state.
pub struct LinkClient {
    stop_tx: mpsc::Sender<()>,
    session: Arc<dyn LinkSession>,
    state: Arc<Mutex<LinkState>>,
}

impl LinkClient {
    /// Start polling. The callback receives a `LinkEvent` for every update.
    pub async fn start(
        session: Arc<dyn LinkSession>,
        quantum: u32,
        callback: impl Fn(LinkEvent) + Send + Sync + 'static,
    ) -> Result<Self, String> {
        if quantum == 0 {
            return Err("Quantum must be at least 1 beat".into());
        }

        session.set_enabled(true);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(Mutex::new(LinkState::new(quantum)));

        let poll_session = session.clone();
        let poll_state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        let sample = PollSample::read(poll_session.as_ref(), quantum);
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        let events = {
                            let mut guard = poll_state.lock().expect("link state poisoned");
                            guard.apply_sample(&sample, now_ms)
                        };
                        for event in events {
                            callback(event);
                        }
                    }
                }
            }

            poll_session.set_enabled(false);
            log::info!("[Link] poll loop stopped");
        });

        Ok(Self {
            stop_tx,
            session,
            state,
        })
    }

    pub fn snapshot(&self) -> LinkState {
        self.state.lock().expect("link state poisoned").clone()
    }

    pub fn session(&self) -> Arc<dyn LinkSession> {
        self.session.clone()
    }

    /// Shared handle to the latest snapshot, for readers on other tasks.
    pub fn state_handle(&self) -> Arc<Mutex<LinkState>> {
        self.state.clone()
    }

    /// Propose a new session tempo. Returns the clamped value that was applied.
    pub fn set_tempo(&self, bpm: f64) -> f64 {
        let bpm = clamp_tempo(bpm);
        self.session.set_tempo(bpm);
        bpm
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
    }
}
