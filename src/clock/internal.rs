use std::time::{Duration, Instant};

use super::BeatClock;
use crate::models::mix::{ClockReading, ClockSourceKind};

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 300.0;
pub const DEFAULT_TEMPO: f64 = 120.0;

pub fn clamp_tempo(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_TEMPO;
    }
    bpm.clamp(MIN_TEMPO, MAX_TEMPO)
}

/// Free-running integer beat counter.
///
/// Advanced from the tick loop: every elapsed period since the last beat adds
/// one. No phase or bar concept.
#[derive(Debug, Clone)]
pub struct InternalClock {
    tempo: f64,
    beat: u64,
    running: bool,
    next_beat_at: Option<Instant>,
}

impl Default for InternalClock {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPO)
    }
}

impl InternalClock {
    pub fn new(tempo: f64) -> Self {
        Self {
            tempo: clamp_tempo(tempo),
            beat: 0,
            running: false,
            next_beat_at: None,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.tempo)
    }

    pub fn beat(&self) -> u64 {
        self.beat
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self, now: Instant) {
        self.beat = 0;
        self.running = true;
        self.next_beat_at = Some(now + self.period());
    }

    pub fn stop(&mut self) {
        self.beat = 0;
        self.running = false;
        self.next_beat_at = None;
    }

    /// Manual single-beat advance, independent of the timer.
    pub fn step(&mut self) {
        self.beat += 1;
    }

    /// Catch up to `now`. Returns true when the counter moved.
    pub fn advance(&mut self, now: Instant) -> bool {
        let Some(mut due) = self.next_beat_at else {
            return false;
        };
        let period = self.period();
        let before = self.beat;
        while now >= due {
            self.beat += 1;
            due += period;
        }
        self.next_beat_at = Some(due);
        self.beat != before
    }
}

impl BeatClock for InternalClock {
    fn kind(&self) -> ClockSourceKind {
        ClockSourceKind::Internal
    }

    fn read(&self) -> ClockReading {
        ClockReading {
            beat: self.beat as f64,
            phase: 0.0,
            bar_number: 0,
            beat_in_bar: 1,
            tempo: self.tempo,
            is_playing: self.running,
            source: ClockSourceKind::Internal,
        }
    }

    fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Keeps the beat counter; the running timer picks up the new period from
    /// the next beat on.
    fn set_tempo(&mut self, bpm: f64) -> f64 {
        self.tempo = clamp_tempo(bpm);
        self.tempo
    }
}
