use std::sync::Mutex;
use std::time::Instant;

/// Capability over a native musical-clock session.
///
/// Implementations are polled from the client loop, so every method takes
/// `&self` and must be cheap.
pub trait LinkSession: Send + Sync {
    /// Beat counter on the shared timeline for the given quantum.
    fn beat(&self, quantum: f64) -> f64;
    /// Position within the current bar, `0.0..quantum`.
    fn phase(&self, quantum: f64) -> f64;
    fn tempo(&self) -> f64;
    fn set_tempo(&self, bpm: f64);
    fn num_peers(&self) -> u32;
    fn is_playing(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
}

struct ManualInner {
    anchor_beat: f64,
    anchor: Instant,
    tempo: f64,
    playing: bool,
    peers: u32,
    enabled: bool,
}

impl ManualInner {
    fn current_beat(&self) -> f64 {
        if self.playing {
            self.anchor_beat + self.anchor.elapsed().as_secs_f64() * self.tempo / 60.0
        } else {
            self.anchor_beat
        }
    }

    fn reanchor(&mut self) {
        self.anchor_beat = self.current_beat();
        self.anchor = Instant::now();
    }
}

/// Session driven from code instead of the network.
///
/// Advances with wall time while playing; `set_beat` jumps the timeline.
pub struct ManualSession {
    inner: Mutex<ManualInner>,
}

impl ManualSession {
    pub fn new(tempo: f64) -> Self {
        Self {
            inner: Mutex::new(ManualInner {
                anchor_beat: 0.0,
                anchor: Instant::now(),
                tempo,
                playing: false,
                peers: 0,
                enabled: true,
            }),
        }
    }

    pub fn set_beat(&self, beat: f64) {
        let mut guard = self.inner.lock().expect("manual session poisoned");
        guard.anchor_beat = beat;
        guard.anchor = Instant::now();
    }

    pub fn set_playing(&self, playing: bool) {
        let mut guard = self.inner.lock().expect("manual session poisoned");
        guard.reanchor();
        guard.playing = playing;
    }

    pub fn set_peers(&self, peers: u32) {
        self.inner.lock().expect("manual session poisoned").peers = peers;
    }
}

impl Default for ManualSession {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl LinkSession for ManualSession {
    fn beat(&self, _quantum: f64) -> f64 {
        self.inner
            .lock()
            .expect("manual session poisoned")
            .current_beat()
    }

    fn phase(&self, quantum: f64) -> f64 {
        if quantum <= 0.0 {
            return 0.0;
        }
        self.beat(quantum).rem_euclid(quantum)
    }

    fn tempo(&self) -> f64 {
        self.inner.lock().expect("manual session poisoned").tempo
    }

    fn set_tempo(&self, bpm: f64) {
        let mut guard = self.inner.lock().expect("manual session poisoned");
        guard.reanchor();
        guard.tempo = bpm;
    }

    fn num_peers(&self) -> u32 {
        self.inner.lock().expect("manual session poisoned").peers
    }

    fn is_playing(&self) -> bool {
        self.inner.lock().expect("manual session poisoned").playing
    }

    fn set_enabled(&self, enabled: bool) {
        self.inner.lock().expect("manual session poisoned").enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.inner.lock().expect("manual session poisoned").enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_session_holds_its_beat() {
        let session = ManualSession::new(120.0);
        session.set_beat(5.5);
        assert!((session.beat(4.0) - 5.5).abs() < 1e-9);
        assert!((session.phase(4.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn tempo_change_keeps_position() {
        let session = ManualSession::new(120.0);
        session.set_beat(3.0);
        session.set_tempo(140.0);
        assert!((session.beat(4.0) - 3.0).abs() < 1e-9);
        assert!((session.tempo() - 140.0).abs() < f64::EPSILON);
    }

    #[test]
    fn phase_with_zero_quantum_is_zero() {
        let session = ManualSession::default();
        session.set_beat(7.25);
        assert_eq!(session.phase(0.0), 0.0);
    }
}
