use std::sync::{Arc, Mutex};

use beatlink::{LinkClient, LinkSession, LinkState};

use super::BeatClock;
use crate::models::mix::{ClockReading, ClockSourceKind};

/// Beat clock backed by the shared network session.
///
/// Reads the snapshot the link client republishes every poll.
pub struct ExternalClock {
    state: Arc<Mutex<LinkState>>,
    session: Arc<dyn LinkSession>,
}

impl ExternalClock {
    pub fn new(state: Arc<Mutex<LinkState>>, session: Arc<dyn LinkSession>) -> Self {
        Self { state, session }
    }

    pub fn from_client(client: &LinkClient) -> Self {
        Self::new(client.state_handle(), client.session())
    }

    pub fn snapshot(&self) -> LinkState {
        self.state.lock().expect("link state poisoned").clone()
    }

    pub fn num_peers(&self) -> u32 {
        self.snapshot().num_peers
    }
}

/// Session phase counts beats into the bar, `[0, quantum)`. Readings carry
/// it as a fraction of the bar, `[0, 1)`.
fn bar_fraction(phase: f64, quantum: u32) -> f64 {
    if quantum == 0 || !phase.is_finite() {
        return 0.0;
    }
    let fraction = (phase / quantum as f64).rem_euclid(1.0);
    if fraction < 1.0 {
        fraction
    } else {
        0.0
    }
}

pub fn reading_from_link(state: &LinkState) -> ClockReading {
    ClockReading {
        beat: state.beat,
        phase: bar_fraction(state.phase, state.quantum),
        bar_number: state.bar_number.min(u32::MAX as u64) as u32,
        beat_in_bar: state.beat_in_bar,
        tempo: state.tempo,
        is_playing: state.is_playing,
        source: ClockSourceKind::External,
    }
}

impl BeatClock for ExternalClock {
    fn kind(&self) -> ClockSourceKind {
        ClockSourceKind::External
    }

    fn read(&self) -> ClockReading {
        reading_from_link(&self.state.lock().expect("link state poisoned"))
    }

    fn tempo(&self) -> f64 {
        self.snapshot().tempo
    }

    fn set_tempo(&mut self, bpm: f64) -> f64 {
        let bpm = beatlink::clamp_tempo(bpm);
        self.session.set_tempo(bpm);
        bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatlink::ManualSession;

    #[test]
    fn reading_mirrors_snapshot() {
        let state = Arc::new(Mutex::new(LinkState {
            beat: 9.5,
            phase: 1.5,
            bar_number: 2,
            beat_in_bar: 2,
            tempo: 128.0,
            is_playing: true,
            ..LinkState::default()
        }));
        let clock = ExternalClock::new(state, Arc::new(ManualSession::default()));
        let reading = clock.read();
        assert_eq!(reading.bar_number, 2);
        assert_eq!(reading.beat_in_bar, 2);
        assert_eq!(reading.tempo, 128.0);
        assert_eq!(reading.source, ClockSourceKind::External);
        assert_eq!(reading.phase, 0.375);
    }

    #[test]
    fn phase_is_a_fraction_of_the_bar() {
        let at = |phase: f64, quantum: u32| {
            let state = LinkState {
                phase,
                quantum,
                ..LinkState::default()
            };
            reading_from_link(&state).phase
        };
        assert_eq!(at(0.0, 4), 0.0);
        assert_eq!(at(3.0, 4), 0.75);
        assert_eq!(at(4.0, 4), 0.0);
        assert_eq!(at(1.5, 3), 0.5);
        assert_eq!(at(2.0, 0), 0.0);
        assert_eq!(at(f64::NAN, 4), 0.0);
        assert!((0.0..1.0).contains(&at(3.999_999_999, 4)));
    }

    #[test]
    fn set_tempo_goes_to_session_clamped() {
        let session = Arc::new(ManualSession::default());
        let state = Arc::new(Mutex::new(LinkState::default()));
        let mut clock = ExternalClock::new(state, session.clone());
        assert_eq!(clock.set_tempo(1_500.0), 999.0);
        assert_eq!(session.tempo(), 999.0);
    }
}
