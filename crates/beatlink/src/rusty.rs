use rusty_link::{AblLink, SessionState};

use crate::session::LinkSession;

/// Network session backed by the Ableton Link SDK.
pub struct RustyLinkSession {
    link: AblLink,
}

impl RustyLinkSession {
    pub fn new(tempo: f64) -> Self {
        let link = AblLink::new(tempo);
        link.enable_start_stop_sync(true);
        Self { link }
    }

    fn capture(&self) -> SessionState {
        let mut state = SessionState::new();
        self.link.capture_app_session_state(&mut state);
        state
    }
}

impl LinkSession for RustyLinkSession {
    fn beat(&self, quantum: f64) -> f64 {
        let state = self.capture();
        state.beat_at_time(self.link.clock_micros(), quantum)
    }

    fn phase(&self, quantum: f64) -> f64 {
        let state = self.capture();
        state.phase_at_time(self.link.clock_micros(), quantum)
    }

    fn tempo(&self) -> f64 {
        self.capture().tempo()
    }

    fn set_tempo(&self, bpm: f64) {
        let mut state = self.capture();
        state.set_tempo(bpm, self.link.clock_micros());
        self.link.commit_app_session_state(&state);
    }

    fn num_peers(&self) -> u32 {
        self.link.num_peers() as u32
    }

    fn is_playing(&self) -> bool {
        self.capture().is_playing()
    }

    fn set_enabled(&self, enabled: bool) {
        self.link.enable(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.link.is_enabled()
    }
}
