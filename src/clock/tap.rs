use std::time::{Duration, Instant};

use super::internal::clamp_tempo;

pub const TAP_TIMEOUT: Duration = Duration::from_millis(2_000);
const MAX_TAPS: usize = 4;

/// Tap-tempo estimator.
#[derive(Debug, Clone, Default)]
pub struct TapTempo {
    taps: Vec<Instant>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tap. Returns the tempo once at least two taps are held.
    pub fn tap(&mut self, now: Instant) -> Option<f64> {
        if let Some(last) = self.taps.last() {
            if now.saturating_duration_since(*last) > TAP_TIMEOUT {
                self.taps.clear();
            }
        }
        self.taps.push(now);
        if self.taps.len() > MAX_TAPS {
            let excess = self.taps.len() - MAX_TAPS;
            self.taps.drain(..excess);
        }
        self.tempo()
    }

    pub fn tempo(&self) -> Option<f64> {
        if self.taps.len() < 2 {
            return None;
        }
        let gaps: Vec<f64> = self
            .taps
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).as_secs_f64() * 1000.0)
            .collect();
        let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        Some(clamp_tempo((60_000.0 / mean).round()))
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn four_taps_at_500ms_is_120() {
        let t0 = Instant::now();
        let mut tap = TapTempo::new();
        assert_eq!(tap.tap(t0), None);
        tap.tap(t0 + ms(500));
        tap.tap(t0 + ms(1_000));
        assert_eq!(tap.tap(t0 + ms(1_500)), Some(120.0));
    }

    #[test]
    fn long_gap_resets_history() {
        let t0 = Instant::now();
        let mut tap = TapTempo::new();
        tap.tap(t0);
        tap.tap(t0 + ms(500));
        assert_eq!(tap.tap(t0 + ms(3_000)), None);
        assert_eq!(tap.tap_count(), 1);
    }

    #[test]
    fn only_last_four_taps_count() {
        let t0 = Instant::now();
        let mut tap = TapTempo::new();
        tap.tap(t0);
        tap.tap(t0 + ms(1_000));
        // from here on, 400 ms gaps
        tap.tap(t0 + ms(1_400));
        tap.tap(t0 + ms(1_800));
        let bpm = tap.tap(t0 + ms(2_200));
        assert_eq!(tap.tap_count(), 4);
        assert_eq!(bpm, Some(150.0));
    }

    #[test]
    fn result_is_clamped() {
        let t0 = Instant::now();
        let mut tap = TapTempo::new();
        tap.tap(t0);
        assert_eq!(tap.tap(t0 + ms(100)), Some(300.0));
    }
}
