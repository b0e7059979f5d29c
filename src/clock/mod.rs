//! Beat clock sources.
//!
//! The engine holds one internal clock (always present) and optionally an
//! external one. `select` picks the source for the current app mode; nothing
//! else in the engine names a concrete clock type.

pub mod internal;
pub mod link;
pub mod tap;

use crate::models::mix::{AppMode, ClockReading, ClockSourceKind};

pub trait BeatClock: Send {
    fn kind(&self) -> ClockSourceKind;
    fn read(&self) -> ClockReading;
    fn tempo(&self) -> f64;
    /// Returns the clamped tempo actually applied.
    fn set_tempo(&mut self, bpm: f64) -> f64;
}

/// Performance mode follows the external clock when one is attached;
/// testing mode always runs on the internal clock.
pub fn select<'a>(
    mode: AppMode,
    internal: &'a dyn BeatClock,
    external: Option<&'a dyn BeatClock>,
) -> &'a dyn BeatClock {
    match (mode, external) {
        (AppMode::Performance, Some(external)) => external,
        _ => internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::internal::InternalClock;
    use crate::clock::link::ExternalClock;
    use beatlink::{LinkState, ManualSession};
    use std::sync::{Arc, Mutex};

    #[test]
    fn mode_decides_the_source() {
        let internal = InternalClock::default();
        let external = ExternalClock::new(
            Arc::new(Mutex::new(LinkState::default())),
            Arc::new(ManualSession::default()),
        );

        let picked = select(AppMode::Testing, &internal, Some(&external));
        assert_eq!(picked.kind(), ClockSourceKind::Internal);

        let picked = select(AppMode::Performance, &internal, Some(&external));
        assert_eq!(picked.kind(), ClockSourceKind::External);

        let picked = select(AppMode::Performance, &internal, None);
        assert_eq!(picked.kind(), ClockSourceKind::Internal);
    }
}
