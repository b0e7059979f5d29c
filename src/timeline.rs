//! Beat resolution: where in the active set the clock currently is.

use crate::models::mix::{ClockReading, ClockSourceKind};

/// 1-indexed running beat counter.
pub fn current_beat(reading: &ClockReading) -> u32 {
    reading.beat.max(0.0).floor() as u32 + 1
}

/// 1-indexed position inside a set of `length` beats.
///
/// On the external clock the position is bar-aware so multi-bar sets stay
/// locked to bar boundaries; on the internal clock it is a plain modulo
/// (or a clamp when looping is off).
pub fn beat_in_set(reading: &ClockReading, length: u32, quantum: u32, loop_enabled: bool) -> u32 {
    let length = length.max(1);
    match reading.source {
        ClockSourceKind::External => {
            let quantum = quantum.max(1);
            let bars_in_set = length.div_ceil(quantum);
            let bar_in_set = reading.bar_number % bars_in_set;
            (bar_in_set * quantum + reading.beat_in_bar).min(length)
        }
        ClockSourceKind::Internal => {
            let beat = current_beat(reading);
            if loop_enabled {
                (beat - 1) % length + 1
            } else {
                beat.min(length)
            }
        }
    }
}
