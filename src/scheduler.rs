//! Set queue and beat-quantized switching.
//!
//! Performance mode never cuts a set mid-beat: manual switches are armed and
//! executed on the first tick that crosses into a new beat, and queued sets
//! take over when the current one wraps around.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::models::mix::AppMode;

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/queue.ts")]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub set_id: String,
    /// ms since epoch
    #[ts(type = "number")]
    pub added_at: i64,
}

impl QueueEntry {
    fn new(set_id: &str) -> Self {
        Self {
            set_id: set_id.to_string(),
            added_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Ordered queue of set ids. No id appears twice.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/queue.ts")]
#[serde(rename_all = "camelCase")]
pub struct BankQueue {
    pub entries: Vec<QueueEntry>,
    pub loop_current: bool,
}

impl Default for BankQueue {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            loop_current: true,
        }
    }
}

impl BankQueue {
    pub fn contains(&self, set_id: &str) -> bool {
        self.entries.iter().any(|e| e.set_id == set_id)
    }

    /// 1-indexed position, for display.
    pub fn position(&self, set_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.set_id == set_id)
            .map(|i| i + 1)
    }

    /// Append. No-op when already queued.
    pub fn add(&mut self, set_id: &str) {
        if self.contains(set_id) {
            return;
        }
        self.entries.push(QueueEntry::new(set_id));
    }

    /// Move (or insert) to the front.
    pub fn play_next(&mut self, set_id: &str) {
        self.remove(set_id);
        self.entries.insert(0, QueueEntry::new(set_id));
    }

    pub fn remove(&mut self, set_id: &str) {
        self.entries.retain(|e| e.set_id != set_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn move_up(&mut self, set_id: &str) {
        if let Some(idx) = self.entries.iter().position(|e| e.set_id == set_id) {
            if idx > 0 {
                self.entries.swap(idx, idx - 1);
            }
        }
    }

    pub fn move_down(&mut self, set_id: &str) {
        if let Some(idx) = self.entries.iter().position(|e| e.set_id == set_id) {
            if idx + 1 < self.entries.len() {
                self.entries.swap(idx, idx + 1);
            }
        }
    }

    /// FIFO pop.
    pub fn pop_next(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0).set_id)
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_current = !self.loop_current;
        self.loop_current
    }
}

/// What the scheduler decided on one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// An armed manual switch fires.
    Pending(String),
    /// The current set wrapped and the next queued set takes over.
    QueueAdvance(String),
    /// The current set wrapped and keeps looping.
    Loop,
}

impl Transition {
    pub fn target(&self) -> Option<&str> {
        match self {
            Transition::Pending(id) | Transition::QueueAdvance(id) => Some(id),
            Transition::Loop => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueScheduler {
    pub queue: BankQueue,
    pending: Option<String>,
    /// Running beat counter seen on the previous tick.
    last_beat: Option<u32>,
    /// 0-indexed position in the set seen on the previous beat.
    last_position: Option<u32>,
}

impl QueueScheduler {
    pub fn new(loop_current: bool) -> Self {
        Self {
            queue: BankQueue {
                loop_current,
                ..BankQueue::default()
            },
            ..Self::default()
        }
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Outside performance mode the switch is returned for immediate execution;
    /// in performance mode it is armed until the next beat boundary.
    pub fn schedule_switch(&mut self, set_id: &str, mode: AppMode) -> Option<String> {
        match mode {
            AppMode::Performance => {
                self.pending = Some(set_id.to_string());
                None
            }
            AppMode::Testing => Some(set_id.to_string()),
        }
    }

    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Drop every reference to a deleted set.
    pub fn forget(&mut self, set_id: &str) {
        self.queue.remove(set_id);
        if self.pending.as_deref() == Some(set_id) {
            self.pending = None;
        }
    }

    /// Start boundary and wrap detection afresh, e.g. after the active set changed.
    pub fn reset_position(&mut self) {
        self.last_beat = None;
        self.last_position = None;
    }

    /// Advance the state machine.
    ///
    /// `beat` is the 1-indexed running beat counter, `beat_in_set` the
    /// 1-indexed position in a set of `length` beats. Nothing happens until
    /// the running beat changes; ticks inside one beat are ignored.
    pub fn on_tick(&mut self, beat: u32, beat_in_set: u32, length: u32) -> Option<Transition> {
        let length = length.max(1);
        let position = beat_in_set.saturating_sub(1) % length;
        let crossed = matches!(self.last_beat, Some(last) if last != beat);
        self.last_beat = Some(beat);

        if !crossed {
            if self.last_position.is_none() {
                self.last_position = Some(position);
            }
            return None;
        }

        if let Some(target) = self.pending.take() {
            self.queue.remove(&target);
            self.reset_position();
            return Some(Transition::Pending(target));
        }

        let wrapped = match self.last_position {
            Some(last) => position < last || length == 1,
            None => false,
        };
        self.last_position = Some(position);
        if !wrapped {
            return None;
        }

        if !self.queue.loop_current {
            if let Some(next) = self.queue.pop_next() {
                self.reset_position();
                return Some(Transition::QueueAdvance(next));
            }
        }
        Some(Transition::Loop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(queue: &BankQueue) -> Vec<&str> {
        queue.entries.iter().map(|e| e.set_id.as_str()).collect()
    }

    #[test]
    fn add_ignores_duplicates() {
        let mut queue = BankQueue::default();
        queue.add("a");
        queue.add("b");
        queue.add("a");
        assert_eq!(ids(&queue), vec!["a", "b"]);
        assert_eq!(queue.position("b"), Some(2));
        assert_eq!(queue.position("z"), None);
    }

    #[test]
    fn play_next_moves_to_front() {
        let mut queue = BankQueue::default();
        queue.add("a");
        queue.add("b");
        queue.add("c");
        queue.play_next("c");
        assert_eq!(ids(&queue), vec!["c", "a", "b"]);
        queue.play_next("d");
        assert_eq!(ids(&queue), vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn reorder_at_the_edges_is_noop() {
        let mut queue = BankQueue::default();
        queue.add("a");
        queue.add("b");
        queue.move_up("a");
        queue.move_down("b");
        assert_eq!(ids(&queue), vec!["a", "b"]);
        queue.move_down("a");
        assert_eq!(ids(&queue), vec!["b", "a"]);
        queue.move_up("a");
        assert_eq!(ids(&queue), vec!["a", "b"]);
    }

    #[test]
    fn remove_clear_and_pop() {
        let mut queue = BankQueue::default();
        queue.add("a");
        queue.add("b");
        queue.add("c");
        queue.remove("b");
        assert_eq!(queue.pop_next().as_deref(), Some("a"));
        queue.clear();
        assert_eq!(queue.pop_next(), None);
        assert!(queue.loop_current);
        assert!(!queue.toggle_loop());
    }

    #[test]
    fn testing_mode_switches_immediately() {
        let mut scheduler = QueueScheduler::default();
        assert_eq!(
            scheduler.schedule_switch("a", AppMode::Testing).as_deref(),
            Some("a")
        );
        assert_eq!(scheduler.pending(), None);
    }

    /// Feed `count` beats of a set of `length`, starting at running beat `from`.
    fn run_beats(
        scheduler: &mut QueueScheduler,
        from: u32,
        count: u32,
        length: u32,
    ) -> Vec<Transition> {
        (from..from + count)
            .filter_map(|beat| scheduler.on_tick(beat, (beat - 1) % length + 1, length))
            .collect()
    }

    #[test]
    fn pending_switch_waits_for_beat_boundary() {
        let mut scheduler = QueueScheduler::default();
        scheduler.queue.add("b");
        assert_eq!(scheduler.on_tick(3, 3, 8), None);
        assert_eq!(scheduler.schedule_switch("b", AppMode::Performance), None);
        assert_eq!(scheduler.pending(), Some("b"));

        // more ticks inside beat 3
        assert_eq!(scheduler.on_tick(3, 3, 8), None);
        assert_eq!(scheduler.on_tick(3, 3, 8), None);
        assert_eq!(scheduler.pending(), Some("b"));

        assert_eq!(
            scheduler.on_tick(4, 4, 8),
            Some(Transition::Pending("b".into()))
        );
        assert_eq!(scheduler.pending(), None);
        assert!(!scheduler.queue.contains("b"));
        assert_eq!(scheduler.on_tick(5, 5, 8), None);
    }

    #[test]
    fn pending_switch_without_history_waits_a_beat() {
        let mut scheduler = QueueScheduler::default();
        scheduler.schedule_switch("b", AppMode::Performance);
        assert_eq!(scheduler.on_tick(6, 6, 8), None);
        assert_eq!(
            scheduler.on_tick(7, 7, 8),
            Some(Transition::Pending("b".into()))
        );
    }

    #[test]
    fn one_wrap_per_cycle() {
        let mut scheduler = QueueScheduler::default();
        let transitions = run_beats(&mut scheduler, 1, 24, 8);
        assert_eq!(transitions, vec![Transition::Loop, Transition::Loop]);
    }

    #[test]
    fn one_beat_sets_wrap_every_beat() {
        let mut scheduler = QueueScheduler::default();
        assert_eq!(run_beats(&mut scheduler, 1, 4, 1).len(), 3);
    }

    #[test]
    fn repeated_ticks_on_one_beat_do_not_wrap() {
        let mut scheduler = QueueScheduler::default();
        for beat in [1, 1, 2, 2, 2, 3] {
            assert_eq!(scheduler.on_tick(beat, beat, 8), None);
        }
    }

    #[test]
    fn wrap_advances_queue_when_not_looping() {
        let mut scheduler = QueueScheduler::new(false);
        scheduler.queue.add("next");
        scheduler.on_tick(7, 7, 8);
        scheduler.on_tick(8, 8, 8);
        assert_eq!(
            scheduler.on_tick(9, 1, 8),
            Some(Transition::QueueAdvance("next".into()))
        );
        assert!(scheduler.queue.entries.is_empty());
    }

    #[test]
    fn empty_queue_keeps_looping() {
        let mut scheduler = QueueScheduler::new(false);
        scheduler.on_tick(8, 8, 8);
        assert_eq!(scheduler.on_tick(9, 1, 8), Some(Transition::Loop));
    }

    #[test]
    fn loop_current_ignores_queue() {
        let mut scheduler = QueueScheduler::new(true);
        scheduler.queue.add("next");
        scheduler.on_tick(8, 8, 8);
        assert_eq!(scheduler.on_tick(9, 1, 8), Some(Transition::Loop));
        assert!(scheduler.queue.contains("next"));
    }

    #[test]
    fn forget_clears_pending_and_queue() {
        let mut scheduler = QueueScheduler::default();
        scheduler.queue.add("gone");
        scheduler.schedule_switch("gone", AppMode::Performance);
        scheduler.forget("gone");
        assert_eq!(scheduler.pending(), None);
        assert!(!scheduler.queue.contains("gone"));
    }
}
