//! Push updates for remote observers. Fire-and-forget: no subscriber, no error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::mix::{ClockReading, MixState};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum BroadcastMessage {
    State(ClockReading),
    Mix(MixState),
}

impl BroadcastMessage {
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("Failed to serialize update: {}", e))
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }

    pub fn publish(&self, message: BroadcastMessage) {
        // Err only means nobody is listening.
        let _ = self.tx.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mix::ClockSourceKind;

    fn reading() -> ClockReading {
        ClockReading {
            beat: 3.0,
            phase: 0.0,
            bar_number: 0,
            beat_in_bar: 4,
            tempo: 120.0,
            is_playing: true,
            source: ClockSourceKind::Internal,
        }
    }

    #[test]
    fn serializes_as_type_and_data() {
        let json = BroadcastMessage::State(reading()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["data"]["beatInBar"], 4);
        assert_eq!(value["data"]["source"], "internal");
    }

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(BroadcastMessage::State(reading()));

        let mut rx = broadcaster.subscribe();
        broadcaster.publish(BroadcastMessage::State(reading()));
        assert_eq!(rx.recv().await.unwrap(), BroadcastMessage::State(reading()));
    }
}
