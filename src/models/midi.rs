use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Parsed channel-voice message. Channels are 1-16.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq)]
#[ts(export, export_to = "../../src/bindings/midi.ts")]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, TS, PartialEq, Eq, Hash)]
#[ts(export, export_to = "../../src/bindings/midi.ts")]
#[serde(rename_all = "lowercase")]
pub enum MidiSelectorKind {
    Cc,
    Note,
}

/// Engine command bound to a controller input.
#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq, Eq)]
#[ts(export, export_to = "../../src/bindings/midi.ts")]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MidiAction {
    MasterDimmer,
    MasterBlackout,
    TransportPlay,
    TransportStop,
    SetNext,
    SetPrev,
    SetActivate,
    SetTrigger {
        #[serde(default, rename = "setId")]
        set_id: Option<String>,
    },
}

impl MidiAction {
    /// Continuous actions follow the value; the rest fire on the rising edge.
    pub fn is_continuous(&self) -> bool {
        matches!(self, MidiAction::MasterDimmer)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq, Eq)]
#[ts(export, export_to = "../../src/bindings/midi.ts")]
#[serde(rename_all = "camelCase")]
pub struct MidiMapping {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MidiSelectorKind,
    pub number: u8,
    pub channel: u8,
    pub action: MidiAction,
}

impl MidiMapping {
    pub fn matches(&self, message: &MidiMessage) -> bool {
        if message.channel() != self.channel {
            return false;
        }
        match (self.kind, *message) {
            (MidiSelectorKind::Cc, MidiMessage::ControlChange { controller, .. }) => {
                controller == self.number
            }
            (MidiSelectorKind::Note, MidiMessage::NoteOn { note, .. }) => note == self.number,
            _ => false,
        }
    }
}
