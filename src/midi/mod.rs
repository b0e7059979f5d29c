//! Controller input: raw message parsing, the device connection, and the
//! mapping layer that turns events into engine commands.

pub mod input;
pub mod mapper;

use crate::models::midi::MidiMessage;

/// Parse one channel-voice message. Anything else (system, running status,
/// short buffers) is ignored.
pub fn parse_message(bytes: &[u8]) -> Option<MidiMessage> {
    let status = *bytes.first()?;
    let channel = (status & 0x0F) + 1;

    match status & 0xF0 {
        0x90 if bytes.len() >= 3 => {
            let (note, velocity) = (bytes[1] & 0x7F, bytes[2] & 0x7F);
            if velocity == 0 {
                Some(MidiMessage::NoteOff {
                    channel,
                    note,
                    velocity,
                })
            } else {
                Some(MidiMessage::NoteOn {
                    channel,
                    note,
                    velocity,
                })
            }
        }
        0x80 if bytes.len() >= 3 => Some(MidiMessage::NoteOff {
            channel,
            note: bytes[1] & 0x7F,
            velocity: bytes[2] & 0x7F,
        }),
        0xB0 if bytes.len() >= 3 => Some(MidiMessage::ControlChange {
            channel,
            controller: bytes[1] & 0x7F,
            value: bytes[2] & 0x7F,
        }),
        0xE0 if bytes.len() >= 3 => {
            let lsb = (bytes[1] & 0x7F) as u16;
            let msb = (bytes[2] & 0x7F) as u16;
            Some(MidiMessage::PitchBend {
                channel,
                value: (msb << 7) | lsb,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_and_zero_velocity() {
        assert_eq!(
            parse_message(&[0x90, 72, 100]),
            Some(MidiMessage::NoteOn {
                channel: 1,
                note: 72,
                velocity: 100
            })
        );
        assert_eq!(
            parse_message(&[0x93, 72, 0]),
            Some(MidiMessage::NoteOff {
                channel: 4,
                note: 72,
                velocity: 0
            })
        );
    }

    #[test]
    fn control_change_and_pitch_bend() {
        assert_eq!(
            parse_message(&[0xB0, 74, 64]),
            Some(MidiMessage::ControlChange {
                channel: 1,
                controller: 74,
                value: 64
            })
        );
        assert_eq!(
            parse_message(&[0xEF, 0x00, 0x40]),
            Some(MidiMessage::PitchBend {
                channel: 16,
                value: 8192
            })
        );
    }

    #[test]
    fn other_messages_are_ignored() {
        assert_eq!(parse_message(&[]), None);
        assert_eq!(parse_message(&[0xF8]), None);
        assert_eq!(parse_message(&[0xC0, 5]), None);
        assert_eq!(parse_message(&[0x90, 72]), None);
    }
}
