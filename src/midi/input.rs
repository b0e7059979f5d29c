use midir::{MidiInput, MidiInputConnection};
use tokio::sync::mpsc;

use super::parse_message;
use crate::models::midi::MidiMessage;

const CLIENT_NAME: &str = "beatlight";

#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub name: String,
    pub port_index: usize,
}

/// Owns the open controller connections and forwards parsed messages into a
/// tokio channel. Dropping the manager closes every connection.
pub struct MidiInputManager {
    message_tx: mpsc::UnboundedSender<MidiMessage>,
    connections: Vec<MidiInputConnection<()>>,
    connected: Vec<MidiPortInfo>,
}

impl MidiInputManager {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MidiMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                message_tx: tx,
                connections: Vec::new(),
                connected: Vec::new(),
            },
            rx,
        )
    }

    pub fn list_ports() -> Result<Vec<MidiPortInfo>, String> {
        let midi_in = MidiInput::new(&format!("{}-ports", CLIENT_NAME))
            .map_err(|e| format!("Failed to create MIDI input: {}", e))?;

        Ok(midi_in
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| MidiPortInfo {
                name: midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {}", index)),
                port_index: index,
            })
            .collect())
    }

    /// Open the first port whose name contains `name` (case-insensitive).
    pub fn open_by_name(&mut self, name: &str) -> Result<MidiPortInfo, String> {
        let needle = name.to_lowercase();
        let port = Self::list_ports()?
            .into_iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
            .ok_or_else(|| format!("No MIDI device found matching '{}'", name))?;
        self.open_by_index(port.port_index)
    }

    pub fn open_by_index(&mut self, port_index: usize) -> Result<MidiPortInfo, String> {
        let midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|e| format!("Failed to create MIDI input: {}", e))?;
        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| format!("Invalid MIDI port index: {}", port_index))?;
        let name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| format!("Unknown Device {}", port_index));

        let tx = self.message_tx.clone();
        let connection = midi_in
            .connect(
                port,
                &format!("{}-input", CLIENT_NAME),
                move |_timestamp, bytes, _| {
                    if let Some(message) = parse_message(bytes) {
                        log::debug!("[MidiIn] {:?}", message);
                        let _ = tx.send(message);
                    }
                },
                (),
            )
            .map_err(|e| format!("Failed to connect to MIDI device: {}", e))?;

        let info = MidiPortInfo { name, port_index };
        self.connections.push(connection);
        self.connected.push(info.clone());
        log::info!("[MidiIn] connected to {} (port {})", info.name, port_index);
        Ok(info)
    }

    pub fn connected(&self) -> &[MidiPortInfo] {
        &self.connected
    }

    pub fn close_all(&mut self) {
        for connection in self.connections.drain(..) {
            connection.close();
        }
        self.connected.clear();
    }
}
