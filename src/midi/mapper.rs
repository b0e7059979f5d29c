use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::models::midi::{MidiAction, MidiMapping, MidiMessage, MidiSelectorKind};

pub const STORAGE_KEY: &str = "midi-mappings";
pub const DIMMER_SMOOTHING: f64 = 0.12;
const SNAP_DISTANCE: f64 = 0.5;

// ============================================================================
// Commands
// ============================================================================

/// What a matched event asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MidiCommand {
    /// New master-dimmer target, 0-100. Reached gradually via [`DimmerSmoother`].
    DimmerTarget(f64),
    ToggleBlackout,
    TogglePlay,
    Stop,
    SelectNext,
    SelectPrev,
    /// Switch to the selected set.
    Activate,
    /// Switch to the given set (or the selected one) and start playing.
    Trigger(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MidiOutcome {
    Command(MidiCommand),
    Learned(MidiMapping),
    Ignored,
}

/// Event value: CC value, note velocity, otherwise full scale.
pub fn event_value(message: &MidiMessage) -> u8 {
    match *message {
        MidiMessage::ControlChange { value, .. } => value,
        MidiMessage::NoteOn { velocity, .. } | MidiMessage::NoteOff { velocity, .. } => velocity,
        MidiMessage::PitchBend { .. } => 127,
    }
}

pub fn clamp_channel(channel: u8) -> u8 {
    channel.clamp(1, 16)
}

fn command_for(action: &MidiAction, value: u8) -> Option<MidiCommand> {
    if action.is_continuous() {
        return Some(MidiCommand::DimmerTarget(
            (value as f64 / 127.0 * 100.0).round(),
        ));
    }
    if value == 0 {
        return None;
    }
    let command = match action {
        MidiAction::MasterDimmer => return None,
        MidiAction::MasterBlackout => MidiCommand::ToggleBlackout,
        MidiAction::TransportPlay => MidiCommand::TogglePlay,
        MidiAction::TransportStop => MidiCommand::Stop,
        MidiAction::SetNext => MidiCommand::SelectNext,
        MidiAction::SetPrev => MidiCommand::SelectPrev,
        MidiAction::SetActivate => MidiCommand::Activate,
        MidiAction::SetTrigger { set_id } => MidiCommand::Trigger(set_id.clone()),
    };
    Some(command)
}

// ============================================================================
// Mapper
// ============================================================================

fn default_mapping(
    id: &str,
    name: &str,
    kind: MidiSelectorKind,
    number: u8,
    action: MidiAction,
) -> MidiMapping {
    MidiMapping {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        number,
        channel: 1,
        action,
    }
}

pub fn default_mappings() -> Vec<MidiMapping> {
    use MidiSelectorKind::{Cc, Note};
    vec![
        default_mapping("default-dimmer", "Master Dimmer", Cc, 74, MidiAction::MasterDimmer),
        default_mapping("default-play", "Play/Pause", Note, 72, MidiAction::TransportPlay),
        default_mapping("default-blackout", "Blackout", Note, 73, MidiAction::MasterBlackout),
        default_mapping("default-prev", "Prev Set", Note, 79, MidiAction::SetPrev),
        default_mapping("default-next", "Next Set", Note, 80, MidiAction::SetNext),
        default_mapping("default-setactive", "Set Active", Note, 83, MidiAction::SetActivate),
    ]
}

#[derive(Debug, Serialize, Deserialize, Clone, TS, PartialEq)]
#[ts(export, export_to = "../../src/bindings/midi.ts")]
#[serde(rename_all = "camelCase")]
pub struct LastTriggered {
    pub mapping_id: String,
    pub value: u8,
}

#[derive(Debug, Clone)]
pub struct MidiMapper {
    mappings: Vec<MidiMapping>,
    learning: Option<MidiAction>,
    last_triggered: Option<LastTriggered>,
    revision: u64,
}

impl Default for MidiMapper {
    fn default() -> Self {
        Self::new(default_mappings())
    }
}

impl MidiMapper {
    /// An empty saved list falls back to the defaults.
    pub fn new(mappings: Vec<MidiMapping>) -> Self {
        let mappings = if mappings.is_empty() {
            default_mappings()
        } else {
            mappings
        };
        Self {
            mappings,
            learning: None,
            last_triggered: None,
            revision: 0,
        }
    }

    pub fn mappings(&self) -> &[MidiMapping] {
        &self.mappings
    }

    /// Bumped on every mapping change; drives persistence.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_triggered(&self) -> Option<&LastTriggered> {
        self.last_triggered.as_ref()
    }

    pub fn is_learning(&self) -> bool {
        self.learning.is_some()
    }

    pub fn find(&self, message: &MidiMessage) -> Option<&MidiMapping> {
        self.mappings.iter().find(|m| m.matches(message))
    }

    pub fn handle(&mut self, message: &MidiMessage) -> MidiOutcome {
        if self.learning.is_some() {
            return self.learn(message);
        }

        let Some(mapping) = self.find(message) else {
            return MidiOutcome::Ignored;
        };
        let value = event_value(message);
        let mapping_id = mapping.id.clone();
        let command = command_for(&mapping.action, value);
        log::debug!("[MidiMapper] {} -> {:?}", mapping.name, command);

        self.last_triggered = Some(LastTriggered { mapping_id, value });
        command.map_or(MidiOutcome::Ignored, MidiOutcome::Command)
    }

    // ------------------------------------------------------------------------
    // Learn mode
    // ------------------------------------------------------------------------

    /// The next CC or note-on is bound to `action` instead of being dispatched.
    pub fn start_learning(&mut self, action: MidiAction) {
        self.learning = Some(action);
    }

    pub fn cancel_learning(&mut self) {
        self.learning = None;
    }

    fn learn(&mut self, message: &MidiMessage) -> MidiOutcome {
        let (kind, number) = match *message {
            MidiMessage::ControlChange { controller, .. } => (MidiSelectorKind::Cc, controller),
            MidiMessage::NoteOn { note, .. } => (MidiSelectorKind::Note, note),
            _ => return MidiOutcome::Ignored,
        };
        let Some(action) = self.learning.take() else {
            return MidiOutcome::Ignored;
        };
        let channel = message.channel();

        self.mappings
            .retain(|m| !(m.kind == kind && m.number == number && m.channel == channel));
        let mapping = self.add_mapping(&action_label(&action), kind, number, channel, action);
        log::info!(
            "[MidiMapper] learned {:?} {} ch{} -> {}",
            kind,
            number,
            channel,
            mapping.name
        );
        MidiOutcome::Learned(mapping)
    }

    // ------------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------------

    pub fn add_mapping(
        &mut self,
        name: &str,
        kind: MidiSelectorKind,
        number: u8,
        channel: u8,
        action: MidiAction,
    ) -> MidiMapping {
        let mapping = MidiMapping {
            id: format!("mapping-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            kind,
            number: number.min(127),
            channel: clamp_channel(channel),
            action,
        };
        self.mappings.push(mapping.clone());
        self.revision += 1;
        mapping
    }

    /// Replace the mapping with the same id. Returns false when it is unknown.
    pub fn update_mapping(&mut self, mut mapping: MidiMapping) -> bool {
        let Some(slot) = self.mappings.iter_mut().find(|m| m.id == mapping.id) else {
            return false;
        };
        mapping.channel = clamp_channel(mapping.channel);
        mapping.number = mapping.number.min(127);
        *slot = mapping;
        self.revision += 1;
        true
    }

    pub fn delete_mapping(&mut self, id: &str) {
        self.mappings.retain(|m| m.id != id);
        self.revision += 1;
    }

    pub fn load_defaults(&mut self) {
        self.mappings = default_mappings();
        self.revision += 1;
    }

    pub fn clear_all(&mut self) {
        self.mappings.clear();
        self.revision += 1;
    }
}

fn action_label(action: &MidiAction) -> String {
    match action {
        MidiAction::MasterDimmer => "Master Dimmer",
        MidiAction::MasterBlackout => "Blackout",
        MidiAction::TransportPlay => "Play/Pause",
        MidiAction::TransportStop => "Stop",
        MidiAction::SetNext => "Next Set",
        MidiAction::SetPrev => "Prev Set",
        MidiAction::SetActivate => "Set Active",
        MidiAction::SetTrigger { .. } => "Trigger Set",
    }
    .to_string()
}

// ============================================================================
// Dimmer smoothing
// ============================================================================

/// Eases the master dimmer toward a controller target, one step per tick.
#[derive(Debug, Clone)]
pub struct DimmerSmoother {
    current: f64,
    target: f64,
    active: bool,
}

impl DimmerSmoother {
    pub fn new(value: f64) -> Self {
        Self {
            current: value,
            target: value,
            active: false,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target.clamp(0.0, 100.0);
        self.active = true;
    }

    /// Follow a value set from elsewhere without animating.
    pub fn sync(&mut self, value: f64) {
        self.current = value;
        self.target = value;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Advance one tick. Returns the rounded level to apply, or None when idle.
    pub fn step(&mut self) -> Option<f64> {
        if !self.active {
            return None;
        }
        let diff = self.target - self.current;
        if diff.abs() < SNAP_DISTANCE {
            self.current = self.target;
            self.active = false;
        } else {
            self.current += diff * DIMMER_SMOOTHING;
        }
        Some(self.current.round())
    }
}
