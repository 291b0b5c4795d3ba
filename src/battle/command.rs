//! Fleet commands queued by players and the AI

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::error::RejectReason;
use super::fleet::Formation;
use super::types::{CharacterId, CommandId, FleetId};

/// Command type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Move,
    Attack,
    Formation,
    Retreat,
    Stop,
    Rotate,
}

/// Command arguments; which fields are required depends on the kind
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPayload {
    pub target_position: Option<Vec3>,
    pub target_fleet: Option<FleetId>,
    pub heading: Option<f32>,
    pub formation: Option<Formation>,
}

impl CommandPayload {
    pub fn move_to(position: Vec3) -> Self {
        Self {
            target_position: Some(position),
            ..Self::default()
        }
    }

    pub fn attack(target: FleetId) -> Self {
        Self {
            target_fleet: Some(target),
            ..Self::default()
        }
    }

    pub fn rotate(heading: f32) -> Self {
        Self {
            heading: Some(heading),
            ..Self::default()
        }
    }

    pub fn formation(formation: Formation) -> Self {
        Self {
            formation: Some(formation),
            ..Self::default()
        }
    }
}

/// Who issued a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CommandSource {
    Player(CharacterId),
    Ai,
    System,
}

/// A queued command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleCommand {
    pub id: CommandId,
    pub fleet_id: FleetId,
    pub kind: CommandKind,
    pub payload: CommandPayload,
    pub issued_tick: u64,
    pub source: CommandSource,
}

impl BattleCommand {
    pub fn new(
        fleet_id: FleetId,
        kind: CommandKind,
        payload: CommandPayload,
        source: CommandSource,
    ) -> Self {
        Self {
            id: CommandId::new(),
            fleet_id,
            kind,
            payload,
            issued_tick: 0,
            source,
        }
    }

    /// Shape check only; battle-state checks happen when the command is applied
    pub fn validate(&self) -> Result<(), RejectReason> {
        let p = &self.payload;
        let ok = match self.kind {
            CommandKind::Move => p.target_position.is_some_and(|v| v.is_finite()),
            CommandKind::Attack => p.target_fleet.is_some_and(|t| t != self.fleet_id),
            CommandKind::Rotate => p.heading.is_some_and(f32::is_finite),
            CommandKind::Formation => p.formation.is_some(),
            CommandKind::Retreat | CommandKind::Stop => true,
        };
        if ok {
            Ok(())
        } else {
            Err(RejectReason::MalformedCommand)
        }
    }

    /// Ticks since the command was queued
    pub fn age(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.issued_tick)
    }
}

/// What happened to a command when the engine reached it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// Left in the queue for a later tick
    Deferred,
    Rejected(RejectReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape_is_checked_per_kind() {
        let fleet = FleetId::new();
        let ok = BattleCommand::new(
            fleet,
            CommandKind::Move,
            CommandPayload::move_to(Vec3::new(1.0, 2.0, 0.0)),
            CommandSource::Ai,
        );
        assert!(ok.validate().is_ok());

        let missing = BattleCommand::new(
            fleet,
            CommandKind::Move,
            CommandPayload::default(),
            CommandSource::Ai,
        );
        assert_eq!(missing.validate(), Err(RejectReason::MalformedCommand));

        let self_attack = BattleCommand::new(
            fleet,
            CommandKind::Attack,
            CommandPayload::attack(fleet),
            CommandSource::Ai,
        );
        assert_eq!(self_attack.validate(), Err(RejectReason::MalformedCommand));

        let nan = BattleCommand::new(
            fleet,
            CommandKind::Rotate,
            CommandPayload::rotate(f32::NAN),
            CommandSource::Ai,
        );
        assert!(nan.validate().is_err());
    }

    #[test]
    fn kind_uses_upper_case_codes() {
        assert_eq!(
            serde_json::to_string(&CommandKind::Retreat).unwrap(),
            "\"RETREAT\""
        );
    }
}
