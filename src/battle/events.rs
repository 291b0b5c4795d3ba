//! Tick-stamped battle events

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::command::CommandKind;
use super::error::RejectReason;
use super::retreat::RetreatPhase;
use super::supply::SupplyResource;
use super::types::{CommandId, FactionId, FleetId};
use crate::world::GridCoord;

/// One fact that happened during a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleEvent {
    pub tick: u64,
    #[serde(flatten)]
    pub kind: BattleEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleEventKind {
    FleetJoined {
        fleet_id: FleetId,
        faction: FactionId,
        units: u32,
        reinforcement: bool,
    },
    CommandApplied {
        command_id: CommandId,
        fleet_id: FleetId,
        command: CommandKind,
    },
    CommandRejected {
        command_id: CommandId,
        fleet_id: FleetId,
        command: CommandKind,
        reason: RejectReason,
    },
    DamageDealt {
        attacker_id: FleetId,
        target_id: FleetId,
        damage: f32,
        hit: bool,
    },
    ShipDestroyed {
        attacker_id: FleetId,
        fleet_id: FleetId,
        units: u32,
    },
    FleetDestroyed {
        fleet_id: FleetId,
        attacker_id: FleetId,
    },
    Collision {
        fleet_a: FleetId,
        fleet_b: FleetId,
        penetration: f32,
    },
    RetreatStarted {
        fleet_id: FleetId,
        completes_at: u64,
    },
    RetreatPhaseChanged {
        fleet_id: FleetId,
        phase: RetreatPhase,
    },
    RetreatCancelled {
        fleet_id: FleetId,
    },
    RetreatCompleted {
        fleet_id: FleetId,
        destination: Option<GridCoord>,
    },
    RetreatFailed {
        fleet_id: FleetId,
        units_lost: u32,
    },
    ReinforcementRequested {
        fleet_id: FleetId,
        faction: FactionId,
        units: u32,
        arrival_tick: u64,
    },
    ReinforcementArrived {
        fleet_id: FleetId,
        position: Vec3,
    },
    SupplyDepleted {
        fleet_id: FleetId,
        resource: SupplyResource,
    },
    SupplyRestored {
        fleet_id: FleetId,
        resource: SupplyResource,
    },
    SupplyGraceStarted {
        ends_at: u64,
    },
    SupplyGraceCleared,
}

impl BattleEventKind {
    pub fn at(self, tick: u64) -> BattleEvent {
        BattleEvent { tick, kind: self }
    }
}
