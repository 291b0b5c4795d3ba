//! Snapshot building and delta compression

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::events::BattleEvent;
use super::fleet::{FleetCombatState, Formation};
use super::retreat::{RetreatController, RetreatPhase};
use super::supply::{SupplyState, SupplyTracker};
use super::types::{BattleArea, BattleId, BattleStatus, FactionId, FleetId};
use super::vector::angle_difference;

/// Fleets that moved less than this are left out of a delta
pub const DELTA_POSITION_EPSILON: f32 = 1.0;
/// Heading changes below this many degrees are ignored by deltas
pub const DELTA_HEADING_EPSILON: f32 = 0.01;

/// Per-fleet view in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub fleet_id: FleetId,
    pub name: String,
    pub faction: FactionId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub heading: f32,
    pub speed: f32,
    pub units: u32,
    pub max_units: u32,
    pub hp: f32,
    pub morale: f32,
    pub formation: Formation,
    pub target: Option<FleetId>,
    pub defeated: bool,
    pub withdrawn: bool,
    pub retreating: bool,
    pub retreat_phase: Option<RetreatPhase>,
    pub supply: Option<SupplyState>,
}

impl FleetSnapshot {
    fn new(fleet: &FleetCombatState, phase: Option<RetreatPhase>, supply: Option<SupplyState>) -> Self {
        Self {
            fleet_id: fleet.fleet_id,
            name: fleet.name.clone(),
            faction: fleet.faction,
            position: fleet.kinematics.position,
            velocity: fleet.kinematics.velocity,
            heading: fleet.kinematics.heading,
            speed: fleet.kinematics.speed,
            units: fleet.units,
            max_units: fleet.max_units,
            hp: fleet.hp,
            morale: fleet.morale,
            formation: fleet.formation,
            target: fleet.target,
            defeated: fleet.defeated,
            withdrawn: fleet.withdrawn,
            retreating: fleet.retreating,
            retreat_phase: phase,
            supply,
        }
    }

    /// Whether a client holding `prev` needs this fleet re-sent
    pub fn changed_since(&self, prev: &FleetSnapshot) -> bool {
        self.position.distance(prev.position) > DELTA_POSITION_EPSILON
            || self.hp != prev.hp
            || self.units != prev.units
            || angle_difference(prev.heading, self.heading).abs() > DELTA_HEADING_EPSILON
            || self.defeated != prev.defeated
            || self.retreating != prev.retreating
            || self.withdrawn != prev.withdrawn
    }
}

/// Immutable view of a battle at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    pub battle_id: BattleId,
    pub tick: u64,
    pub status: BattleStatus,
    pub area: BattleArea,
    pub fleets: Vec<FleetSnapshot>,
    pub events: Vec<BattleEvent>,
}

impl BattleSnapshot {
    pub fn fleet(&self, fleet_id: &FleetId) -> Option<&FleetSnapshot> {
        self.fleets.iter().find(|f| f.fleet_id == *fleet_id)
    }
}

/// Only the fleets that changed since `base_tick`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleDelta {
    pub battle_id: BattleId,
    pub tick: u64,
    pub base_tick: u64,
    pub status: BattleStatus,
    pub fleets: Vec<FleetSnapshot>,
    pub events: Vec<BattleEvent>,
}

/// Builds snapshots for subscribers
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        battle_id: BattleId,
        tick: u64,
        status: BattleStatus,
        area: &BattleArea,
        fleets: &BTreeMap<FleetId, FleetCombatState>,
        retreats: &RetreatController,
        supply: Option<&SupplyTracker>,
        events: Vec<BattleEvent>,
    ) -> BattleSnapshot {
        let fleets = fleets
            .values()
            .map(|f| {
                let phase = retreats.get(&f.fleet_id).map(|r| r.phase);
                let supply = supply.and_then(|s| s.get(&f.fleet_id).copied());
                FleetSnapshot::new(f, phase, supply)
            })
            .collect();

        BattleSnapshot {
            battle_id,
            tick,
            status,
            area: *area,
            fleets,
            events,
        }
    }

    /// Keep fleets that are new or changed since `prev`; events are always kept
    pub fn delta(prev: &BattleSnapshot, current: &BattleSnapshot) -> BattleDelta {
        let previous: BTreeMap<FleetId, &FleetSnapshot> =
            prev.fleets.iter().map(|f| (f.fleet_id, f)).collect();

        let fleets = current
            .fleets
            .iter()
            .filter(|f| {
                previous
                    .get(&f.fleet_id)
                    .map_or(true, |old| f.changed_since(old))
            })
            .cloned()
            .collect();

        BattleDelta {
            battle_id: current.battle_id,
            tick: current.tick,
            base_tick: prev.tick,
            status: current.status,
            fleets,
            events: current.events.clone(),
        }
    }
}
