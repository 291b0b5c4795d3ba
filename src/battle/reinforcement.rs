//! Reinforcement state machine: approved, en route, arriving

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::RejectReason;
use super::fleet::FleetLoadout;
use super::types::{FactionId, FleetId};

/// Fixed travel overhead in ticks
pub const BASE_ARRIVAL_TICKS: u64 = 50;
/// Extra ticks per grid cell travelled
pub const TICKS_PER_GRID: u64 = 100;
/// Urgent requests travel this much faster
pub const URGENT_FACTOR: f64 = 0.5;
/// Farthest a reinforcement may come from, in grid cells
pub const MAX_REINFORCEMENT_DISTANCE: u32 = 2;
/// Final stretch before arrival
pub const ARRIVING_WINDOW_TICKS: u64 = 20;

pub const MAX_REINFORCEMENTS_PER_BATTLE: usize = 10;
pub const MAX_REINFORCEMENTS_PER_FACTION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinforcementPriority {
    #[default]
    Normal,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReinforcementPhase {
    Approved,
    EnRoute,
    Arriving,
}

/// An approved reinforcement travelling to the battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementRecord {
    pub fleet_id: FleetId,
    pub faction: FactionId,
    pub units: u32,
    pub requested_tick: u64,
    pub arrival_tick: u64,
    pub distance: u32,
    pub priority: ReinforcementPriority,
    pub phase: ReinforcementPhase,
    pub loadout: FleetLoadout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReinforcementTransition {
    PhaseChanged {
        fleet_id: FleetId,
        phase: ReinforcementPhase,
    },
    Arrived(ReinforcementRecord),
}

/// Ticks until a reinforcement from `distance` cells away arrives
pub fn travel_ticks(distance: u32, priority: ReinforcementPriority) -> u64 {
    let ticks = BASE_ARRIVAL_TICKS + distance as u64 * TICKS_PER_GRID;
    match priority {
        ReinforcementPriority::Normal => ticks,
        ReinforcementPriority::Urgent => ((ticks as f64) * URGENT_FACTOR).round() as u64,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReinforcementController {
    records: BTreeMap<FleetId, ReinforcementRecord>,
}

impl ReinforcementController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fleet_id: &FleetId) -> Option<&ReinforcementRecord> {
        self.records.get(fleet_id)
    }

    pub fn is_pending(&self, fleet_id: &FleetId) -> bool {
        self.records.contains_key(fleet_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ReinforcementRecord> {
        self.records.values()
    }

    /// Units a faction has on the way
    pub fn pending_units(&self, faction: FactionId) -> u32 {
        self.records
            .values()
            .filter(|r| r.faction == faction)
            .map(|r| r.units)
            .fold(0, u32::saturating_add)
    }

    /// Validate and queue a reinforcement.
    ///
    /// `committed_units` is what the faction already fields in the battle.
    /// Nothing changes when the request is rejected.
    pub fn request(
        &mut self,
        loadout: FleetLoadout,
        distance: u32,
        priority: ReinforcementPriority,
        tick: u64,
        committed_units: u32,
        unit_cap: u32,
    ) -> Result<&ReinforcementRecord, RejectReason> {
        if self.records.contains_key(&loadout.fleet_id) {
            return Err(RejectReason::TransitionInFlight);
        }
        if distance > MAX_REINFORCEMENT_DISTANCE {
            return Err(RejectReason::NotAdjacent);
        }

        let incoming = committed_units
            .saturating_add(self.pending_units(loadout.faction))
            .saturating_add(loadout.units);
        if incoming > unit_cap {
            return Err(RejectReason::CapacityExceeded);
        }

        let faction_count = self
            .records
            .values()
            .filter(|r| r.faction == loadout.faction)
            .count();
        if self.records.len() >= MAX_REINFORCEMENTS_PER_BATTLE
            || faction_count >= MAX_REINFORCEMENTS_PER_FACTION
        {
            return Err(RejectReason::QueueFull);
        }

        let record = ReinforcementRecord {
            fleet_id: loadout.fleet_id,
            faction: loadout.faction,
            units: loadout.units,
            requested_tick: tick,
            arrival_tick: tick + travel_ticks(distance, priority),
            distance,
            priority,
            phase: ReinforcementPhase::Approved,
            loadout,
        };
        Ok(self.records.entry(record.fleet_id).or_insert(record))
    }

    /// Move every reinforcement forward to `tick`, returning arrivals
    pub fn advance(&mut self, tick: u64) -> Vec<ReinforcementTransition> {
        let mut transitions = Vec::new();
        let mut arrived = Vec::new();

        for (fleet_id, record) in self.records.iter_mut() {
            if tick >= record.arrival_tick {
                arrived.push(*fleet_id);
                continue;
            }

            let phase = if tick + ARRIVING_WINDOW_TICKS >= record.arrival_tick {
                ReinforcementPhase::Arriving
            } else {
                ReinforcementPhase::EnRoute
            };
            if phase != record.phase {
                record.phase = phase;
                transitions.push(ReinforcementTransition::PhaseChanged {
                    fleet_id: *fleet_id,
                    phase,
                });
            }
        }

        for fleet_id in arrived {
            if let Some(record) = self.records.remove(&fleet_id) {
                transitions.push(ReinforcementTransition::Arrived(record));
            }
        }

        transitions
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::fleet::test_support::loadout;
    use glam::Vec3;

    #[test]
    fn travel_time_scales_with_distance() {
        assert_eq!(travel_ticks(0, ReinforcementPriority::Normal), 50);
        assert_eq!(travel_ticks(2, ReinforcementPriority::Normal), 250);
        assert_eq!(travel_ticks(1, ReinforcementPriority::Urgent), 75);
    }

    #[test]
    fn over_cap_request_changes_nothing() {
        let mut controller = ReinforcementController::new();
        let result = controller.request(
            loadout(1, 10, Vec3::ZERO),
            1,
            ReinforcementPriority::Normal,
            0,
            295,
            300,
        );
        assert_eq!(result.unwrap_err(), RejectReason::CapacityExceeded);
        assert_eq!(controller.records().count(), 0);
        assert_eq!(controller.pending_units(FactionId(1)), 0);
    }

    #[test]
    fn pending_units_count_toward_cap() {
        let mut controller = ReinforcementController::new();
        controller
            .request(loadout(1, 100, Vec3::ZERO), 1, ReinforcementPriority::Normal, 0, 150, 300)
            .unwrap();
        let second = controller.request(
            loadout(1, 60, Vec3::ZERO),
            1,
            ReinforcementPriority::Normal,
            0,
            150,
            300,
        );
        assert_eq!(second.unwrap_err(), RejectReason::CapacityExceeded);
    }

    #[test]
    fn too_far_is_rejected() {
        let mut controller = ReinforcementController::new();
        let result = controller.request(
            loadout(1, 5, Vec3::ZERO),
            3,
            ReinforcementPriority::Urgent,
            0,
            0,
            300,
        );
        assert_eq!(result.unwrap_err(), RejectReason::NotAdjacent);
    }

    #[test]
    fn phases_advance_to_arrival() {
        let mut controller = ReinforcementController::new();
        let l = loadout(1, 5, Vec3::ZERO);
        let id = l.fleet_id;
        controller
            .request(l, 0, ReinforcementPriority::Normal, 0, 0, 300)
            .unwrap();

        assert_eq!(
            controller.advance(1),
            vec![ReinforcementTransition::PhaseChanged {
                fleet_id: id,
                phase: ReinforcementPhase::EnRoute
            }]
        );
        assert_eq!(
            controller.advance(30),
            vec![ReinforcementTransition::PhaseChanged {
                fleet_id: id,
                phase: ReinforcementPhase::Arriving
            }]
        );
        let arrived = controller.advance(50);
        assert!(matches!(arrived.as_slice(), [ReinforcementTransition::Arrived(r)] if r.fleet_id == id));
        assert!(!controller.is_pending(&id));
    }
}
