//! Retreat state machine: charge, run for the edge, warp out

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::error::RejectReason;
use super::fleet::FleetCombatState;
use super::types::{BattleArea, FactionId, FleetId};
use crate::world::GridCoord;

/// Retreats allowed in flight per battle
pub const MAX_RETREATS_PER_BATTLE: usize = 20;
/// Retreats allowed in flight per faction
pub const MAX_RETREATS_PER_FACTION: usize = 10;

/// Progress fraction at which charging ends
const CHARGE_END: f32 = 0.3;
/// Progress fraction at which the warp begins
const MOVE_END: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetreatPhase {
    Charging,
    MovingToEdge,
    Warping,
}

impl RetreatPhase {
    pub fn for_progress(progress: f32) -> Self {
        if progress < CHARGE_END {
            RetreatPhase::Charging
        } else if progress < MOVE_END {
            RetreatPhase::MovingToEdge
        } else {
            RetreatPhase::Warping
        }
    }
}

/// An in-flight retreat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetreatRecord {
    pub fleet_id: FleetId,
    pub faction: FactionId,
    pub start_tick: u64,
    pub complete_tick: u64,
    pub phase: RetreatPhase,
    /// Point on the area boundary the fleet runs for
    pub exit_point: Vec3,
    /// Caller-chosen destination, resolved automatically when absent
    pub destination: Option<GridCoord>,
    pub units_at_start: u32,
    pub losses: u32,
}

impl RetreatRecord {
    pub fn progress(&self, tick: u64) -> f32 {
        let total = self.complete_tick.saturating_sub(self.start_tick).max(1);
        (tick.saturating_sub(self.start_tick) as f32 / total as f32).clamp(0.0, 1.0)
    }
}

/// How a retreating fleet should be steered this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetreatSteering {
    Hold,
    MoveTo(Vec3),
}

/// Outcome of advancing one retreat
#[derive(Debug, Clone, PartialEq)]
pub enum RetreatTransition {
    PhaseChanged { fleet_id: FleetId, phase: RetreatPhase },
    Completed(RetreatRecord),
    Failed(RetreatRecord),
}

#[derive(Debug, Clone)]
pub struct RetreatController {
    duration_ticks: u64,
    records: BTreeMap<FleetId, RetreatRecord>,
}

impl RetreatController {
    pub fn new(duration_ticks: u64) -> Self {
        Self {
            duration_ticks: duration_ticks.max(1),
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, fleet_id: &FleetId) -> Option<&RetreatRecord> {
        self.records.get(fleet_id)
    }

    pub fn is_retreating(&self, fleet_id: &FleetId) -> bool {
        self.records.contains_key(fleet_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &RetreatRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Open a retreat for a fleet. The caller checks battle-level rules.
    pub fn begin(
        &mut self,
        fleet: &FleetCombatState,
        area: &BattleArea,
        tick: u64,
        destination: Option<GridCoord>,
    ) -> Result<&RetreatRecord, RejectReason> {
        if fleet.defeated {
            return Err(RejectReason::FleetDefeated);
        }
        if fleet.withdrawn {
            return Err(RejectReason::FleetWithdrawn);
        }
        if self.records.contains_key(&fleet.fleet_id) {
            return Err(RejectReason::TransitionInFlight);
        }
        let faction_count = self
            .records
            .values()
            .filter(|r| r.faction == fleet.faction)
            .count();
        if self.records.len() >= MAX_RETREATS_PER_BATTLE
            || faction_count >= MAX_RETREATS_PER_FACTION
        {
            return Err(RejectReason::QueueFull);
        }

        let record = RetreatRecord {
            fleet_id: fleet.fleet_id,
            faction: fleet.faction,
            start_tick: tick,
            complete_tick: tick + self.duration_ticks,
            phase: RetreatPhase::Charging,
            exit_point: area.nearest_edge_point(fleet.position()),
            destination,
            units_at_start: fleet.units,
            losses: 0,
        };
        Ok(self.records.entry(fleet.fleet_id).or_insert(record))
    }

    /// Abort a retreat; only allowed while still charging
    pub fn cancel(&mut self, fleet_id: &FleetId) -> Result<RetreatRecord, RejectReason> {
        let record = self
            .records
            .get(fleet_id)
            .ok_or(RejectReason::NotRetreating)?;
        if record.phase != RetreatPhase::Charging {
            return Err(RejectReason::NotCancellable);
        }
        self.records
            .remove(fleet_id)
            .ok_or(RejectReason::NotRetreating)
    }

    pub fn record_losses(&mut self, fleet_id: &FleetId, units: u32) {
        if let Some(record) = self.records.get_mut(fleet_id) {
            record.losses += units;
        }
    }

    pub fn steering(&self, fleet_id: &FleetId) -> Option<RetreatSteering> {
        self.records.get(fleet_id).map(|r| match r.phase {
            RetreatPhase::MovingToEdge => RetreatSteering::MoveTo(r.exit_point),
            RetreatPhase::Charging | RetreatPhase::Warping => RetreatSteering::Hold,
        })
    }

    /// Move every retreat forward to `tick`
    pub fn advance(
        &mut self,
        tick: u64,
        fleets: &BTreeMap<FleetId, FleetCombatState>,
    ) -> Vec<RetreatTransition> {
        let mut transitions = Vec::new();
        let mut finished = Vec::new();

        for (fleet_id, record) in self.records.iter_mut() {
            let lost = fleets.get(fleet_id).map_or(true, |f| f.defeated);
            if lost {
                finished.push((*fleet_id, false));
                continue;
            }

            if tick >= record.complete_tick {
                finished.push((*fleet_id, true));
                continue;
            }

            let phase = RetreatPhase::for_progress(record.progress(tick));
            if phase != record.phase {
                record.phase = phase;
                transitions.push(RetreatTransition::PhaseChanged {
                    fleet_id: *fleet_id,
                    phase,
                });
            }
        }

        for (fleet_id, completed) in finished {
            if let Some(record) = self.records.remove(&fleet_id) {
                transitions.push(if completed {
                    RetreatTransition::Completed(record)
                } else {
                    RetreatTransition::Failed(record)
                });
            }
        }

        transitions
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
