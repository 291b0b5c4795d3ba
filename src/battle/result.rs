//! Battle results and the persisted battle record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fleet::FleetCombatState;
use super::types::{BattleArea, BattleId, BattleRules, BattleStatus, CharacterId, FactionId, FleetId};
use crate::world::GridCoord;

/// Why a battle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    /// One faction left standing
    Victory,
    /// Nobody left standing
    MutualDestruction,
    Timeout,
    Stalemate,
    SupplyExhaustion,
    /// Stopped from outside
    Manual,
}

/// Outcome for one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub fleet_id: FleetId,
    pub faction: FactionId,
    pub ships_lost: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub survived: bool,
    pub withdrawn: bool,
}

impl From<&FleetCombatState> for ParticipantResult {
    fn from(fleet: &FleetCombatState) -> Self {
        Self {
            fleet_id: fleet.fleet_id,
            faction: fleet.faction,
            ships_lost: fleet.ships_lost,
            damage_dealt: fleet.damage_dealt,
            damage_taken: fleet.damage_taken,
            survived: !fleet.defeated,
            withdrawn: fleet.withdrawn,
        }
    }
}

/// Final result of a battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleResult {
    /// `None` is a draw
    pub winner: Option<FactionId>,
    pub reason: EndReason,
    pub duration_ticks: u64,
    /// Units destroyed across all fleets
    pub total_ships_destroyed: u64,
    pub participants: Vec<ParticipantResult>,
}

impl BattleResult {
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

/// Per-participant cumulative stats as saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub fleet_id: FleetId,
    pub name: String,
    pub faction: FactionId,
    pub owner_id: Option<CharacterId>,
    pub commander_id: Option<CharacterId>,
    pub units: u32,
    pub max_units: u32,
    pub hp: f32,
    pub morale: f32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub ships_lost: u32,
    pub defeated: bool,
    pub withdrawn: bool,
    pub joined_tick: u64,
}

impl From<&FleetCombatState> for ParticipantRecord {
    fn from(fleet: &FleetCombatState) -> Self {
        Self {
            fleet_id: fleet.fleet_id,
            name: fleet.name.clone(),
            faction: fleet.faction,
            owner_id: fleet.owner_id,
            commander_id: fleet.commander_id,
            units: fleet.units,
            max_units: fleet.max_units,
            hp: fleet.hp,
            morale: fleet.morale,
            damage_dealt: fleet.damage_dealt,
            damage_taken: fleet.damage_taken,
            ships_lost: fleet.ships_lost,
            defeated: fleet.defeated,
            withdrawn: fleet.withdrawn,
            joined_tick: fleet.joined_tick,
        }
    }
}

/// Persisted battle document, written periodically and at the end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRecord {
    pub battle_id: BattleId,
    pub status: BattleStatus,
    pub tick: u64,
    pub tick_rate: u32,
    pub max_ticks: u64,
    pub area: BattleArea,
    pub rules: BattleRules,
    pub location: Option<GridCoord>,
    pub seed: u64,
    pub participants: Vec<ParticipantRecord>,
    pub result: Option<BattleResult>,
    pub saved_at: DateTime<Utc>,
}

impl BattleRecord {
    /// Whether this record may replace `existing` in a store.
    /// Older ticks never win, and once a battle has ended only another
    /// ended record replaces it.
    pub fn supersedes(&self, existing: &BattleRecord) -> bool {
        if self.tick < existing.tick {
            return false;
        }
        existing.status != BattleStatus::Ended || self.status == BattleStatus::Ended
    }
}
