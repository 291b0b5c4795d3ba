//! Seam between the tick engine and whatever drives AI fleets

use std::collections::BTreeMap;

use super::command::BattleCommand;
use super::fleet::FleetCombatState;
use super::retreat::RetreatController;
use super::supply::{SupplyState, SupplyTracker};
use super::types::{BattleArea, BattleId, BattleRules, FleetId};

/// Read-only view of a battle handed to the AI each tick
pub struct BattleView<'a> {
    pub battle_id: BattleId,
    pub tick: u64,
    pub area: &'a BattleArea,
    pub rules: &'a BattleRules,
    pub fleets: &'a BTreeMap<FleetId, FleetCombatState>,
    pub retreats: &'a RetreatController,
    pub supply: Option<&'a SupplyTracker>,
}

impl<'a> BattleView<'a> {
    pub fn fleet(&self, fleet_id: &FleetId) -> Option<&'a FleetCombatState> {
        self.fleets.get(fleet_id)
    }

    pub fn active_fleets(&self) -> impl Iterator<Item = &'a FleetCombatState> {
        let fleets: &'a BTreeMap<FleetId, FleetCombatState> = self.fleets;
        fleets.values().filter(|f| f.is_active())
    }

    pub fn enemies_of<'b>(
        &'b self,
        fleet: &'b FleetCombatState,
    ) -> impl Iterator<Item = &'a FleetCombatState> + 'b {
        self.active_fleets().filter(move |f| f.faction != fleet.faction)
    }

    /// Active fleets of the same faction, excluding `fleet` itself
    pub fn allies_of<'b>(
        &'b self,
        fleet: &'b FleetCombatState,
    ) -> impl Iterator<Item = &'a FleetCombatState> + 'b {
        self.active_fleets()
            .filter(move |f| f.faction == fleet.faction && f.fleet_id != fleet.fleet_id)
    }

    pub fn is_retreating(&self, fleet_id: &FleetId) -> bool {
        self.retreats.is_retreating(fleet_id)
            || self.fleets.get(fleet_id).is_some_and(|f| f.retreating)
    }

    pub fn supply_of(&self, fleet_id: &FleetId) -> Option<&'a SupplyState> {
        self.supply.and_then(|s| s.get(fleet_id))
    }
}

/// Produces commands for AI-controlled fleets.
///
/// Injected into the engine so the simulation does not depend on the
/// decision code.
pub trait AiController: Send {
    /// Commands to enqueue at the start of the tick
    fn decide(&mut self, view: &BattleView<'_>) -> Vec<BattleCommand>;

    /// Drop any per-battle memory
    fn battle_ended(&mut self, _battle_id: BattleId) {}
}
