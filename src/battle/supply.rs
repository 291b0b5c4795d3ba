//! Per-fleet consumables: fuel, ammunition and general supplies

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::FleetId;

/// Fuel carried per unit
pub const FUEL_PER_UNIT: f32 = 100.0;
/// Ammunition carried per unit
pub const AMMO_PER_UNIT: f32 = 50.0;
/// Supplies carried per unit
pub const SUPPLIES_PER_UNIT: f32 = 50.0;

/// Fuel burned per unit per tick while moving
pub const FUEL_BURN_MOVING: f32 = 0.05;
/// Ammunition spent per unit per volley
pub const AMMO_PER_VOLLEY: f32 = 1.0;
/// Supplies consumed per unit per tick just to stay in the field
pub const SUPPLY_UPKEEP: f32 = 0.01;
/// Additional supplies consumed per unit per tick while repairing
pub const SUPPLY_REPAIR_COST: f32 = 0.05;
/// Hull percentage restored per tick of repair
pub const REPAIR_HP_PER_TICK: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyResource {
    Fuel,
    Ammo,
    Supplies,
}

/// What a fleet did this tick, for consumption purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FleetActivity {
    pub moving: bool,
    pub attacking: bool,
    pub repairing: bool,
}

/// Current and maximum consumables of one fleet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupplyState {
    pub fuel: f32,
    pub max_fuel: f32,
    pub ammo: f32,
    pub max_ammo: f32,
    pub supplies: f32,
    pub max_supplies: f32,
}

impl SupplyState {
    /// Fully stocked state sized for a fleet
    pub fn for_units(units: u32) -> Self {
        let units = units.max(1) as f32;
        Self {
            fuel: FUEL_PER_UNIT * units,
            max_fuel: FUEL_PER_UNIT * units,
            ammo: AMMO_PER_UNIT * units,
            max_ammo: AMMO_PER_UNIT * units,
            supplies: SUPPLIES_PER_UNIT * units,
            max_supplies: SUPPLIES_PER_UNIT * units,
        }
    }

    pub fn get(&self, resource: SupplyResource) -> f32 {
        match resource {
            SupplyResource::Fuel => self.fuel,
            SupplyResource::Ammo => self.ammo,
            SupplyResource::Supplies => self.supplies,
        }
    }

    fn slot(&mut self, resource: SupplyResource) -> (&mut f32, f32) {
        match resource {
            SupplyResource::Fuel => (&mut self.fuel, self.max_fuel),
            SupplyResource::Ammo => (&mut self.ammo, self.max_ammo),
            SupplyResource::Supplies => (&mut self.supplies, self.max_supplies),
        }
    }

    /// Add (or with a negative amount, remove) a resource, clamped to `[0, max]`
    pub fn adjust(&mut self, resource: SupplyResource, amount: f32) {
        let (value, max) = self.slot(resource);
        let amount = if amount.is_finite() { amount } else { 0.0 };
        *value = (*value + amount).clamp(0.0, max);
    }

    pub fn can_move(&self) -> bool {
        self.fuel > 0.0
    }

    pub fn can_fire(&self) -> bool {
        self.ammo > 0.0
    }

    pub fn can_repair(&self) -> bool {
        self.supplies > 0.0
    }

    /// Sum of everything left, used to break supply-exhaustion ties
    pub fn total(&self) -> f32 {
        self.fuel + self.ammo + self.supplies
    }
}

/// Amounts delivered by a resupply
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyTopUp {
    pub fuel: f32,
    pub ammo: f32,
    pub supplies: f32,
}

/// A resource crossing zero in either direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyChange {
    Depleted(SupplyResource),
    Restored(SupplyResource),
}

const RESOURCES: [SupplyResource; 3] = [
    SupplyResource::Fuel,
    SupplyResource::Ammo,
    SupplyResource::Supplies,
];

/// Supply accounting for every fleet in one battle
#[derive(Debug, Clone, Default)]
pub struct SupplyTracker {
    states: BTreeMap<FleetId, SupplyState>,
}

impl SupplyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, fleet_id: FleetId, units: u32) {
        self.states.insert(fleet_id, SupplyState::for_units(units));
    }

    pub fn remove(&mut self, fleet_id: &FleetId) -> Option<SupplyState> {
        self.states.remove(fleet_id)
    }

    pub fn get(&self, fleet_id: &FleetId) -> Option<&SupplyState> {
        self.states.get(fleet_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FleetId, &SupplyState)> {
        self.states.iter()
    }

    /// Untracked fleets are never gated
    pub fn can_move(&self, fleet_id: &FleetId) -> bool {
        self.states.get(fleet_id).map_or(true, SupplyState::can_move)
    }

    pub fn can_fire(&self, fleet_id: &FleetId) -> bool {
        self.states.get(fleet_id).map_or(true, SupplyState::can_fire)
    }

    pub fn can_repair(&self, fleet_id: &FleetId) -> bool {
        self.states.get(fleet_id).map_or(false, SupplyState::can_repair)
    }

    /// Burn consumables for one tick of activity, scaled by unit count.
    /// Returns resources that just ran out.
    pub fn consume(
        &mut self,
        fleet_id: &FleetId,
        units: u32,
        activity: FleetActivity,
    ) -> Vec<SupplyChange> {
        let Some(state) = self.states.get_mut(fleet_id) else {
            return Vec::new();
        };
        let before = *state;
        let units = units as f32;

        let mut supplies = SUPPLY_UPKEEP * units;
        if activity.repairing {
            supplies += SUPPLY_REPAIR_COST * units;
        }
        if activity.moving {
            state.adjust(SupplyResource::Fuel, -FUEL_BURN_MOVING * units);
        }
        if activity.attacking {
            state.adjust(SupplyResource::Ammo, -AMMO_PER_VOLLEY * units);
        }
        state.adjust(SupplyResource::Supplies, -supplies);

        Self::changes(&before, state)
    }

    /// Top a fleet up, clamped to its maxima. Returns resources that came back.
    pub fn resupply(&mut self, fleet_id: &FleetId, top_up: SupplyTopUp) -> Option<Vec<SupplyChange>> {
        let state = self.states.get_mut(fleet_id)?;
        let before = *state;
        state.adjust(SupplyResource::Fuel, top_up.fuel.max(0.0));
        state.adjust(SupplyResource::Ammo, top_up.ammo.max(0.0));
        state.adjust(SupplyResource::Supplies, top_up.supplies.max(0.0));
        Some(Self::changes(&before, state))
    }

    /// True when every listed fleet is out of fuel (and at least one is listed)
    pub fn all_out_of_fuel<'a>(&self, fleets: impl IntoIterator<Item = &'a FleetId>) -> bool {
        let mut any = false;
        for id in fleets {
            any = true;
            if self.can_move(id) {
                return false;
            }
        }
        any
    }

    fn changes(before: &SupplyState, after: &SupplyState) -> Vec<SupplyChange> {
        RESOURCES
            .into_iter()
            .filter_map(|r| {
                let (was, now) = (before.get(r), after.get(r));
                if was > 0.0 && now <= 0.0 {
                    Some(SupplyChange::Depleted(r))
                } else if was <= 0.0 && now > 0.0 {
                    Some(SupplyChange::Restored(r))
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn moving_burns_fuel_until_depleted() {
        let mut tracker = SupplyTracker::new();
        let id = FleetId::new();
        tracker.register(id, 1);

        let moving = FleetActivity {
            moving: true,
            ..FleetActivity::default()
        };
        let mut depleted = Vec::new();
        for _ in 0..3_000 {
            depleted.extend(tracker.consume(&id, 1, moving));
        }

        assert_eq!(depleted, vec![SupplyChange::Depleted(SupplyResource::Fuel)]);
        assert!(!tracker.can_move(&id));
        assert_eq!(tracker.get(&id).unwrap().fuel, 0.0);
    }

    #[test]
    fn resupply_is_clamped_and_reports_restoration() {
        let mut tracker = SupplyTracker::new();
        let id = FleetId::new();
        tracker.register(id, 2);
        tracker.states.get_mut(&id).unwrap().ammo = 0.0;

        let changes = tracker
            .resupply(
                &id,
                SupplyTopUp {
                    ammo: 1_000_000.0,
                    ..SupplyTopUp::default()
                },
            )
            .unwrap();

        assert_eq!(changes, vec![SupplyChange::Restored(SupplyResource::Ammo)]);
        let state = tracker.get(&id).unwrap();
        assert_eq!(state.ammo, state.max_ammo);
    }

    #[test]
    fn exhaustion_needs_every_fleet_dry() {
        let mut tracker = SupplyTracker::new();
        let (a, b) = (FleetId::new(), FleetId::new());
        tracker.register(a, 1);
        tracker.register(b, 1);
        tracker.states.get_mut(&a).unwrap().fuel = 0.0;

        assert!(!tracker.all_out_of_fuel([&a, &b]));
        tracker.states.get_mut(&b).unwrap().fuel = 0.0;
        assert!(tracker.all_out_of_fuel([&a, &b]));
        assert!(!tracker.all_out_of_fuel(std::iter::empty::<&FleetId>()));
    }

    proptest! {
        #[test]
        fn values_stay_within_bounds(
            units in 1u32..50,
            steps in proptest::collection::vec((any::<bool>(), any::<bool>(), any::<bool>(), -500.0f32..500.0), 1..200),
        ) {
            let mut tracker = SupplyTracker::new();
            let id = FleetId::new();
            tracker.register(id, units);

            for (moving, attacking, repairing, top_up) in steps {
                tracker.consume(&id, units, FleetActivity { moving, attacking, repairing });
                tracker.resupply(&id, SupplyTopUp { fuel: top_up, ammo: top_up, supplies: top_up });

                let s = tracker.get(&id).unwrap();
                prop_assert!(s.fuel >= 0.0 && s.fuel <= s.max_fuel);
                prop_assert!(s.ammo >= 0.0 && s.ammo <= s.max_ammo);
                prop_assert!(s.supplies >= 0.0 && s.supplies <= s.max_supplies);
            }
        }
    }
}
