//! Per-fleet battlefield assessment

use glam::Vec3;

use super::profile::SituationalFactors;
use crate::battle::controller::BattleView;
use crate::battle::fleet::FleetCombatState;
use crate::battle::types::FleetId;

/// Force ratio above which a side is winning
pub const WINNING_RATIO: f32 = 1.2;
/// Force ratio below which a side is losing
pub const LOSING_RATIO: f32 = 0.8;
/// A consumable under this fraction of its maximum is running low
pub const LOW_SUPPLY_FRACTION: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outlook {
    Winning,
    Losing,
    Stalemate,
}

/// What a fleet knows about the fight when it decides
#[derive(Debug, Clone, PartialEq)]
pub struct Situation {
    pub hp: f32,
    pub morale: f32,
    pub units: u32,
    pub enemy_count: usize,
    /// Allies, not counting the fleet itself
    pub ally_count: usize,
    pub nearest_enemy: Option<(FleetId, f32)>,
    pub nearest_ally_distance: Option<f32>,
    /// Own side's force, including this fleet
    pub friendly_force: f32,
    pub enemy_force: f32,
    pub force_ratio: f32,
    pub outlook: Outlook,
    pub outnumbered: bool,
    pub highest_threat: Option<FleetId>,
    /// Enemy with the lowest hp
    pub weakest_enemy: Option<FleetId>,
    pub low_supply: bool,
    /// Centre of the fleet's allies, itself included
    pub ally_centroid: Vec3,
}

impl Situation {
    pub fn assess(view: &BattleView<'_>, fleet: &FleetCombatState) -> Self {
        let position = fleet.position();

        let mut enemy_count = 0;
        let mut enemy_force = 0.0;
        let mut nearest_enemy: Option<(FleetId, f32)> = None;
        let mut highest_threat: Option<(FleetId, f32)> = None;
        let mut weakest_enemy: Option<(FleetId, f32)> = None;

        for enemy in view.enemies_of(fleet) {
            enemy_count += 1;
            enemy_force += enemy.force();

            let distance = fleet.distance_to(enemy);
            if nearest_enemy.map_or(true, |(_, d)| distance < d) {
                nearest_enemy = Some((enemy.fleet_id, distance));
            }

            let threat = enemy.force() * enemy.weapon.damage / distance.max(1.0);
            if highest_threat.map_or(true, |(_, t)| threat > t) {
                highest_threat = Some((enemy.fleet_id, threat));
            }

            if weakest_enemy.map_or(true, |(_, hp)| enemy.hp < hp) {
                weakest_enemy = Some((enemy.fleet_id, enemy.hp));
            }
        }

        let mut ally_count = 0;
        let mut friendly_force = fleet.force();
        let mut nearest_ally_distance: Option<f32> = None;
        let mut centroid = position;
        for ally in view.allies_of(fleet) {
            ally_count += 1;
            friendly_force += ally.force();
            centroid += ally.position();
            let distance = fleet.distance_to(ally);
            if nearest_ally_distance.map_or(true, |d| distance < d) {
                nearest_ally_distance = Some(distance);
            }
        }
        let ally_centroid = centroid / (ally_count + 1) as f32;

        let force_ratio = if enemy_force > 0.0 {
            friendly_force / enemy_force
        } else {
            f32::INFINITY
        };
        let outlook = if force_ratio > WINNING_RATIO {
            Outlook::Winning
        } else if force_ratio < LOSING_RATIO {
            Outlook::Losing
        } else {
            Outlook::Stalemate
        };

        let low_supply = view.supply_of(&fleet.fleet_id).is_some_and(|s| {
            s.fuel < s.max_fuel * LOW_SUPPLY_FRACTION || s.ammo < s.max_ammo * LOW_SUPPLY_FRACTION
        });

        Self {
            hp: fleet.hp,
            morale: fleet.morale,
            units: fleet.units,
            enemy_count,
            ally_count,
            nearest_enemy,
            nearest_ally_distance,
            friendly_force,
            enemy_force,
            force_ratio,
            outlook,
            outnumbered: enemy_count > ally_count + 1,
            highest_threat: highest_threat.map(|(id, _)| id),
            weakest_enemy: weakest_enemy.map(|(id, _)| id),
            low_supply,
            ally_centroid,
        }
    }

    pub fn factors(&self) -> SituationalFactors {
        SituationalFactors {
            outnumbered: self.outnumbered,
            winning: self.outlook == Outlook::Winning,
            low_supply: self.low_supply,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::battle::fleet::test_support::fleet;
    use crate::battle::retreat::RetreatController;
    use crate::battle::supply::{SupplyResource, SupplyTracker};
    use crate::battle::types::{BattleArea, BattleId, BattleRules};

    fn with_view<R>(
        fleets: &[FleetCombatState],
        supply: Option<&SupplyTracker>,
        f: impl FnOnce(&BattleView<'_>) -> R,
    ) -> R {
        let map: BTreeMap<FleetId, FleetCombatState> =
            fleets.iter().map(|f| (f.fleet_id, f.clone())).collect();
        let area = BattleArea::default();
        let rules = BattleRules::default();
        let retreats = RetreatController::new(150);
        let view = BattleView {
            battle_id: BattleId::new(),
            tick: 1,
            area: &area,
            rules: &rules,
            fleets: &map,
            retreats: &retreats,
            supply,
        };
        f(&view)
    }

    #[test]
    fn outnumbered_and_losing() {
        let me = fleet(1, 10, Vec3::new(0.0, 0.0, 0.0));
        let near = fleet(2, 20, Vec3::new(100.0, 0.0, 0.0));
        let mut far = fleet(2, 20, Vec3::new(500.0, 0.0, 0.0));
        far.hp = 40.0;
        let (near_id, far_id) = (near.fleet_id, far.fleet_id);

        let situation = with_view(&[me.clone(), near, far], None, |view| {
            Situation::assess(view, &me)
        });
        assert_eq!(situation.enemy_count, 2);
        assert_eq!(situation.ally_count, 0);
        assert!(situation.outnumbered);
        assert_eq!(situation.outlook, Outlook::Losing);
        assert_eq!(situation.nearest_enemy, Some((near_id, 100.0)));
        assert_eq!(situation.highest_threat, Some(near_id));
        assert_eq!(situation.weakest_enemy, Some(far_id));
        assert!(situation.factors().outnumbered);
    }

    #[test]
    fn winning_with_allies() {
        let me = fleet(1, 20, Vec3::ZERO);
        let ally = fleet(1, 20, Vec3::new(0.0, 200.0, 0.0));
        let enemy = fleet(2, 10, Vec3::new(300.0, 0.0, 0.0));

        let situation = with_view(&[me.clone(), ally, enemy], None, |view| {
            Situation::assess(view, &me)
        });
        assert_eq!(situation.outlook, Outlook::Winning);
        assert!(!situation.outnumbered);
        assert_eq!(situation.nearest_ally_distance, Some(200.0));
        assert_eq!(situation.ally_centroid, Vec3::new(0.0, 100.0, 0.0));
    }

    #[test]
    fn low_ammo_counts_as_low_supply() {
        let me = fleet(1, 10, Vec3::ZERO);
        let mut supply = SupplyTracker::new();
        supply.register(me.fleet_id, 10);
        let id = me.fleet_id;

        let before = with_view(&[me.clone()], Some(&supply), |view| {
            Situation::assess(view, &me).low_supply
        });
        assert!(!before);

        supply.consume(
            &id,
            10,
            crate::battle::supply::FleetActivity {
                attacking: true,
                ..Default::default()
            },
        );
        let state = supply.get(&id).copied().unwrap();
        assert!(state.get(SupplyResource::Ammo) < state.max_ammo);

        let mut drained = SupplyTracker::new();
        drained.register(id, 10);
        for _ in 0..40 {
            drained.consume(
                &id,
                10,
                crate::battle::supply::FleetActivity {
                    attacking: true,
                    ..Default::default()
                },
            );
        }
        let after = with_view(&[me.clone()], Some(&drained), |view| {
            Situation::assess(view, &me).low_supply
        });
        assert!(after);
    }
}
