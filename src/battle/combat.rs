//! Combat resolution - targeting, hit rolls, damage and losses

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;

use super::events::BattleEventKind;
use super::fleet::{FleetCombatState, WeaponProfile, HULLS_PER_UNIT};
use super::types::FleetId;

/// Hit chance lost at maximum range
pub const RANGE_FALLOFF: f32 = 0.3;
/// Fraction of damage a miss still inflicts
pub const GLANCING_FRACTION: f32 = 0.3;
/// Damage needed to destroy one unit
pub const DAMAGE_PER_UNIT_LOST: f32 = 50.0;
/// Morale lost per point of damage relative to fleet size
pub const MORALE_DAMAGE_FACTOR: f32 = 0.5;
/// Cap on morale lost to a single volley
pub const MAX_MORALE_LOSS_PER_HIT: f32 = 10.0;

/// Result of applying one volley to a target
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DamageOutcome {
    pub damage: f32,
    pub hp_loss: f32,
    pub units_lost: u32,
    pub morale_loss: f32,
    pub defeated: bool,
}

/// One shot fired this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volley {
    pub attacker: FleetId,
    pub target: FleetId,
    pub hit: bool,
    pub outcome: DamageOutcome,
}

/// Everything combat produced in one tick
#[derive(Debug, Default)]
pub struct CombatReport {
    pub volleys: Vec<Volley>,
    pub events: Vec<BattleEventKind>,
    pub units_destroyed: u64,
}

impl CombatReport {
    pub fn fired(&self) -> BTreeSet<FleetId> {
        self.volleys.iter().map(|v| v.attacker).collect()
    }

    pub fn dealt_damage(&self) -> bool {
        self.volleys.iter().any(|v| v.outcome.damage > 0.0)
    }

    /// Units lost per fleet this tick
    pub fn losses(&self) -> BTreeMap<FleetId, u32> {
        let mut losses = BTreeMap::new();
        for v in &self.volleys {
            if v.outcome.units_lost > 0 {
                *losses.entry(v.target).or_insert(0) += v.outcome.units_lost;
            }
        }
        losses
    }
}

/// Combat system for targeting and damage
pub struct CombatResolver;

impl CombatResolver {
    /// Chance to land a full hit at `distance`
    pub fn hit_chance(weapon: &WeaponProfile, distance: f32) -> f32 {
        if weapon.range <= 0.0 {
            return 0.0;
        }
        let falloff = 1.0 - RANGE_FALLOFF * (distance / weapon.range).clamp(0.0, 1.0);
        ((weapon.accuracy / 100.0) * falloff).clamp(0.0, 1.0)
    }

    /// Volley damage for a fleet of `units`
    pub fn volley_damage(units: u32, weapon: &WeaponProfile, hit: bool) -> f32 {
        let full = (units as f32).sqrt() * weapon.damage.max(0.0);
        if hit {
            full
        } else {
            full * GLANCING_FRACTION
        }
    }

    /// Whether the weapon has cooled down
    pub fn can_fire(last_fire_tick: Option<u64>, fire_rate: u64, tick: u64) -> bool {
        match last_fire_tick {
            None => true,
            Some(last) => tick.saturating_sub(last) >= fire_rate.max(1),
        }
    }

    /// Keep the current target if it is still in the fight, otherwise pick
    /// the nearest active enemy
    pub fn select_target(
        fleets: &BTreeMap<FleetId, FleetCombatState>,
        shooter: &FleetCombatState,
        friendly_fire: bool,
    ) -> Option<FleetId> {
        if let Some(current) = shooter.target {
            if let Some(target) = fleets.get(&current) {
                let hostile = target.faction != shooter.faction || friendly_fire;
                if target.is_active() && hostile {
                    return Some(current);
                }
            }
        }

        Self::nearest_enemy(fleets, shooter)
    }

    pub fn nearest_enemy(
        fleets: &BTreeMap<FleetId, FleetCombatState>,
        shooter: &FleetCombatState,
    ) -> Option<FleetId> {
        fleets
            .values()
            .filter(|f| f.faction != shooter.faction && f.is_active())
            .map(|f| (f.fleet_id, shooter.distance_to(f)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Apply damage to a fleet, converting it to hp, unit and morale losses
    pub fn apply_damage(target: &mut FleetCombatState, damage: f32) -> DamageOutcome {
        let damage = damage.max(0.0);
        let units_before = target.units;
        if units_before == 0 || !target.is_active() {
            return DamageOutcome::default();
        }

        let hulls = units_before as f32 * HULLS_PER_UNIT as f32;
        let hp_loss = (damage / hulls * 100.0).min(target.hp);
        target.hp = (target.hp - hp_loss).clamp(0.0, 100.0);

        let mut units_lost = ((damage / DAMAGE_PER_UNIT_LOST).floor() as u32).min(units_before);

        let morale_loss = (damage / units_before as f32 * MORALE_DAMAGE_FACTOR)
            .min(MAX_MORALE_LOSS_PER_HIT)
            .min(target.morale);
        target.morale = (target.morale - morale_loss).clamp(0.0, 100.0);

        // A fleet at zero hp loses whatever units it has left
        if target.hp <= 0.0 {
            units_lost = units_before;
        }

        target.units = units_before - units_lost;
        target.ships_lost += units_lost;
        target.damage_taken += damage;

        let defeated = target.units == 0 || target.hp <= 0.0;
        if defeated {
            target.defeated = true;
            target.target = None;
            target.orders.clear();
            target.kinematics.halt();
        }
        if units_lost > 0 {
            target.refresh_body();
        }

        DamageOutcome {
            damage,
            hp_loss,
            units_lost,
            morale_loss,
            defeated,
        }
    }

    /// Fire every ready fleet once, in fleet-id order.
    ///
    /// Damage lands immediately, so a fleet destroyed earlier in the pass
    /// does not fire. `armed` gates fleets that are out of ammunition.
    pub fn resolve<R: Rng>(
        fleets: &mut BTreeMap<FleetId, FleetCombatState>,
        tick: u64,
        rng: &mut R,
        friendly_fire: bool,
        armed: impl Fn(FleetId) -> bool,
    ) -> CombatReport {
        let mut report = CombatReport::default();
        let shooters: Vec<FleetId> = fleets.keys().copied().collect();

        for shooter_id in shooters {
            let (target_id, units, weapon, distance) = {
                let Some(shooter) = fleets.get(&shooter_id) else {
                    continue;
                };
                if !shooter.can_fight() || !armed(shooter_id) {
                    continue;
                }

                let Some(target_id) = Self::select_target(fleets, shooter, friendly_fire) else {
                    continue;
                };
                let Some(target) = fleets.get(&target_id) else {
                    continue;
                };
                let distance = shooter.distance_to(target);
                (target_id, shooter.units, shooter.weapon, distance)
            };

            // Track the target even while out of range or reloading
            let ready = match fleets.get_mut(&shooter_id) {
                Some(shooter) => {
                    shooter.target = Some(target_id);
                    Self::can_fire(shooter.last_fire_tick, weapon.fire_rate, tick)
                }
                None => false,
            };
            if !ready || distance > weapon.range {
                continue;
            }

            let hit = rng.gen::<f32>() < Self::hit_chance(&weapon, distance);
            let damage = Self::volley_damage(units, &weapon, hit);

            let outcome = match fleets.get_mut(&target_id) {
                Some(target) => Self::apply_damage(target, damage),
                None => continue,
            };

            if let Some(shooter) = fleets.get_mut(&shooter_id) {
                shooter.last_fire_tick = Some(tick);
                shooter.damage_dealt += outcome.damage;
            }

            report.events.push(BattleEventKind::DamageDealt {
                attacker_id: shooter_id,
                target_id,
                damage: outcome.damage,
                hit,
            });
            if outcome.units_lost > 0 {
                report.units_destroyed += outcome.units_lost as u64;
                report.events.push(BattleEventKind::ShipDestroyed {
                    attacker_id: shooter_id,
                    fleet_id: target_id,
                    units: outcome.units_lost,
                });
            }
            if outcome.defeated {
                report.events.push(BattleEventKind::FleetDestroyed {
                    fleet_id: target_id,
                    attacker_id: shooter_id,
                });
            }

            report.volleys.push(Volley {
                attacker: shooter_id,
                target: target_id,
                hit,
                outcome,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::fleet::test_support::fleet;
    use glam::Vec3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn roster(list: Vec<FleetCombatState>) -> BTreeMap<FleetId, FleetCombatState> {
        list.into_iter().map(|f| (f.fleet_id, f)).collect()
    }

    #[test]
    fn hit_chance_falls_off_with_range() {
        let weapon = WeaponProfile::default();
        assert!((CombatResolver::hit_chance(&weapon, 0.0) - 0.7).abs() < 1e-6);
        assert!((CombatResolver::hit_chance(&weapon, 300.0) - 0.49).abs() < 1e-6);
    }

    #[test]
    fn miss_is_a_glancing_hit() {
        let weapon = WeaponProfile {
            damage: 10.0,
            ..WeaponProfile::default()
        };
        assert_eq!(CombatResolver::volley_damage(4, &weapon, true), 20.0);
        assert!((CombatResolver::volley_damage(4, &weapon, false) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn cooldown_respects_fire_rate() {
        assert!(CombatResolver::can_fire(None, 10, 1));
        assert!(!CombatResolver::can_fire(Some(5), 10, 14));
        assert!(CombatResolver::can_fire(Some(5), 10, 15));
    }

    #[test]
    fn damage_removes_whole_units_and_caps_morale_loss() {
        let mut target = fleet(2, 10, Vec3::ZERO);
        let outcome = CombatResolver::apply_damage(&mut target, 120.0);
        assert_eq!(outcome.units_lost, 2);
        assert_eq!(target.units, 8);
        assert_eq!(target.ships_lost, 2);
        assert!(outcome.morale_loss <= MAX_MORALE_LOSS_PER_HIT);
        assert!(target.hp < 100.0 && target.hp > 0.0);
        assert!(!outcome.defeated);
    }

    #[test]
    fn losing_last_unit_defeats_fleet() {
        let mut target = fleet(2, 1, Vec3::ZERO);
        let outcome = CombatResolver::apply_damage(&mut target, 60.0);
        assert!(outcome.defeated);
        assert!(target.defeated);
        assert_eq!(target.units, 0);
    }

    #[test]
    fn huge_fleets_take_damage_without_overflow() {
        let mut target = fleet(2, u32::MAX, Vec3::ZERO);
        let outcome = CombatResolver::apply_damage(&mut target, 1000.0);
        assert!(!outcome.defeated);
        assert!(outcome.units_lost > 0);
        assert_eq!(target.units, u32::MAX - outcome.units_lost);
        assert!(target.hp > 99.0);
    }

    #[test]
    fn zero_hp_converts_remaining_units_to_losses() {
        let mut target = fleet(2, 3, Vec3::ZERO);
        target.hp = 0.5;
        let outcome = CombatResolver::apply_damage(&mut target, 49.0);
        assert!(outcome.defeated);
        assert_eq!(outcome.units_lost, 3);
        assert_eq!(target.units, 0);
        assert_eq!(target.hp, 0.0);
    }

    #[test]
    fn keeps_live_target_and_retargets_nearest() {
        let shooter = fleet(1, 10, Vec3::ZERO);
        let near = fleet(2, 10, Vec3::new(100.0, 0.0, 0.0));
        let far = fleet(2, 10, Vec3::new(250.0, 0.0, 0.0));
        let (shooter_id, near_id, far_id) = (shooter.fleet_id, near.fleet_id, far.fleet_id);
        let mut fleets = roster(vec![shooter, near, far]);

        let s = &fleets[&shooter_id];
        assert_eq!(CombatResolver::select_target(&fleets, s, false), Some(near_id));

        fleets.get_mut(&shooter_id).unwrap().target = Some(far_id);
        let s = &fleets[&shooter_id];
        assert_eq!(CombatResolver::select_target(&fleets, s, false), Some(far_id));

        fleets.get_mut(&far_id).unwrap().defeated = true;
        let s = &fleets[&shooter_id];
        assert_eq!(CombatResolver::select_target(&fleets, s, false), Some(near_id));
    }

    #[test]
    fn out_of_range_fleets_do_not_fire() {
        let a = fleet(1, 10, Vec3::ZERO);
        let b = fleet(2, 10, Vec3::new(1000.0, 0.0, 0.0));
        let mut fleets = roster(vec![a, b]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let report = CombatResolver::resolve(&mut fleets, 1, &mut rng, false, |_| true);
        assert!(report.volleys.is_empty());
        assert!(fleets.values().all(|f| f.target.is_some()));
    }

    #[test]
    fn unarmed_fleets_hold_fire() {
        let a = fleet(1, 10, Vec3::ZERO);
        let b = fleet(2, 10, Vec3::new(100.0, 0.0, 0.0));
        let a_id = a.fleet_id;
        let mut fleets = roster(vec![a, b]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let report = CombatResolver::resolve(&mut fleets, 1, &mut rng, false, |id| id != a_id);
        assert_eq!(report.volleys.len(), 1);
        assert_ne!(report.volleys[0].attacker, a_id);
    }

    #[test]
    fn same_seed_same_outcome() {
        let a = fleet(1, 16, Vec3::ZERO);
        let b = fleet(2, 16, Vec3::new(200.0, 0.0, 0.0));
        let fleets = roster(vec![a, b]);

        let run = |seed| {
            let mut fleets = fleets.clone();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut hits = Vec::new();
            for tick in 1..=100 {
                let report = CombatResolver::resolve(&mut fleets, tick, &mut rng, false, |_| true);
                hits.extend(report.volleys.iter().map(|v| v.hit));
            }
            hits
        };

        assert_eq!(run(42), run(42));
    }
}
