//! Strategy handlers and target selection
//!
//! Every handler looks at the same context and returns exactly one
//! decision. The reason string is for logs and tests only.

use glam::Vec3;

use super::profile::{AiProfile, AiStrategy, TargetPriority};
use super::situation::{Outlook, Situation};
use crate::battle::command::{CommandKind, CommandPayload};
use crate::battle::controller::BattleView;
use crate::battle::fleet::FleetCombatState;
use crate::battle::types::FleetId;
use crate::battle::vector::{heading_between, heading_to_direction, rotate_horizontal};

/// An enemy with no friend closer than this is isolated
pub const ISOLATION_DISTANCE: f32 = 500.0;
/// Enemies below this hp count as damaged
pub const DAMAGED_HP: f32 = 50.0;
/// Defensive fleets drift back when this far from their allies
pub const REGROUP_DISTANCE: f32 = 300.0;
/// Kiting fleets back off inside this fraction of weapon range
pub const KITE_MIN_RANGE: f32 = 0.6;
/// Preferred standoff as a fraction of weapon range
pub const STANDOFF_RANGE: f32 = 0.9;
/// Close enough to a flank or formation slot
pub const POSITION_TOLERANCE: f32 = 50.0;
/// How far cautious fleets pull back per decision
pub const WITHDRAW_STEP: f32 = 200.0;

/// One prioritised order for a fleet
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub kind: CommandKind,
    pub payload: CommandPayload,
    pub reason: String,
}

impl Decision {
    pub fn attack(target: FleetId, reason: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Attack,
            payload: CommandPayload::attack(target),
            reason: reason.into(),
        }
    }

    pub fn move_to(position: Vec3, reason: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Move,
            payload: CommandPayload::move_to(position),
            reason: reason.into(),
        }
    }

    pub fn rotate(heading: f32, reason: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Rotate,
            payload: CommandPayload::rotate(heading),
            reason: reason.into(),
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Stop,
            payload: CommandPayload::default(),
            reason: reason.into(),
        }
    }
}

/// Formation leader and this fleet's slot relative to it
#[derive(Debug, Clone, Copy)]
pub struct FormationSlot<'a> {
    pub leader: &'a FleetCombatState,
    pub offset: Vec3,
}

/// Everything a handler may look at
pub struct StrategyContext<'a> {
    pub view: &'a BattleView<'a>,
    pub fleet: &'a FleetCombatState,
    pub situation: &'a Situation,
    pub profile: &'a AiProfile,
    pub target: Option<&'a FleetCombatState>,
    pub formation: Option<FormationSlot<'a>>,
}

impl<'a> StrategyContext<'a> {
    fn in_range(&self, target: &FleetCombatState) -> bool {
        self.fleet.distance_to(target) <= self.fleet.weapon.range
    }

    fn clamp(&self, point: Vec3) -> Vec3 {
        self.view.area.clamp(point)
    }

    /// Point `distance` from `target` on the line toward this fleet
    fn standoff_point(&self, target: &FleetCombatState, distance: f32) -> Vec3 {
        let away = (self.fleet.position() - target.position())
            .try_normalize()
            .unwrap_or(Vec3::X);
        self.clamp(target.position() + away * distance)
    }

    fn face(&self, point: Vec3) -> f32 {
        heading_between(self.fleet.position(), point)
    }
}

/// Walk the priority list until one entry resolves; nearest otherwise
pub fn select_target<'a>(
    view: &BattleView<'a>,
    fleet: &FleetCombatState,
    priorities: &[TargetPriority],
) -> Option<&'a FleetCombatState> {
    let enemies: Vec<&'a FleetCombatState> = view
        .active_fleets()
        .filter(|f| f.faction != fleet.faction)
        .collect();
    if enemies.is_empty() {
        return None;
    }

    let nearest = || {
        enemies
            .iter()
            .copied()
            .min_by(|a, b| fleet.distance_to(a).total_cmp(&fleet.distance_to(b)))
    };

    for priority in priorities {
        let found = match priority {
            TargetPriority::Nearest => nearest(),
            TargetPriority::Weakest => enemies
                .iter()
                .copied()
                .min_by(|a, b| a.units.cmp(&b.units).then(a.hp.total_cmp(&b.hp))),
            TargetPriority::Strongest => enemies
                .iter()
                .copied()
                .max_by(|a, b| a.force().total_cmp(&b.force())),
            TargetPriority::Damaged => enemies
                .iter()
                .copied()
                .filter(|e| e.hp < DAMAGED_HP)
                .min_by(|a, b| a.hp.total_cmp(&b.hp)),
            TargetPriority::Isolated => enemies
                .iter()
                .copied()
                .filter(|e| {
                    view.allies_of(e)
                        .all(|friend| e.distance_to(friend) > ISOLATION_DISTANCE)
                })
                .min_by(|a, b| fleet.distance_to(a).total_cmp(&fleet.distance_to(b))),
            TargetPriority::Flagship => enemies
                .iter()
                .copied()
                .filter(|e| e.commander_id.is_some())
                .max_by(|a, b| a.max_units.cmp(&b.max_units)),
        };
        if found.is_some() {
            return found;
        }
    }

    nearest()
}

/// Dispatch to the handler for `strategy`
pub fn decide(strategy: AiStrategy, ctx: &StrategyContext<'_>) -> Decision {
    match strategy {
        AiStrategy::Aggressive => aggressive(ctx),
        AiStrategy::Defensive => defensive(ctx),
        AiStrategy::Cautious => cautious(ctx),
        AiStrategy::Flanking => flanking(ctx),
        AiStrategy::FocusFire => focus_fire(ctx),
        AiStrategy::Kiting => kiting(ctx),
        AiStrategy::Formation => formation(ctx),
    }
}

pub fn aggressive(ctx: &StrategyContext<'_>) -> Decision {
    match ctx.target {
        Some(target) => Decision::attack(target.fleet_id, "closing on target"),
        None => Decision::stop("no enemies left"),
    }
}

pub fn defensive(ctx: &StrategyContext<'_>) -> Decision {
    if let Some(target) = ctx.target.filter(|t| ctx.in_range(t)) {
        return Decision::attack(target.fleet_id, "target entered range");
    }

    let centroid = ctx.situation.ally_centroid;
    if ctx.situation.ally_count > 0 && ctx.fleet.position().distance(centroid) > REGROUP_DISTANCE {
        return Decision::move_to(ctx.clamp(centroid), "regrouping with allies");
    }

    match ctx.target {
        Some(target) => Decision::rotate(ctx.face(target.position()), "holding position"),
        None => Decision::stop("holding position"),
    }
}

pub fn cautious(ctx: &StrategyContext<'_>) -> Decision {
    let pressed = ctx.situation.hp < 50.0 || ctx.situation.outlook == Outlook::Losing;
    let threat = ctx
        .situation
        .nearest_enemy
        .and_then(|(id, _)| ctx.view.fleet(&id));

    if pressed {
        if let Some(threat) = threat.filter(|t| ctx.in_range(t)) {
            let away = (ctx.fleet.position() - threat.position())
                .try_normalize()
                .unwrap_or(Vec3::NEG_X);
            let fallback = ctx.clamp(ctx.fleet.position() + away * WITHDRAW_STEP);
            return Decision::move_to(fallback, "keeping distance");
        }
    }

    match ctx.target {
        Some(target) if ctx.in_range(target) => {
            Decision::attack(target.fleet_id, "engaging from safety")
        }
        Some(target) => Decision::rotate(ctx.face(target.position()), "watching the enemy"),
        None => Decision::stop("no enemies left"),
    }
}

pub fn flanking(ctx: &StrategyContext<'_>) -> Decision {
    let Some(target) = ctx.target else {
        return Decision::stop("no enemies left");
    };

    // Beside the target relative to its heading, on whichever side is closer
    let facing = heading_to_direction(target.kinematics.heading);
    let offset = ctx.fleet.weapon.range * 0.8;
    let left = ctx.clamp(target.position() + rotate_horizontal(facing, 90.0) * offset);
    let right = ctx.clamp(target.position() + rotate_horizontal(facing, -90.0) * offset);
    let flank = if ctx.fleet.position().distance(left) <= ctx.fleet.position().distance(right) {
        left
    } else {
        right
    };

    if ctx.fleet.position().distance(flank) > POSITION_TOLERANCE && !ctx.in_range(target) {
        Decision::move_to(flank, "moving to flank")
    } else {
        Decision::attack(target.fleet_id, "flank established")
    }
}

pub fn focus_fire(ctx: &StrategyContext<'_>) -> Decision {
    // Join whichever enemy most allies are already shooting
    let mut counts: Vec<(FleetId, usize)> = Vec::new();
    for ally in ctx.view.allies_of(ctx.fleet) {
        let Some(target) = ally.target else { continue };
        if !ctx.view.fleet(&target).is_some_and(|t| t.is_active()) {
            continue;
        }
        match counts.iter_mut().find(|(id, _)| *id == target) {
            Some((_, n)) => *n += 1,
            None => counts.push((target, 1)),
        }
    }

    let shared = counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(id, _)| id);
    match shared.or(ctx.target.map(|t| t.fleet_id)) {
        Some(target) => Decision::attack(target, "focusing fire"),
        None => Decision::stop("no enemies left"),
    }
}

pub fn kiting(ctx: &StrategyContext<'_>) -> Decision {
    let Some(target) = ctx.target else {
        return Decision::stop("no enemies left");
    };

    let range = ctx.fleet.weapon.range;
    let distance = ctx.fleet.distance_to(target);
    if distance < range * KITE_MIN_RANGE {
        Decision::move_to(ctx.standoff_point(target, range * STANDOFF_RANGE), "opening range")
    } else if distance <= range {
        Decision::attack(target.fleet_id, "firing at range")
    } else {
        Decision::move_to(ctx.standoff_point(target, range * STANDOFF_RANGE), "closing to range")
    }
}

pub fn formation(ctx: &StrategyContext<'_>) -> Decision {
    let Some(slot) = ctx.formation else {
        return aggressive(ctx);
    };

    let station = ctx.clamp(slot.leader.position() + slot.offset);
    if ctx.fleet.position().distance(station) > POSITION_TOLERANCE {
        return Decision::move_to(station, "holding formation");
    }

    match slot.leader.target.and_then(|id| ctx.view.fleet(&id)) {
        Some(target) if target.is_active() => {
            Decision::attack(target.fleet_id, "mirroring leader target")
        }
        _ => Decision::rotate(slot.leader.kinematics.heading, "mirroring leader heading"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::ai::profile::AiProfile;
    use crate::battle::fleet::test_support::fleet;
    use crate::battle::retreat::RetreatController;
    use crate::battle::types::{BattleArea, BattleId, BattleRules, CharacterId};

    struct Fixture {
        fleets: BTreeMap<FleetId, FleetCombatState>,
        area: BattleArea,
        rules: BattleRules,
        retreats: RetreatController,
    }

    impl Fixture {
        fn new(fleets: &[FleetCombatState]) -> Self {
            Self {
                fleets: fleets.iter().map(|f| (f.fleet_id, f.clone())).collect(),
                area: BattleArea::default(),
                rules: BattleRules::default(),
                retreats: RetreatController::new(150),
            }
        }

        fn view(&self) -> BattleView<'_> {
            BattleView {
                battle_id: BattleId::new(),
                tick: 1,
                area: &self.area,
                rules: &self.rules,
                fleets: &self.fleets,
                retreats: &self.retreats,
                supply: None,
            }
        }

        fn decide(&self, strategy: AiStrategy, fleet_id: FleetId, slot: Option<(FleetId, Vec3)>) -> Decision {
            let view = self.view();
            let fleet = &self.fleets[&fleet_id];
            let profile = AiProfile::default();
            let situation = Situation::assess(&view, fleet);
            let target = select_target(&view, fleet, &profile.target_priorities);
            let ctx = StrategyContext {
                view: &view,
                fleet,
                situation: &situation,
                profile: &profile,
                target,
                formation: slot.map(|(leader, offset)| FormationSlot {
                    leader: &self.fleets[&leader],
                    offset,
                }),
            };
            decide(strategy, &ctx)
        }
    }

    #[test]
    fn priorities_fall_through_to_nearest() {
        let me = fleet(1, 10, Vec3::new(1000.0, 1000.0, 0.0));
        let near = fleet(2, 30, Vec3::new(1100.0, 1000.0, 0.0));
        let mut hurt = fleet(2, 30, Vec3::new(1400.0, 1000.0, 0.0));
        hurt.hp = 30.0;
        let mut boss = fleet(2, 30, Vec3::new(1200.0, 1000.0, 0.0));
        boss.commander_id = Some(CharacterId::new());
        boss.max_units = 60;
        let fx = Fixture::new(&[me.clone(), near.clone(), hurt.clone(), boss.clone()]);
        let view = fx.view();

        let pick = |p: &[TargetPriority]| select_target(&view, &me, p).map(|f| f.fleet_id);
        assert_eq!(pick(&[TargetPriority::Nearest]), Some(near.fleet_id));
        assert_eq!(pick(&[TargetPriority::Damaged]), Some(hurt.fleet_id));
        assert_eq!(pick(&[TargetPriority::Flagship]), Some(boss.fleet_id));
        // Nobody is isolated, falls back to nearest
        assert_eq!(pick(&[TargetPriority::Isolated]), Some(near.fleet_id));
    }

    #[test]
    fn aggressive_attacks_and_stops_without_enemies() {
        let me = fleet(1, 10, Vec3::new(100.0, 100.0, 0.0));
        let enemy = fleet(2, 10, Vec3::new(900.0, 100.0, 0.0));
        let fx = Fixture::new(&[me.clone(), enemy.clone()]);
        let d = fx.decide(AiStrategy::Aggressive, me.fleet_id, None);
        assert_eq!(d.kind, CommandKind::Attack);
        assert_eq!(d.payload.target_fleet, Some(enemy.fleet_id));

        let alone = Fixture::new(&[me.clone()]);
        assert_eq!(alone.decide(AiStrategy::Aggressive, me.fleet_id, None).kind, CommandKind::Stop);
    }

    #[test]
    fn kiting_keeps_standoff() {
        let me = fleet(1, 10, Vec3::new(1000.0, 1000.0, 0.0));
        let close = fleet(2, 10, Vec3::new(1100.0, 1000.0, 0.0));
        let fx = Fixture::new(&[me.clone(), close.clone()]);
        let d = fx.decide(AiStrategy::Kiting, me.fleet_id, None);
        assert_eq!(d.kind, CommandKind::Move);
        assert_eq!(d.reason, "opening range");
        let spot = d.payload.target_position.unwrap();
        assert!((spot.distance(close.position()) - 270.0).abs() < 1e-3);
        assert!(spot.x < me.position().x);

        let mut mid = close.clone();
        mid.kinematics.position = Vec3::new(1250.0, 1000.0, 0.0);
        let fx = Fixture::new(&[me.clone(), mid]);
        assert_eq!(fx.decide(AiStrategy::Kiting, me.fleet_id, None).kind, CommandKind::Attack);
    }

    #[test]
    fn defensive_regroups_then_holds() {
        let me = fleet(1, 10, Vec3::new(100.0, 100.0, 0.0));
        let ally = fleet(1, 10, Vec3::new(1100.0, 100.0, 0.0));
        let enemy = fleet(2, 10, Vec3::new(100.0, 1900.0, 0.0));
        let fx = Fixture::new(&[me.clone(), ally, enemy]);
        let d = fx.decide(AiStrategy::Defensive, me.fleet_id, None);
        assert_eq!(d.kind, CommandKind::Move);
        assert_eq!(d.payload.target_position, Some(Vec3::new(600.0, 100.0, 0.0)));

        let fx = Fixture::new(&[me.clone(), fleet(2, 10, Vec3::new(100.0, 1900.0, 0.0))]);
        let d = fx.decide(AiStrategy::Defensive, me.fleet_id, None);
        assert_eq!(d.kind, CommandKind::Rotate);
        assert_eq!(d.payload.heading, Some(90.0));
    }

    #[test]
    fn cautious_backs_away_when_hurt() {
        let mut me = fleet(1, 10, Vec3::new(1000.0, 1000.0, 0.0));
        me.hp = 40.0;
        let enemy = fleet(2, 10, Vec3::new(1200.0, 1000.0, 0.0));
        let fx = Fixture::new(&[me.clone(), enemy]);
        let d = fx.decide(AiStrategy::Cautious, me.fleet_id, None);
        assert_eq!(d.kind, CommandKind::Move);
        assert_eq!(d.payload.target_position, Some(Vec3::new(800.0, 1000.0, 0.0)));
    }

    #[test]
    fn focus_fire_joins_allied_target() {
        let me = fleet(1, 10, Vec3::new(1000.0, 1000.0, 0.0));
        let near = fleet(2, 10, Vec3::new(1100.0, 1000.0, 0.0));
        let far = fleet(2, 10, Vec3::new(1800.0, 1000.0, 0.0));
        let mut ally = fleet(1, 10, Vec3::new(1000.0, 1200.0, 0.0));
        ally.target = Some(far.fleet_id);
        let fx = Fixture::new(&[me.clone(), near, far.clone(), ally]);
        let d = fx.decide(AiStrategy::FocusFire, me.fleet_id, None);
        assert_eq!(d.payload.target_fleet, Some(far.fleet_id));
    }

    #[test]
    fn flanking_moves_beside_target() {
        let me = fleet(1, 10, Vec3::new(200.0, 1000.0, 0.0));
        let enemy = fleet(2, 10, Vec3::new(1000.0, 1000.0, 0.0));
        let fx = Fixture::new(&[me.clone(), enemy]);
        let d = fx.decide(AiStrategy::Flanking, me.fleet_id, None);
        assert_eq!(d.kind, CommandKind::Move);
        let flank = d.payload.target_position.unwrap();
        assert!((flank.x - 1000.0).abs() < 1e-3);
        assert!(((flank.y - 1000.0).abs() - 240.0).abs() < 1e-3);
    }

    #[test]
    fn formation_holds_station_then_mirrors_leader() {
        let mut leader = fleet(1, 30, Vec3::new(500.0, 500.0, 0.0));
        leader.kinematics.heading = 45.0;
        let me = fleet(1, 10, Vec3::new(500.0, 600.0, 0.0));
        let enemy = fleet(2, 10, Vec3::new(1900.0, 1900.0, 0.0));
        let fx = Fixture::new(&[leader.clone(), me.clone(), enemy.clone()]);

        let d = fx.decide(AiStrategy::Formation, me.fleet_id, Some((leader.fleet_id, Vec3::new(0.0, 100.0, 0.0))));
        assert_eq!(d.kind, CommandKind::Rotate);
        assert_eq!(d.payload.heading, Some(45.0));

        let d = fx.decide(AiStrategy::Formation, me.fleet_id, Some((leader.fleet_id, Vec3::new(-200.0, 0.0, 0.0))));
        assert_eq!(d.kind, CommandKind::Move);
        assert_eq!(d.payload.target_position, Some(Vec3::new(300.0, 500.0, 0.0)));

        leader.target = Some(enemy.fleet_id);
        let fx = Fixture::new(&[leader.clone(), me.clone(), enemy.clone()]);
        let d = fx.decide(AiStrategy::Formation, me.fleet_id, Some((leader.fleet_id, Vec3::new(0.0, 100.0, 0.0))));
        assert_eq!(d.payload.target_fleet, Some(enemy.fleet_id));
    }
}
