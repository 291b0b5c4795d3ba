//! Per-tick decision making for AI-controlled fleets

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use tracing::{debug, info};

use super::profile::{AiProfile, AiProfileBuilder, AiStrategy};
use super::situation::{Outlook, Situation};
use super::strategy::{self, Decision, FormationSlot, StrategyContext};
use super::AiRoster;
use crate::battle::command::{BattleCommand, CommandKind, CommandPayload, CommandSource};
use crate::battle::controller::{AiController, BattleView};
use crate::battle::fleet::{FleetCombatState, Formation};
use crate::battle::types::{BattleId, FleetId};
use crate::battle::vector::rotate_horizontal;

/// Spacing between formation slots
pub const FORMATION_SPACING: f32 = 80.0;
/// Below this hp an outnumbered, losing, cautious fleet gives up
const DESPERATE_HP: f32 = 50.0;
const DESPERATE_CAUTION: f32 = 60.0;

#[derive(Debug, Default)]
struct FleetMemory {
    last_decision_tick: Option<u64>,
    last_attack_tick: Option<u64>,
    retreat_issued_tick: Option<u64>,
    last_issued: Option<(CommandKind, CommandPayload)>,
    formation_sent: bool,
    leader: Option<FleetId>,
    forced_strategy: Option<AiStrategy>,
    last_decision: Option<Decision>,
}

/// Drives every fleet the roster hands to the AI
pub struct AiDecisionEngine {
    roster: Arc<dyn AiRoster>,
    memory: HashMap<FleetId, FleetMemory>,
}

impl AiDecisionEngine {
    pub fn new(roster: Arc<dyn AiRoster>) -> Self {
        Self {
            roster,
            memory: HashMap::new(),
        }
    }

    /// Most recent strategy decision for a fleet
    pub fn last_decision(&self, fleet_id: &FleetId) -> Option<&Decision> {
        self.memory.get(fleet_id)?.last_decision.as_ref()
    }

    /// Strategy the fleet is currently locked into, if any
    pub fn forced_strategy(&self, fleet_id: &FleetId) -> Option<AiStrategy> {
        self.memory.get(fleet_id)?.forced_strategy
    }

    fn decide_for(
        &mut self,
        view: &BattleView<'_>,
        fleet: &FleetCombatState,
        base: &AiProfile,
    ) -> Vec<BattleCommand> {
        let tick = view.tick;
        let situation = Situation::assess(view, fleet);
        let profile = AiProfileBuilder::adjust(base, situation.factors());
        let retreating = view.is_retreating(&fleet.fleet_id);
        let memory = self.memory.entry(fleet.fleet_id).or_default();

        if retreating {
            return Vec::new();
        }

        // Retreat is checked every tick, ahead of the reaction cadence
        if view.rules.retreat_allowed && should_retreat(&profile, &situation) {
            let already_issued = memory
                .retreat_issued_tick
                .is_some_and(|since| tick < since + profile.reaction_ticks);
            if already_issued {
                return Vec::new();
            }
            memory.retreat_issued_tick = Some(tick);
            memory.last_issued = None;
            info!(
                battle_id = %view.battle_id,
                fleet_id = %fleet.fleet_id,
                tick,
                hp = fleet.hp,
                morale = fleet.morale,
                "AI ordering retreat"
            );
            return vec![command(fleet.fleet_id, CommandKind::Retreat, CommandPayload::default())];
        }

        let due = memory
            .last_decision_tick
            .map_or(true, |last| tick >= last + profile.reaction_ticks);
        if !due {
            return Vec::new();
        }
        memory.last_decision_tick = Some(tick);

        let mut commands = Vec::new();
        if !memory.formation_sent && fleet.formation != profile.preferred_formation {
            memory.formation_sent = true;
            commands.push(command(
                fleet.fleet_id,
                CommandKind::Formation,
                CommandPayload::formation(profile.preferred_formation),
            ));
        }

        let strategy = resolve_strategy(view, fleet, &profile, memory);
        let formation = match strategy {
            AiStrategy::Formation => memory
                .leader
                .and_then(|id| view.fleet(&id))
                .map(|leader| FormationSlot {
                    leader,
                    offset: formation_offset(
                        profile.preferred_formation,
                        follower_slot(view, leader, fleet),
                        leader.kinematics.heading,
                    ),
                }),
            _ => None,
        };

        let target = strategy::select_target(view, fleet, &profile.target_priorities);
        let ctx = StrategyContext {
            view,
            fleet,
            situation: &situation,
            profile: &profile,
            target,
            formation,
        };
        let decision = strategy::decide(strategy, &ctx);
        debug!(
            battle_id = %view.battle_id,
            fleet_id = %fleet.fleet_id,
            tick,
            strategy = ?strategy,
            command = ?decision.kind,
            reason = %decision.reason,
            "AI decision"
        );

        let redundant = is_redundant(fleet, &decision, memory.last_issued.as_ref());
        let attack_cooling = decision.kind == CommandKind::Attack
            && memory
                .last_attack_tick
                .is_some_and(|last| tick < last + profile.attack_interval_ticks);

        if !redundant && !attack_cooling {
            if decision.kind == CommandKind::Attack {
                memory.last_attack_tick = Some(tick);
            }
            memory.last_issued = Some((decision.kind, decision.payload));
            commands.push(command(fleet.fleet_id, decision.kind, decision.payload));
        }
        memory.last_decision = Some(decision);

        commands
    }
}

impl AiController for AiDecisionEngine {
    fn decide(&mut self, view: &BattleView<'_>) -> Vec<BattleCommand> {
        let mut commands = Vec::new();
        for fleet in view.active_fleets() {
            let Some(profile) = self.roster.ai_profile(view.battle_id, fleet.fleet_id) else {
                continue;
            };
            commands.extend(self.decide_for(view, fleet, &profile));
        }

        // Forget fleets that left the fight
        self.memory
            .retain(|id, _| view.fleet(id).is_some_and(|f| f.is_active()));
        commands
    }

    fn battle_ended(&mut self, battle_id: BattleId) {
        debug!(battle_id = %battle_id, fleets = self.memory.len(), "Clearing AI memory");
        self.memory.clear();
    }
}

fn command(fleet_id: FleetId, kind: CommandKind, payload: CommandPayload) -> BattleCommand {
    BattleCommand::new(fleet_id, kind, payload, CommandSource::Ai)
}

pub fn should_retreat(profile: &AiProfile, situation: &Situation) -> bool {
    situation.hp <= profile.retreat_threshold
        || situation.morale <= profile.morale_threshold
        || (situation.outnumbered
            && situation.outlook == Outlook::Losing
            && situation.hp < DESPERATE_HP
            && profile.caution > DESPERATE_CAUTION)
}

fn resolve_strategy(
    view: &BattleView<'_>,
    fleet: &FleetCombatState,
    profile: &AiProfile,
    memory: &mut FleetMemory,
) -> AiStrategy {
    if let Some(forced) = memory.forced_strategy {
        return forced;
    }
    if profile.strategy != AiStrategy::Formation {
        return profile.strategy;
    }

    if let Some(leader_id) = memory.leader {
        if view.fleet(&leader_id).is_some_and(|l| l.is_active()) {
            return AiStrategy::Formation;
        }
        debug!(
            battle_id = %view.battle_id,
            fleet_id = %fleet.fleet_id,
            leader = %leader_id,
            "Formation leader lost, switching to aggressive"
        );
        memory.leader = None;
        memory.forced_strategy = Some(AiStrategy::Aggressive);
        return AiStrategy::Aggressive;
    }

    match pick_leader(view, fleet) {
        Some(leader) => {
            memory.leader = Some(leader);
            AiStrategy::Formation
        }
        // Leading or alone
        None => profile.fallback_strategy,
    }
}

/// Largest fleet of the faction; `None` when that is `fleet` itself
fn pick_leader(view: &BattleView<'_>, fleet: &FleetCombatState) -> Option<FleetId> {
    let leader = view
        .active_fleets()
        .filter(|f| f.faction == fleet.faction && !view.is_retreating(&f.fleet_id))
        .fold(None::<&FleetCombatState>, |best, f| match best {
            Some(b) if b.units >= f.units => Some(b),
            _ => Some(f),
        })?;
    (leader.fleet_id != fleet.fleet_id).then_some(leader.fleet_id)
}

/// 1-based position of `fleet` among the leader's followers
fn follower_slot(view: &BattleView<'_>, leader: &FleetCombatState, fleet: &FleetCombatState) -> usize {
    view.allies_of(leader)
        .position(|f| f.fleet_id == fleet.fleet_id)
        .map_or(1, |i| i + 1)
}

/// Offset from the leader for a slot, rotated to the leader's heading.
/// +X is ahead of the leader, +Y to its left.
pub fn formation_offset(formation: Formation, slot: usize, leader_heading: f32) -> Vec3 {
    let rank = slot.div_ceil(2) as f32;
    let side = if slot % 2 == 1 { 1.0 } else { -1.0 };
    let local = match formation {
        Formation::Line => Vec3::new(0.0, side * rank * FORMATION_SPACING, 0.0),
        Formation::Column => Vec3::new(-(slot as f32) * FORMATION_SPACING, 0.0, 0.0),
        Formation::Wedge => Vec3::new(
            -rank * FORMATION_SPACING,
            side * rank * FORMATION_SPACING,
            0.0,
        ),
        Formation::Spread => Vec3::new(0.0, side * rank * FORMATION_SPACING * 2.0, 0.0),
        Formation::Circle => {
            let angle = slot as f32 * 60.0;
            rotate_horizontal(Vec3::new(FORMATION_SPACING * 1.5, 0.0, 0.0), angle)
        }
    };
    rotate_horizontal(local, leader_heading)
}

/// True when issuing `decision` would change nothing
fn is_redundant(
    fleet: &FleetCombatState,
    decision: &Decision,
    last: Option<&(CommandKind, CommandPayload)>,
) -> bool {
    match decision.kind {
        CommandKind::Attack => {
            decision.payload.target_fleet.is_some() && fleet.target == decision.payload.target_fleet
        }
        CommandKind::Stop => {
            fleet.target.is_none() && fleet.orders.move_target.is_none() && last.is_some()
        }
        _ => last.is_some_and(|(kind, payload)| *kind == decision.kind && *payload == decision.payload),
    }
}
