//! The per-battle tick engine
//!
//! `BattleEngine` owns every piece of battle state and advances it one tick
//! at a time through `step`. It is synchronous; pacing, input and fan-out
//! live in the runner.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use glam::Vec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use super::combat::CombatResolver;
use super::command::{BattleCommand, CommandKind, CommandOutcome};
use super::controller::{AiController, BattleView};
use super::error::{BattleError, FleetTickError, RejectReason};
use super::events::{BattleEvent, BattleEventKind};
use super::fleet::{FleetCombatState, FleetLoadout};
use super::physics::{MoveStatus, PhysicsSystem};
use super::reinforcement::{
    ReinforcementController, ReinforcementPriority, ReinforcementRecord, ReinforcementTransition,
};
use super::result::{BattleRecord, BattleResult, EndReason, ParticipantRecord, ParticipantResult};
use super::retreat::{RetreatController, RetreatRecord, RetreatSteering, RetreatTransition};
use super::snapshot::{BattleSnapshot, SnapshotBuilder};
use super::supply::{
    FleetActivity, SupplyChange, SupplyState, SupplyTopUp, SupplyTracker, REPAIR_HP_PER_TICK,
};
use super::time_limit::{GraceChange, TimeLimitMonitor};
use super::types::{
    BattleArea, BattleConfig, BattleId, BattleRules, BattleStatus, CommandId, FactionId, FleetId,
};
use super::vector::{angle_difference, heading_between, normalize_angle};
use crate::util::time::{is_valid_tick_rate, tick_delta};
use crate::world::{retreat_destination, GridCoord, WorldGrid};

/// Commands a battle will hold before rejecting new ones
pub const MAX_QUEUED_COMMANDS: usize = 1024;
/// Pursuing fleets close to this fraction of their weapon range
pub const PURSUIT_RANGE_FACTOR: f32 = 0.9;
/// Below this speed a fleet counts as stationary
const STATIONARY_SPEED: f32 = 0.01;
/// A rotate order is done once within this many degrees
const HEADING_EPSILON: f32 = 0.5;
/// Reinforcements enter this far inside the boundary
const SPAWN_INSET: f32 = 50.0;
/// Lateral spacing between reinforcements arriving on the same tick
const SPAWN_SPACING: f32 = 60.0;

/// Everything fixed at battle creation
#[derive(Debug, Clone, Default)]
pub struct BattleSetup {
    pub config: BattleConfig,
    pub rules: BattleRules,
    pub area: BattleArea,
    /// World cell the battle is fought in
    pub location: Option<GridCoord>,
    /// Seed for hit rolls
    pub seed: u64,
}

type EndCondition = (EndReason, Option<FactionId>);

pub struct BattleEngine {
    id: BattleId,
    status: BattleStatus,
    config: BattleConfig,
    rules: BattleRules,
    area: BattleArea,
    location: Option<GridCoord>,
    seed: u64,
    tick: u64,

    fleets: BTreeMap<FleetId, FleetCombatState>,
    commands: VecDeque<BattleCommand>,
    /// Events since the last published snapshot
    events: Vec<BattleEvent>,
    rng: ChaCha8Rng,

    supply: SupplyTracker,
    time_limit: TimeLimitMonitor,
    retreats: RetreatController,
    reinforcements: ReinforcementController,

    ai: Option<Box<dyn AiController>>,
    world: Option<Arc<dyn WorldGrid>>,

    total_ships_destroyed: u64,
    result: Option<BattleResult>,
    warned: BTreeSet<&'static str>,
}

impl BattleEngine {
    pub fn new(id: BattleId, setup: BattleSetup) -> Result<Self, BattleError> {
        let BattleSetup {
            config,
            rules,
            area,
            location,
            seed,
        } = setup;

        if !is_valid_tick_rate(config.tick_rate) {
            return Err(BattleError::InvalidTickRate(config.tick_rate));
        }

        Ok(Self {
            id,
            status: BattleStatus::Preparing,
            time_limit: TimeLimitMonitor::new(
                config.max_ticks,
                config.stalemate_threshold_ticks,
                config.supply_grace_ticks,
            ),
            retreats: RetreatController::new(rules.retreat_delay_ticks),
            config,
            rules,
            area,
            location,
            seed,
            tick: 0,
            fleets: BTreeMap::new(),
            commands: VecDeque::new(),
            events: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            supply: SupplyTracker::new(),
            reinforcements: ReinforcementController::new(),
            ai: None,
            world: None,
            total_ships_destroyed: 0,
            result: None,
            warned: BTreeSet::new(),
        })
    }

    pub fn with_ai(mut self, ai: Box<dyn AiController>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_world(mut self, world: Arc<dyn WorldGrid>) -> Self {
        self.world = Some(world);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> BattleId {
        self.id
    }

    pub fn status(&self) -> BattleStatus {
        self.status
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    pub fn rules(&self) -> &BattleRules {
        &self.rules
    }

    pub fn area(&self) -> &BattleArea {
        &self.area
    }

    pub fn location(&self) -> Option<GridCoord> {
        self.location
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn fleets(&self) -> &BTreeMap<FleetId, FleetCombatState> {
        &self.fleets
    }

    pub fn fleet(&self, fleet_id: &FleetId) -> Option<&FleetCombatState> {
        self.fleets.get(fleet_id)
    }

    /// Direct access for scenario setup and tooling
    pub fn fleet_mut(&mut self, fleet_id: &FleetId) -> Option<&mut FleetCombatState> {
        self.fleets.get_mut(fleet_id)
    }

    pub fn supply(&self) -> &SupplyTracker {
        &self.supply
    }

    pub fn retreats(&self) -> &RetreatController {
        &self.retreats
    }

    pub fn reinforcements(&self) -> &ReinforcementController {
        &self.reinforcements
    }

    pub fn result(&self) -> Option<&BattleResult> {
        self.result.as_ref()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn total_ships_destroyed(&self) -> u64 {
        self.total_ships_destroyed
    }

    /// Factions with at least one fleet still in the fight
    pub fn active_factions(&self) -> BTreeSet<FactionId> {
        self.fleets
            .values()
            .filter(|f| f.is_active())
            .map(|f| f.faction)
            .collect()
    }

    /// Remaining force per faction: units scaled by hull integrity
    pub fn force_by_faction(&self) -> BTreeMap<FactionId, f32> {
        let mut force = BTreeMap::new();
        for fleet in self.fleets.values() {
            *force.entry(fleet.faction).or_insert(0.0) += fleet.force();
        }
        force
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    /// Add a fleet before the battle starts
    pub fn add_participant(&mut self, loadout: FleetLoadout) -> Result<(), RejectReason> {
        match self.status {
            BattleStatus::Preparing => {}
            BattleStatus::Ended => return Err(RejectReason::BattleEnded),
            BattleStatus::Active | BattleStatus::Paused => return Err(RejectReason::BattleStarted),
        }
        if self.fleets.contains_key(&loadout.fleet_id) {
            return Err(RejectReason::AlreadyParticipating);
        }

        let mut fleet = FleetCombatState::from_loadout(&loadout, self.tick);
        PhysicsSystem::clamp_to_area(&mut fleet.kinematics, &self.area);
        self.admit(fleet, false);
        Ok(())
    }

    /// Remove a fleet before the battle starts
    pub fn remove_participant(&mut self, fleet_id: &FleetId) -> Result<FleetCombatState, RejectReason> {
        match self.status {
            BattleStatus::Preparing => {}
            BattleStatus::Ended => return Err(RejectReason::BattleEnded),
            BattleStatus::Active | BattleStatus::Paused => return Err(RejectReason::BattleStarted),
        }
        let fleet = self
            .fleets
            .remove(fleet_id)
            .ok_or(RejectReason::UnknownFleet)?;
        self.supply.remove(fleet_id);
        self.commands.retain(|c| c.fleet_id != *fleet_id);
        Ok(fleet)
    }

    fn admit(&mut self, fleet: FleetCombatState, reinforcement: bool) {
        debug!(
            battle_id = %self.id,
            fleet_id = %fleet.fleet_id,
            faction = %fleet.faction,
            units = fleet.units,
            reinforcement,
            "Fleet joined"
        );
        self.push_event(BattleEventKind::FleetJoined {
            fleet_id: fleet.fleet_id,
            faction: fleet.faction,
            units: fleet.units,
            reinforcement,
        });
        self.supply.register(fleet.fleet_id, fleet.units);
        self.fleets.insert(fleet.fleet_id, fleet);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// `PREPARING -> ACTIVE`. Returns false if already running.
    pub fn start(&mut self) -> Result<bool, BattleError> {
        match self.status {
            BattleStatus::Active | BattleStatus::Paused => return Ok(false),
            BattleStatus::Ended => {
                return Err(BattleError::InvalidTransition {
                    action: "start",
                    status: self.status,
                })
            }
            BattleStatus::Preparing => {}
        }

        let required = self.rules.min_participants;
        if self.fleets.len() < required {
            return Err(BattleError::NotEnoughParticipants {
                required,
                actual: self.fleets.len(),
            });
        }
        if self.active_factions().len() < 2 {
            return Err(BattleError::SingleFaction);
        }

        self.status = BattleStatus::Active;
        self.time_limit.reset(self.tick);
        info!(
            battle_id = %self.id,
            fleets = self.fleets.len(),
            tick_rate = self.config.tick_rate,
            "Battle started"
        );
        Ok(true)
    }

    /// `ACTIVE -> PAUSED`. Returns false if already paused.
    pub fn pause(&mut self) -> Result<bool, BattleError> {
        match self.status {
            BattleStatus::Active => {
                self.status = BattleStatus::Paused;
                info!(battle_id = %self.id, tick = self.tick, "Battle paused");
                Ok(true)
            }
            BattleStatus::Paused => Ok(false),
            status => Err(BattleError::InvalidTransition {
                action: "pause",
                status,
            }),
        }
    }

    /// `PAUSED -> ACTIVE`. Returns false if already active.
    pub fn resume(&mut self) -> Result<bool, BattleError> {
        match self.status {
            BattleStatus::Paused => {
                self.status = BattleStatus::Active;
                info!(battle_id = %self.id, tick = self.tick, "Battle resumed");
                Ok(true)
            }
            BattleStatus::Active => Ok(false),
            status => Err(BattleError::InvalidTransition {
                action: "resume",
                status,
            }),
        }
    }

    /// End the battle from outside. The strict force leader, if any, wins.
    /// Stopping an ended battle returns the existing result.
    pub fn stop(&mut self) -> BattleResult {
        if let Some(result) = &self.result {
            return result.clone();
        }
        let winner = Self::strict_leader(self.force_by_faction());
        self.finish(EndReason::Manual, winner)
    }

    fn finish(&mut self, reason: EndReason, winner: Option<FactionId>) -> BattleResult {
        if let Some(result) = &self.result {
            return result.clone();
        }

        self.status = BattleStatus::Ended;
        self.commands.clear();
        self.retreats.clear();
        self.reinforcements.clear();
        if let Some(ai) = self.ai.as_mut() {
            ai.battle_ended(self.id);
        }

        let result = BattleResult {
            winner,
            reason,
            duration_ticks: self.tick,
            total_ships_destroyed: self.total_ships_destroyed,
            participants: self.fleets.values().map(ParticipantResult::from).collect(),
        };
        info!(
            battle_id = %self.id,
            reason = ?reason,
            winner = ?winner,
            ticks = self.tick,
            ships_destroyed = self.total_ships_destroyed,
            "Battle ended"
        );
        self.result = Some(result.clone());
        result
    }

    // ------------------------------------------------------------------
    // Inbound requests
    // ------------------------------------------------------------------

    fn ensure_running(&self) -> Result<(), RejectReason> {
        match self.status {
            BattleStatus::Active | BattleStatus::Paused => Ok(()),
            BattleStatus::Ended => Err(RejectReason::BattleEnded),
            BattleStatus::Preparing => Err(RejectReason::BattleNotActive),
        }
    }

    fn ensure_fighting(&self, fleet_id: &FleetId) -> Result<&FleetCombatState, RejectReason> {
        let fleet = self.fleets.get(fleet_id).ok_or(RejectReason::UnknownFleet)?;
        if fleet.defeated {
            return Err(RejectReason::FleetDefeated);
        }
        if fleet.withdrawn {
            return Err(RejectReason::FleetWithdrawn);
        }
        Ok(fleet)
    }

    /// Queue a command for the next tick
    pub fn queue_command(&mut self, mut command: BattleCommand) -> Result<CommandId, RejectReason> {
        self.ensure_running()?;
        command.validate()?;
        self.ensure_fighting(&command.fleet_id)?;
        if self.commands.len() >= MAX_QUEUED_COMMANDS {
            return Err(RejectReason::QueueFull);
        }

        command.issued_tick = self.tick;
        let id = command.id;
        self.commands.push_back(command);
        Ok(id)
    }

    /// Start a retreat. Returns the completion tick.
    pub fn request_retreat(
        &mut self,
        fleet_id: FleetId,
        destination: Option<GridCoord>,
    ) -> Result<u64, RejectReason> {
        self.ensure_running()?;
        self.begin_retreat(fleet_id, destination)
    }

    fn begin_retreat(
        &mut self,
        fleet_id: FleetId,
        destination: Option<GridCoord>,
    ) -> Result<u64, RejectReason> {
        if !self.rules.retreat_allowed {
            return Err(RejectReason::RetreatNotAllowed);
        }
        let fleet = self.fleets.get(&fleet_id).ok_or(RejectReason::UnknownFleet)?;
        let completes_at = self
            .retreats
            .begin(fleet, &self.area, self.tick, destination)?
            .complete_tick;

        if let Some(fleet) = self.fleets.get_mut(&fleet_id) {
            fleet.retreating = true;
            fleet.retreat_start_tick = Some(self.tick);
            fleet.target = None;
            fleet.orders.clear();
            fleet.kinematics.halt();
        }

        info!(
            battle_id = %self.id,
            fleet_id = %fleet_id,
            tick = self.tick,
            completes_at,
            "Retreat started"
        );
        self.push_event(BattleEventKind::RetreatStarted {
            fleet_id,
            completes_at,
        });
        Ok(completes_at)
    }

    /// Abort a retreat that is still charging
    pub fn cancel_retreat(&mut self, fleet_id: FleetId) -> Result<(), RejectReason> {
        self.ensure_running()?;
        self.retreats.cancel(&fleet_id)?;

        if let Some(fleet) = self.fleets.get_mut(&fleet_id) {
            fleet.retreating = false;
            fleet.retreat_start_tick = None;
        }
        info!(battle_id = %self.id, fleet_id = %fleet_id, "Retreat cancelled");
        self.push_event(BattleEventKind::RetreatCancelled { fleet_id });
        Ok(())
    }

    /// Queue a fleet to join mid-battle. Returns the arrival tick.
    pub fn request_reinforcement(
        &mut self,
        loadout: FleetLoadout,
        priority: ReinforcementPriority,
    ) -> Result<u64, RejectReason> {
        self.ensure_running()?;
        if self.fleets.contains_key(&loadout.fleet_id) {
            return Err(RejectReason::AlreadyParticipating);
        }

        let distance = self.reinforcement_distance(loadout.fleet_id)?;
        let committed: u32 = self
            .fleets
            .values()
            .filter(|f| f.faction == loadout.faction && f.is_active())
            .map(|f| f.units)
            .fold(0, u32::saturating_add);

        let record = self.reinforcements.request(
            loadout,
            distance,
            priority,
            self.tick,
            committed,
            self.config.faction_unit_cap,
        )?;
        let (fleet_id, faction, units, arrival_tick) =
            (record.fleet_id, record.faction, record.units, record.arrival_tick);

        info!(
            battle_id = %self.id,
            fleet_id = %fleet_id,
            units,
            distance,
            arrival_tick,
            "Reinforcement approved"
        );
        self.push_event(BattleEventKind::ReinforcementRequested {
            fleet_id,
            faction,
            units,
            arrival_tick,
        });
        Ok(arrival_tick)
    }

    /// Grid distance between the fleet and the battle; local battles are 0
    fn reinforcement_distance(&self, fleet_id: FleetId) -> Result<u32, RejectReason> {
        match (&self.world, self.location) {
            (Some(world), Some(battle_cell)) => world
                .fleet_location(fleet_id)
                .map(|cell| cell.distance(&battle_cell))
                .ok_or(RejectReason::NotAdjacent),
            _ => Ok(0),
        }
    }

    /// Top up a fleet's consumables
    pub fn resupply(&mut self, fleet_id: FleetId, top_up: SupplyTopUp) -> Result<SupplyState, RejectReason> {
        if self.status == BattleStatus::Ended {
            return Err(RejectReason::BattleEnded);
        }
        self.ensure_fighting(&fleet_id)?;

        let changes = self
            .supply
            .resupply(&fleet_id, top_up)
            .ok_or(RejectReason::UnknownFleet)?;
        for change in changes {
            if let SupplyChange::Restored(resource) = change {
                self.push_event(BattleEventKind::SupplyRestored { fleet_id, resource });
            }
        }

        if self.supply.can_move(&fleet_id) && top_up.fuel > 0.0 && self.time_limit.clear_grace() {
            info!(battle_id = %self.id, "Fuel restored, exhaustion grace cleared");
            self.push_event(BattleEventKind::SupplyGraceCleared);
        }

        self.supply
            .get(&fleet_id)
            .copied()
            .ok_or(RejectReason::UnknownFleet)
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance one tick. Returns `None` unless the battle is active.
    pub fn step(&mut self) -> Option<Arc<BattleSnapshot>> {
        if self.status != BattleStatus::Active {
            return None;
        }

        self.tick += 1;
        let dt = tick_delta(self.config.tick_rate);

        self.run_ai();
        self.apply_commands();
        self.step_kinematics(dt);
        let fired = self.step_combat();
        self.step_collisions();
        self.step_retreats();
        self.step_reinforcements();
        self.step_supply(&fired);

        let end = self.check_time_limits().or_else(|| self.check_victory());
        if let Some((reason, winner)) = end {
            self.finish(reason, winner);
        }

        Some(Arc::new(self.publish()))
    }

    fn run_ai(&mut self) {
        if !self.config.features.ai {
            self.warn_disabled("ai");
            return;
        }
        if self.ai.is_none() {
            self.warn_disabled("ai_controller");
            return;
        }

        let view = BattleView {
            battle_id: self.id,
            tick: self.tick,
            area: &self.area,
            rules: &self.rules,
            fleets: &self.fleets,
            retreats: &self.retreats,
            supply: self.config.features.supply.then_some(&self.supply),
        };
        let commands = match self.ai.as_mut() {
            Some(ai) => ai.decide(&view),
            None => Vec::new(),
        };

        for mut command in commands {
            command.issued_tick = self.tick;
            self.commands.push_back(command);
        }
    }

    fn apply_commands(&mut self) {
        let tick = self.tick;
        let stale_after = self.config.stale_command_ticks;
        let pending: Vec<BattleCommand> = self.commands.drain(..).collect();

        for command in pending {
            if command.age(tick) > stale_after {
                debug!(
                    battle_id = %self.id,
                    command_id = %command.id,
                    age = command.age(tick),
                    "Dropping stale command"
                );
                self.reject(&command, RejectReason::StaleCommand);
                continue;
            }

            match self.apply_command(&command) {
                CommandOutcome::Applied => self.push_event(BattleEventKind::CommandApplied {
                    command_id: command.id,
                    fleet_id: command.fleet_id,
                    command: command.kind,
                }),
                CommandOutcome::Deferred => self.commands.push_back(command),
                CommandOutcome::Rejected(reason) => self.reject(&command, reason),
            }
        }
    }

    fn reject(&mut self, command: &BattleCommand, reason: RejectReason) {
        debug!(
            battle_id = %self.id,
            fleet_id = %command.fleet_id,
            command = ?command.kind,
            reason = reason.code(),
            "Command rejected"
        );
        self.push_event(BattleEventKind::CommandRejected {
            command_id: command.id,
            fleet_id: command.fleet_id,
            command: command.kind,
            reason,
        });
    }

    fn apply_command(&mut self, command: &BattleCommand) -> CommandOutcome {
        let (faction, retreating) = match self.ensure_fighting(&command.fleet_id) {
            Ok(fleet) => (fleet.faction, fleet.retreating),
            Err(reason) => return CommandOutcome::Rejected(reason),
        };
        if let Err(reason) = command.validate() {
            return CommandOutcome::Rejected(reason);
        }
        if retreating && command.kind != CommandKind::Retreat {
            return CommandOutcome::Deferred;
        }

        let payload = command.payload;
        if command.kind == CommandKind::Retreat {
            return match self.begin_retreat(command.fleet_id, None) {
                Ok(_) => CommandOutcome::Applied,
                Err(reason) => CommandOutcome::Rejected(reason),
            };
        }

        if command.kind == CommandKind::Attack {
            let Some(target_id) = payload.target_fleet else {
                return CommandOutcome::Rejected(RejectReason::MalformedCommand);
            };
            match self.fleets.get(&target_id) {
                Some(target) if target.is_active() => {
                    if target.faction == faction && !self.rules.friendly_fire {
                        return CommandOutcome::Rejected(RejectReason::FriendlyTarget);
                    }
                }
                _ => return CommandOutcome::Rejected(RejectReason::UnknownTarget),
            }
        }

        let area = self.area;
        let Some(fleet) = self.fleets.get_mut(&command.fleet_id) else {
            return CommandOutcome::Rejected(RejectReason::UnknownFleet);
        };

        match command.kind {
            CommandKind::Move => {
                if let Some(position) = payload.target_position {
                    fleet.orders.clear();
                    fleet.orders.move_target = Some(area.clamp(position));
                }
            }
            CommandKind::Attack => {
                fleet.orders.clear();
                fleet.target = payload.target_fleet;
                fleet.orders.pursue = true;
            }
            CommandKind::Rotate => {
                if let Some(heading) = payload.heading {
                    fleet.orders.clear();
                    fleet.orders.target_heading = Some(normalize_angle(heading));
                }
            }
            CommandKind::Formation => {
                if let Some(formation) = payload.formation {
                    fleet.formation = formation;
                }
            }
            CommandKind::Stop => {
                fleet.orders.clear();
                fleet.target = None;
            }
            CommandKind::Retreat => {}
        }
        CommandOutcome::Applied
    }

    fn step_kinematics(&mut self, dt: f32) {
        let ids: Vec<FleetId> = self.fleets.keys().copied().collect();
        for fleet_id in ids {
            if let Err(err) = self.move_fleet(fleet_id, dt) {
                self.report_fleet_error("movement", &err);
            }
        }
    }

    /// Log a per-fleet failure; the tick carries on with the other fleets
    fn report_fleet_error(&self, phase: &'static str, err: &FleetTickError) {
        warn!(
            battle_id = %self.id,
            fleet_id = %err.fleet_id(),
            tick = self.tick,
            phase,
            error = %err,
            "Fleet skipped for this phase"
        );
    }

    /// Take active fleets whose state fails its check out of the map for one phase
    fn quarantine(&mut self, phase: &'static str) -> Vec<FleetCombatState> {
        let broken: Vec<FleetTickError> = self
            .fleets
            .values()
            .filter(|f| f.is_active())
            .filter_map(|f| f.check().err())
            .collect();

        let mut held = Vec::with_capacity(broken.len());
        for err in broken {
            self.report_fleet_error(phase, &err);
            if let Some(fleet) = self.fleets.remove(&err.fleet_id()) {
                held.push(fleet);
            }
        }
        held
    }

    fn release(&mut self, held: Vec<FleetCombatState>) {
        for fleet in held {
            self.fleets.insert(fleet.fleet_id, fleet);
        }
    }

    /// Position of the fleet being chased, if pursuing
    fn pursuit_target(&self, fleet_id: &FleetId) -> Option<Vec3> {
        let fleet = self.fleets.get(fleet_id)?;
        if !fleet.orders.pursue {
            return None;
        }
        let target = self.fleets.get(&fleet.target?)?;
        target.is_active().then(|| target.position())
    }

    fn move_fleet(&mut self, fleet_id: FleetId, dt: f32) -> Result<(), FleetTickError> {
        let steering = self.retreats.steering(&fleet_id);
        let can_thrust = !self.config.features.supply || self.supply.can_move(&fleet_id);
        let pursuit = self.pursuit_target(&fleet_id);
        let area = self.area;

        let fleet = self
            .fleets
            .get_mut(&fleet_id)
            .ok_or(FleetTickError::Missing(fleet_id))?;
        if !fleet.is_active() {
            return Ok(());
        }

        let before = fleet.kinematics;
        let hold_range = fleet.weapon.range * PURSUIT_RANGE_FACTOR;
        let k = &mut fleet.kinematics;

        match steering {
            Some(RetreatSteering::Hold) => k.halt(),
            Some(RetreatSteering::MoveTo(exit)) => {
                PhysicsSystem::move_toward(k, exit, dt, can_thrust);
            }
            None => {
                if let Some(destination) = fleet.orders.move_target {
                    let status = PhysicsSystem::move_toward(k, destination, dt, can_thrust);
                    if status == MoveStatus::Arrived {
                        fleet.orders.move_target = None;
                    }
                } else if let Some(target) = pursuit {
                    if k.position.distance(target) > hold_range {
                        PhysicsSystem::move_toward(k, target, dt, can_thrust);
                    } else {
                        PhysicsSystem::turn_toward(k, heading_between(k.position, target));
                        PhysicsSystem::apply_drag(k);
                    }
                } else if let Some(heading) = fleet.orders.target_heading {
                    PhysicsSystem::turn_toward(k, heading);
                    if angle_difference(k.heading, heading).abs() < HEADING_EPSILON {
                        k.heading = heading;
                        fleet.orders.target_heading = None;
                    }
                    PhysicsSystem::apply_drag(k);
                } else {
                    PhysicsSystem::apply_drag(k);
                }
            }
        }

        if !can_thrust {
            k.halt();
        }
        PhysicsSystem::integrate(k, dt);
        PhysicsSystem::clamp_to_area(k, &area);

        if !(k.position.is_finite() && k.velocity.is_finite() && k.heading.is_finite()) {
            fleet.kinematics = before;
            fleet.kinematics.halt();
            return Err(FleetTickError::NonFinite {
                fleet_id,
                field: "kinematics",
            });
        }
        Ok(())
    }

    /// Returns the fleets that fired
    fn step_combat(&mut self) -> BTreeSet<FleetId> {
        let held = self.quarantine("combat");
        let before = self.fleets.clone();

        let supply_on = self.config.features.supply;
        let supply = &self.supply;
        let report = CombatResolver::resolve(
            &mut self.fleets,
            self.tick,
            &mut self.rng,
            self.rules.friendly_fire,
            |id| !supply_on || supply.can_fire(&id),
        );

        if report.dealt_damage() {
            self.time_limit.record_damage(self.tick);
        }
        self.total_ships_destroyed += report.units_destroyed;
        for (fleet_id, lost) in report.losses() {
            self.retreats.record_losses(&fleet_id, lost);
        }

        let fired = report.fired();
        for event in report.events {
            if let BattleEventKind::FleetDestroyed {
                fleet_id,
                attacker_id,
            } = &event
            {
                info!(
                    battle_id = %self.id,
                    fleet_id = %fleet_id,
                    attacker_id = %attacker_id,
                    tick = self.tick,
                    "Fleet destroyed"
                );
            }
            self.push_event(event);
        }

        // Roll back any fleet the volley left unusable
        let broken: Vec<FleetTickError> =
            self.fleets.values().filter_map(|f| f.check().err()).collect();
        for err in broken {
            self.report_fleet_error("combat", &err);
            if let Some(previous) = before.get(&err.fleet_id()) {
                let mut restored = previous.clone();
                restored.kinematics.halt();
                self.fleets.insert(restored.fleet_id, restored);
            }
        }

        self.release(held);
        fired
    }

    fn step_collisions(&mut self) {
        let held = self.quarantine("collision");
        let ids: Vec<FleetId> = self
            .fleets
            .values()
            .filter(|f| f.is_active())
            .map(|f| f.fleet_id)
            .collect();

        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                match self.collide(a, b) {
                    Ok(Some(penetration)) => self.push_event(BattleEventKind::Collision {
                        fleet_a: a,
                        fleet_b: b,
                        penetration,
                    }),
                    Ok(None) => {}
                    Err(err) => self.report_fleet_error("collision", &err),
                }
            }
        }
        self.release(held);
    }

    /// Push one pair apart, writing back only finite results
    fn collide(&mut self, a: FleetId, b: FleetId) -> Result<Option<f32>, FleetTickError> {
        let mut ka = self.fleets.get(&a).ok_or(FleetTickError::Missing(a))?.kinematics;
        let mut kb = self.fleets.get(&b).ok_or(FleetTickError::Missing(b))?.kinematics;

        let penetration = PhysicsSystem::separate_within(&mut ka, &mut kb, &self.area);
        if penetration <= 0.0 {
            return Ok(None);
        }
        for (fleet_id, k) in [(a, &ka), (b, &kb)] {
            if !k.position.is_finite() {
                return Err(FleetTickError::NonFinite {
                    fleet_id,
                    field: "collision",
                });
            }
        }

        for (fleet_id, k) in [(a, ka), (b, kb)] {
            if let Some(fleet) = self.fleets.get_mut(&fleet_id) {
                fleet.kinematics = k;
            }
        }
        Ok(Some(penetration))
    }

    fn step_retreats(&mut self) {
        for transition in self.retreats.advance(self.tick, &self.fleets) {
            match transition {
                RetreatTransition::PhaseChanged { fleet_id, phase } => {
                    debug!(battle_id = %self.id, fleet_id = %fleet_id, phase = ?phase, "Retreat phase");
                    self.push_event(BattleEventKind::RetreatPhaseChanged { fleet_id, phase });
                }
                RetreatTransition::Completed(record) => self.complete_retreat(record),
                RetreatTransition::Failed(record) => {
                    if let Some(fleet) = self.fleets.get_mut(&record.fleet_id) {
                        fleet.retreating = false;
                    }
                    info!(
                        battle_id = %self.id,
                        fleet_id = %record.fleet_id,
                        losses = record.losses,
                        "Retreat failed, fleet lost in transit"
                    );
                    self.push_event(BattleEventKind::RetreatFailed {
                        fleet_id: record.fleet_id,
                        units_lost: record.losses,
                    });
                }
            }
        }
    }

    fn complete_retreat(&mut self, record: RetreatRecord) {
        let fleet_id = record.fleet_id;
        let destination = record
            .destination
            .or_else(|| self.auto_retreat_destination(&record));

        if let Some(fleet) = self.fleets.get_mut(&fleet_id) {
            fleet.withdrawn = true;
            fleet.retreating = false;
            fleet.target = None;
            fleet.orders.clear();
            fleet.kinematics.halt();
        }

        if let (Some(world), Some(cell)) = (&self.world, destination) {
            if let Err(err) = world.relocate_fleet(fleet_id, cell) {
                warn!(
                    battle_id = %self.id,
                    fleet_id = %fleet_id,
                    error = %err,
                    "Failed to relocate retreated fleet"
                );
            }
        }

        info!(
            battle_id = %self.id,
            fleet_id = %fleet_id,
            destination = ?destination,
            "Retreat completed"
        );
        self.push_event(BattleEventKind::RetreatCompleted {
            fleet_id,
            destination,
        });
    }

    fn auto_retreat_destination(&self, record: &RetreatRecord) -> Option<GridCoord> {
        let world = self.world.as_ref()?;
        let from = self
            .location
            .or_else(|| world.fleet_location(record.fleet_id))?;
        retreat_destination(world.as_ref(), from, record.faction)
    }

    fn step_reinforcements(&mut self) {
        for transition in self.reinforcements.advance(self.tick) {
            match transition {
                ReinforcementTransition::PhaseChanged { fleet_id, phase } => {
                    debug!(battle_id = %self.id, fleet_id = %fleet_id, phase = ?phase, "Reinforcement phase");
                }
                ReinforcementTransition::Arrived(record) => self.admit_reinforcement(record),
            }
        }
    }

    fn admit_reinforcement(&mut self, record: ReinforcementRecord) {
        let position = self.spawn_position(record.faction);
        let mut loadout = record.loadout;
        loadout.position = position;
        loadout.heading = heading_between(position, self.area.center());

        let fleet = FleetCombatState::from_loadout(&loadout, self.tick);
        let fleet_id = fleet.fleet_id;
        self.admit(fleet, true);

        if let (Some(world), Some(cell)) = (&self.world, self.location) {
            if let Err(err) = world.relocate_fleet(fleet_id, cell) {
                warn!(battle_id = %self.id, fleet_id = %fleet_id, error = %err, "Failed to move reinforcement on the grid");
            }
        }

        info!(battle_id = %self.id, fleet_id = %fleet_id, tick = self.tick, "Reinforcement arrived");
        self.push_event(BattleEventKind::ReinforcementArrived { fleet_id, position });
    }

    /// Entry point just inside the edge nearest the faction's fleets
    fn spawn_position(&self, faction: FactionId) -> Vec3 {
        let allies: Vec<Vec3> = self
            .fleets
            .values()
            .filter(|f| f.faction == faction && f.is_active())
            .map(|f| f.position())
            .collect();
        let anchor = if allies.is_empty() {
            self.area.center()
        } else {
            allies.iter().copied().sum::<Vec3>() / allies.len() as f32
        };

        let edge = self.area.nearest_edge_point(anchor);
        let inward = (self.area.center() - edge).truncate().normalize_or_zero().extend(0.0);
        let lateral = Vec3::new(-inward.y, inward.x, 0.0);
        let slot = self
            .fleets
            .values()
            .filter(|f| f.faction == faction && f.joined_tick == self.tick)
            .count() as f32;

        self.area
            .clamp(edge + inward * SPAWN_INSET + lateral * SPAWN_SPACING * slot)
    }

    fn step_supply(&mut self, fired: &BTreeSet<FleetId>) {
        if !self.config.features.supply {
            self.warn_disabled("supply");
            return;
        }
        let held = self.quarantine("supply");

        // Fleets with their target inside weapon range are busy fighting
        let engaged: BTreeSet<FleetId> = self
            .fleets
            .values()
            .filter(|f| f.is_active())
            .filter(|f| {
                f.target
                    .and_then(|t| self.fleets.get(&t))
                    .is_some_and(|t| f.distance_to(t) <= f.weapon.range)
            })
            .map(|f| f.fleet_id)
            .collect();

        let ids: Vec<FleetId> = self
            .fleets
            .values()
            .filter(|f| f.is_active())
            .map(|f| f.fleet_id)
            .collect();
        for fleet_id in ids {
            let busy = engaged.contains(&fleet_id) || fired.contains(&fleet_id);
            match self.supply_fleet(fleet_id, busy, fired.contains(&fleet_id)) {
                Ok(events) => {
                    for event in events {
                        self.push_event(event);
                    }
                }
                Err(err) => self.report_fleet_error("supply", &err),
            }
        }
        self.release(held);
    }

    /// One fleet's burn, repair and capability gating
    fn supply_fleet(
        &mut self,
        fleet_id: FleetId,
        busy: bool,
        fired: bool,
    ) -> Result<Vec<BattleEventKind>, FleetTickError> {
        let fleet = self
            .fleets
            .get_mut(&fleet_id)
            .ok_or(FleetTickError::Missing(fleet_id))?;
        if self.supply.get(&fleet_id).is_none() {
            return Err(FleetTickError::Untracked {
                fleet_id,
                what: "supply",
            });
        }

        let stationary = fleet.kinematics.speed <= STATIONARY_SPEED;
        let repairing = fleet.hp < 100.0
            && stationary
            && !busy
            && !fleet.retreating
            && self.supply.can_repair(&fleet_id);
        if repairing {
            fleet.hp = (fleet.hp + REPAIR_HP_PER_TICK).min(100.0);
        }

        let activity = FleetActivity {
            moving: !stationary,
            attacking: fired,
            repairing,
        };
        let events = self
            .supply
            .consume(&fleet_id, fleet.units, activity)
            .into_iter()
            .map(|change| match change {
                SupplyChange::Depleted(resource) => {
                    BattleEventKind::SupplyDepleted { fleet_id, resource }
                }
                SupplyChange::Restored(resource) => {
                    BattleEventKind::SupplyRestored { fleet_id, resource }
                }
            })
            .collect();

        // Capability gating
        if !self.supply.can_move(&fleet_id) {
            fleet.kinematics.halt();
        }
        if !self.supply.can_fire(&fleet_id) {
            fleet.target = None;
            fleet.orders.pursue = false;
        }
        Ok(events)
    }

    fn check_time_limits(&mut self) -> Option<EndCondition> {
        if !self.config.features.time_limit {
            self.warn_disabled("time_limit");
            return None;
        }

        let supply_on = self.config.features.supply;
        let (fleets, supply) = (&self.fleets, &self.supply);
        let check = self.time_limit.check(self.tick, || {
            supply_on
                && supply.all_out_of_fuel(
                    fleets
                        .values()
                        .filter(|f| f.is_active())
                        .map(|f| &f.fleet_id),
                )
        });

        match check.grace {
            Some(GraceChange::Started { ends_at }) => {
                info!(battle_id = %self.id, tick = self.tick, ends_at, "All fleets out of fuel, grace period started");
                self.push_event(BattleEventKind::SupplyGraceStarted { ends_at });
            }
            Some(GraceChange::Cleared) => {
                self.push_event(BattleEventKind::SupplyGraceCleared);
            }
            None => {}
        }

        let reason = check.end?;
        let winner = match reason {
            EndReason::Timeout => Self::strict_leader(self.force_by_faction()),
            EndReason::SupplyExhaustion => Self::strict_leader(self.supply_by_faction()),
            _ => None,
        };
        Some((reason, winner))
    }

    fn check_victory(&self) -> Option<EndCondition> {
        if self.fleets.is_empty() {
            return None;
        }
        let factions = self.active_factions();
        match factions.len() {
            0 => Some((EndReason::MutualDestruction, None)),
            1 => Some((EndReason::Victory, factions.first().copied())),
            _ => None,
        }
    }

    fn supply_by_faction(&self) -> BTreeMap<FactionId, f32> {
        let mut totals = BTreeMap::new();
        for fleet in self.fleets.values().filter(|f| f.is_active()) {
            let remaining = self.supply.get(&fleet.fleet_id).map_or(0.0, |s| s.total());
            *totals.entry(fleet.faction).or_insert(0.0) += remaining;
        }
        totals
    }

    /// Faction with strictly the highest total; ties are draws
    fn strict_leader(totals: BTreeMap<FactionId, f32>) -> Option<FactionId> {
        let mut ranked: Vec<(FactionId, f32)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        match ranked.as_slice() {
            [] => None,
            [(only, _)] => Some(*only),
            [(first, top), (_, second), ..] => (top > second).then_some(*first),
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    fn push_event(&mut self, kind: BattleEventKind) {
        self.events.push(kind.at(self.tick));
    }

    fn warn_disabled(&mut self, subsystem: &'static str) {
        if self.warned.insert(subsystem) {
            warn!(battle_id = %self.id, subsystem, "Subsystem unavailable, skipping");
        }
    }

    /// Build a snapshot and hand over the accumulated events
    pub fn publish(&mut self) -> BattleSnapshot {
        let events = std::mem::take(&mut self.events);
        self.build_snapshot(events)
    }

    fn build_snapshot(&self, events: Vec<BattleEvent>) -> BattleSnapshot {
        SnapshotBuilder::build(
            self.id,
            self.tick,
            self.status,
            &self.area,
            &self.fleets,
            &self.retreats,
            self.config.features.supply.then_some(&self.supply),
            events,
        )
    }

    /// Current state, including events not yet published
    pub fn snapshot(&self) -> BattleSnapshot {
        self.build_snapshot(self.events.clone())
    }

    /// Save now: every `persist_interval_ticks` and once ended
    pub fn should_persist(&self) -> bool {
        let interval = self.config.persist_interval_ticks;
        self.status == BattleStatus::Ended || (interval > 0 && self.tick % interval == 0)
    }

    pub fn record(&self) -> BattleRecord {
        BattleRecord {
            battle_id: self.id,
            status: self.status,
            tick: self.tick,
            tick_rate: self.config.tick_rate,
            max_ticks: self.config.max_ticks,
            area: self.area,
            rules: self.rules.clone(),
            location: self.location,
            seed: self.seed,
            participants: self.fleets.values().map(ParticipantRecord::from).collect(),
            result: self.result.clone(),
            saved_at: Utc::now(),
        }
    }
}
