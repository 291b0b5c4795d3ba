//! Battle service - creates battles and routes every inbound operation
//!
//! Holds the cross-battle services (registry, delegation, presence, AI
//! profiles, rate limiting) and the world collaborators. Each battle is a
//! spawned `BattleRunner`; this service only ever talks to it through its
//! `BattleHandle`.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::ai::{AiDecisionEngine, ProfileService};
use crate::battle::command::{BattleCommand, CommandKind, CommandPayload, CommandSource};
use crate::battle::engine::{BattleEngine, BattleSetup};
use crate::battle::error::{BattleError, RejectReason};
use crate::battle::fleet::FleetLoadout;
use crate::battle::reinforcement::ReinforcementPriority;
use crate::battle::result::{BattleRecord, BattleResult};
use crate::battle::runner::{BattleHandle, BattleMessage, BattleRegistry, BattleRunner};
use crate::battle::snapshot::BattleSnapshot;
use crate::battle::supply::{SupplyState, SupplyTopUp};
use crate::battle::types::{
    BattleArea, BattleConfig, BattleId, BattleRules, BattleStatus, CharacterId, CommandId, FleetId,
};
use crate::delegation::{DelegatedFleet, DelegationService, DelegationState, PresenceTracker};
use crate::store::{BattleStore, StoreError};
use crate::util::rate_limit::{CommandRateLimiter, COMMAND_RATE_LIMIT};
use crate::util::time::{is_valid_tick_rate, uptime_secs};
use crate::world::{CommanderLookup, FleetLoader, GridCoord, InMemoryWorld, WorldError, WorldGrid};

/// World-side collaborators the service is built on
#[derive(Clone)]
pub struct Collaborators {
    pub fleets: Arc<dyn FleetLoader>,
    pub commanders: Arc<dyn CommanderLookup>,
    pub world: Arc<dyn WorldGrid>,
    pub store: Arc<dyn BattleStore>,
}

impl Collaborators {
    /// Every collaborator backed by one in-memory world
    pub fn in_memory(world: Arc<InMemoryWorld>, store: Arc<dyn BattleStore>) -> Self {
        Self {
            fleets: world.clone(),
            commanders: world.clone(),
            world,
            store,
        }
    }
}

/// Process-wide service settings
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Defaults for new battles
    pub battle: BattleConfig,
    pub auto_revert_on_owner_online: bool,
    pub profile_cache_ttl: Duration,
    /// Player commands per fleet per second
    pub command_rate_limit: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            battle: BattleConfig::default(),
            auto_revert_on_owner_online: true,
            profile_cache_ttl: Duration::from_secs(300),
            command_rate_limit: COMMAND_RATE_LIMIT,
        }
    }
}

/// Request to open a battle
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateBattle {
    pub fleets: Vec<FleetId>,
    /// Width, height and depth of the battle volume
    pub area_size: Option<Vec3>,
    pub tick_rate: Option<u32>,
    pub max_ticks: Option<u64>,
    pub rules: BattleRules,
    /// World cell; defaults to where the first fleet sits
    pub location: Option<GridCoord>,
    pub seed: Option<u64>,
}

/// What joining did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined,
    Reinforcing { arrival_tick: u64 },
}

/// What leaving did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeaveOutcome {
    Left,
    Retreating { completes_at: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub uptime_secs: u64,
    pub active_battles: usize,
    pub total_participants: usize,
    pub online_characters: usize,
    pub delegated_fleets: usize,
    pub cached_profiles: usize,
}

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("battle {0} not found")]
    UnknownBattle(BattleId),

    #[error(transparent)]
    Battle(#[from] BattleError),

    #[error("{0}")]
    Rejected(#[from] RejectReason),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Stable code sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::UnknownBattle(_) => "unknown_battle",
            ServiceError::Battle(BattleError::InvalidTickRate(_)) => "invalid_tick_rate",
            ServiceError::Battle(BattleError::NotEnoughParticipants { .. }) => "not_enough_participants",
            ServiceError::Battle(BattleError::SingleFaction) => "single_faction",
            ServiceError::Battle(BattleError::InvalidTransition { .. }) => "invalid_transition",
            ServiceError::Rejected(reason) => reason.code(),
            ServiceError::World(WorldError::UnknownFleet(_)) => "unknown_fleet",
            ServiceError::World(_) => "world_error",
            ServiceError::Store(_) => "store_error",
        }
    }
}

/// Orchestrates battles for the transport layer
pub struct BattleService {
    registry: Arc<BattleRegistry>,
    delegation: Arc<DelegationService>,
    presence: Arc<PresenceTracker>,
    profiles: Arc<ProfileService>,
    limiter: CommandRateLimiter,
    collaborators: Collaborators,
    defaults: BattleConfig,
}

impl BattleService {
    pub fn new(collaborators: Collaborators, settings: ServiceSettings) -> Self {
        let presence = Arc::new(PresenceTracker::new());
        let profiles = Arc::new(ProfileService::new(
            collaborators.commanders.clone(),
            settings.profile_cache_ttl,
        ));
        let delegation = Arc::new(DelegationService::new(
            presence.clone(),
            collaborators.commanders.clone(),
            profiles.clone(),
            settings.auto_revert_on_owner_online,
        ));

        Self {
            registry: Arc::new(BattleRegistry::new()),
            delegation,
            presence,
            profiles,
            limiter: CommandRateLimiter::new(settings.command_rate_limit),
            collaborators,
            defaults: settings.battle,
        }
    }

    pub fn registry(&self) -> &Arc<BattleRegistry> {
        &self.registry
    }

    pub fn delegation(&self) -> &Arc<DelegationService> {
        &self.delegation
    }

    fn handle(&self, battle_id: BattleId) -> Result<BattleHandle, ServiceError> {
        self.registry
            .get(&battle_id)
            .ok_or(ServiceError::UnknownBattle(battle_id))
    }

    fn load_fleet(&self, fleet_id: FleetId) -> Result<FleetLoadout, ServiceError> {
        Ok(self.collaborators.fleets.load_fleet(fleet_id)?)
    }

    /// Load every fleet, build the engine and spawn its loop.
    /// Any failure before the spawn leaves nothing behind.
    pub fn create_battle(&self, request: CreateBattle) -> Result<BattleId, ServiceError> {
        let mut config = self.defaults.clone();
        if let Some(rate) = request.tick_rate {
            config.tick_rate = rate;
        }
        if let Some(max_ticks) = request.max_ticks {
            config.max_ticks = max_ticks;
        }
        if !is_valid_tick_rate(config.tick_rate) {
            return Err(BattleError::InvalidTickRate(config.tick_rate).into());
        }
        if request.fleets.len() < request.rules.min_participants {
            return Err(BattleError::NotEnoughParticipants {
                required: request.rules.min_participants,
                actual: request.fleets.len(),
            }
            .into());
        }

        let loadouts = request
            .fleets
            .iter()
            .map(|id| self.load_fleet(*id))
            .collect::<Result<Vec<_>, _>>()?;

        let location = request.location.or_else(|| {
            request
                .fleets
                .first()
                .and_then(|id| self.collaborators.world.fleet_location(*id))
        });
        let area = request
            .area_size
            .map(|size| BattleArea::new(size.x, size.y, size.z))
            .unwrap_or_default();

        let battle_id = BattleId::new();
        let setup = BattleSetup {
            config,
            rules: request.rules,
            area,
            location,
            seed: request.seed.unwrap_or_else(rand::random),
        };
        let ai = AiDecisionEngine::new(self.delegation.clone());
        let mut engine = BattleEngine::new(battle_id, setup)?
            .with_ai(Box::new(ai))
            .with_world(self.collaborators.world.clone());

        for loadout in &loadouts {
            engine.add_participant(loadout.clone())?;
        }
        for loadout in &loadouts {
            self.delegation.register(battle_id, delegated(loadout));
        }

        self.spawn(engine);
        info!(battle_id = %battle_id, fleets = loadouts.len(), location = ?location, "Battle created");
        Ok(battle_id)
    }

    fn spawn(&self, engine: BattleEngine) {
        let battle_id = engine.id();
        let (runner, handle) = BattleRunner::new(engine, self.collaborators.store.clone());
        self.registry.insert(handle);

        let registry = self.registry.clone();
        let delegation = self.delegation.clone();
        tokio::spawn(async move {
            let result = runner.run().await;
            registry.remove(&battle_id);
            delegation.remove_battle(battle_id);
            info!(
                battle_id = %battle_id,
                winner = ?result.winner,
                reason = ?result.reason,
                "Battle closed"
            );
        });
    }

    /// Before the start the fleet joins directly, afterwards it reinforces
    pub async fn join_battle(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        priority: ReinforcementPriority,
    ) -> Result<JoinOutcome, ServiceError> {
        let handle = self.handle(battle_id)?;
        let loadout = self.load_fleet(fleet_id)?;
        let fleet = delegated(&loadout);

        let outcome = match handle.status() {
            BattleStatus::Preparing => {
                handle.join(loadout).await?;
                JoinOutcome::Joined
            }
            BattleStatus::Active | BattleStatus::Paused => {
                let arrival_tick = handle.reinforce(loadout, priority).await?;
                JoinOutcome::Reinforcing { arrival_tick }
            }
            BattleStatus::Ended => return Err(RejectReason::BattleEnded.into()),
        };
        self.delegation.register(battle_id, fleet);
        Ok(outcome)
    }

    /// Before the start the fleet just leaves, afterwards it must retreat
    pub async fn leave_battle(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
    ) -> Result<LeaveOutcome, ServiceError> {
        let handle = self.handle(battle_id)?;
        match handle.status() {
            BattleStatus::Preparing => {
                handle.leave(fleet_id).await?;
                self.delegation.unregister(battle_id, fleet_id);
                Ok(LeaveOutcome::Left)
            }
            BattleStatus::Active | BattleStatus::Paused => {
                let completes_at = handle.retreat(fleet_id, None).await?;
                Ok(LeaveOutcome::Retreating { completes_at })
            }
            BattleStatus::Ended => Err(RejectReason::BattleEnded.into()),
        }
    }

    /// Validate and queue a command; it is applied on the next tick.
    /// `issuer` is checked against the fleet's current delegate.
    pub fn queue_command(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        kind: CommandKind,
        payload: CommandPayload,
        issuer: Option<CharacterId>,
    ) -> Result<CommandId, ServiceError> {
        let handle = self.handle(battle_id)?;
        let snapshot = handle.latest();
        match snapshot.status {
            BattleStatus::Active | BattleStatus::Paused => {}
            BattleStatus::Ended => return Err(RejectReason::BattleEnded.into()),
            BattleStatus::Preparing => return Err(RejectReason::BattleNotActive.into()),
        }

        let fleet = snapshot.fleet(&fleet_id).ok_or(RejectReason::UnknownFleet)?;
        if fleet.defeated {
            return Err(RejectReason::FleetDefeated.into());
        }
        if fleet.withdrawn {
            return Err(RejectReason::FleetWithdrawn.into());
        }

        let source = match issuer {
            Some(character) => {
                let state = self
                    .delegation
                    .state(battle_id, fleet_id)
                    .ok_or(RejectReason::NoDelegation)?;
                if state.delegate_id != Some(character) {
                    return Err(RejectReason::NotController.into());
                }
                CommandSource::Player(character)
            }
            None => CommandSource::System,
        };

        let command = BattleCommand::new(fleet_id, kind, payload, source);
        command.validate()?;
        if !self.limiter.check(&fleet_id) {
            return Err(RejectReason::RateLimited.into());
        }

        let id = command.id;
        handle.queue(command)?;
        Ok(id)
    }

    pub async fn start(&self, battle_id: BattleId) -> Result<bool, ServiceError> {
        Ok(self.handle(battle_id)?.start().await??)
    }

    pub async fn pause(&self, battle_id: BattleId) -> Result<bool, ServiceError> {
        Ok(self.handle(battle_id)?.pause().await??)
    }

    pub async fn resume(&self, battle_id: BattleId) -> Result<bool, ServiceError> {
        Ok(self.handle(battle_id)?.resume().await??)
    }

    /// Stop the battle and wait for its final result
    pub async fn stop(&self, battle_id: BattleId) -> Result<BattleResult, ServiceError> {
        Ok(self.handle(battle_id)?.stop().await?)
    }

    /// Latest published state of a running battle
    pub fn get_state(&self, battle_id: BattleId) -> Result<Arc<BattleSnapshot>, ServiceError> {
        Ok(self.handle(battle_id)?.latest())
    }

    /// Saved record, for battles that may have closed already
    pub async fn battle_record(&self, battle_id: BattleId) -> Result<Option<BattleRecord>, ServiceError> {
        Ok(self.collaborators.store.load(battle_id).await?)
    }

    pub fn subscribe(&self, battle_id: BattleId) -> Result<broadcast::Receiver<BattleMessage>, ServiceError> {
        Ok(self.handle(battle_id)?.subscribe())
    }

    pub async fn request_retreat(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        destination: Option<GridCoord>,
    ) -> Result<u64, ServiceError> {
        Ok(self.handle(battle_id)?.retreat(fleet_id, destination).await?)
    }

    pub async fn cancel_retreat(&self, battle_id: BattleId, fleet_id: FleetId) -> Result<(), ServiceError> {
        Ok(self.handle(battle_id)?.cancel_retreat(fleet_id).await?)
    }

    pub async fn request_reinforcement(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        priority: ReinforcementPriority,
    ) -> Result<u64, ServiceError> {
        let handle = self.handle(battle_id)?;
        let loadout = self.load_fleet(fleet_id)?;
        let fleet = delegated(&loadout);
        let arrival_tick = handle.reinforce(loadout, priority).await?;
        self.delegation.register(battle_id, fleet);
        Ok(arrival_tick)
    }

    pub async fn resupply(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        top_up: SupplyTopUp,
    ) -> Result<SupplyState, ServiceError> {
        Ok(self.handle(battle_id)?.resupply(fleet_id, top_up).await?)
    }

    /// Record a presence change and re-resolve affected fleets
    pub fn set_presence(&self, character: CharacterId, online: bool) -> Vec<(BattleId, FleetId)> {
        if !self.presence.set(character, online) {
            return Vec::new();
        }
        let changed = self.delegation.on_presence(character, online);
        if !changed.is_empty() {
            info!(character = %character, online, fleets = changed.len(), "Delegation updated");
        }
        changed
    }

    pub fn hand_off(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        requester: CharacterId,
        target: CharacterId,
    ) -> Result<DelegationState, ServiceError> {
        self.handle(battle_id)?;
        self.delegation
            .hand_off(battle_id, fleet_id, requester, target)
            .map_err(|reason| {
                warn!(battle_id = %battle_id, fleet_id = %fleet_id, reason = reason.code(), "Hand-off rejected");
                reason.into()
            })
    }

    pub fn health(&self) -> HealthReport {
        self.limiter.prune();
        self.profiles.clear_expired();
        HealthReport {
            uptime_secs: uptime_secs(),
            active_battles: self.registry.active_battles(),
            total_participants: self.registry.total_participants(),
            online_characters: self.presence.online_count(),
            delegated_fleets: self.delegation.len(),
            cached_profiles: self.profiles.len(),
        }
    }
}

fn delegated(loadout: &FleetLoadout) -> DelegatedFleet {
    DelegatedFleet {
        fleet_id: loadout.fleet_id,
        faction: loadout.faction,
        owner_id: loadout.owner_id,
        commander_id: loadout.commander_id,
    }
}
