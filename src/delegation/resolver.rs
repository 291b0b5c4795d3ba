//! Per-fleet delegation: who is issuing orders for each fleet

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::presence::Presence;
use crate::ai::{AiProfile, AiRoster, ProfileService};
use crate::battle::error::RejectReason;
use crate::battle::types::{BattleId, CharacterId, FactionId, FleetId};
use crate::world::{CommanderLookup, CommanderRecord};

const EVENT_CAPACITY: usize = 128;

/// Who currently controls a fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Player,
    Subordinate,
    Ai,
    /// Registered, not resolved yet
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegationState {
    pub battle_id: BattleId,
    pub fleet_id: FleetId,
    pub faction: FactionId,
    pub owner_id: Option<CharacterId>,
    pub commander_id: Option<CharacterId>,
    pub mode: ControlMode,
    /// Character issuing orders; `None` under AI
    pub delegate_id: Option<CharacterId>,
    pub ai_profile: Option<AiProfile>,
    pub registered_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

/// Fleet registration details
#[derive(Debug, Clone, Copy)]
pub struct DelegatedFleet {
    pub fleet_id: FleetId,
    pub faction: FactionId,
    pub owner_id: Option<CharacterId>,
    pub commander_id: Option<CharacterId>,
}

/// Published whenever a fleet changes hands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelegationEvent {
    Changed {
        battle_id: BattleId,
        fleet_id: FleetId,
        from: ControlMode,
        to: ControlMode,
        delegate_id: Option<CharacterId>,
    },
    BattleCleared {
        battle_id: BattleId,
        fleets: usize,
    },
}

/// Decides and tracks the delegate for every fleet in every battle
pub struct DelegationService {
    states: DashMap<(BattleId, FleetId), DelegationState>,
    presence: Arc<dyn Presence>,
    commanders: Arc<dyn CommanderLookup>,
    profiles: Arc<ProfileService>,
    auto_revert: bool,
    events: broadcast::Sender<DelegationEvent>,
}

impl DelegationService {
    pub fn new(
        presence: Arc<dyn Presence>,
        commanders: Arc<dyn CommanderLookup>,
        profiles: Arc<ProfileService>,
        auto_revert: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            states: DashMap::new(),
            presence,
            commanders,
            profiles,
            auto_revert,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DelegationEvent> {
        self.events.subscribe()
    }

    /// Track a fleet and resolve its first delegate
    pub fn register(&self, battle_id: BattleId, fleet: DelegatedFleet) -> DelegationState {
        let now = Utc::now();
        let mut state = DelegationState {
            battle_id,
            fleet_id: fleet.fleet_id,
            faction: fleet.faction,
            owner_id: fleet.owner_id,
            commander_id: fleet.commander_id,
            mode: ControlMode::Pending,
            delegate_id: None,
            ai_profile: None,
            registered_at: now,
            changed_at: now,
        };
        let choice = self.choose(&state);
        self.apply(&mut state, choice);
        self.states.insert((battle_id, fleet.fleet_id), state.clone());
        state
    }

    pub fn unregister(&self, battle_id: BattleId, fleet_id: FleetId) -> Option<DelegationState> {
        self.states.remove(&(battle_id, fleet_id)).map(|(_, s)| s)
    }

    pub fn state(&self, battle_id: BattleId, fleet_id: FleetId) -> Option<DelegationState> {
        self.states.get(&(battle_id, fleet_id)).map(|s| s.clone())
    }

    /// Whether `character` may currently order `fleet_id` around
    pub fn can_command(&self, battle_id: BattleId, fleet_id: FleetId, character: CharacterId) -> bool {
        self.states
            .get(&(battle_id, fleet_id))
            .is_some_and(|s| s.delegate_id == Some(character))
    }

    /// Re-run delegate selection for one fleet
    pub fn resolve(&self, battle_id: BattleId, fleet_id: FleetId) -> Option<ControlMode> {
        let mut entry = self.states.get_mut(&(battle_id, fleet_id))?;
        let choice = self.choose(&entry);
        self.apply(&mut entry, choice);
        Some(entry.mode)
    }

    /// React to a character coming online or going offline.
    /// Returns the fleets whose delegate changed.
    pub fn on_presence(&self, character: CharacterId, online: bool) -> Vec<(BattleId, FleetId)> {
        let keys: Vec<(BattleId, FleetId)> = self.states.iter().map(|e| *e.key()).collect();
        let mut changed = Vec::new();

        for key in keys {
            let Some(mut entry) = self.states.get_mut(&key) else {
                continue;
            };
            let before = (entry.mode, entry.delegate_id);

            let is_owner = entry.owner_id == Some(character);
            let choice = if online && is_owner {
                let stays_with_delegate = !self.auto_revert && entry.mode == ControlMode::Subordinate;
                if stays_with_delegate {
                    continue;
                }
                Choice::Player(character)
            } else if !online && entry.delegate_id == Some(character) {
                self.choose(&entry)
            } else if online && matches!(entry.mode, ControlMode::Ai | ControlMode::Pending) {
                // A capable subordinate may have just appeared
                self.choose(&entry)
            } else {
                continue;
            };

            self.apply(&mut entry, choice);
            if (entry.mode, entry.delegate_id) != before {
                changed.push(key);
            }
        }

        changed
    }

    /// Hand a fleet from its current delegate to another online character
    pub fn hand_off(
        &self,
        battle_id: BattleId,
        fleet_id: FleetId,
        requester: CharacterId,
        target: CharacterId,
    ) -> Result<DelegationState, RejectReason> {
        let mut entry = self
            .states
            .get_mut(&(battle_id, fleet_id))
            .ok_or(RejectReason::NoDelegation)?;

        if entry.delegate_id != Some(requester) {
            return Err(RejectReason::NotController);
        }
        if !self.presence.is_online(requester) || !self.presence.is_online(target) {
            return Err(RejectReason::TargetOffline);
        }

        let choice = if entry.owner_id == Some(target) {
            Choice::Player(target)
        } else {
            Choice::Subordinate(target)
        };
        self.apply(&mut entry, choice);
        Ok(entry.clone())
    }

    /// Drop every record of a battle
    pub fn remove_battle(&self, battle_id: BattleId) -> usize {
        let before = self.states.len();
        self.states.retain(|(b, _), _| *b != battle_id);
        let removed = before - self.states.len();
        if removed > 0 {
            info!(battle_id = %battle_id, fleets = removed, "Delegation cleared");
            let _ = self.events.send(DelegationEvent::BattleCleared {
                battle_id,
                fleets: removed,
            });
        }
        removed
    }

    /// Fleets of a battle, in no particular order
    pub fn battle_states(&self, battle_id: BattleId) -> Vec<DelegationState> {
        self.states
            .iter()
            .filter(|e| e.key().0 == battle_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn choose(&self, state: &DelegationState) -> Choice {
        if let Some(owner) = state.owner_id.filter(|o| self.presence.is_online(*o)) {
            return Choice::Player(owner);
        }
        match self.best_subordinate(state) {
            Some(sub) => Choice::Subordinate(sub.id),
            None => Choice::Ai,
        }
    }

    /// Online faction member with more command than the owner.
    /// Highest command wins, lower `sort_order` breaks ties.
    fn best_subordinate(&self, state: &DelegationState) -> Option<CommanderRecord> {
        let owner_command = state
            .owner_id
            .and_then(|o| self.commanders.commander(o))
            .map_or(0, |c| c.stats.command);

        self.commanders
            .faction_roster(state.faction)
            .into_iter()
            .filter(|c| Some(c.id) != state.owner_id)
            .filter(|c| c.stats.command > owner_command)
            .filter(|c| self.presence.is_online(c.id))
            .min_by(|a, b| {
                b.stats
                    .command
                    .cmp(&a.stats.command)
                    .then(a.sort_order.cmp(&b.sort_order))
            })
    }

    fn apply(&self, state: &mut DelegationState, choice: Choice) {
        let from = state.mode;
        let previous_delegate = state.delegate_id;

        match choice {
            Choice::Player(id) => {
                state.mode = ControlMode::Player;
                state.delegate_id = Some(id);
                state.ai_profile = None;
            }
            Choice::Subordinate(id) => {
                state.mode = ControlMode::Subordinate;
                state.delegate_id = Some(id);
                state.ai_profile = None;
            }
            Choice::Ai => {
                if from != ControlMode::Ai {
                    let commander = state.commander_id.or(state.owner_id);
                    state.ai_profile = Some(self.profiles.profile_for(commander));
                }
                state.mode = ControlMode::Ai;
                state.delegate_id = None;
            }
        }

        if from == state.mode && previous_delegate == state.delegate_id {
            return;
        }
        state.changed_at = Utc::now();
        debug!(
            battle_id = %state.battle_id,
            fleet_id = %state.fleet_id,
            from = ?from,
            to = ?state.mode,
            "Delegation changed"
        );
        let _ = self.events.send(DelegationEvent::Changed {
            battle_id: state.battle_id,
            fleet_id: state.fleet_id,
            from,
            to: state.mode,
            delegate_id: state.delegate_id,
        });
    }
}

impl AiRoster for DelegationService {
    fn ai_profile(&self, battle_id: BattleId, fleet_id: FleetId) -> Option<AiProfile> {
        let state = self.states.get(&(battle_id, fleet_id))?;
        match state.mode {
            ControlMode::Ai => state.ai_profile.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Choice {
    Player(CharacterId),
    Subordinate(CharacterId),
    Ai,
}
