//! Battle errors and machine-readable rejection reasons

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{BattleStatus, FleetId};

/// Why a request against a battle was turned down.
///
/// Rejections are verdicts, not failures: they are returned to the caller
/// and recorded as events, never raised out of the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("fleet is not part of this battle")]
    UnknownFleet,
    #[error("target fleet is not part of this battle")]
    UnknownTarget,
    #[error("battle is not active")]
    BattleNotActive,
    #[error("battle has already ended")]
    BattleEnded,
    #[error("battle has already started")]
    BattleStarted,
    #[error("command payload is missing or invalid")]
    MalformedCommand,
    #[error("fleet has been defeated")]
    FleetDefeated,
    #[error("fleet has left the battle")]
    FleetWithdrawn,
    #[error("friendly fire is disabled")]
    FriendlyTarget,
    #[error("command was not processed in time")]
    StaleCommand,
    #[error("faction unit cap would be exceeded")]
    CapacityExceeded,
    #[error("too many transitions are already queued")]
    QueueFull,
    #[error("fleet already has a transition in flight")]
    TransitionInFlight,
    #[error("retreat can only be cancelled while charging")]
    NotCancellable,
    #[error("fleet is not retreating")]
    NotRetreating,
    #[error("retreat is not allowed in this battle")]
    RetreatNotAllowed,
    #[error("fleet is too far from the battle")]
    NotAdjacent,
    #[error("fleet is already participating")]
    AlreadyParticipating,
    #[error("requester does not control this fleet")]
    NotController,
    #[error("hand-off target is offline")]
    TargetOffline,
    #[error("fleet has no delegation record")]
    NoDelegation,
    #[error("too many commands, slow down")]
    RateLimited,
}

impl RejectReason {
    /// Stable code sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::UnknownFleet => "unknown_fleet",
            RejectReason::UnknownTarget => "unknown_target",
            RejectReason::BattleNotActive => "battle_not_active",
            RejectReason::BattleEnded => "battle_ended",
            RejectReason::BattleStarted => "battle_started",
            RejectReason::MalformedCommand => "malformed_command",
            RejectReason::FleetDefeated => "fleet_defeated",
            RejectReason::FleetWithdrawn => "fleet_withdrawn",
            RejectReason::FriendlyTarget => "friendly_target",
            RejectReason::StaleCommand => "stale_command",
            RejectReason::CapacityExceeded => "capacity_exceeded",
            RejectReason::QueueFull => "queue_full",
            RejectReason::TransitionInFlight => "transition_in_flight",
            RejectReason::NotCancellable => "not_cancellable",
            RejectReason::NotRetreating => "not_retreating",
            RejectReason::RetreatNotAllowed => "retreat_not_allowed",
            RejectReason::NotAdjacent => "not_adjacent",
            RejectReason::AlreadyParticipating => "already_participating",
            RejectReason::NotController => "not_controller",
            RejectReason::TargetOffline => "target_offline",
            RejectReason::NoDelegation => "no_delegation",
            RejectReason::RateLimited => "rate_limited",
        }
    }
}

/// Errors from battle construction and lifecycle transitions
#[derive(Debug, Error)]
pub enum BattleError {
    #[error("tick rate {0} is outside the supported range")]
    InvalidTickRate(u32),

    #[error("battle needs at least {required} participants, has {actual}")]
    NotEnoughParticipants { required: usize, actual: usize },

    #[error("battle needs fleets from at least two factions")]
    SingleFaction,

    #[error("cannot {action} a battle that is {status:?}")]
    InvalidTransition {
        action: &'static str,
        status: BattleStatus,
    },
}

/// Failure while processing a single fleet inside a tick.
///
/// The engine logs these and moves on to the next fleet.
#[derive(Debug, Error)]
pub enum FleetTickError {
    #[error("fleet {fleet_id} produced a non-finite {field}")]
    NonFinite {
        fleet_id: FleetId,
        field: &'static str,
    },

    #[error("fleet {0} vanished mid-tick")]
    Missing(FleetId),

    #[error("fleet {fleet_id} has no {what} record")]
    Untracked {
        fleet_id: FleetId,
        what: &'static str,
    },
}

impl FleetTickError {
    pub fn fleet_id(&self) -> FleetId {
        match self {
            Self::NonFinite { fleet_id, .. } | Self::Untracked { fleet_id, .. } => *fleet_id,
            Self::Missing(fleet_id) => *fleet_id,
        }
    }
}
