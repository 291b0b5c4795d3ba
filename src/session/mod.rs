//! Session layer: the orchestrator behind every inbound battle operation

pub mod service;

pub use service::{
    BattleService, Collaborators, CreateBattle, HealthReport, JoinOutcome, LeaveOutcome, ServiceError,
    ServiceSettings,
};
