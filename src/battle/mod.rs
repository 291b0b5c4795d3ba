//! Battle simulation core
//!
//! Leaves first: `vector` and `physics` for kinematics, `combat`, `supply`,
//! `time_limit`, `retreat` and `reinforcement` for the per-tick subsystems,
//! `engine` for the ordered tick itself and `runner` for pacing it.

pub mod combat;
pub mod command;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod fleet;
pub mod physics;
pub mod reinforcement;
pub mod result;
pub mod retreat;
pub mod runner;
pub mod snapshot;
pub mod supply;
pub mod time_limit;
pub mod types;
pub mod vector;

pub use command::{BattleCommand, CommandKind, CommandPayload, CommandSource};
pub use controller::{AiController, BattleView};
pub use engine::{BattleEngine, BattleSetup};
pub use error::{BattleError, RejectReason};
pub use events::{BattleEvent, BattleEventKind};
pub use fleet::{FleetCombatState, FleetLoadout};
pub use result::{BattleRecord, BattleResult, EndReason};
pub use runner::{BattleHandle, BattleInput, BattleMessage, BattleRegistry, BattleRunner};
pub use snapshot::{BattleDelta, BattleSnapshot, SnapshotBuilder};
pub use types::{BattleArea, BattleConfig, BattleId, BattleRules, BattleStatus, CharacterId, FactionId, FleetId};
