//! Battle persistence
//!
//! The runner saves a `BattleRecord` every few ticks and once at the end.
//! Saves never block the tick; failures are logged and the next save point
//! retries.

pub mod memory;
pub mod rest;

pub use memory::InMemoryBattleStore;
pub use rest::RestBattleStore;

use futures::future::BoxFuture;

use crate::battle::result::BattleRecord;
use crate::battle::types::BattleId;

/// Where battle records go
pub trait BattleStore: Send + Sync {
    /// Insert or replace the record for its battle
    fn save<'a>(&'a self, record: &'a BattleRecord) -> BoxFuture<'a, Result<(), StoreError>>;

    fn load(&self, battle_id: BattleId) -> BoxFuture<'_, Result<Option<BattleRecord>, StoreError>>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}
