//! In-memory battle store for tests and store-less deployments

use std::collections::HashMap;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;

use super::{BattleStore, StoreError};
use crate::battle::result::BattleRecord;
use crate::battle::types::BattleId;

#[derive(Default)]
pub struct InMemoryBattleStore {
    records: RwLock<HashMap<BattleId, BattleRecord>>,
    saves: RwLock<HashMap<BattleId, usize>>,
}

impl InMemoryBattleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a battle has been saved
    pub fn save_count(&self, battle_id: &BattleId) -> usize {
        self.saves.read().get(battle_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl BattleStore for InMemoryBattleStore {
    fn save<'a>(&'a self, record: &'a BattleRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut records = self.records.write();
        let newer = records
            .get(&record.battle_id)
            .map_or(true, |existing| record.supersedes(existing));
        if newer {
            records.insert(record.battle_id, record.clone());
        }
        *self.saves.write().entry(record.battle_id).or_insert(0) += 1;
        future::ready(Ok(())).boxed()
    }

    fn load(&self, battle_id: BattleId) -> BoxFuture<'_, Result<Option<BattleRecord>, StoreError>> {
        let record = self.records.read().get(&battle_id).cloned();
        future::ready(Ok(record)).boxed()
    }
}
