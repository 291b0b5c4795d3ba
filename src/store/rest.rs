//! PostgREST battle store using a service key

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BattleStore, StoreError};
use crate::battle::result::BattleRecord;
use crate::battle::types::{BattleId, BattleStatus};

const BATTLES_TABLE: &str = "battles";

/// Row layout of the `battles` table
#[derive(Debug, Serialize)]
struct BattleRow<'a> {
    battle_id: BattleId,
    status: BattleStatus,
    tick: u64,
    record: &'a BattleRecord,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RecordColumn {
    record: BattleRecord,
}

/// Upserts battle records into a PostgREST `battles` table.
/// The service key bypasses row-level security, keep it server-side.
#[derive(Clone)]
pub struct RestBattleStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestBattleStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn upsert(&self, record: &BattleRecord) -> Result<(), StoreError> {
        let url = format!("{}?on_conflict=battle_id", self.rest_url(BATTLES_TABLE));
        let row = BattleRow {
            battle_id: record.battle_id,
            status: record.status,
            tick: record.tick,
            record,
            saved_at: record.saved_at,
        };

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn fetch(&self, battle_id: BattleId) -> Result<Option<BattleRecord>, StoreError> {
        let url = format!(
            "{}?battle_id=eq.{}&select=record",
            self.rest_url(BATTLES_TABLE),
            battle_id
        );

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let column: RecordColumn = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(Some(column.record))
    }
}

impl BattleStore for RestBattleStore {
    fn save<'a>(&'a self, record: &'a BattleRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        self.upsert(record).boxed()
    }

    fn load(&self, battle_id: BattleId) -> BoxFuture<'_, Result<Option<BattleRecord>, StoreError>> {
        self.fetch(battle_id).boxed()
    }
}
