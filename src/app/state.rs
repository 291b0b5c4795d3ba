//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::session::{BattleService, Collaborators};
use crate::store::{BattleStore, InMemoryBattleStore, RestBattleStore};
use crate::world::{InMemoryWorld, WorldError};

/// Grid used when no world seed is configured
const DEFAULT_WORLD_SIZE: i32 = 16;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub battles: Arc<BattleService>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, WorldError> {
        let config = Arc::new(config);

        // Initialize world collaborators
        let world = match &config.world_seed {
            Some(path) => InMemoryWorld::from_seed(path)?,
            None => InMemoryWorld::new(DEFAULT_WORLD_SIZE, DEFAULT_WORLD_SIZE),
        };

        // Initialize battle store
        let store: Arc<dyn BattleStore> = match (&config.store_url, &config.store_api_key) {
            (Some(url), Some(key)) => {
                info!(url = %url, "Persisting battles to REST store");
                Arc::new(RestBattleStore::new(url.as_str(), key.as_str()))
            }
            _ => {
                info!("Persisting battles in memory");
                Arc::new(InMemoryBattleStore::new())
            }
        };

        let collaborators = Collaborators::in_memory(Arc::new(world), store);
        let battles = Arc::new(BattleService::new(collaborators, config.service_settings()));

        Ok(Self::from_parts(config, battles))
    }

    /// State around an already built service
    pub fn from_parts(config: Arc<Config>, battles: Arc<BattleService>) -> Self {
        Self { config, battles }
    }
}
