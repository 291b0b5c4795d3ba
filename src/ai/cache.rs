//! Cached AI profiles keyed by commander

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::profile::{AiProfile, AiProfileBuilder};
use crate::battle::types::CharacterId;
use crate::world::CommanderLookup;

pub const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(300);

/// Builds profiles from commander stats and keeps them for `ttl`
pub struct ProfileService {
    lookup: Arc<dyn CommanderLookup>,
    ttl: Duration,
    cache: DashMap<CharacterId, (AiProfile, Instant)>,
}

impl ProfileService {
    pub fn new(lookup: Arc<dyn CommanderLookup>, ttl: Duration) -> Self {
        Self {
            lookup,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Profile for a commander, or the neutral profile when there is none
    pub fn profile_for(&self, commander_id: Option<CharacterId>) -> AiProfile {
        let Some(id) = commander_id else {
            return AiProfile::default();
        };

        if let Some(entry) = self.cache.get(&id) {
            let (profile, built_at) = entry.value();
            if built_at.elapsed() < self.ttl {
                return profile.clone();
            }
        }

        self.refresh(id)
    }

    /// Rebuild a commander's profile regardless of cache age
    pub fn refresh(&self, commander_id: CharacterId) -> AiProfile {
        match self.lookup.commander(commander_id) {
            Some(record) => {
                let profile = AiProfileBuilder::for_commander(commander_id, &record.stats);
                debug!(
                    commander = %commander_id,
                    strategy = ?profile.strategy,
                    "Built AI profile"
                );
                self.cache
                    .insert(commander_id, (profile.clone(), Instant::now()));
                profile
            }
            None => {
                self.cache.remove(&commander_id);
                AiProfile::default()
            }
        }
    }

    pub fn invalidate(&self, commander_id: &CharacterId) {
        self.cache.remove(commander_id);
    }

    /// Drop stale entries, returns how many went
    pub fn clear_expired(&self) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, (_, built_at)| built_at.elapsed() < self.ttl);
        before - self.cache.len()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::profile::AiStrategy;
    use crate::battle::types::FactionId;
    use crate::world::{CommanderRecord, CommanderStats, InMemoryWorld};

    fn world_with(stats: CommanderStats) -> (Arc<InMemoryWorld>, CharacterId) {
        let world = Arc::new(InMemoryWorld::new(3, 3));
        let id = CharacterId::new();
        world.insert_commander(CommanderRecord {
            id,
            name: "Reuenthal".into(),
            faction: FactionId(1),
            stats,
            sort_order: 0,
        });
        (world, id)
    }

    #[test]
    fn unknown_or_missing_commander_is_neutral() {
        let (world, _) = world_with(CommanderStats::default());
        let service = ProfileService::new(world, DEFAULT_PROFILE_TTL);
        assert_eq!(service.profile_for(None), AiProfile::default());
        assert_eq!(service.profile_for(Some(CharacterId::new())), AiProfile::default());
        assert!(service.is_empty());
    }

    #[test]
    fn profiles_are_cached_until_invalidated() {
        let (world, id) = world_with(CommanderStats::new(90, 95, 40, 30, 40));
        let service = ProfileService::new(world, DEFAULT_PROFILE_TTL);

        let profile = service.profile_for(Some(id));
        assert_eq!(profile.commander_id, Some(id));
        assert_eq!(profile.strategy, AiStrategy::Aggressive);
        assert_eq!(service.len(), 1);

        service.invalidate(&id);
        assert!(service.is_empty());
    }

    #[test]
    fn zero_ttl_expires_everything() {
        let (world, id) = world_with(CommanderStats::default());
        let service = ProfileService::new(world, Duration::ZERO);
        service.refresh(id);
        assert_eq!(service.len(), 1);
        assert_eq!(service.clear_expired(), 1);
        assert!(service.is_empty());
    }
}
