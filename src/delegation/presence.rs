//! Who is online right now

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::battle::types::CharacterId;

/// Online/offline per character
pub trait Presence: Send + Sync {
    fn is_online(&self, character: CharacterId) -> bool;
}

/// Presence fed by session connect/disconnect events
#[derive(Default)]
pub struct PresenceTracker {
    online: DashMap<CharacterId, DateTime<Utc>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a presence change. Returns false when nothing changed.
    pub fn set(&self, character: CharacterId, online: bool) -> bool {
        if online {
            if self.online.contains_key(&character) {
                return false;
            }
            self.online.insert(character, Utc::now());
            true
        } else {
            self.online.remove(&character).is_some()
        }
    }

    pub fn online_since(&self, character: &CharacterId) -> Option<DateTime<Utc>> {
        self.online.get(character).map(|t| *t)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

impl Presence for PresenceTracker {
    fn is_online(&self, character: CharacterId) -> bool {
        self.online.contains_key(&character)
    }
}
