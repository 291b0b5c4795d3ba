//! AI for fleets whose owner is away
//!
//! `profile` turns commander stats into behaviour numbers, `situation` reads
//! the battlefield, `strategy` turns both into one order and `engine` runs
//! that per tick behind the battle's `AiController` seam.

pub mod cache;
pub mod engine;
pub mod profile;
pub mod situation;
pub mod strategy;

pub use crate::battle::controller::{AiController, BattleView};
pub use cache::ProfileService;
pub use engine::AiDecisionEngine;
pub use profile::{AiProfile, AiProfileBuilder, AiStrategy, Difficulty, SituationalFactors, TargetPriority};
pub use situation::{Outlook, Situation};
pub use strategy::Decision;

use dashmap::DashMap;

use crate::battle::types::{BattleId, FleetId};

/// Which fleets of a battle the AI drives, and with what profile
pub trait AiRoster: Send + Sync {
    /// `None` when someone else controls the fleet
    fn ai_profile(&self, battle_id: BattleId, fleet_id: FleetId) -> Option<AiProfile>;
}

/// Roster with a fixed profile per fleet, whatever the battle
#[derive(Default)]
pub struct FixedRoster {
    profiles: DashMap<FleetId, AiProfile>,
}

impl FixedRoster {
    pub fn assign(&self, fleet_id: FleetId, profile: AiProfile) {
        self.profiles.insert(fleet_id, profile);
    }
}

impl AiRoster for FixedRoster {
    fn ai_profile(&self, _battle_id: BattleId, fleet_id: FleetId) -> Option<AiProfile> {
        self.profiles.get(&fleet_id).map(|p| p.clone())
    }
}
