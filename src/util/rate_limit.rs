//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::battle::types::FleetId;

/// Rate limiter keyed by fleet
pub type FleetLimiter = RateLimiter<FleetId, DefaultKeyedStateStore<FleetId>, DefaultClock>;

/// Default player commands per fleet per second
pub const COMMAND_RATE_LIMIT: u32 = 20;

/// Create a per-fleet limiter with the specified requests per second
pub fn create_fleet_limiter(requests_per_second: u32) -> Arc<FleetLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::keyed(quota))
}

/// Per-fleet command limiter shared by every battle
#[derive(Clone)]
pub struct CommandRateLimiter {
    limiter: Arc<FleetLimiter>,
}

impl CommandRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            limiter: create_fleet_limiter(requests_per_second),
        }
    }

    /// Check if a command for this fleet is allowed (returns true if allowed)
    pub fn check(&self, fleet_id: &FleetId) -> bool {
        self.limiter.check_key(fleet_id).is_ok()
    }

    /// Forget fleets whose buckets have refilled
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }
}

impl Default for CommandRateLimiter {
    fn default() -> Self {
        Self::new(COMMAND_RATE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_capped_per_fleet() {
        let limiter = CommandRateLimiter::new(3);
        let busy = FleetId::new();
        let quiet = FleetId::new();

        let allowed = (0..10).filter(|_| limiter.check(&busy)).count();
        assert_eq!(allowed, 3);
        assert!(limiter.check(&quiet));
    }
}
