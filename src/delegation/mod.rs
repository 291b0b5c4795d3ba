//! Fleet delegation while owners are away

pub mod presence;
pub mod resolver;

pub use presence::{Presence, PresenceTracker};
pub use resolver::{ControlMode, DelegatedFleet, DelegationEvent, DelegationService, DelegationState};
