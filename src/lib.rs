//! Fleet Battle Server - authoritative real-time fleet combat simulation
//!
//! Each battle runs as its own fixed-rate tick loop that owns every fleet's
//! combat state. The crate is organised by concern:
//! - `battle`: vector math, kinematics, combat, supply, end conditions,
//!   retreat/reinforcement state machines and the tick engine itself
//! - `ai`: commander-derived behaviour profiles and the decision engine
//! - `delegation`: who is steering each fleet (player, subordinate or AI)
//! - `world`: collaborator interfaces for fleets, commanders and the grid
//! - `store`: periodic and terminal battle persistence
//! - `session`: the orchestrator behind the inbound battle operations
//! - `http` / `ws`: thin transport adapters

pub mod ai;
pub mod app;
pub mod battle;
pub mod config;
pub mod delegation;
pub mod http;
pub mod session;
pub mod store;
pub mod util;
pub mod world;
pub mod ws;
