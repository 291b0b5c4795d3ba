//! Identifiers, battle-area bounds, rules and per-battle settings

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::time::DEFAULT_TICK_RATE;

/// Unique identifier of a battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BattleId(pub Uuid);

impl BattleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BattleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FleetId(pub Uuid);

impl FleetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FleetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FleetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a character (player or commander)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Faction a fleet fights for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactionId(pub u32);

impl fmt::Display for FactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "faction-{}", self.0)
    }
}

/// Battle lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleStatus {
    /// Created, participants may still join
    Preparing,
    /// Tick loop advancing
    Active,
    /// Tick loop suspended
    Paused,
    /// Result computed, loop torn down
    Ended,
}

/// Rectangular 3D volume the battle is simulated in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BattleArea {
    pub min: Vec3,
    pub max: Vec3,
}

impl BattleArea {
    /// Area spanning `[0, width] x [0, height] x [0, depth]`
    pub fn new(width: f32, height: f32, depth: f32) -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::new(width.max(1.0), height.max(1.0), depth.max(0.0)),
        }
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Clamp a point into the volume
    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Closest point on the horizontal boundary (the four side walls)
    pub fn nearest_edge_point(&self, point: Vec3) -> Vec3 {
        let p = self.clamp(point);
        let candidates = [
            (p.x - self.min.x, Vec3::new(self.min.x, p.y, p.z)),
            (self.max.x - p.x, Vec3::new(self.max.x, p.y, p.z)),
            (p.y - self.min.y, Vec3::new(p.x, self.min.y, p.z)),
            (self.max.y - p.y, Vec3::new(p.x, self.max.y, p.z)),
        ];

        candidates
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, edge)| edge)
            .unwrap_or(p)
    }
}

impl Default for BattleArea {
    fn default() -> Self {
        Self::new(2000.0, 2000.0, 200.0)
    }
}

/// Subsystems that can be switched off per battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleFeatures {
    pub ai: bool,
    pub supply: bool,
    pub time_limit: bool,
}

impl Default for BattleFeatures {
    fn default() -> Self {
        Self {
            ai: true,
            supply: true,
            time_limit: true,
        }
    }
}

/// Rules agreed at battle creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleRules {
    pub retreat_allowed: bool,
    /// Total retreat duration in ticks
    pub retreat_delay_ticks: u64,
    pub friendly_fire: bool,
    pub min_participants: usize,
}

impl Default for BattleRules {
    fn default() -> Self {
        Self {
            retreat_allowed: true,
            retreat_delay_ticks: 150,
            friendly_fire: false,
            min_participants: 2,
        }
    }
}

/// Simulation settings for one battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    /// Ticks per second (5-30)
    pub tick_rate: u32,
    /// Hard timeout
    pub max_ticks: u64,
    /// Save a record every N ticks
    pub persist_interval_ticks: u64,
    /// Unprocessed commands older than this are dropped
    pub stale_command_ticks: u64,
    /// Ticks without damage before the battle is a stalemate
    pub stalemate_threshold_ticks: u64,
    /// Grace period once every fleet is out of fuel
    pub supply_grace_ticks: u64,
    /// Units a faction may field in one battle
    pub faction_unit_cap: u32,
    pub features: BattleFeatures,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_ticks: 18_000,
            persist_interval_ticks: 10,
            stale_command_ticks: 50,
            stalemate_threshold_ticks: 1_800,
            supply_grace_ticks: 300,
            faction_unit_cap: 300,
            features: BattleFeatures::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_edge_picks_closest_wall() {
        let area = BattleArea::new(1000.0, 1000.0, 100.0);
        let edge = area.nearest_edge_point(Vec3::new(900.0, 400.0, 50.0));
        assert_eq!(edge, Vec3::new(1000.0, 400.0, 50.0));

        let edge = area.nearest_edge_point(Vec3::new(300.0, 20.0, 0.0));
        assert_eq!(edge, Vec3::new(300.0, 0.0, 0.0));
    }

    #[test]
    fn clamp_keeps_points_inside() {
        let area = BattleArea::new(500.0, 500.0, 50.0);
        let p = area.clamp(Vec3::new(-10.0, 600.0, 70.0));
        assert!(area.contains(p));
        assert_eq!(p, Vec3::new(0.0, 500.0, 50.0));
    }
}
