//! Collaborators outside the battle: fleet roster, commanders and the world grid

pub mod memory;

pub use memory::InMemoryWorld;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::battle::fleet::FleetLoadout;
use crate::battle::types::{CharacterId, FactionId, FleetId};

/// Cell on the strategic world grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The eight surrounding cells
    pub fn neighbors(&self) -> [GridCoord; 8] {
        [
            GridCoord::new(self.x - 1, self.y - 1),
            GridCoord::new(self.x, self.y - 1),
            GridCoord::new(self.x + 1, self.y - 1),
            GridCoord::new(self.x - 1, self.y),
            GridCoord::new(self.x + 1, self.y),
            GridCoord::new(self.x - 1, self.y + 1),
            GridCoord::new(self.x, self.y + 1),
            GridCoord::new(self.x + 1, self.y + 1),
        ]
    }

    /// Moves needed when diagonal steps are allowed
    pub fn distance(&self, other: &GridCoord) -> u32 {
        let dx = (self.x - other.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        dx.max(dy)
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The five stats AI profiles are derived from, each 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderStats {
    pub command: u8,
    pub might: u8,
    pub intellect: u8,
    pub politics: u8,
    pub charm: u8,
}

impl CommanderStats {
    pub fn new(command: u8, might: u8, intellect: u8, politics: u8, charm: u8) -> Self {
        Self {
            command: command.min(100),
            might: might.min(100),
            intellect: intellect.min(100),
            politics: politics.min(100),
            charm: charm.min(100),
        }
    }

    pub fn average(&self) -> f32 {
        (self.command as f32
            + self.might as f32
            + self.intellect as f32
            + self.politics as f32
            + self.charm as f32)
            / 5.0
    }
}

impl Default for CommanderStats {
    fn default() -> Self {
        Self::new(50, 50, 50, 50, 50)
    }
}

/// A character that can command fleets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommanderRecord {
    pub id: CharacterId,
    pub name: String,
    pub faction: FactionId,
    pub stats: CommanderStats,
    /// Stable ordering used to break ties
    #[serde(default)]
    pub sort_order: u32,
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("unknown fleet {0}")]
    UnknownFleet(FleetId),

    #[error("cell {0} is outside the world")]
    UnknownCell(GridCoord),

    #[error("failed to read world seed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse world seed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of initial fleet state for battle entry
pub trait FleetLoader: Send + Sync {
    fn load_fleet(&self, fleet_id: FleetId) -> Result<FleetLoadout, WorldError>;
}

/// Commander stat blocks and faction rosters
pub trait CommanderLookup: Send + Sync {
    fn commander(&self, id: CharacterId) -> Option<CommanderRecord>;

    /// Every commander of a faction, in `sort_order`
    fn faction_roster(&self, faction: FactionId) -> Vec<CommanderRecord>;
}

/// Fleet locations, territory control and adjacency
pub trait WorldGrid: Send + Sync {
    fn contains(&self, cell: GridCoord) -> bool;

    fn controller_of(&self, cell: GridCoord) -> Option<FactionId>;

    fn fleet_location(&self, fleet_id: FleetId) -> Option<GridCoord>;

    fn relocate_fleet(&self, fleet_id: FleetId, cell: GridCoord) -> Result<(), WorldError>;

    fn adjacent(&self, cell: GridCoord) -> Vec<GridCoord> {
        cell.neighbors()
            .into_iter()
            .filter(|c| self.contains(*c))
            .collect()
    }
}

/// Where a retreating fleet goes: an adjacent cell its faction controls,
/// otherwise any adjacent cell
pub fn retreat_destination(
    world: &dyn WorldGrid,
    from: GridCoord,
    faction: FactionId,
) -> Option<GridCoord> {
    let adjacent = world.adjacent(from);
    adjacent
        .iter()
        .copied()
        .find(|c| world.controller_of(*c) == Some(faction))
        .or_else(|| adjacent.first().copied())
}
