//! In-memory world, optionally seeded from a JSON file

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

use super::{CommanderLookup, CommanderRecord, FleetLoader, GridCoord, WorldError, WorldGrid};
use crate::battle::fleet::FleetLoadout;
use crate::battle::types::{CharacterId, FactionId, FleetId};

#[derive(Debug, Deserialize)]
struct WorldSeed {
    width: i32,
    height: i32,
    #[serde(default)]
    cells: Vec<CellSeed>,
    #[serde(default)]
    fleets: Vec<FleetSeed>,
    #[serde(default)]
    commanders: Vec<CommanderRecord>,
}

#[derive(Debug, Deserialize)]
struct CellSeed {
    x: i32,
    y: i32,
    controller: Option<FactionId>,
}

#[derive(Debug, Deserialize)]
struct FleetSeed {
    #[serde(flatten)]
    loadout: FleetLoadout,
    location: Option<GridCoord>,
}

/// Rectangular world grid with fleets and commanders held in memory
pub struct InMemoryWorld {
    width: i32,
    height: i32,
    controllers: RwLock<HashMap<GridCoord, FactionId>>,
    fleets: RwLock<HashMap<FleetId, FleetLoadout>>,
    locations: RwLock<HashMap<FleetId, GridCoord>>,
    commanders: RwLock<HashMap<CharacterId, CommanderRecord>>,
}

impl InMemoryWorld {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            controllers: RwLock::new(HashMap::new()),
            fleets: RwLock::new(HashMap::new()),
            locations: RwLock::new(HashMap::new()),
            commanders: RwLock::new(HashMap::new()),
        }
    }

    /// Load a world from a JSON seed file
    pub fn from_seed(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let seed: WorldSeed = serde_json::from_str(&raw)?;

        let world = Self::new(seed.width, seed.height);
        for cell in seed.cells {
            world.set_controller(GridCoord::new(cell.x, cell.y), cell.controller);
        }
        let fleet_count = seed.fleets.len();
        for fleet in seed.fleets {
            world.insert_fleet(fleet.loadout, fleet.location);
        }
        let commander_count = seed.commanders.len();
        for commander in seed.commanders {
            world.insert_commander(commander);
        }

        info!(
            path = %path.as_ref().display(),
            fleets = fleet_count,
            commanders = commander_count,
            "World seed loaded"
        );
        Ok(world)
    }

    pub fn set_controller(&self, cell: GridCoord, faction: Option<FactionId>) {
        let mut controllers = self.controllers.write();
        match faction {
            Some(faction) => controllers.insert(cell, faction),
            None => controllers.remove(&cell),
        };
    }

    pub fn insert_fleet(&self, loadout: FleetLoadout, location: Option<GridCoord>) {
        if let Some(cell) = location {
            self.locations.write().insert(loadout.fleet_id, cell);
        }
        self.fleets.write().insert(loadout.fleet_id, loadout);
    }

    pub fn insert_commander(&self, commander: CommanderRecord) {
        self.commanders.write().insert(commander.id, commander);
    }
}

impl FleetLoader for InMemoryWorld {
    fn load_fleet(&self, fleet_id: FleetId) -> Result<FleetLoadout, WorldError> {
        self.fleets
            .read()
            .get(&fleet_id)
            .cloned()
            .ok_or(WorldError::UnknownFleet(fleet_id))
    }
}

impl CommanderLookup for InMemoryWorld {
    fn commander(&self, id: CharacterId) -> Option<CommanderRecord> {
        self.commanders.read().get(&id).cloned()
    }

    fn faction_roster(&self, faction: FactionId) -> Vec<CommanderRecord> {
        let mut roster: Vec<CommanderRecord> = self
            .commanders
            .read()
            .values()
            .filter(|c| c.faction == faction)
            .cloned()
            .collect();
        roster.sort_by_key(|c| (c.sort_order, c.id));
        roster
    }
}

impl WorldGrid for InMemoryWorld {
    fn contains(&self, cell: GridCoord) -> bool {
        (0..self.width).contains(&cell.x) && (0..self.height).contains(&cell.y)
    }

    fn controller_of(&self, cell: GridCoord) -> Option<FactionId> {
        self.controllers.read().get(&cell).copied()
    }

    fn fleet_location(&self, fleet_id: FleetId) -> Option<GridCoord> {
        self.locations.read().get(&fleet_id).copied()
    }

    fn relocate_fleet(&self, fleet_id: FleetId, cell: GridCoord) -> Result<(), WorldError> {
        if !self.contains(cell) {
            return Err(WorldError::UnknownCell(cell));
        }
        self.locations.write().insert(fleet_id, cell);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::fleet::test_support::loadout;
    use crate::world::CommanderStats;
    use glam::Vec3;

    #[test]
    fn loads_known_fleets_only() {
        let world = InMemoryWorld::new(3, 3);
        let l = loadout(1, 10, Vec3::ZERO);
        let id = l.fleet_id;
        world.insert_fleet(l, Some(GridCoord::new(1, 1)));

        assert_eq!(world.load_fleet(id).unwrap().units, 10);
        assert!(matches!(
            world.load_fleet(FleetId::new()),
            Err(WorldError::UnknownFleet(_))
        ));
        assert_eq!(world.fleet_location(id), Some(GridCoord::new(1, 1)));
    }

    #[test]
    fn relocation_stays_on_grid() {
        let world = InMemoryWorld::new(3, 3);
        let id = FleetId::new();
        assert!(world.relocate_fleet(id, GridCoord::new(2, 2)).is_ok());
        assert!(world.relocate_fleet(id, GridCoord::new(3, 0)).is_err());
        assert_eq!(world.adjacent(GridCoord::new(0, 0)).len(), 3);
    }

    #[test]
    fn roster_is_sorted() {
        let world = InMemoryWorld::new(1, 1);
        for (order, name) in [(2, "b"), (1, "a"), (3, "c")] {
            world.insert_commander(CommanderRecord {
                id: CharacterId::new(),
                name: name.to_string(),
                faction: FactionId(1),
                stats: CommanderStats::default(),
                sort_order: order,
            });
        }
        let names: Vec<String> = world
            .faction_roster(FactionId(1))
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
