//! Per-fleet combat state owned by the battle engine

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::error::FleetTickError;
use super::physics::{mass_for_units, radius_for_units};
use super::types::{CharacterId, FactionId, FleetId};
use super::vector::normalize_angle;

/// Individual hulls represented by one unit of ship-count
pub const HULLS_PER_UNIT: u32 = 300;

/// Starting morale for fleets that do not specify one
pub const DEFAULT_MORALE: f32 = 100.0;

/// Fleet formation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Formation {
    #[default]
    Line,
    Wedge,
    Column,
    Circle,
    Spread,
}

/// Position, motion and handling of a fleet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Degrees, `[0, 360)`
    pub heading: f32,
    /// Current speed (length of velocity)
    pub speed: f32,
    pub max_speed: f32,
    /// Speed gained per second of thrust
    pub acceleration: f32,
    /// Degrees per tick
    pub turn_rate: f32,
    /// Fraction of velocity kept per tick while coasting
    pub drag: f32,
    /// Collision radius
    pub radius: f32,
    pub mass: f32,
}

impl Kinematics {
    pub fn new(position: Vec3, heading: f32, max_speed: f32, units: u32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            heading: normalize_angle(heading),
            speed: 0.0,
            max_speed: max_speed.max(0.0),
            acceleration: max_speed.max(0.0) * 0.5,
            turn_rate: 6.0,
            drag: 0.9,
            radius: radius_for_units(units),
            mass: mass_for_units(units),
        }
    }

    pub fn halt(&mut self) {
        self.velocity = Vec3::ZERO;
        self.speed = 0.0;
    }
}

/// Weapon characteristics of a fleet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeaponProfile {
    pub range: f32,
    /// Minimum ticks between volleys
    pub fire_rate: u64,
    /// Base damage per unit, scaled by `sqrt(units)`
    pub damage: f32,
    /// Percent, 0-100
    pub accuracy: f32,
}

impl Default for WeaponProfile {
    fn default() -> Self {
        Self {
            range: 300.0,
            fire_rate: 10,
            damage: 10.0,
            accuracy: 70.0,
        }
    }
}

/// Initial description of a fleet as delivered by the fleet loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetLoadout {
    pub fleet_id: FleetId,
    pub name: String,
    pub faction: FactionId,
    /// Player that owns the fleet
    pub owner_id: Option<CharacterId>,
    /// Character whose stats drive AI behaviour
    pub commander_id: Option<CharacterId>,
    pub units: u32,
    pub max_units: u32,
    pub position: Vec3,
    pub heading: f32,
    pub max_speed: f32,
    #[serde(default)]
    pub acceleration: Option<f32>,
    #[serde(default)]
    pub turn_rate: Option<f32>,
    pub weapon: WeaponProfile,
    #[serde(default = "default_morale")]
    pub morale: f32,
    #[serde(default)]
    pub formation: Formation,
}

fn default_morale() -> f32 {
    DEFAULT_MORALE
}

/// Standing orders derived from applied commands
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FleetOrders {
    pub move_target: Option<Vec3>,
    /// Close to weapon range of the current target
    pub pursue: bool,
    pub target_heading: Option<f32>,
}

impl FleetOrders {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Combat-facing state of one fleet in one battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetCombatState {
    pub fleet_id: FleetId,
    pub name: String,
    pub faction: FactionId,
    pub owner_id: Option<CharacterId>,
    pub commander_id: Option<CharacterId>,
    pub kinematics: Kinematics,

    // Strength
    pub units: u32,
    pub max_units: u32,
    /// Percent, 0-100
    pub hp: f32,
    pub morale: f32,
    pub formation: Formation,
    pub weapon: WeaponProfile,

    // Lifecycle flags
    pub defeated: bool,
    /// Left the battle through a completed retreat
    pub withdrawn: bool,
    pub retreating: bool,
    pub retreat_start_tick: Option<u64>,

    // Targeting and orders
    pub target: Option<FleetId>,
    pub orders: FleetOrders,
    pub last_fire_tick: Option<u64>,

    // Tallies
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub ships_lost: u32,
    pub joined_tick: u64,
}

impl FleetCombatState {
    pub fn from_loadout(loadout: &FleetLoadout, tick: u64) -> Self {
        let units = loadout.units;
        let mut kinematics =
            Kinematics::new(loadout.position, loadout.heading, loadout.max_speed, units);
        if let Some(acceleration) = loadout.acceleration {
            kinematics.acceleration = acceleration.max(0.0);
        }
        if let Some(turn_rate) = loadout.turn_rate {
            kinematics.turn_rate = turn_rate.max(0.0);
        }

        Self {
            fleet_id: loadout.fleet_id,
            name: loadout.name.clone(),
            faction: loadout.faction,
            owner_id: loadout.owner_id,
            commander_id: loadout.commander_id,
            kinematics,
            units,
            max_units: loadout.max_units.max(units),
            hp: 100.0,
            morale: loadout.morale.clamp(0.0, 100.0),
            formation: loadout.formation,
            weapon: loadout.weapon,
            defeated: units == 0,
            withdrawn: false,
            retreating: false,
            retreat_start_tick: None,
            target: None,
            orders: FleetOrders::default(),
            last_fire_tick: None,
            damage_dealt: 0.0,
            damage_taken: 0.0,
            ships_lost: 0,
            joined_tick: tick,
        }
    }

    /// Still taking part in the battle
    pub fn is_active(&self) -> bool {
        !self.defeated && !self.withdrawn
    }

    /// Able to take fire orders
    pub fn can_fight(&self) -> bool {
        self.is_active() && !self.retreating
    }

    pub fn position(&self) -> Vec3 {
        self.kinematics.position
    }

    pub fn distance_to(&self, other: &FleetCombatState) -> f32 {
        self.kinematics.position.distance(other.kinematics.position)
    }

    /// Remaining fighting strength used for timeout and force-ratio math
    pub fn force(&self) -> f32 {
        if !self.is_active() {
            return 0.0;
        }
        self.units as f32 * (self.hp / 100.0)
    }

    /// Fails when a value no later phase can work with has crept in
    pub fn check(&self) -> Result<(), FleetTickError> {
        let k = &self.kinematics;
        let field = if !(k.position.is_finite() && k.velocity.is_finite() && k.heading.is_finite()) {
            "kinematics"
        } else if !(k.radius.is_finite() && k.mass.is_finite()) {
            "body"
        } else if !(self.hp.is_finite() && self.morale.is_finite()) {
            "strength"
        } else {
            return Ok(());
        };
        Err(FleetTickError::NonFinite {
            fleet_id: self.fleet_id,
            field,
        })
    }

    /// Re-derive mass and radius after unit losses
    pub fn refresh_body(&mut self) {
        self.kinematics.mass = mass_for_units(self.units);
        self.kinematics.radius = radius_for_units(self.units);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Loadout with sane defaults for unit tests
    pub fn loadout(faction: u32, units: u32, position: Vec3) -> FleetLoadout {
        FleetLoadout {
            fleet_id: FleetId::new(),
            name: format!("fleet-{}-{}", faction, units),
            faction: FactionId(faction),
            owner_id: None,
            commander_id: None,
            units,
            max_units: units,
            position,
            heading: 0.0,
            max_speed: 50.0,
            acceleration: None,
            turn_rate: None,
            weapon: WeaponProfile::default(),
            morale: DEFAULT_MORALE,
            formation: Formation::Line,
        }
    }

    pub fn fleet(faction: u32, units: u32, position: Vec3) -> FleetCombatState {
        FleetCombatState::from_loadout(&loadout(faction, units, position), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::fleet;
    use super::*;

    #[test]
    fn force_scales_with_hp_and_vanishes_when_inactive() {
        let mut f = fleet(1, 20, Vec3::ZERO);
        assert_eq!(f.force(), 20.0);
        f.hp = 50.0;
        assert_eq!(f.force(), 10.0);
        f.withdrawn = true;
        assert_eq!(f.force(), 0.0);
    }

    #[test]
    fn check_names_the_broken_field() {
        let mut f = fleet(1, 10, Vec3::ZERO);
        assert!(f.check().is_ok());

        f.morale = f32::NAN;
        assert!(matches!(
            f.check(),
            Err(FleetTickError::NonFinite { field: "strength", .. })
        ));

        f.kinematics.position.x = f32::INFINITY;
        let err = f.check().unwrap_err();
        assert!(matches!(err, FleetTickError::NonFinite { field: "kinematics", .. }));
        assert_eq!(err.fleet_id(), f.fleet_id);
    }

    #[test]
    fn body_shrinks_with_units() {
        let mut f = fleet(1, 100, Vec3::ZERO);
        let radius = f.kinematics.radius;
        f.units = 25;
        f.refresh_body();
        assert!(f.kinematics.radius < radius);
        assert_eq!(f.kinematics.mass, mass_for_units(25));
    }
}
