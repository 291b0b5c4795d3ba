//! Fleet kinematics: steering, integration, area clamping and collisions

use glam::Vec3;

use super::fleet::Kinematics;
use super::types::BattleArea;
use super::vector::{angle_difference, clamp_magnitude, direction_to_heading, normalize_angle};

/// Mass contributed by each unit
pub const MASS_PER_UNIT: f32 = 10.0;
/// Radius of an empty hull formation
pub const BASE_RADIUS: f32 = 20.0;
/// Radius growth per square-root unit
pub const RADIUS_PER_SQRT_UNIT: f32 = 4.0;
/// Thrust is only applied when within this many degrees of the desired heading
pub const FACING_TOLERANCE_DEG: f32 = 30.0;
/// A fleet within this distance of its destination has arrived
pub const ARRIVAL_RADIUS: f32 = 5.0;
/// Speeds below this snap to zero while coasting
pub const STOP_SPEED: f32 = 0.5;
/// Extra separation added when resolving a collision
pub const COLLISION_SLOP: f32 = 0.01;
/// Extra pushes allowed when a wall blocks the first resolution
const WALL_PASSES: usize = 4;

pub fn mass_for_units(units: u32) -> f32 {
    units.max(1) as f32 * MASS_PER_UNIT
}

pub fn radius_for_units(units: u32) -> f32 {
    BASE_RADIUS + (units as f32).sqrt() * RADIUS_PER_SQRT_UNIT
}

/// Result of one steering step toward a point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    Turning,
    Accelerating,
    Braking,
    Arrived,
}

/// Physics system for fleet movement
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// `position += velocity * dt`
    pub fn integrate(k: &mut Kinematics, dt: f32) {
        k.position += k.velocity * dt;
    }

    /// Steer velocity toward `direction` at full speed, limited by acceleration
    pub fn accelerate(k: &mut Kinematics, direction: Vec3, dt: f32) {
        let desired = direction.normalize_or_zero() * k.max_speed;
        let change = clamp_magnitude(desired - k.velocity, k.acceleration * dt);
        k.velocity = clamp_magnitude(k.velocity + change, k.max_speed);
        k.speed = k.velocity.length();
    }

    /// Coast: bleed velocity by the drag factor
    pub fn apply_drag(k: &mut Kinematics) {
        k.velocity *= k.drag.clamp(0.0, 1.0);
        if k.velocity.length() < STOP_SPEED {
            k.velocity = Vec3::ZERO;
        }
        k.speed = k.velocity.length();
    }

    /// Rotate toward a heading by at most `turn_rate` degrees.
    /// Returns true once within the facing tolerance.
    pub fn turn_toward(k: &mut Kinematics, target_heading: f32) -> bool {
        let diff = angle_difference(k.heading, target_heading);
        let step = diff.clamp(-k.turn_rate, k.turn_rate);
        k.heading = normalize_angle(k.heading + step);
        angle_difference(k.heading, target_heading).abs() <= FACING_TOLERANCE_DEG
    }

    /// Distance covered while coasting to a stop under drag
    pub fn stopping_distance(k: &Kinematics, dt: f32) -> f32 {
        let drag = k.drag.clamp(0.0, 1.0);
        if drag >= 1.0 {
            if k.acceleration <= 0.0 {
                return f32::INFINITY;
            }
            return k.speed * k.speed / (2.0 * k.acceleration);
        }
        k.speed * dt * drag / (1.0 - drag)
    }

    /// Turn, then accelerate once roughly facing the target, braking inside
    /// the stopping distance
    pub fn move_toward(k: &mut Kinematics, target: Vec3, dt: f32, can_thrust: bool) -> MoveStatus {
        let offset = target - k.position;
        let distance = offset.length();

        if distance <= ARRIVAL_RADIUS {
            Self::apply_drag(k);
            return MoveStatus::Arrived;
        }

        let facing = Self::turn_toward(k, direction_to_heading(offset));
        if !facing {
            Self::apply_drag(k);
            return MoveStatus::Turning;
        }

        if !can_thrust || distance <= Self::stopping_distance(k, dt) {
            Self::apply_drag(k);
            return MoveStatus::Braking;
        }

        Self::accelerate(k, offset, dt);
        MoveStatus::Accelerating
    }

    /// Keep a fleet inside the battle volume, killing velocity into the walls.
    /// Returns true if the position was clamped.
    pub fn clamp_to_area(k: &mut Kinematics, area: &BattleArea) -> bool {
        let clamped = area.clamp(k.position);
        if clamped == k.position {
            return false;
        }

        if clamped.x != k.position.x {
            k.velocity.x = 0.0;
        }
        if clamped.y != k.position.y {
            k.velocity.y = 0.0;
        }
        if clamped.z != k.position.z {
            k.velocity.z = 0.0;
        }
        k.position = clamped;
        k.speed = k.velocity.length();
        true
    }

    /// Circle overlap test in the horizontal plane
    pub fn check_collision(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> bool {
        Self::penetration(a, radius_a, b, radius_b) > 0.0
    }

    /// Overlap depth of two circles (0 when apart)
    pub fn penetration(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> f32 {
        let dist = (b - a).truncate().length();
        (radius_a + radius_b - dist).max(0.0)
    }

    /// Push two overlapping fleets apart along the contact normal.
    /// The lighter fleet moves further. Returns the new positions.
    pub fn resolve_collision(
        a: Vec3,
        mass_a: f32,
        radius_a: f32,
        b: Vec3,
        mass_b: f32,
        radius_b: f32,
    ) -> (Vec3, Vec3) {
        let delta = (b - a).truncate();
        let dist = delta.length();
        let overlap = radius_a + radius_b - dist;

        if overlap <= 0.0 {
            return (a, b);
        }

        // Coincident centres: separate along +X
        let normal = if dist < 0.001 {
            Vec3::X
        } else {
            (delta / dist).extend(0.0)
        };

        let total_mass = mass_a + mass_b;
        let share_a = if total_mass > 0.0 {
            mass_b / total_mass
        } else {
            0.5
        };
        let push = overlap + COLLISION_SLOP;

        let new_a = a - normal * push * share_a;
        let new_b = b + normal * push * (1.0 - share_a);
        (new_a, new_b)
    }

    /// Resolve an overlap and keep both fleets inside `area`. When a wall
    /// stops one fleet, the other takes the rest of the push.
    /// Returns the overlap found before resolving.
    pub fn separate_within(a: &mut Kinematics, b: &mut Kinematics, area: &BattleArea) -> f32 {
        let penetration = Self::penetration(a.position, a.radius, b.position, b.radius);
        if penetration <= 0.0 {
            return 0.0;
        }

        let (pa, pb) =
            Self::resolve_collision(a.position, a.mass, a.radius, b.position, b.mass, b.radius);
        a.position = pa;
        b.position = pb;
        Self::clamp_to_area(a, area);
        Self::clamp_to_area(b, area);

        for _ in 0..WALL_PASSES {
            let residual = Self::penetration(a.position, a.radius, b.position, b.radius);
            if residual <= 0.0 {
                break;
            }
            let delta = (b.position - a.position).truncate();
            let normal = if delta.length() < 0.001 {
                Vec3::X
            } else {
                delta.normalize().extend(0.0)
            };

            b.position += normal * (residual + COLLISION_SLOP);
            Self::clamp_to_area(b, area);

            let residual = Self::penetration(a.position, a.radius, b.position, b.radius);
            if residual <= 0.0 {
                break;
            }
            a.position -= normal * (residual + COLLISION_SLOP);
            Self::clamp_to_area(a, area);
        }

        penetration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::vector::horizontal_distance;
    use proptest::prelude::*;

    fn kinematics_at(position: Vec3, heading: f32) -> Kinematics {
        Kinematics::new(position, heading, 50.0, 16)
    }

    #[test]
    fn accelerate_is_capped_at_max_speed() {
        let mut k = kinematics_at(Vec3::ZERO, 0.0);
        for _ in 0..200 {
            PhysicsSystem::accelerate(&mut k, Vec3::X, 0.1);
        }
        assert!(k.speed <= k.max_speed + 1e-3);
        assert!((k.speed - k.max_speed).abs() < 1e-2);
    }

    #[test]
    fn drag_brings_fleet_to_rest() {
        let mut k = kinematics_at(Vec3::ZERO, 0.0);
        k.velocity = Vec3::new(40.0, 0.0, 0.0);
        for _ in 0..100 {
            PhysicsSystem::apply_drag(&mut k);
        }
        assert_eq!(k.speed, 0.0);
        assert_eq!(k.velocity, Vec3::ZERO);
    }

    #[test]
    fn turning_respects_turn_rate() {
        let mut k = kinematics_at(Vec3::ZERO, 0.0);
        k.turn_rate = 10.0;
        let facing = PhysicsSystem::turn_toward(&mut k, 90.0);
        assert!(!facing);
        assert!((k.heading - 10.0).abs() < 1e-4);

        let mut k = kinematics_at(Vec3::ZERO, 5.0);
        k.turn_rate = 10.0;
        PhysicsSystem::turn_toward(&mut k, 355.0);
        assert!((k.heading - 355.0).abs() < 1e-4);
    }

    #[test]
    fn move_toward_turns_before_thrusting() {
        let mut k = kinematics_at(Vec3::ZERO, 180.0);
        k.turn_rate = 5.0;
        let status = PhysicsSystem::move_toward(&mut k, Vec3::new(500.0, 0.0, 0.0), 0.1, true);
        assert_eq!(status, MoveStatus::Turning);
        assert_eq!(k.speed, 0.0);
    }

    #[test]
    fn move_toward_reaches_target() {
        let mut k = kinematics_at(Vec3::ZERO, 0.0);
        let target = Vec3::new(300.0, 0.0, 0.0);
        let mut arrived = false;
        for _ in 0..2_000 {
            if PhysicsSystem::move_toward(&mut k, target, 0.1, true) == MoveStatus::Arrived {
                arrived = true;
                break;
            }
            PhysicsSystem::integrate(&mut k, 0.1);
        }
        assert!(arrived);
        assert!(k.position.distance(target) <= ARRIVAL_RADIUS);
    }

    #[test]
    fn no_thrust_without_fuel() {
        let mut k = kinematics_at(Vec3::ZERO, 0.0);
        let status = PhysicsSystem::move_toward(&mut k, Vec3::new(300.0, 0.0, 0.0), 0.1, false);
        assert_eq!(status, MoveStatus::Braking);
        assert_eq!(k.speed, 0.0);
    }

    #[test]
    fn clamp_stops_motion_into_wall() {
        let area = BattleArea::new(100.0, 100.0, 10.0);
        let mut k = kinematics_at(Vec3::new(120.0, 50.0, 5.0), 0.0);
        k.velocity = Vec3::new(10.0, 3.0, 0.0);
        assert!(PhysicsSystem::clamp_to_area(&mut k, &area));
        assert_eq!(k.position, Vec3::new(100.0, 50.0, 5.0));
        assert_eq!(k.velocity, Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn lighter_fleet_is_pushed_further() {
        let (a, b) = PhysicsSystem::resolve_collision(
            Vec3::ZERO,
            100.0,
            20.0,
            Vec3::new(30.0, 0.0, 0.0),
            300.0,
            20.0,
        );
        let moved_a = a.distance(Vec3::ZERO);
        let moved_b = b.distance(Vec3::new(30.0, 0.0, 0.0));
        assert!(moved_a > moved_b);
    }

    #[test]
    fn coincident_fleets_separate() {
        let p = Vec3::new(10.0, 10.0, 0.0);
        let (a, b) = PhysicsSystem::resolve_collision(p, 10.0, 5.0, p, 10.0, 5.0);
        assert!(horizontal_distance(a, b) >= 10.0);
    }

    #[test]
    fn wall_does_not_leave_fleets_overlapping() {
        let area = BattleArea::default();
        let mut a = kinematics_at(Vec3::new(0.0, 1000.0, 0.0), 0.0);
        let mut b = kinematics_at(Vec3::new(5.0, 1000.0, 0.0), 0.0);

        let overlap = PhysicsSystem::separate_within(&mut a, &mut b, &area);
        assert!(overlap > 0.0);
        assert!(horizontal_distance(a.position, b.position) >= a.radius + b.radius);
        assert!(area.contains(a.position) && area.contains(b.position));
    }

    #[test]
    fn corner_pile_up_separates() {
        let area = BattleArea::default();
        let corner = Vec3::new(2000.0, 2000.0, 0.0);
        let mut a = kinematics_at(corner, 0.0);
        let mut b = kinematics_at(corner, 0.0);

        PhysicsSystem::separate_within(&mut a, &mut b, &area);
        assert!(horizontal_distance(a.position, b.position) >= a.radius + b.radius);
        assert!(area.contains(a.position) && area.contains(b.position));
    }

    proptest! {
        #[test]
        fn resolution_separates_overlapping_circles(
            ax in -500.0f32..500.0, ay in -500.0f32..500.0,
            dx in -40.0f32..40.0, dy in -40.0f32..40.0,
            ra in 1.0f32..60.0, rb in 1.0f32..60.0,
            ma in 1.0f32..5000.0, mb in 1.0f32..5000.0,
        ) {
            let a = Vec3::new(ax, ay, 0.0);
            let b = Vec3::new(ax + dx, ay + dy, 0.0);
            let before = horizontal_distance(a, b);
            prop_assume!(before < ra + rb);

            let (na, nb) = PhysicsSystem::resolve_collision(a, ma, ra, b, mb, rb);
            let after = horizontal_distance(na, nb);
            prop_assert!(after > before);
            prop_assert!(after >= ra + rb - 1e-2);
        }
    }
}
