//! Vector and angle helpers on top of `glam::Vec3`
//!
//! Headings are degrees in the x-y plane, counter-clockwise from +X, and are
//! always kept in `[0, 360)`.

use glam::Vec3;

/// Normalize an angle in degrees into `[0, 360)`
pub fn normalize_angle(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in `(-180, 180]`
pub fn angle_difference(from: f32, to: f32) -> f32 {
    let diff = normalize_angle(to) - normalize_angle(from);
    if diff > 180.0 {
        diff - 360.0
    } else if diff <= -180.0 {
        diff + 360.0
    } else {
        diff
    }
}

/// Unit direction in the horizontal plane for a heading
pub fn heading_to_direction(heading: f32) -> Vec3 {
    let radians = heading.to_radians();
    Vec3::new(radians.cos(), radians.sin(), 0.0)
}

/// Heading of a direction's horizontal component (0 for a zero vector)
pub fn direction_to_heading(direction: Vec3) -> f32 {
    if direction.x.abs() < f32::EPSILON && direction.y.abs() < f32::EPSILON {
        return 0.0;
    }
    normalize_angle(direction.y.atan2(direction.x).to_degrees())
}

/// Heading from one point toward another
pub fn heading_between(from: Vec3, to: Vec3) -> f32 {
    direction_to_heading(to - from)
}

/// Linear interpolation with `t` clamped to `[0, 1]`
pub fn lerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a.lerp(b, t.clamp(0.0, 1.0))
}

/// Distance ignoring the vertical axis
pub fn horizontal_distance(a: Vec3, b: Vec3) -> f32 {
    (b - a).truncate().length()
}

/// Rotate a vector around the vertical axis
pub fn rotate_horizontal(v: Vec3, degrees: f32) -> Vec3 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Vec3::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos, v.z)
}

/// Scale a vector down so its length does not exceed `max`
pub fn clamp_magnitude(v: Vec3, max: f32) -> Vec3 {
    if max <= 0.0 {
        return Vec3::ZERO;
    }
    v.clamp_length_max(max)
}
