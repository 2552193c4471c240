//! Jump and fall kinematics under constant gravity.
//!
//! Everything here is a pure function of its inputs. Positive y is up.

use bevy::prelude::*;

use crate::settings::NavSettings;
use crate::world::{CollisionFilter, CollisionWorld, PlatformHandle, RayHit};

const EPS: f32 = 1e-4;

/// Physics budget for a jump, lifted out of [`NavSettings`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JumpLimits {
    pub gravity: f32,
    pub max_velocity: f32,
    pub overshoot: f32,
    pub min_arc_height: f32,
    pub arc_height_per_distance: f32,
    pub direct_fall_horizontal: f32,
    pub min_flight_time: f32,
    pub max_flight_time: f32,
    pub samples: usize,
}

impl JumpLimits {
    pub fn from_settings(settings: &NavSettings) -> Self {
        Self {
            gravity: settings.effective_gravity(),
            max_velocity: settings.max_jump_velocity,
            overshoot: settings.jump_overshoot,
            min_arc_height: settings.min_arc_height,
            arc_height_per_distance: settings.arc_height_per_distance,
            direct_fall_horizontal: settings.direct_fall_horizontal,
            min_flight_time: settings.min_flight_time,
            max_flight_time: settings.max_flight_time,
            samples: settings.trajectory_samples,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct JumpSolution {
    pub reachable: bool,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub flight_time: f32,
    /// Height of the apex above the start point.
    pub apex_height: f32,
    pub trajectory: Vec<Vec2>,
}

impl JumpSolution {
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Position along the arc after `t` seconds.
    pub fn position_at(&self, start: Vec2, gravity: f32, t: f32) -> Vec2 {
        parabola_point(start, self.velocity_x, self.velocity_y, gravity, t)
    }
}

pub fn parabola_point(start: Vec2, vx: f32, vy: f32, gravity: f32, t: f32) -> Vec2 {
    Vec2::new(start.x + vx * t, start.y + vy * t - 0.5 * gravity * t * t)
}

/// Uniformly time-sampled points of the arc, first and last included.
pub fn sample_trajectory(
    start: Vec2,
    vx: f32,
    vy: f32,
    gravity: f32,
    flight_time: f32,
    samples: usize,
) -> Vec<Vec2> {
    let samples = samples.max(2);
    let step = flight_time / (samples - 1) as f32;
    (0..samples)
        .map(|i| parabola_point(start, vx, vy, gravity, step * i as f32))
        .collect()
}

/// Time to fall `height` from rest. `None` for non-positive heights.
pub fn fall_time(height: f32, gravity: f32) -> Option<f32> {
    if height <= 0.0 || gravity <= 0.0 {
        return None;
    }
    Some((2.0 * height / gravity).sqrt())
}

/// Solve the launch velocity for a jump arc from `start` to `end`.
pub fn solve_jump(start: Vec2, end: Vec2, limits: &JumpLimits) -> JumpSolution {
    let g = limits.gravity;
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    if g <= 0.0 || (dx.abs() < EPS && dy.abs() < EPS) {
        return JumpSolution::unreachable();
    }

    if dy < -0.5 && dx.abs() <= limits.direct_fall_horizontal {
        return solve_fall(start, end, g, limits.samples);
    }

    let proportional_arc = limits
        .min_arc_height
        .max(dx.abs() * limits.arc_height_per_distance);
    let required_height = if dy > 0.0 {
        (limits.overshoot * dy).max(proportional_arc)
    } else {
        proportional_arc
    };

    let vy = (2.0 * g * required_height).sqrt();
    if vy > limits.max_velocity {
        return JumpSolution::unreachable();
    }

    let time_to_apex = vy / g;
    let fall_distance = (start.y + required_height) - end.y;
    if fall_distance < 0.0 {
        return JumpSolution::unreachable();
    }
    let time_from_apex = (2.0 * fall_distance / g).sqrt();
    let flight_time = time_to_apex + time_from_apex;
    if flight_time < limits.min_flight_time || flight_time > limits.max_flight_time {
        return JumpSolution::unreachable();
    }

    let vx = if flight_time > EPS { dx / flight_time } else { 0.0 };
    JumpSolution {
        reachable: true,
        velocity_x: vx,
        velocity_y: vy,
        flight_time,
        apex_height: required_height,
        trajectory: sample_trajectory(start, vx, vy, g, flight_time, limits.samples),
    }
}

/// Free fall from `start` (zero vertical launch speed) onto a lower `end`.
pub fn solve_fall(start: Vec2, end: Vec2, gravity: f32, samples: usize) -> JumpSolution {
    let Some(time) = fall_time(start.y - end.y, gravity) else {
        return JumpSolution::unreachable();
    };
    let vx = (end.x - start.x) / time;
    JumpSolution {
        reachable: true,
        velocity_x: vx,
        velocity_y: 0.0,
        flight_time: time,
        apex_height: 0.0,
        trajectory: sample_trajectory(start, vx, 0.0, gravity, time, samples),
    }
}

/// Sweep a circle along consecutive trajectory segments. Any hit on a
/// platform outside `exclude` invalidates the trajectory.
pub fn validate_trajectory<W: CollisionWorld>(
    world: &W,
    points: &[Vec2],
    filter: CollisionFilter,
    probe_radius: f32,
    exclude: &[PlatformHandle],
    hits: &mut Vec<RayHit>,
) -> bool {
    for pair in points.windows(2) {
        let delta = pair[1] - pair[0];
        let length = delta.length();
        if length < EPS {
            continue;
        }
        hits.clear();
        world.sweep_circle_all(pair[0], probe_radius, delta / length, length, filter, hits);
        if hits.iter().any(|hit| !exclude.contains(&hit.platform)) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{LevelShape, ShapeWorld};

    fn limits() -> JumpLimits {
        JumpLimits::from_settings(&NavSettings::default())
    }

    #[test]
    fn jump_is_deterministic_and_lands_on_target() {
        let l = limits();
        let start = Vec2::new(0.0, 0.0);
        let end = Vec2::new(3.6, 1.5);
        let a = solve_jump(start, end, &l);
        let b = solve_jump(start, end, &l);
        assert!(a.reachable);
        assert_eq!(
            (a.velocity_y, a.velocity_x, a.flight_time),
            (b.velocity_y, b.velocity_x, b.flight_time)
        );

        let landed = a.position_at(start, l.gravity, a.flight_time);
        assert!(landed.distance(end) < 1e-3, "landed at {landed:?}");
        let last = *a.trajectory.last().unwrap();
        assert!(last.distance(end) < 1e-3);
        assert_eq!(a.trajectory.len(), l.samples);
        assert_eq!(a.trajectory[0], start);
    }

    #[test]
    fn level_jump_uses_distance_proportional_arc() {
        let l = limits();
        let sol = solve_jump(Vec2::ZERO, Vec2::new(3.6, 0.0), &l);
        assert!(sol.reachable);
        assert!((sol.apex_height - 0.9).abs() < 1e-4);
        assert!(sol.flight_time > 0.1 && sol.flight_time < 2.0);
        assert!(sol.velocity_x > 0.0);
    }

    #[test]
    fn rejects_jump_exceeding_velocity_budget() {
        let l = JumpLimits {
            max_velocity: 5.0,
            ..limits()
        };
        // 1.2 * 3.0 = 3.6 units of rise needs ~8.4 u/s.
        let sol = solve_jump(Vec2::ZERO, Vec2::new(2.0, 3.0), &l);
        assert!(!sol.reachable);
        assert!(sol.trajectory.is_empty());
    }

    #[test]
    fn rejects_target_above_apex() {
        let l = JumpLimits {
            overshoot: 0.5,
            min_arc_height: 0.0,
            arc_height_per_distance: 0.0,
            ..limits()
        };
        let sol = solve_jump(Vec2::ZERO, Vec2::new(2.0, 2.0), &l);
        assert!(!sol.reachable, "apex at 1.0 cannot reach 2.0");
    }

    #[test]
    fn rejects_flight_time_outside_bounds() {
        let l = JumpLimits {
            max_flight_time: 0.2,
            ..limits()
        };
        assert!(!solve_jump(Vec2::ZERO, Vec2::new(4.0, 1.0), &l).reachable);
    }

    #[test]
    fn zero_distance_is_unreachable() {
        let sol = solve_jump(Vec2::new(1.0, 1.0), Vec2::new(1.0, 1.0), &limits());
        assert!(!sol.reachable);
    }

    #[test]
    fn vertical_jump_has_no_nan() {
        let sol = solve_jump(Vec2::ZERO, Vec2::new(0.0, 2.0), &limits());
        assert!(sol.reachable);
        assert_eq!(sol.velocity_x, 0.0);
        assert!(sol.trajectory.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn steep_drop_degrades_to_fall() {
        let l = limits();
        let sol = solve_jump(Vec2::new(0.0, 5.0), Vec2::new(0.2, 0.0), &l);
        assert!(sol.reachable);
        assert_eq!(sol.velocity_y, 0.0);
        let expected = fall_time(5.0, l.gravity).unwrap();
        assert!((sol.flight_time - expected).abs() < 1e-5);
    }

    #[test]
    fn fall_requires_lower_target() {
        let g = 9.81;
        assert!(!solve_fall(Vec2::ZERO, Vec2::new(1.0, 0.0), g, 10).reachable);
        assert!(!solve_fall(Vec2::ZERO, Vec2::new(1.0, 2.0), g, 10).reachable);
        let sol = solve_fall(Vec2::ZERO, Vec2::new(2.0, -4.905), g, 10);
        assert!(sol.reachable);
        assert!((sol.flight_time - 1.0).abs() < 1e-4);
        assert!((sol.velocity_x - 2.0).abs() < 1e-3);
        assert!(fall_time(0.0, g).is_none());
    }

    #[test]
    fn trajectory_blocked_by_ceiling_but_not_by_excluded_platform() {
        let start_platform = PlatformHandle(1);
        let ceiling = PlatformHandle(2);
        let world = ShapeWorld::new()
            .with(LevelShape::rect(start_platform, Vec2::new(-2.0, -1.0), Vec2::new(0.5, 0.0)))
            .with(LevelShape::rect(ceiling, Vec2::new(0.5, 0.6), Vec2::new(2.0, 1.0)));
        let l = limits();
        let sol = solve_jump(Vec2::new(0.0, 0.3), Vec2::new(3.0, 0.3), &l);
        assert!(sol.reachable);
        let mut hits = Vec::new();
        assert!(!validate_trajectory(
            &world,
            &sol.trajectory,
            CollisionFilter::SOLID,
            0.25,
            &[start_platform],
            &mut hits,
        ));
        assert!(validate_trajectory(
            &world,
            &sol.trajectory,
            CollisionFilter::SOLID,
            0.25,
            &[start_platform, ceiling],
            &mut hits,
        ));
    }
}
