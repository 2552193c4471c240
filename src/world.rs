//! Geometry provider seam.
//!
//! The navigation core never owns level geometry. It asks a [`CollisionWorld`]
//! for platform shapes, their boundaries, ray casts and circle sweeps.
//! [`ShapeWorld`] is the in-memory provider used by the CLI, the Bevy plugin
//! and the tests.

use bevy::math::Rect;
use bevy::prelude::*;

const EPS: f32 = 1e-6;

/// Opaque identity of the geometry that owns a platform. Not unique per
/// physical platform: tile terrain shares one handle across many surfaces.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct PlatformHandle(pub u64);

/// Which shapes take part in a ray or sweep query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CollisionFilter {
    pub solid: bool,
    pub one_way: bool,
}

impl CollisionFilter {
    pub const SOLID: Self = Self {
        solid: true,
        one_way: false,
    };
    pub const ALL: Self = Self {
        solid: true,
        one_way: true,
    };

    pub fn accepts(self, one_way: bool) -> bool {
        if one_way {
            self.one_way
        } else {
            self.solid
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub point: Vec2,
    pub normal: Vec2,
    pub distance: f32,
    pub platform: PlatformHandle,
    pub one_way: bool,
}

/// A collision shape tagged as a platform.
pub trait PlatformShape {
    /// Closed boundary polylines in world space. The closing edge from the
    /// last point back to the first is implied.
    fn boundary_paths(&self) -> &[Vec<Vec2>];
    fn platform_handle(&self) -> PlatformHandle;
    fn is_one_way(&self) -> bool;
}

/// Scene collision queries the navigation core consumes.
pub trait CollisionWorld {
    type Shape: PlatformShape;

    fn query_platform_shapes(&self, region: Rect) -> Vec<&Self::Shape>;

    /// Closest hit along `direction` (normalized) within `max_distance`.
    fn cast_ray(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        filter: CollisionFilter,
    ) -> Option<RayHit>;

    /// Every shape a circle of `radius` touches while moving from `origin`
    /// along `direction` for `max_distance`. Hits are appended to `hits`.
    fn sweep_circle_all(
        &self,
        origin: Vec2,
        radius: f32,
        direction: Vec2,
        max_distance: f32,
        filter: CollisionFilter,
        hits: &mut Vec<RayHit>,
    );

    fn sweep_circle(
        &self,
        origin: Vec2,
        radius: f32,
        direction: Vec2,
        max_distance: f32,
        filter: CollisionFilter,
    ) -> Option<RayHit> {
        let mut hits = Vec::new();
        self.sweep_circle_all(origin, radius, direction, max_distance, filter, &mut hits);
        hits.into_iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LevelShape {
    pub handle: PlatformHandle,
    pub paths: Vec<Vec<Vec2>>,
    pub one_way: bool,
    /// Platform-tagged shapes produce walkable surfaces; obstacles only block.
    pub walkable: bool,
    pub bounds: Rect,
}

impl LevelShape {
    pub fn polygon(handle: PlatformHandle, points: Vec<Vec2>) -> Self {
        let bounds = bounds_of(&points);
        Self {
            handle,
            paths: vec![points],
            one_way: false,
            walkable: true,
            bounds,
        }
    }

    pub fn rect(handle: PlatformHandle, min: Vec2, max: Vec2) -> Self {
        let lo = min.min(max);
        let hi = min.max(max);
        Self::polygon(
            handle,
            vec![lo, Vec2::new(hi.x, lo.y), hi, Vec2::new(lo.x, hi.y)],
        )
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn obstacle(mut self) -> Self {
        self.walkable = false;
        self
    }

    /// Converts a solid-tile grid into boxes that all share `handle`.
    /// Row 0 is the bottom row; any non-zero tile is solid. Each row run is
    /// split where exposure to the row above changes, so buried boxes never
    /// contribute a top edge that only partly faces open space.
    pub fn tile_rows(
        handle: PlatformHandle,
        origin: Vec2,
        tile_size: f32,
        width: usize,
        height: usize,
        tiles: &[u8],
    ) -> Vec<Self> {
        let solid = |x: usize, y: usize| -> bool {
            x < width && y < height && tiles.get(y * width + x).is_some_and(|t| *t != 0)
        };
        let mut out = Vec::new();
        for y in 0..height {
            let mut x = 0;
            while x < width {
                if !solid(x, y) {
                    x += 1;
                    continue;
                }
                let exposed = !solid(x, y + 1);
                let start = x;
                while x < width && solid(x, y) && !solid(x, y + 1) == exposed {
                    x += 1;
                }
                let min = origin + Vec2::new(start as f32, y as f32) * tile_size;
                let max = origin + Vec2::new(x as f32, (y + 1) as f32) * tile_size;
                out.push(Self::rect(handle, min, max));
            }
        }
        out
    }

    fn segments(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        self.paths.iter().flat_map(|path| {
            let n = path.len();
            (0..if n >= 2 { n } else { 0 }).map(move |i| (path[i], path[(i + 1) % n]))
        })
    }

    pub fn contains_point(&self, point: Vec2) -> bool {
        self.paths.iter().any(|path| point_in_polygon(point, path))
    }
}

impl PlatformShape for LevelShape {
    fn boundary_paths(&self) -> &[Vec<Vec2>] {
        &self.paths
    }

    fn platform_handle(&self) -> PlatformHandle {
        self.handle
    }

    fn is_one_way(&self) -> bool {
        self.one_way
    }
}

/// Static, in-memory collision world.
#[derive(Resource, Clone, Debug, Default)]
pub struct ShapeWorld {
    pub shapes: Vec<LevelShape>,
}

impl ShapeWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, shape: LevelShape) -> &mut Self {
        self.shapes.push(shape);
        self
    }

    pub fn with(mut self, shape: LevelShape) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn extend(&mut self, shapes: impl IntoIterator<Item = LevelShape>) -> &mut Self {
        self.shapes.extend(shapes);
        self
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// True if `point` lies inside any shape accepted by `filter`.
    pub fn point_blocked(&self, point: Vec2, filter: CollisionFilter) -> bool {
        self.shapes
            .iter()
            .filter(|s| filter.accepts(s.one_way))
            .any(|s| s.contains_point(point))
    }
}

impl CollisionWorld for ShapeWorld {
    type Shape = LevelShape;

    fn query_platform_shapes(&self, region: Rect) -> Vec<&LevelShape> {
        self.shapes
            .iter()
            .filter(|s| s.walkable && rects_overlap(s.bounds, region))
            .collect()
    }

    fn cast_ray(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        filter: CollisionFilter,
    ) -> Option<RayHit> {
        let dir = direction.normalize_or_zero();
        if dir == Vec2::ZERO || max_distance <= 0.0 {
            return None;
        }
        let ray = dir * max_distance;
        let mut best: Option<RayHit> = None;
        for shape in self.shapes.iter().filter(|s| filter.accepts(s.one_way)) {
            for (a, b) in shape.segments() {
                let Some(t) = ray_segment_intersection(origin, ray, a, b) else {
                    continue;
                };
                let distance = t * max_distance;
                if best.is_some_and(|hit| hit.distance <= distance) {
                    continue;
                }
                let edge = b - a;
                let mut normal = edge.perp().normalize_or_zero();
                if normal.dot(dir) > 0.0 {
                    normal = -normal;
                }
                best = Some(RayHit {
                    point: origin + dir * distance,
                    normal,
                    distance,
                    platform: shape.handle,
                    one_way: shape.one_way,
                });
            }
        }
        best
    }

    fn sweep_circle_all(
        &self,
        origin: Vec2,
        radius: f32,
        direction: Vec2,
        max_distance: f32,
        filter: CollisionFilter,
        hits: &mut Vec<RayHit>,
    ) {
        let dir = direction.normalize_or_zero();
        let travel = if dir == Vec2::ZERO {
            Vec2::ZERO
        } else {
            dir * max_distance.max(0.0)
        };
        let end = origin + travel;
        let r_sq = radius * radius;
        for shape in self.shapes.iter().filter(|s| filter.accepts(s.one_way)) {
            let mut best: Option<(f32, Vec2, Vec2)> = None;
            for (a, b) in shape.segments() {
                let (s, _, dist_sq) = closest_segment_segment(origin, end, a, b);
                if dist_sq > r_sq {
                    continue;
                }
                let contact_s = first_contact(origin, travel, a, b, radius, s);
                if best.is_some_and(|(bs, _, _)| bs <= contact_s) {
                    continue;
                }
                let center = origin + travel * contact_s;
                let closest = closest_point_on_segment(center, a, b);
                best = Some((contact_s, center, closest));
            }
            if let Some((s, center, closest)) = best {
                let normal = (center - closest).normalize_or_zero();
                hits.push(RayHit {
                    point: closest,
                    normal,
                    distance: s * travel.length(),
                    platform: shape.handle,
                    one_way: shape.one_way,
                });
            }
        }
    }
}

fn rects_overlap(a: Rect, b: Rect) -> bool {
    a.min.x <= b.max.x && a.max.x >= b.min.x && a.min.y <= b.max.y && a.max.y >= b.min.y
}

fn bounds_of(points: &[Vec2]) -> Rect {
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for p in points {
        min = min.min(*p);
        max = max.max(*p);
    }
    if points.is_empty() {
        return Rect::default();
    }
    Rect { min, max }
}

/// Parameter `t` in [0, 1] along `ray` where it crosses segment `a..b`.
fn ray_segment_intersection(origin: Vec2, ray: Vec2, a: Vec2, b: Vec2) -> Option<f32> {
    let edge = b - a;
    let denom = ray.perp_dot(edge);
    if denom.abs() < EPS {
        return None;
    }
    let to_a = a - origin;
    let t = to_a.perp_dot(edge) / denom;
    let u = to_a.perp_dot(ray) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}

pub fn closest_point_on_segment(point: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < EPS {
        return a;
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest points between segments `p1..q1` and `p2..q2`.
/// Returns `(s, t, distance_squared)` with `s`, `t` the clamped parameters.
pub fn closest_segment_segment(p1: Vec2, q1: Vec2, p2: Vec2, q2: Vec2) -> (f32, f32, f32) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t) = if a <= EPS && e <= EPS {
        (0.0, 0.0)
    } else if a <= EPS {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPS {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom.abs() > EPS {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    let c1 = p1 + d1 * s;
    let c2 = p2 + d2 * t;
    (s, t, c1.distance_squared(c2))
}

/// Smallest sweep parameter in `[0, closest_s]` at which the circle touches
/// segment `a..b`. Distance to a segment is convex along a line, so bisection
/// between a free and a touching parameter converges on the first contact.
fn first_contact(origin: Vec2, travel: Vec2, a: Vec2, b: Vec2, radius: f32, closest_s: f32) -> f32 {
    let touching = |s: f32| {
        let p = origin + travel * s;
        p.distance_squared(closest_point_on_segment(p, a, b)) <= radius * radius
    };
    if touching(0.0) {
        return 0.0;
    }
    let mut lo = 0.0f32;
    let mut hi = closest_s;
    for _ in 0..20 {
        let mid = (lo + hi) * 0.5;
        if touching(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Even-odd point in polygon test on a closed polyline.
pub fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y) {
            let x_cross = pj.x + (point.y - pj.y) * (pi.x - pj.x) / (pi.y - pj.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Twice the signed area; positive for counter-clockwise winding.
pub fn signed_area(polygon: &[Vec2]) -> f32 {
    let n = polygon.len();
    (0..n)
        .map(|i| polygon[i].perp_dot(polygon[(i + 1) % n]))
        .sum()
}
