use std::collections::HashMap;

use bevy::prelude::*;

pub type NodeRef = u32;

/// Uniform grid over node positions. Rebuilt wholesale with the graph,
/// never patched in place.
#[derive(Clone, Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<(i32, i32), Vec<NodeRef>>,
    positions: Vec<Vec2>,
    /// Inclusive min/max occupied cell.
    extent: Option<((i32, i32), (i32, i32))>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Result<Self, String> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(format!("cell_size must be a positive number, got {cell_size}"));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
            positions: Vec::new(),
            extent: None,
        })
    }

    /// Bucket every position; `positions[i]` becomes node `i`.
    pub fn build(cell_size: f32, positions: impl IntoIterator<Item = Vec2>) -> Result<Self, String> {
        let mut grid = Self::new(cell_size)?;
        for pos in positions {
            let id = grid.positions.len() as NodeRef;
            grid.positions.push(pos);
            let cell = grid.cell_of(pos);
            grid.cells.entry(cell).or_default().push(id);
            grid.extent = Some(match grid.extent {
                None => (cell, cell),
                Some((lo, hi)) => ((lo.0.min(cell.0), lo.1.min(cell.1)), (hi.0.max(cell.0), hi.1.max(cell.1))),
            });
        }
        Ok(grid)
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_of(&self, pos: Vec2) -> (i32, i32) {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    /// Expanding ring search. After ring `r` is scanned every unvisited node
    /// lies at least `r * cell_size` away, so the search stops as soon as the
    /// best candidate is closer than that. Rings are clipped to the occupied
    /// extent.
    pub fn find_nearest(&self, point: Vec2, max_distance: f32) -> Option<NodeRef> {
        let extent = self.extent?;
        if max_distance.is_nan() || max_distance < 0.0 {
            return None;
        }
        let (cx, cy) = self.cell_of(point);
        let max_sq = max_distance * max_distance;
        let (first_ring, last_ring) = ring_bounds((cx, cy), extent);
        let reach = (max_distance / self.cell_size).ceil();
        let reach_ring = if reach < i32::MAX as f32 { reach as i32 } else { i32::MAX };
        let max_ring = reach_ring.saturating_add(1).min(last_ring);
        let mut best: Option<(NodeRef, f32)> = None;

        for ring in first_ring..=max_ring {
            self.visit_ring(cx, cy, ring, extent, |id, pos| {
                let d_sq = pos.distance_squared(point);
                if d_sq > max_sq {
                    return;
                }
                match best {
                    Some((best_id, best_sq)) if d_sq > best_sq || (d_sq == best_sq && id > best_id) => {}
                    _ => best = Some((id, d_sq)),
                }
            });
            if let Some((_, best_sq)) = best {
                let frontier = ring as f32 * self.cell_size;
                if best_sq <= frontier * frontier {
                    break;
                }
            }
        }
        best.map(|(id, _)| id)
    }

    /// All nodes within `radius` of `point`, written into `out` (cleared first).
    pub fn find_in_range(&self, point: Vec2, radius: f32, out: &mut Vec<NodeRef>) {
        out.clear();
        let Some((lo, hi)) = self.extent else {
            return;
        };
        if radius.is_nan() || radius < 0.0 {
            return;
        }
        let r_sq = radius * radius;
        let (min_x, min_y) = self.cell_of(point - Vec2::splat(radius));
        let (max_x, max_y) = self.cell_of(point + Vec2::splat(radius));
        let (min_x, min_y) = (min_x.max(lo.0), min_y.max(lo.1));
        let (max_x, max_y) = (max_x.min(hi.0), max_y.min(hi.1));
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                let Some(ids) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                out.extend(
                    ids.iter()
                        .copied()
                        .filter(|id| self.positions[*id as usize].distance_squared(point) <= r_sq),
                );
            }
        }
        out.sort_unstable();
    }

    fn visit_ring(
        &self,
        cx: i32,
        cy: i32,
        ring: i32,
        (lo, hi): ((i32, i32), (i32, i32)),
        mut visit: impl FnMut(NodeRef, Vec2),
    ) {
        let mut scan = |x: i64, y: i64| {
            // Callers clip to the extent, so the casts are lossless.
            if let Some(ids) = self.cells.get(&(x as i32, y as i32)) {
                for id in ids {
                    visit(*id, self.positions[*id as usize]);
                }
            }
        };
        let (cx, cy, r) = (i64::from(cx), i64::from(cy), i64::from(ring));
        let (lo_x, lo_y, hi_x, hi_y) = (i64::from(lo.0), i64::from(lo.1), i64::from(hi.0), i64::from(hi.1));
        if r == 0 {
            if (lo_x..=hi_x).contains(&cx) && (lo_y..=hi_y).contains(&cy) {
                scan(cx, cy);
            }
            return;
        }
        let x_range = (cx - r).max(lo_x)..=(cx + r).min(hi_x);
        for y in [cy - r, cy + r] {
            if (lo_y..=hi_y).contains(&y) {
                for x in x_range.clone() {
                    scan(x, y);
                }
            }
        }
        let y_range = (cy - r + 1).max(lo_y)..=(cy + r - 1).min(hi_y);
        for x in [cx - r, cx + r] {
            if (lo_x..=hi_x).contains(&x) {
                for y in y_range.clone() {
                    scan(x, y);
                }
            }
        }
    }
}

/// First and last ring (Chebyshev cell distance from `center`) that can
/// touch the occupied extent.
fn ring_bounds(center: (i32, i32), (lo, hi): ((i32, i32), (i32, i32))) -> (i32, i32) {
    let axis = |c: i32, lo: i32, hi: i32| {
        let (c, lo, hi) = (i64::from(c), i64::from(lo), i64::from(hi));
        let near = (lo - c).max(c - hi).max(0);
        let far = (c - lo).abs().max((hi - c).abs());
        (near, far)
    };
    let (near_x, far_x) = axis(center.0, lo.0, hi.0);
    let (near_y, far_y) = axis(center.1, lo.1, hi.1);
    let clamp = |v: i64| v.min(i64::from(i32::MAX)) as i32;
    (clamp(near_x.max(near_y)), clamp(far_x.max(far_y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng as _, SeedableRng};

    fn brute_force_nearest(positions: &[Vec2], point: Vec2, max_distance: f32) -> Option<NodeRef> {
        let mut best: Option<(NodeRef, f32)> = None;
        for (i, pos) in positions.iter().enumerate() {
            let d_sq = pos.distance_squared(point);
            if d_sq > max_distance * max_distance {
                continue;
            }
            if best.map_or(true, |(_, b)| d_sq < b) {
                best = Some((i as NodeRef, d_sq));
            }
        }
        best.map(|(i, _)| i)
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        assert!(SpatialGrid::new(0.0).is_err());
        assert!(SpatialGrid::new(-3.0).is_err());
        assert!(SpatialGrid::new(f32::NAN).is_err());
    }

    #[test]
    fn nearest_matches_brute_force_on_random_sets() {
        let mut rng = SmallRng::seed_from_u64(7);
        for trial in 0..150 {
            let count = rng.gen_range(1..300);
            let spread = rng.gen_range(5.0..80.0f32);
            let positions: Vec<Vec2> = (0..count)
                .map(|_| Vec2::new(rng.gen_range(-spread..spread), rng.gen_range(-spread..spread)))
                .collect();
            let cell = rng.gen_range(0.5..6.0f32);
            let grid = SpatialGrid::build(cell, positions.iter().copied()).unwrap();
            for _ in 0..10 {
                let query = Vec2::new(
                    rng.gen_range(-spread * 1.2..spread * 1.2),
                    rng.gen_range(-spread * 1.2..spread * 1.2),
                );
                let max_distance = rng.gen_range(1.0..spread * 2.0);
                let expected = brute_force_nearest(&positions, query, max_distance);
                let got = grid.find_nearest(query, max_distance);
                match (expected, got) {
                    (None, None) => {}
                    (Some(e), Some(g)) => {
                        let de = positions[e as usize].distance(query);
                        let dg = positions[g as usize].distance(query);
                        assert!(
                            (de - dg).abs() < 1e-5,
                            "trial {trial}: brute force {de} vs grid {dg}"
                        );
                    }
                    other => panic!("trial {trial}: mismatch {other:?}"),
                }
            }
        }
    }

    #[test]
    fn nearest_respects_max_distance() {
        let grid = SpatialGrid::build(3.0, [Vec2::new(10.0, 0.0)]).unwrap();
        assert_eq!(grid.find_nearest(Vec2::ZERO, 9.0), None);
        assert_eq!(grid.find_nearest(Vec2::ZERO, 10.5), Some(0));
    }

    #[test]
    fn unbounded_search_distance_and_distant_queries() {
        let grid = SpatialGrid::build(3.0, [Vec2::new(10.0, 0.0), Vec2::new(-20.0, 5.0)]).expect("grid");
        assert_eq!(grid.find_nearest(Vec2::ZERO, f32::INFINITY), Some(0));
        assert_eq!(grid.find_nearest(Vec2::ZERO, f32::MAX), Some(0));
        assert_eq!(grid.find_nearest(Vec2::new(-1.0e9, 1.0e9), f32::INFINITY), Some(1));
        assert_eq!(grid.find_nearest(Vec2::new(1.0e9, 0.0), 100.0), None);
        assert_eq!(grid.find_nearest(Vec2::ZERO, f32::NAN), None);

        let mut out = Vec::new();
        grid.find_in_range(Vec2::ZERO, f32::INFINITY, &mut out);
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn empty_grid_finds_nothing() {
        let grid = SpatialGrid::new(3.0).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.find_nearest(Vec2::ZERO, 100.0), None);
        let mut out = vec![42];
        grid.find_in_range(Vec2::ZERO, 10.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn range_query_filters_by_exact_distance_and_reuses_buffer() {
        let positions = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.9, 2.9),
            Vec2::new(-7.0, 1.0),
        ];
        let grid = SpatialGrid::build(3.0, positions).unwrap();
        let mut out = Vec::with_capacity(8);
        grid.find_in_range(Vec2::ZERO, 3.0, &mut out);
        assert_eq!(out, vec![0, 1]);

        grid.find_in_range(Vec2::new(-7.0, 0.0), 1.5, &mut out);
        assert_eq!(out, vec![3]);
        assert!(out.capacity() >= 8);
    }

    #[test]
    fn negative_coordinates_bucket_with_floor() {
        let grid = SpatialGrid::build(2.0, [Vec2::new(-0.5, -0.5)]).unwrap();
        assert_eq!(grid.cell_of(Vec2::new(-0.5, -0.5)), (-1, -1));
        assert_eq!(grid.occupied_cells(), 1);
        assert_eq!(grid.find_nearest(Vec2::new(0.1, 0.1), 1.0), Some(0));
    }
}
