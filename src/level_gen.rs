use bevy::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::level::{LevelFile, PathQuery, ShapeDef};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelGenParams {
    /// Length of the ground run in world units.
    pub width: f32,
    pub gap_chance: f32,
    pub min_gap: f32,
    pub max_gap: f32,
    pub platforms: usize,
    pub min_platform_y: f32,
    pub max_platform_y: f32,
    pub one_way_chance: f32,
    /// Append a tile staircase sharing one handle after the ground.
    pub staircase_steps: usize,
}

impl Default for LevelGenParams {
    fn default() -> Self {
        Self {
            width: 60.0,
            gap_chance: 0.2,
            min_gap: 1.5,
            max_gap: 3.5,
            platforms: 8,
            min_platform_y: 1.5,
            max_platform_y: 3.5,
            one_way_chance: 0.35,
            staircase_steps: 4,
        }
    }
}

struct Rng(SmallRng);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(SmallRng::seed_from_u64(seed))
    }

    fn float(&mut self) -> f32 {
        self.0.gen()
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        if max <= min {
            return min;
        }
        self.0.gen_range(min..max)
    }
}

const GROUND_HANDLE: u64 = 1;
const PLATFORM_HANDLE: u64 = 100;
const STAIRS_HANDLE: u64 = 1000;
/// Solid ground kept at both ends of the run.
const SAFE_RUN: f32 = 6.0;
const STEP_TILES: usize = 2;

/// Reproducible platform layout: gapped ground, floating platforms (some
/// one-way) and an optional tile staircase.
pub fn generate_level(seed: u64, params: &LevelGenParams) -> LevelFile {
    let mut rng = Rng::new(seed);
    let mut shapes = Vec::new();
    let width = params.width.max(SAFE_RUN * 2.0);

    // Step 1: ground with gaps
    let mut handle = GROUND_HANDLE;
    let mut segment_start = 0.0f32;
    let mut x = SAFE_RUN;
    while x < width - SAFE_RUN {
        if rng.float() < params.gap_chance {
            let gap = rng.range(params.min_gap, params.max_gap);
            if x + gap > width - SAFE_RUN {
                break;
            }
            shapes.push(ground(handle, segment_start, x));
            handle += 1;
            segment_start = x + gap;
            x = segment_start + 2.0;
        } else {
            x += 1.0;
        }
    }
    shapes.push(ground(handle, segment_start, width));

    // Step 2: floating platforms
    for i in 0..params.platforms {
        let w = rng.range(2.0, 5.0);
        let px = rng.range(2.0, width - w - 2.0);
        let py = rng.range(params.min_platform_y, params.max_platform_y);
        let one_way = rng.float() < params.one_way_chance;
        shapes.push(ShapeDef::Box {
            handle: PLATFORM_HANDLE + i as u64,
            min: Vec2::new(px, py - 0.4),
            max: Vec2::new(px + w, py),
            one_way,
        });
    }

    // Step 3: staircase of tiles rising from ground level
    let steps = params.staircase_steps;
    let mut goal = Vec2::new(width - 1.0, 0.0);
    if steps > 0 {
        // Top row first; step `i` is STEP_TILES wide and i + 1 tiles tall.
        let rows = (0..steps)
            .map(|row| {
                (0..steps * STEP_TILES)
                    .map(|col| if col / STEP_TILES + row + 1 >= steps { '#' } else { '.' })
                    .collect::<String>()
            })
            .collect::<Vec<_>>();
        shapes.push(ShapeDef::Tiles {
            handle: STAIRS_HANDLE,
            origin: Vec2::new(width, -1.0),
            tile_size: 1.0,
            rows,
        });
        goal = Vec2::new(width + (steps * STEP_TILES) as f32 - 1.0, steps as f32 - 1.0);
    }

    LevelFile {
        name: format!("generated-{seed}"),
        settings: None,
        shapes,
        queries: vec![PathQuery {
            from: Vec2::new(1.0, 0.0),
            to: goal,
        }],
    }
}

fn ground(handle: u64, from: f32, to: f32) -> ShapeDef {
    ShapeDef::Box {
        handle,
        min: Vec2::new(from, -1.0),
        max: Vec2::new(to, 0.0),
        one_way: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_builder::GraphBuilder;
    use crate::level::parse_level;
    use crate::settings::NavSettings;

    #[test]
    fn same_seed_same_level() {
        let params = LevelGenParams::default();
        assert_eq!(generate_level(7, &params), generate_level(7, &params));
        assert_ne!(generate_level(7, &params), generate_level(8, &params));
    }

    #[test]
    fn ground_gaps_stay_within_bounds() {
        let params = LevelGenParams {
            gap_chance: 0.5,
            ..LevelGenParams::default()
        };
        for seed in 0..20 {
            let level = generate_level(seed, &params);
            let mut grounds: Vec<(f32, f32)> = level
                .shapes
                .iter()
                .filter_map(|s| match s {
                    ShapeDef::Box { handle, min, max, .. } if *handle < PLATFORM_HANDLE => {
                        Some((min.x, max.x))
                    }
                    _ => None,
                })
                .collect();
            grounds.sort_by(|a, b| a.0.total_cmp(&b.0));
            assert_eq!(grounds[0].0, 0.0);
            assert!(grounds[0].1 >= SAFE_RUN);
            for pair in grounds.windows(2) {
                let gap = pair[1].0 - pair[0].1;
                assert!(
                    gap >= params.min_gap - 1e-4 && gap <= params.max_gap + 1e-4,
                    "seed {seed}: gap {gap}"
                );
            }
        }
    }

    #[test]
    fn staircase_rows_rise_to_the_right() {
        let params = LevelGenParams {
            staircase_steps: 3,
            ..LevelGenParams::default()
        };
        let level = generate_level(1, &params);
        let rows = level
            .shapes
            .iter()
            .find_map(|s| match s {
                ShapeDef::Tiles { rows, .. } => Some(rows.clone()),
                _ => None,
            })
            .expect("staircase");
        assert_eq!(rows, vec!["....##", "..####", "######"]);
    }

    #[test]
    fn generated_levels_are_valid_and_navigable() {
        let level = generate_level(42, &LevelGenParams::default());
        let json = serde_json::to_string(&level).expect("serialize");
        let level = parse_level(&json).expect("generated level validates");

        let mut builder = GraphBuilder::new(NavSettings::default()).expect("settings");
        let graph = builder.rebuild(&level.to_world());
        let stats = graph.stats();
        assert!(stats.nodes > 10, "{stats:?}");
        assert!(stats.jump_links > 0, "{stats:?}");
    }

    #[test]
    fn rebuilding_a_random_level_is_deterministic() {
        for seed in [3, 17, 101] {
            let world = generate_level(seed, &LevelGenParams::default()).to_world();
            let mut builder = GraphBuilder::new(NavSettings::default()).expect("settings");
            let first = builder.rebuild(&world);
            let second = builder.rebuild(&world);

            let mut a = first.stats();
            let b = second.stats();
            a.version = b.version;
            assert_eq!(a, b, "seed {seed}");
            let positions = |g: &crate::graph::NavGraph| g.nodes().iter().map(|n| n.position).collect::<Vec<_>>();
            assert_eq!(positions(&*first), positions(&*second), "seed {seed}");
        }
    }
}
