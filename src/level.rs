use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::settings::NavSettings;
use crate::world::{LevelShape, PlatformHandle, ShapeWorld};

/// One collider in a level file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeDef {
    Box {
        handle: u64,
        min: Vec2,
        max: Vec2,
        #[serde(default)]
        one_way: bool,
    },
    Polygon {
        handle: u64,
        points: Vec<Vec2>,
        #[serde(default)]
        one_way: bool,
    },
    /// Blocks trajectories but never yields walkable surfaces.
    Obstacle { handle: u64, min: Vec2, max: Vec2 },
    /// Solid-tile terrain sharing one handle. Rows are listed top first;
    /// `.` and space are empty, anything else is solid.
    Tiles {
        handle: u64,
        #[serde(default)]
        origin: Vec2,
        tile_size: f32,
        rows: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathQuery {
    pub from: Vec2,
    pub to: Vec2,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelFile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<NavSettings>,
    pub shapes: Vec<ShapeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<PathQuery>,
}

impl ShapeDef {
    fn validate(&self, index: usize) -> Result<(), String> {
        match self {
            ShapeDef::Box { min, max, .. } | ShapeDef::Obstacle { min, max, .. } => {
                if min.x == max.x || min.y == max.y {
                    return Err(format!("shape {index}: box has zero area"));
                }
            }
            ShapeDef::Polygon { points, .. } => {
                if points.len() < 2 {
                    return Err(format!(
                        "shape {index}: polygon needs at least 2 points, got {}",
                        points.len()
                    ));
                }
            }
            ShapeDef::Tiles {
                tile_size, rows, ..
            } => {
                if !(tile_size.is_finite() && *tile_size > 0.0) {
                    return Err(format!("shape {index}: tile_size must be positive"));
                }
                let width = rows.first().map_or(0, |r| r.chars().count());
                if let Some(bad) = rows.iter().position(|r| r.chars().count() != width) {
                    return Err(format!(
                        "shape {index}: tile row {bad} has a different width than row 0"
                    ));
                }
            }
        }
        Ok(())
    }

    fn append_to(&self, world: &mut ShapeWorld) {
        match self {
            ShapeDef::Box {
                handle,
                min,
                max,
                one_way,
            } => {
                let shape = LevelShape::rect(PlatformHandle(*handle), *min, *max);
                world.add(if *one_way { shape.one_way() } else { shape });
            }
            ShapeDef::Polygon {
                handle,
                points,
                one_way,
            } => {
                let shape = LevelShape::polygon(PlatformHandle(*handle), points.clone());
                world.add(if *one_way { shape.one_way() } else { shape });
            }
            ShapeDef::Obstacle { handle, min, max } => {
                world.add(LevelShape::rect(PlatformHandle(*handle), *min, *max).obstacle());
            }
            ShapeDef::Tiles {
                handle,
                origin,
                tile_size,
                rows,
            } => {
                let width = rows.first().map_or(0, |r| r.chars().count());
                let height = rows.len();
                let mut tiles = Vec::with_capacity(width * height);
                for row in rows.iter().rev() {
                    tiles.extend(row.chars().map(|c| u8::from(!matches!(c, '.' | ' '))));
                }
                world.extend(LevelShape::tile_rows(
                    PlatformHandle(*handle),
                    *origin,
                    *tile_size,
                    width,
                    height,
                    &tiles,
                ));
            }
        }
    }
}

impl LevelFile {
    pub fn validate(&self) -> Result<(), String> {
        for (i, shape) in self.shapes.iter().enumerate() {
            shape.validate(i)?;
        }
        if let Some(settings) = &self.settings {
            settings.validate()?;
        }
        Ok(())
    }

    pub fn to_world(&self) -> ShapeWorld {
        let mut world = ShapeWorld::new();
        for shape in &self.shapes {
            shape.append_to(&mut world);
        }
        world
    }
}

pub fn parse_level(json: &str) -> Result<LevelFile, String> {
    let level: LevelFile =
        serde_json::from_str(json).map_err(|e| format!("invalid level JSON: {e}"))?;
    level.validate()?;
    Ok(level)
}

pub fn load_level_file(path: &std::path::Path) -> Result<LevelFile, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    parse_level(&contents).map_err(|e| format!("{}: {e}", path.display()))
}
