//! Navigation graphs and path planning for 2D platformer agents.
//!
//! A [`graph_builder::GraphBuilder`] scans level geometry through the
//! [`world::CollisionWorld`] seam, places nodes on walkable surfaces and
//! links them with walk, jump, fall and drop-through moves. A
//! [`planner::Planner`] searches that graph and hands out
//! [`path::MoveCommand`]s for a movement controller to execute.

pub mod graph;
pub mod graph_builder;
pub mod level;
pub mod level_gen;
pub mod links;
pub mod path;
pub mod planner;
pub mod plugin;
pub mod settings;
pub mod spatial_grid;
pub mod trajectory;
pub mod world;

#[cfg(not(target_arch = "wasm32"))]
pub mod file_watcher;

pub use graph::{GraphStats, LinkKind, NavGraph, NavLink, NavNode, NodeId, NodeKind, SharedNavGraph};
pub use graph_builder::GraphBuilder;
pub use links::{LinkOutcome, LinkStats};
pub use path::{MoveCommand, MoveKind, Path, PathInvalidation, PathStatus};
pub use planner::{Planner, PlannerState};
pub use plugin::{NavAgent, NavGraphStore, NavLevel, PlatformNavPlugin};
pub use settings::NavSettings;
pub use world::{CollisionFilter, CollisionWorld, LevelShape, PlatformHandle, PlatformShape, RayHit, ShapeWorld};
