use bevy::prelude::*;

use crate::world::CollisionFilter;

/// Navigation tunables. Built once, validated, then shared read-only by the
/// graph builder, link calculator and every planner.
#[derive(Resource, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NavSettings {
    // Scan region for platform geometry (world units).
    pub scan_min: Vec2,
    pub scan_max: Vec2,

    // Top-edge extraction
    pub min_top_edge_width: f32,
    /// Minimum `normal.y` for an edge to count as walkable.
    pub top_normal_threshold: f32,
    pub height_merge_epsilon: f32,
    /// How far above a top edge to probe when checking whether it is buried.
    pub buried_probe_offset: f32,

    // Node placement
    pub min_platform_width: f32,
    pub edge_inset: f32,
    pub node_spacing: f32,
    pub dense_node_spacing: f32,
    pub dense_mode: bool,
    /// Spatial index cell size. Too small degrades towards a linear scan,
    /// too large defeats the index.
    pub cell_size: f32,

    // Physics
    pub gravity: f32,
    pub gravity_scale: f32,
    pub max_jump_velocity: f32,
    pub jump_overshoot: f32,
    pub min_arc_height: f32,
    /// Arc height per unit of horizontal distance for level/downward jumps.
    pub arc_height_per_distance: f32,
    /// Below this horizontal distance a downward jump degrades to a fall.
    pub direct_fall_horizontal: f32,
    pub min_flight_time: f32,
    pub max_flight_time: f32,
    pub trajectory_samples: usize,
    pub walk_speed: f32,

    // Link generation
    pub max_jump_height: f32,
    pub max_horizontal_distance: f32,
    pub min_link_distance: f32,
    pub max_fall_height: f32,
    pub max_fall_horizontal_distance: f32,
    pub surface_fall_tolerance: f32,
    pub drop_through_tolerance: f32,
    /// Nodes on the same platform handle only count as different platforms
    /// when separated vertically by more than this.
    pub same_platform_height_threshold: f32,
    pub probe_radius: f32,
    pub obstacle_filter: CollisionFilter,
    pub jump_cost_multiplier: f32,
    pub fall_cost_multiplier: f32,
    pub drop_cost_multiplier: f32,

    // Planner
    pub arrive_distance: f32,
    pub path_request_interval: f64,
    pub path_expire_time: f64,
    pub target_move_threshold: f32,
    pub path_deviation_threshold: f32,
    pub node_search_radius: f32,
    pub allow_partial_path: bool,
    /// A* heuristic weight on vertical distance when the goal is above.
    pub heuristic_up_weight: f32,
    pub ground_probe_distance: f32,
    pub same_platform_max_height_diff: f32,
    pub gap_probe_spacing: f32,
    pub walk_complete_distance: f32,
    pub air_complete_distance: f32,
}

impl Default for NavSettings {
    fn default() -> Self {
        Self {
            scan_min: Vec2::new(-500.0, -500.0),
            scan_max: Vec2::new(500.0, 500.0),

            min_top_edge_width: 0.1,
            top_normal_threshold: 0.7,
            height_merge_epsilon: 0.05,
            buried_probe_offset: 0.05,

            min_platform_width: 1.0,
            edge_inset: 0.3,
            node_spacing: 2.0,
            dense_node_spacing: 1.0,
            dense_mode: false,
            cell_size: 3.0,

            gravity: 9.81,
            gravity_scale: 1.0,
            max_jump_velocity: 12.0,
            jump_overshoot: 1.2,
            min_arc_height: 0.5,
            arc_height_per_distance: 0.25,
            direct_fall_horizontal: 0.5,
            min_flight_time: 0.1,
            max_flight_time: 2.0,
            trajectory_samples: 20,
            walk_speed: 6.0,

            max_jump_height: 4.0,
            max_horizontal_distance: 6.0,
            min_link_distance: 0.5,
            max_fall_height: 10.0,
            max_fall_horizontal_distance: 4.0,
            surface_fall_tolerance: 0.5,
            drop_through_tolerance: 0.5,
            same_platform_height_threshold: 0.5,
            probe_radius: 0.25,
            obstacle_filter: CollisionFilter::SOLID,
            jump_cost_multiplier: 1.5,
            fall_cost_multiplier: 1.0,
            drop_cost_multiplier: 1.2,

            arrive_distance: 0.3,
            path_request_interval: 0.25,
            path_expire_time: 5.0,
            target_move_threshold: 1.0,
            path_deviation_threshold: 2.0,
            node_search_radius: 5.0,
            allow_partial_path: true,
            heuristic_up_weight: 1.5,
            ground_probe_distance: 3.0,
            same_platform_max_height_diff: 0.5,
            gap_probe_spacing: 0.5,
            walk_complete_distance: 0.3,
            air_complete_distance: 0.8,
        }
    }
}

impl NavSettings {
    /// Effective gravity magnitude used by the trajectory solver.
    pub fn effective_gravity(&self) -> f32 {
        self.gravity * self.gravity_scale
    }

    /// Spacing between interior surface nodes for the current mode.
    pub fn interior_spacing(&self) -> f32 {
        if self.dense_mode {
            self.dense_node_spacing
        } else {
            self.node_spacing
        }
    }

    /// Radius around a node that can contain any jump or fall target.
    pub fn max_link_reach(&self) -> f32 {
        let jump = Vec2::new(self.max_horizontal_distance, self.max_jump_height).length();
        let fall = Vec2::new(
            self.max_fall_horizontal_distance.max(self.drop_through_tolerance),
            self.max_fall_height,
        )
        .length();
        jump.max(fall)
    }

    pub fn validate(&self) -> Result<(), String> {
        fn positive(name: &str, value: f32) -> Result<(), String> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be a positive number, got {value}"))
            }
        }
        fn non_negative(name: &str, value: f32) -> Result<(), String> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be zero or positive, got {value}"))
            }
        }

        if self.scan_min.x >= self.scan_max.x || self.scan_min.y >= self.scan_max.y {
            return Err(format!(
                "scan region is empty: min {:?} max {:?}",
                self.scan_min, self.scan_max
            ));
        }
        positive("cell_size", self.cell_size)?;
        positive("gravity", self.gravity)?;
        positive("gravity_scale", self.gravity_scale)?;
        positive("max_jump_velocity", self.max_jump_velocity)?;
        positive("jump_overshoot", self.jump_overshoot)?;
        positive("node_spacing", self.node_spacing)?;
        positive("dense_node_spacing", self.dense_node_spacing)?;
        positive("walk_speed", self.walk_speed)?;
        positive("min_platform_width", self.min_platform_width)?;
        non_negative("edge_inset", self.edge_inset)?;
        non_negative("min_arc_height", self.min_arc_height)?;
        non_negative("arc_height_per_distance", self.arc_height_per_distance)?;
        non_negative("min_flight_time", self.min_flight_time)?;
        positive("max_flight_time", self.max_flight_time)?;
        non_negative("probe_radius", self.probe_radius)?;
        non_negative("arrive_distance", self.arrive_distance)?;
        positive("node_search_radius", self.node_search_radius)?;
        positive("gap_probe_spacing", self.gap_probe_spacing)?;
        positive("ground_probe_distance", self.ground_probe_distance)?;
        if self.min_flight_time > self.max_flight_time {
            return Err(format!(
                "min_flight_time ({}) exceeds max_flight_time ({})",
                self.min_flight_time, self.max_flight_time
            ));
        }
        if self.trajectory_samples < 2 {
            return Err(format!(
                "trajectory_samples must be at least 2, got {}",
                self.trajectory_samples
            ));
        }
        if self.edge_inset * 2.0 >= self.min_platform_width {
            return Err(format!(
                "edge_inset ({}) leaves no room on a platform of min_platform_width ({})",
                self.edge_inset, self.min_platform_width
            ));
        }
        if self.heuristic_up_weight < 1.0 {
            return Err(format!(
                "heuristic_up_weight must be >= 1.0, got {}",
                self.heuristic_up_weight
            ));
        }
        if self.path_request_interval < 0.0 || self.path_expire_time <= 0.0 {
            return Err("path_request_interval must be >= 0 and path_expire_time > 0".to_string());
        }
        Ok(())
    }
}
