//! Jump, fall and drop-through link generation.
//!
//! Candidate pairs come from the spatial grid around each source node. Every
//! candidate within reach is attempted and trajectory validation decides: the
//! closest edge of a platform may be occluded while a farther one is clear.

use bevy::prelude::*;

use crate::graph::{LinkKind, NavGraph, NavLink, NavNode, NodeId, NodeKind};
use crate::settings::NavSettings;
use crate::trajectory::{solve_fall, solve_jump, validate_trajectory, JumpLimits, JumpSolution};
use crate::world::{CollisionWorld, PlatformHandle, RayHit};

/// Extra lift on top of the probe radius so sweeps start clear of the floor.
const FLOOR_CLEARANCE: f32 = 0.05;

#[derive(Clone, Debug, PartialEq)]
pub enum LinkOutcome {
    Created(NavLink),
    /// No physics solution inside the velocity/time budget.
    Unreachable,
    /// Solvable arc, but geometry is in the way.
    TrajectoryBlocked,
    /// The pair does not qualify for this link kind.
    NotEligible,
}

impl LinkOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, LinkOutcome::Created(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LinkStats {
    pub candidates: usize,
    pub jumps: usize,
    pub falls: usize,
    pub drops: usize,
    pub unreachable: usize,
    pub blocked: usize,
}

impl LinkStats {
    fn record(&mut self, outcome: &LinkOutcome) {
        match outcome {
            LinkOutcome::Created(link) => match link.kind {
                LinkKind::Jump => self.jumps += 1,
                LinkKind::Fall => self.falls += 1,
                LinkKind::DropThrough => self.drops += 1,
                LinkKind::Walk => {}
            },
            LinkOutcome::Unreachable => self.unreachable += 1,
            LinkOutcome::TrajectoryBlocked => self.blocked += 1,
            LinkOutcome::NotEligible => {}
        }
    }
}

/// Link generation over one graph. Owns its query buffers so a full pass
/// allocates them once.
pub struct LinkCalculator<'w, W: CollisionWorld> {
    world: &'w W,
    settings: &'w NavSettings,
    limits: JumpLimits,
    hits: Vec<RayHit>,
    candidates: Vec<NodeId>,
    path: Vec<Vec2>,
    pub stats: LinkStats,
}

impl<'w, W: CollisionWorld> LinkCalculator<'w, W> {
    pub fn new(world: &'w W, settings: &'w NavSettings) -> Self {
        Self {
            world,
            settings,
            limits: JumpLimits::from_settings(settings),
            hits: Vec::new(),
            candidates: Vec::new(),
            path: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    fn lift(&self) -> Vec2 {
        Vec2::Y * (self.settings.probe_radius + FLOOR_CLEARANCE)
    }

    /// Two nodes stand on different platforms if their handles differ, they
    /// come from different spans, or they are far apart vertically.
    pub fn distinct_platforms(&self, a: &NavNode, b: &NavNode) -> bool {
        a.platform != b.platform
            || a.span != b.span
            || (a.position.y - b.position.y).abs() > self.settings.same_platform_height_threshold
    }

    /// Shared-handle terrain cannot be excluded wholesale without hiding its
    /// own walls, so only distinct handles are excluded from sweeps.
    fn exclusions(a: &NavNode, b: &NavNode) -> Vec<PlatformHandle> {
        if a.platform == b.platform {
            Vec::new()
        } else {
            vec![a.platform, b.platform]
        }
    }

    fn sweep_clear(&mut self, points: &[Vec2], exclude: &[PlatformHandle]) -> bool {
        validate_trajectory(
            self.world,
            points,
            self.settings.obstacle_filter,
            self.settings.probe_radius,
            exclude,
            &mut self.hits,
        )
    }

    pub fn try_create_jump_link(&mut self, from: &NavNode, to: &NavNode) -> LinkOutcome {
        let s = self.settings;
        let delta = to.position - from.position;
        let eligible = from.id != to.id
            && from.kind.is_edge()
            && to.kind.is_edge()
            && self.distinct_platforms(from, to)
            && delta.y >= -s.max_fall_height
            && delta.y <= s.max_jump_height
            && delta.x.abs() >= s.min_link_distance
            && delta.x.abs() <= s.max_horizontal_distance;
        if !eligible {
            return LinkOutcome::NotEligible;
        }

        let solution = solve_jump(from.position, to.position, &self.limits);
        if !solution.reachable {
            return LinkOutcome::Unreachable;
        }
        if solution.velocity_y <= 0.0 {
            // Straight drops are fall links and follow the walk-off rules.
            return LinkOutcome::NotEligible;
        }

        let lift = self.lift();
        let lifted: Vec<Vec2> = solution.trajectory.iter().map(|p| *p + lift).collect();
        if !self.sweep_clear(&lifted, &Self::exclusions(from, to)) {
            return LinkOutcome::TrajectoryBlocked;
        }

        LinkOutcome::Created(self.link(from, to, LinkKind::Jump, s.jump_cost_multiplier, solution))
    }

    pub fn try_create_fall_link(&mut self, from: &NavNode, to: &NavNode, narrow: bool) -> LinkOutcome {
        let s = self.settings;
        let delta = to.position - from.position;
        if from.id == to.id
            || !self.distinct_platforms(from, to)
            || delta.y >= -s.height_merge_epsilon
            || -delta.y > s.max_fall_height
        {
            return LinkOutcome::NotEligible;
        }

        let lift = self.lift();
        let outward = from.kind.outward();
        match from.kind {
            NodeKind::LeftEdge | NodeKind::RightEdge => {
                // Walking off: the target has to lie past the platform end.
                if delta.x * outward < s.edge_inset || delta.x.abs() > s.max_fall_horizontal_distance {
                    return LinkOutcome::NotEligible;
                }
            }
            NodeKind::Surface => {
                if !narrow || delta.x.abs() > s.surface_fall_tolerance {
                    return LinkOutcome::NotEligible;
                }
            }
        }

        let solution = solve_fall(from.position, to.position, self.limits.gravity, self.limits.samples);
        if !solution.reachable {
            return LinkOutcome::Unreachable;
        }

        self.path.clear();
        self.path.push(from.position + lift);
        if outward != 0.0 {
            let exit = from.position.x + outward * (s.edge_inset + s.probe_radius + FLOOR_CLEARANCE);
            self.path.push(Vec2::new(exit, from.position.y) + lift);
        }
        self.path.push(to.position + lift);
        let path = std::mem::take(&mut self.path);
        let clear = self.sweep_clear(&path, &Self::exclusions(from, to));
        self.path = path;
        if !clear {
            return LinkOutcome::TrajectoryBlocked;
        }

        LinkOutcome::Created(self.link(from, to, LinkKind::Fall, s.fall_cost_multiplier, solution))
    }

    pub fn try_create_drop_link(&mut self, from: &NavNode, to: &NavNode) -> LinkOutcome {
        let s = self.settings;
        let delta = to.position - from.position;
        if !from.is_one_way
            || from.id == to.id
            || !self.distinct_platforms(from, to)
            || delta.x.abs() > s.drop_through_tolerance
            || delta.y >= -s.height_merge_epsilon
            || -delta.y > s.max_fall_height
        {
            return LinkOutcome::NotEligible;
        }

        let solution = solve_fall(from.position, to.position, self.limits.gravity, self.limits.samples);
        if !solution.reachable {
            return LinkOutcome::Unreachable;
        }
        // The one-way platform itself is passable, so the sweep starts below it.
        let start = from.position - Vec2::Y * (s.probe_radius + FLOOR_CLEARANCE);
        let points = [start, to.position + self.lift()];
        let mut exclude = Self::exclusions(from, to);
        exclude.push(from.platform);
        if !self.sweep_clear(&points, &exclude) {
            return LinkOutcome::TrajectoryBlocked;
        }

        LinkOutcome::Created(self.link(
            from,
            to,
            LinkKind::DropThrough,
            s.drop_cost_multiplier,
            solution,
        ))
    }

    fn link(
        &self,
        from: &NavNode,
        to: &NavNode,
        kind: LinkKind,
        multiplier: f32,
        solution: JumpSolution,
    ) -> NavLink {
        NavLink {
            from: from.id,
            to: to.id,
            kind,
            cost: from.position.distance(to.position) * multiplier,
            duration: solution.flight_time,
            velocity_x: solution.velocity_x,
            velocity_y: solution.velocity_y,
            trajectory: Some(solution.trajectory),
        }
    }

    /// Every non-walk link leaving `from`, appended to `out`.
    pub fn links_from(&mut self, graph: &NavGraph, from: &NavNode, narrow: bool, out: &mut Vec<NavLink>) {
        let reach = self.settings.max_link_reach();
        let mut candidates = std::mem::take(&mut self.candidates);
        graph.find_nodes_in_range(from.position, reach, &mut candidates);

        let mut best_drop: Option<NavLink> = None;
        for &to_id in &candidates {
            if to_id == from.id {
                continue;
            }
            let Some(to) = graph.node(to_id) else {
                continue;
            };
            self.stats.candidates += 1;

            let below = to.position.y < from.position.y - self.settings.height_merge_epsilon;
            let mut outcome = if below {
                self.try_create_fall_link(from, to, narrow)
            } else {
                LinkOutcome::NotEligible
            };
            if !outcome.is_created() && from.kind.is_edge() && to.kind.is_edge() {
                let jump = self.try_create_jump_link(from, to);
                if jump != LinkOutcome::NotEligible {
                    outcome = jump;
                }
            }
            match &outcome {
                LinkOutcome::Created(_) => {}
                LinkOutcome::TrajectoryBlocked => {
                    debug!("[PlatNav Links] {} -> {} blocked", from.id, to_id)
                }
                LinkOutcome::Unreachable => {
                    debug!("[PlatNav Links] {} -> {} unreachable", from.id, to_id)
                }
                LinkOutcome::NotEligible => {}
            }
            self.stats.record(&outcome);
            if let LinkOutcome::Created(link) = outcome {
                out.push(link);
            }

            if from.is_one_way && below {
                let nearer = best_drop
                    .as_ref()
                    .and_then(|best| graph.node(best.to))
                    .map_or(true, |best| to.position.y > best.position.y);
                if nearer {
                    if let LinkOutcome::Created(link) = self.try_create_drop_link(from, to) {
                        best_drop = Some(link);
                    }
                }
            }
        }
        self.candidates = candidates;

        if let Some(link) = best_drop {
            self.stats.drops += 1;
            out.push(link);
        }
    }
}

/// Populate `graph` with jump, fall and drop-through links. Adjacency is
/// left for the caller to rebuild once.
pub fn generate_links<W: CollisionWorld>(
    graph: &mut NavGraph,
    world: &W,
    settings: &NavSettings,
) -> LinkStats {
    let mut span_sizes: Vec<u32> = Vec::new();
    for node in graph.nodes() {
        let span = node.span as usize;
        if span_sizes.len() <= span {
            span_sizes.resize(span + 1, 0);
        }
        span_sizes[span] += 1;
    }

    let mut calc = LinkCalculator::new(world, settings);
    let mut pending = Vec::new();
    for from in graph.nodes() {
        let narrow = span_sizes[from.span as usize] == 1;
        calc.links_from(graph, from, narrow, &mut pending);
    }
    for link in pending {
        graph.push_link(link);
    }

    let stats = calc.stats;
    debug!(
        "[PlatNav Links] {} candidates: {} jumps, {} falls, {} drops, {} unreachable, {} blocked",
        stats.candidates, stats.jumps, stats.falls, stats.drops, stats.unreachable, stats.blocked
    );
    stats
}
