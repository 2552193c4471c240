use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use bevy::prelude::*;

use crate::graph::{LinkIndex, NavGraph, NodeId, SharedNavGraph};
use crate::path::{MoveCommand, MoveKind, Path, PathInvalidation, PathStatus};
use crate::settings::NavSettings;
use crate::world::{closest_point_on_segment, CollisionFilter, CollisionWorld, RayHit};

/// Height above a probe point the downward ground rays start from.
const PROBE_LIFT: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannerState {
    Idle,
    Planning,
    Following { cursor: usize },
    Replanning,
}

#[derive(Clone, Copy, Debug)]
struct SearchNode {
    node: NodeId,
    f_cost: f32,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the lowest f-cost first.
        other
            .f_cost
            .total_cmp(&self.f_cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Search buffers kept between requests.
#[derive(Default)]
struct SearchScratch {
    g_cost: Vec<f32>,
    came_from: Vec<Option<LinkIndex>>,
    closed: Vec<bool>,
    open: BinaryHeap<SearchNode>,
    queue: VecDeque<NodeId>,
}

impl SearchScratch {
    fn reset(&mut self, nodes: usize) {
        self.g_cost.clear();
        self.g_cost.resize(nodes, f32::INFINITY);
        self.came_from.clear();
        self.came_from.resize(nodes, None);
        self.closed.clear();
        self.closed.resize(nodes, false);
        self.open.clear();
        self.queue.clear();
    }
}

/// Per-agent path planner over the shared graph. Owns its path exclusively;
/// the graph is snapshotted per request so a rebuild never shows up mid-search.
pub struct Planner {
    settings: NavSettings,
    graph: SharedNavGraph,
    state: PlannerState,
    path: Option<Path>,
    last_request_at: Option<f64>,
    scratch: SearchScratch,
}

impl Planner {
    pub fn new(settings: NavSettings, graph: SharedNavGraph) -> Result<Self, String> {
        settings.validate()?;
        Ok(Self {
            settings,
            graph,
            state: PlannerState::Idle,
            path: None,
            last_request_at: None,
            scratch: SearchScratch::default(),
        })
    }

    pub fn settings(&self) -> &NavSettings {
        &self.settings
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn clear(&mut self) {
        self.path = None;
        self.state = PlannerState::Idle;
    }

    /// Plan from `start` to `end`. Rate limited to one request per
    /// `path_request_interval` unless `force` is set. Returns true when a
    /// valid path replaced the previous one.
    pub fn request_path<W: CollisionWorld>(
        &mut self,
        world: &W,
        start: Vec2,
        end: Vec2,
        now: f64,
        force: bool,
    ) -> bool {
        if !force {
            if let Some(last) = self.last_request_at {
                if now - last < self.settings.path_request_interval {
                    return false;
                }
            }
        }
        self.last_request_at = Some(now);
        self.state = if self.path.is_some() {
            PlannerState::Replanning
        } else {
            PlannerState::Planning
        };

        let graph = self.graph.load();
        let path = self.plan(world, &graph, start, end, now);
        debug!(
            "[PlatNav Planner] {:?} -> {:?}: {:?}{} with {} commands (graph v{})",
            start,
            end,
            path.status,
            if path.partial { " (partial)" } else { "" },
            path.commands.len(),
            path.graph_version
        );

        let found = path.is_valid();
        self.state = if found && !path.commands.is_empty() {
            PlannerState::Following { cursor: 0 }
        } else {
            PlannerState::Idle
        };
        self.path = Some(path);
        found
    }

    fn plan<W: CollisionWorld>(
        &mut self,
        world: &W,
        graph: &Arc<NavGraph>,
        start: Vec2,
        end: Vec2,
        now: f64,
    ) -> Path {
        let version = graph.version;
        let mut path = Path {
            status: PathStatus::Valid,
            partial: false,
            start,
            end,
            commands: Vec::new(),
            cursor: 0,
            created_at: now,
            graph_version: version,
        };

        if start.distance(end) <= self.settings.arrive_distance {
            return path;
        }
        if let Some(walk) = self.same_platform_walk(world, start, end) {
            path.commands.push(walk);
            return path;
        }
        if graph.is_empty() {
            return Path::not_found(start, end, now, version);
        }

        let radius = self.settings.node_search_radius;
        let Some(start_node) = graph.find_nearest_node(start, radius) else {
            return Path::not_found(start, end, now, version);
        };
        let goal_node = graph.find_nearest_node(end, radius);

        if let Some(goal) = goal_node {
            if let Some(chain) = self.a_star(graph, start_node, goal) {
                path.commands = self.reconstruct(graph, start, end, start_node, &chain, true);
                return path;
            }
        }

        if !self.settings.allow_partial_path {
            return Path::not_found(start, end, now, version);
        }
        let target = goal_node
            .and_then(|id| graph.node(id))
            .map_or(end, |node| node.position);
        let closest = self.closest_reachable(graph, start_node, target);
        match self.a_star(graph, start_node, closest) {
            Some(chain) => {
                path.partial = true;
                path.commands = self.reconstruct(graph, start, end, start_node, &chain, false);
                path
            }
            None => Path::not_found(start, end, now, version),
        }
    }

    fn heuristic(&self, from: Vec2, goal: Vec2) -> f32 {
        let dx = (goal.x - from.x).abs();
        let dy = (goal.y - from.y).abs();
        let up = if goal.y > from.y {
            self.settings.heuristic_up_weight
        } else {
            1.0
        };
        dx + up * dy
    }

    /// Link chain from `start` to `goal`, empty when they coincide.
    fn a_star(&mut self, graph: &NavGraph, start: NodeId, goal: NodeId) -> Option<Vec<LinkIndex>> {
        let goal_pos = graph.node(goal)?.position;
        let start_pos = graph.node(start)?.position;
        let n = graph.nodes().len();
        self.scratch.reset(n);
        self.scratch.g_cost[start as usize] = 0.0;
        let h = self.heuristic(start_pos, goal_pos);
        self.scratch.open.push(SearchNode {
            node: start,
            f_cost: h,
        });

        while let Some(current) = self.scratch.open.pop() {
            let cur = current.node as usize;
            if current.node == goal {
                return Some(self.chain_to(graph, start, goal));
            }
            if self.scratch.closed[cur] {
                continue;
            }
            self.scratch.closed[cur] = true;

            let g = self.scratch.g_cost[cur];
            for &index in graph.outgoing(current.node) {
                let link = &graph.links()[index];
                let next = link.to as usize;
                if self.scratch.closed[next] {
                    continue;
                }
                let tentative = g + link.cost;
                if tentative < self.scratch.g_cost[next] {
                    self.scratch.g_cost[next] = tentative;
                    self.scratch.came_from[next] = Some(index);
                    let h = self.heuristic(graph.nodes()[next].position, goal_pos);
                    self.scratch.open.push(SearchNode {
                        node: link.to,
                        f_cost: tentative + h,
                    });
                }
            }
        }
        None
    }

    fn chain_to(&self, graph: &NavGraph, start: NodeId, goal: NodeId) -> Vec<LinkIndex> {
        let mut chain = Vec::new();
        let mut at = goal;
        while at != start && chain.len() <= graph.links().len() {
            let Some(index) = self.scratch.came_from[at as usize] else {
                break;
            };
            chain.push(index);
            at = graph.links()[index].from;
        }
        chain.reverse();
        chain
    }

    /// Breadth-first scan from `start`; the reachable node nearest `target`.
    fn closest_reachable(&mut self, graph: &NavGraph, start: NodeId, target: Vec2) -> NodeId {
        let n = graph.nodes().len();
        self.scratch.reset(n);
        let mut best = (start, f32::INFINITY);
        self.scratch.closed[start as usize] = true;
        self.scratch.queue.push_back(start);
        while let Some(id) = self.scratch.queue.pop_front() {
            let d_sq = graph.nodes()[id as usize].position.distance_squared(target);
            if d_sq < best.1 {
                best = (id, d_sq);
            }
            for &index in graph.outgoing(id) {
                let to = graph.links()[index].to;
                if !self.scratch.closed[to as usize] {
                    self.scratch.closed[to as usize] = true;
                    self.scratch.queue.push_back(to);
                }
            }
        }
        best.0
    }

    fn reconstruct(
        &self,
        graph: &NavGraph,
        start: Vec2,
        end: Vec2,
        start_node: NodeId,
        chain: &[LinkIndex],
        reaches_goal: bool,
    ) -> Vec<MoveCommand> {
        let s = &self.settings;
        let mut commands = Vec::with_capacity(chain.len() + 2);
        let Some(first) = graph.node(start_node) else {
            return commands;
        };
        if start.distance(first.position) > s.arrive_distance {
            let mut walk = MoveCommand::walk(start, first.position, s.walk_speed, Some(first.platform));
            walk.is_one_way = first.is_one_way;
            commands.push(walk);
        }

        let mut last = first;
        for &index in chain {
            let link = &graph.links()[index];
            let (Some(from), Some(to)) = (graph.node(link.from), graph.node(link.to)) else {
                break;
            };
            commands.push(MoveCommand::from_link(link, from, to));
            last = to;
        }

        if reaches_goal && last.position.distance(end) > s.arrive_distance {
            let mut walk = MoveCommand::walk(last.position, end, s.walk_speed, Some(last.platform));
            walk.is_one_way = last.is_one_way;
            commands.push(walk);
        }
        commands
    }

    fn probe_ground<W: CollisionWorld>(&self, world: &W, point: Vec2, lift: f32) -> Option<RayHit> {
        world.cast_ray(
            point + Vec2::Y * lift,
            Vec2::NEG_Y,
            self.settings.ground_probe_distance + lift,
            CollisionFilter::ALL,
        )
    }

    /// Single walk when both ends stand on the same platform with no gap or
    /// wall between them.
    fn same_platform_walk<W: CollisionWorld>(&self, world: &W, start: Vec2, end: Vec2) -> Option<MoveCommand> {
        let s = &self.settings;
        let a = self.probe_ground(world, start, PROBE_LIFT)?;
        let b = self.probe_ground(world, end, PROBE_LIFT)?;
        if a.platform != b.platform || (a.point.y - b.point.y).abs() > s.same_platform_max_height_diff {
            return None;
        }

        let span = b.point.x - a.point.x;
        let steps = (span.abs() / s.gap_probe_spacing).ceil() as usize;
        let tolerance = s.same_platform_max_height_diff;
        for i in 1..steps {
            let t = i as f32 / steps as f32;
            let expected = a.point.lerp(b.point, t);
            let hit = self.probe_ground(world, expected, tolerance + PROBE_LIFT)?;
            if hit.platform != a.platform || (hit.point.y - expected.y).abs() > tolerance {
                return None;
            }
        }

        let lift = Vec2::Y * (s.probe_radius + PROBE_LIFT);
        let from = a.point + lift;
        let delta = b.point + lift - from;
        let length = delta.length();
        if length > 1e-4 {
            if let Some(wall) = world.cast_ray(from, delta / length, length, s.obstacle_filter) {
                if wall.platform != a.platform || wall.normal.y < s.top_normal_threshold {
                    return None;
                }
            }
        }

        let mut walk = MoveCommand::walk(start, end, s.walk_speed, Some(a.platform));
        walk.is_one_way = a.one_way;
        Some(walk)
    }

    /// Why the current path should be replaced, if it should.
    pub fn validate_path(&self, position: Vec2, goal: Vec2, now: f64) -> Option<PathInvalidation> {
        let path = self.path.as_ref()?;
        if path.age(now) > self.settings.path_expire_time {
            return Some(PathInvalidation::Expired);
        }
        if goal.distance(path.end) > self.settings.target_move_threshold {
            return Some(PathInvalidation::TargetMoved);
        }
        let command = path.current()?;
        if command.kind == MoveKind::Walk {
            let on_segment = closest_point_on_segment(position, path.current_origin(), command.target);
            if position.distance(on_segment) > self.settings.path_deviation_threshold {
                return Some(PathInvalidation::Deviated);
            }
        }
        None
    }

    /// Force a replan when the current path is no longer trustworthy.
    pub fn try_auto_revalidate<W: CollisionWorld>(
        &mut self,
        world: &W,
        position: Vec2,
        goal: Vec2,
        now: f64,
    ) -> bool {
        let Some(reason) = self.validate_path(position, goal, now) else {
            return false;
        };
        debug!("[PlatNav Planner] path invalidated ({reason:?}), replanning");
        self.request_path(world, position, goal, now, true);
        true
    }

    pub fn current_command(&self) -> Option<&MoveCommand> {
        self.path.as_ref()?.current()
    }

    /// Move to the next command. Returns false once the path is exhausted.
    pub fn advance(&mut self) -> bool {
        let Some(path) = self.path.as_mut() else {
            return false;
        };
        if path.cursor < path.commands.len() {
            path.cursor += 1;
        }
        if path.is_finished() {
            self.state = PlannerState::Idle;
            false
        } else {
            self.state = PlannerState::Following {
                cursor: path.cursor,
            };
            true
        }
    }

    pub fn is_current_command_complete(&self, position: Vec2, is_grounded: bool) -> bool {
        let Some(command) = self.current_command() else {
            return false;
        };
        match command.kind {
            MoveKind::Walk => (position.x - command.target.x).abs() <= self.settings.walk_complete_distance,
            MoveKind::Jump | MoveKind::Fall | MoveKind::DropDown => {
                is_grounded && position.distance(command.target) <= self.settings.air_complete_distance
            }
        }
    }
}
