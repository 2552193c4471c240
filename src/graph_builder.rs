use std::collections::BTreeMap;
use std::sync::Arc;

use bevy::math::Rect;
use bevy::prelude::*;

use crate::graph::{NavGraph, NavLink, NavNode, NodeId, NodeKind, SharedNavGraph};
use crate::links::{generate_links, LinkStats};
use crate::settings::NavSettings;
use crate::world::{point_in_polygon, signed_area, CollisionWorld, PlatformHandle, PlatformShape};

/// Upward-facing boundary segment, stored left to right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TopEdge {
    pub platform: PlatformHandle,
    pub one_way: bool,
    pub left: Vec2,
    pub right: Vec2,
}

/// Run of merged top edges at a continuous height. A polyline sorted by x.
#[derive(Clone, Debug, PartialEq)]
pub struct WalkSpan {
    pub platform: PlatformHandle,
    pub one_way: bool,
    pub points: Vec<Vec2>,
}

impl WalkSpan {
    fn from_edge(edge: &TopEdge) -> Self {
        Self {
            platform: edge.platform,
            one_way: edge.one_way,
            points: vec![edge.left, edge.right],
        }
    }

    pub fn left(&self) -> Vec2 {
        self.points[0]
    }

    pub fn right(&self) -> Vec2 {
        self.points[self.points.len() - 1]
    }

    pub fn width(&self) -> f32 {
        self.right().x - self.left().x
    }

    /// Surface height at `x`, clamped to the span ends.
    pub fn height_at(&self, x: f32) -> f32 {
        if x <= self.left().x {
            return self.left().y;
        }
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if x <= b.x {
                let run = b.x - a.x;
                if run <= f32::EPSILON {
                    return b.y;
                }
                return a.y + (b.y - a.y) * (x - a.x) / run;
            }
        }
        self.right().y
    }

    fn point_at(&self, x: f32) -> Vec2 {
        Vec2::new(x, self.height_at(x))
    }
}

/// Every top edge of every shape, before burial filtering.
pub fn extract_top_edges<S: PlatformShape>(shape: &S, settings: &NavSettings) -> Vec<TopEdge> {
    let mut edges = Vec::new();
    for path in shape.boundary_paths() {
        let n = path.len();
        if n < 2 {
            continue;
        }
        // Open two-point paths are edge colliders: only their upper side counts.
        let winding = if n == 2 { 0.0 } else { signed_area(path).signum() };
        let segments = if n == 2 { 1 } else { n };
        for i in 0..segments {
            let a = path[i];
            let b = path[(i + 1) % n];
            let run = b - a;
            if run.x.abs() <= settings.min_top_edge_width {
                continue;
            }
            let right_normal = Vec2::new(run.y, -run.x).normalize_or_zero();
            let normal = if winding > 0.0 {
                right_normal
            } else if winding < 0.0 {
                -right_normal
            } else if right_normal.y >= 0.0 {
                right_normal
            } else {
                -right_normal
            };
            if normal.y <= settings.top_normal_threshold {
                continue;
            }
            let (left, right) = if a.x <= b.x { (a, b) } else { (b, a) };
            edges.push(TopEdge {
                platform: shape.platform_handle(),
                one_way: shape.is_one_way(),
                left,
                right,
            });
        }
    }
    edges
}

/// Merge edges that share a platform and meet at the same height into spans.
/// Output is ordered by (platform, one_way, left x), which keeps rebuilds
/// deterministic.
pub fn merge_spans(edges: &[TopEdge], epsilon: f32) -> Vec<WalkSpan> {
    let mut groups: BTreeMap<(PlatformHandle, bool), Vec<TopEdge>> = BTreeMap::new();
    for edge in edges {
        groups
            .entry((edge.platform, edge.one_way))
            .or_default()
            .push(*edge);
    }

    let mut spans = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(|a, b| a.left.x.total_cmp(&b.left.x).then(a.left.y.total_cmp(&b.left.y)));
        let mut open: Vec<WalkSpan> = Vec::new();
        for edge in &group {
            let joined = open.iter_mut().find(|span| {
                let right = span.right();
                edge.left.x <= right.x + epsilon
                    && edge.left.x >= span.left().x - epsilon
                    && (span.height_at(edge.left.x) - edge.left.y).abs() <= epsilon
            });
            match joined {
                Some(span) => {
                    if edge.right.x > span.right().x + epsilon {
                        if edge.left.x < span.right().x - epsilon {
                            // Overlap: continue from where the span ends.
                            let end = span.right().x;
                            let y = edge.left.y
                                + (edge.right.y - edge.left.y) * (end - edge.left.x)
                                    / (edge.right.x - edge.left.x);
                            if let Some(last) = span.points.last_mut() {
                                last.y = (last.y + y) * 0.5;
                            }
                        }
                        span.points.push(edge.right);
                    }
                }
                None => open.push(WalkSpan::from_edge(edge)),
            }
        }
        open.sort_by(|a, b| a.left().x.total_cmp(&b.left().x));
        spans.extend(open);
    }
    spans
}

/// Node positions for one span, left to right.
pub fn place_span_nodes(span: &WalkSpan, settings: &NavSettings) -> Vec<(Vec2, NodeKind)> {
    let width = span.width();
    if width < settings.min_platform_width {
        let mid = span.left().x + width * 0.5;
        return vec![(span.point_at(mid), NodeKind::Surface)];
    }

    let left = span.left().x + settings.edge_inset;
    let right = span.right().x - settings.edge_inset;
    let usable = right - left;
    let intervals = ((usable / settings.interior_spacing()).round() as usize).max(1);

    let mut out = Vec::with_capacity(intervals + 1);
    out.push((span.point_at(left), NodeKind::LeftEdge));
    for i in 1..intervals {
        let x = left + usable * i as f32 / intervals as f32;
        out.push((span.point_at(x), NodeKind::Surface));
    }
    out.push((span.point_at(right), NodeKind::RightEdge));
    out
}

/// Parts of `edge` whose lifted probe line is not inside any shape. The edge
/// is cut wherever another boundary crosses that line.
fn open_pieces<S: PlatformShape>(edge: &TopEdge, shapes: &[&S], lift: f32) -> Vec<TopEdge> {
    let offset = Vec2::Y * lift;
    let (p, q) = (edge.left + offset, edge.right + offset);
    let mut cuts = vec![0.0f32, 1.0];
    for other in shapes {
        for path in other.boundary_paths() {
            let n = path.len();
            let segments = match n {
                0 | 1 => 0,
                2 => 1,
                _ => n,
            };
            for i in 0..segments {
                if let Some(t) = segment_crossing(p, q, path[i], path[(i + 1) % n]) {
                    cuts.push(t);
                }
            }
        }
    }
    cuts.sort_by(|a, b| a.total_cmp(b));
    cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-6);

    let mut pieces: Vec<TopEdge> = Vec::new();
    for pair in cuts.windows(2) {
        let (t0, t1) = (pair[0], pair[1]);
        let left = edge.left.lerp(edge.right, t0);
        let right = edge.left.lerp(edge.right, t1);
        if right.x - left.x < 1e-3 {
            continue;
        }
        let probe = (left + right) * 0.5 + offset;
        let covered = shapes.iter().any(|other| {
            other
                .boundary_paths()
                .iter()
                .any(|path| path.len() > 2 && point_in_polygon(probe, path))
        });
        if covered {
            continue;
        }
        match pieces.last_mut() {
            Some(last) if (last.right - left).length() < 1e-4 => last.right = right,
            _ => pieces.push(TopEdge { left, right, ..*edge }),
        }
    }
    pieces
}

/// Parameter along `p..q` where it crosses `a..b`, if it does.
fn segment_crossing(p: Vec2, q: Vec2, a: Vec2, b: Vec2) -> Option<f32> {
    let r = q - p;
    let s = b - a;
    let denom = r.perp_dot(s);
    if denom.abs() < 1e-9 {
        return None;
    }
    let t = (a - p).perp_dot(s) / denom;
    let u = (a - p).perp_dot(r) / denom;
    ((0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)).then_some(t)
}

/// Geometry scan: shapes -> top edges -> spans -> nodes + walk links.
/// Returns a graph with adjacency still empty; link generation finishes it.
pub fn build_walk_graph<W: CollisionWorld>(
    world: &W,
    settings: &NavSettings,
    version: u64,
) -> Result<NavGraph, String> {
    let region = Rect::from_corners(settings.scan_min, settings.scan_max);
    let shapes = world.query_platform_shapes(region);
    if shapes.is_empty() {
        warn!("[PlatNav Graph] no platform shapes inside scan region {:?}", region);
        return NavGraph::from_nodes(version, Vec::new(), settings.cell_size);
    }

    let mut edges = Vec::new();
    let mut buried = 0usize;
    for shape in &shapes {
        for edge in extract_top_edges(*shape, settings) {
            let open = open_pieces(&edge, &shapes, settings.buried_probe_offset);
            if open.len() != 1 || open[0] != edge {
                buried += 1;
            }
            edges.extend(open);
        }
    }

    let spans = merge_spans(&edges, settings.height_merge_epsilon);
    let mut nodes = Vec::new();
    let mut span_ranges = Vec::with_capacity(spans.len());
    for (span_id, span) in spans.iter().enumerate() {
        let start = nodes.len();
        for (position, kind) in place_span_nodes(span, settings) {
            nodes.push(NavNode {
                id: nodes.len() as NodeId,
                position,
                kind,
                platform: span.platform,
                span: span_id as u32,
                is_one_way: span.one_way,
            });
        }
        span_ranges.push(start..nodes.len());
    }

    debug!(
        "[PlatNav Graph] {} shapes, {} top edges ({} buried), {} spans",
        shapes.len(),
        edges.len(),
        buried,
        spans.len()
    );

    let mut graph = NavGraph::from_nodes(version, nodes, settings.cell_size)?;
    for range in span_ranges {
        for i in range.start..range.end.saturating_sub(1) {
            let a = graph.nodes()[i].clone();
            let b = graph.nodes()[i + 1].clone();
            graph.push_link(NavLink::walk(&a, &b, settings.walk_speed));
            graph.push_link(NavLink::walk(&b, &a, settings.walk_speed));
        }
    }
    Ok(graph)
}

/// Owns the settings and the published graph. Each rebuild produces a new
/// graph version and swaps it in as a whole.
pub struct GraphBuilder {
    settings: NavSettings,
    shared: SharedNavGraph,
    next_version: u64,
    last_link_stats: LinkStats,
}

impl GraphBuilder {
    pub fn new(settings: NavSettings) -> Result<Self, String> {
        settings.validate()?;
        let empty = NavGraph::empty(settings.cell_size)?;
        Ok(Self {
            settings,
            shared: SharedNavGraph::new(empty),
            next_version: 1,
            last_link_stats: LinkStats::default(),
        })
    }

    pub fn settings(&self) -> &NavSettings {
        &self.settings
    }

    /// Handle for planners. Clones share the same publication cell.
    pub fn shared(&self) -> SharedNavGraph {
        self.shared.clone()
    }

    pub fn graph(&self) -> Arc<NavGraph> {
        self.shared.load()
    }

    pub fn last_link_stats(&self) -> &LinkStats {
        &self.last_link_stats
    }

    pub fn rebuild<W: CollisionWorld>(&mut self, world: &W) -> Arc<NavGraph> {
        let version = self.next_version;
        let mut graph = match build_walk_graph(world, &self.settings, version) {
            Ok(graph) => graph,
            Err(err) => {
                warn!("[PlatNav Graph] rebuild v{version} failed: {err}");
                return self.shared.load();
            }
        };
        self.next_version += 1;

        self.last_link_stats = generate_links(&mut graph, world, &self.settings);
        graph.rebuild_adjacency();

        let stats = graph.stats();
        info!(
            "[PlatNav Graph] v{} ready: {} nodes ({} edge), {} links (walk {}, jump {}, fall {}, drop {})",
            stats.version,
            stats.nodes,
            stats.edge_nodes,
            stats.links,
            stats.walk_links,
            stats.jump_links,
            stats.fall_links,
            stats.drop_through_links
        );

        let graph = Arc::new(graph);
        self.shared.store(Arc::clone(&graph));
        graph
    }

    pub fn find_nearest_node(&self, point: Vec2, max_distance: f32) -> Option<NodeId> {
        self.shared.load().find_nearest_node(point, max_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LinkKind;
    use crate::world::fixtures::*;
    use crate::world::{LevelShape, ShapeWorld};

    fn builder() -> GraphBuilder {
        GraphBuilder::new(NavSettings::default()).expect("default settings are valid")
    }

    #[test]
    fn box_yields_single_top_edge_for_either_winding() {
        let settings = NavSettings::default();
        let ccw = LevelShape::rect(GROUND, Vec2::new(0.0, 0.0), Vec2::new(4.0, 1.0));
        let edges = extract_top_edges(&ccw, &settings);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].left, Vec2::new(0.0, 1.0));
        assert_eq!(edges[0].right, Vec2::new(4.0, 1.0));

        let mut cw_points = ccw.paths[0].clone();
        cw_points.reverse();
        let cw = LevelShape::polygon(GROUND, cw_points);
        assert_eq!(extract_top_edges(&cw, &settings), edges);
    }

    #[test]
    fn slopes_pass_normal_test_and_walls_do_not() {
        let settings = NavSettings::default();
        // Gentle ramp on top, vertical sides.
        let ramp = LevelShape::polygon(
            GROUND,
            vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(6.0, 0.0),
                Vec2::new(6.0, 2.0),
                Vec2::new(0.0, 1.0),
            ],
        );
        let edges = extract_top_edges(&ramp, &settings);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].left, Vec2::new(0.0, 1.0));

        // 60 degree slope is too steep at the default threshold.
        let steep = LevelShape::polygon(
            GROUND,
            vec![Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(0.0, 3.464)],
        );
        assert!(extract_top_edges(&steep, &settings).is_empty());
    }

    #[test]
    fn adjoining_edges_merge_into_one_span() {
        let edges = [
            TopEdge {
                platform: GROUND,
                one_way: false,
                left: Vec2::new(2.0, 0.0),
                right: Vec2::new(4.0, 0.0),
            },
            TopEdge {
                platform: GROUND,
                one_way: false,
                left: Vec2::new(0.0, 0.0),
                right: Vec2::new(2.0, 0.0),
            },
            TopEdge {
                platform: GROUND,
                one_way: false,
                left: Vec2::new(4.0, 1.0),
                right: Vec2::new(6.0, 1.0),
            },
        ];
        let spans = merge_spans(&edges, 0.05);
        assert_eq!(spans.len(), 2, "height step splits the run: {spans:?}");
        assert_eq!(spans[0].left().x, 0.0);
        assert_eq!(spans[0].right().x, 4.0);
        assert_eq!(spans[1].left(), Vec2::new(4.0, 1.0));
    }

    #[test]
    fn span_nodes_are_inset_and_evenly_spaced() {
        let settings = NavSettings::default();
        let span = WalkSpan {
            platform: GROUND,
            one_way: false,
            points: vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)],
        };
        let nodes = place_span_nodes(&span, &settings);
        assert_eq!(nodes.first().map(|n| n.1), Some(NodeKind::LeftEdge));
        assert_eq!(nodes.last().map(|n| n.1), Some(NodeKind::RightEdge));
        assert!((nodes[0].0.x - 0.3).abs() < 1e-5);
        assert!((nodes[nodes.len() - 1].0.x - 9.7).abs() < 1e-5);
        // 9.4 usable / 2.0 spacing rounds to 5 intervals.
        assert_eq!(nodes.len(), 6);
        let gaps: Vec<f32> = nodes.windows(2).map(|w| w[1].0.x - w[0].0.x).collect();
        assert!(gaps.iter().all(|g| (g - gaps[0]).abs() < 1e-4));

        let dense = NavSettings {
            dense_mode: true,
            ..NavSettings::default()
        };
        assert!(place_span_nodes(&span, &dense).len() > nodes.len());
    }

    #[test]
    fn narrow_span_gets_single_surface_node() {
        let span = WalkSpan {
            platform: GROUND,
            one_way: false,
            points: vec![Vec2::new(2.0, 1.0), Vec2::new(2.6, 1.0)],
        };
        let nodes = place_span_nodes(&span, &NavSettings::default());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].1, NodeKind::Surface);
        assert!((nodes[0].0.x - 2.3).abs() < 1e-5);
    }

    #[test]
    fn empty_world_gives_valid_empty_graph() {
        let mut builder = builder();
        let graph = builder.rebuild(&ShapeWorld::new());
        assert!(graph.is_empty());
        assert_eq!(graph.version, 1);
        assert!(builder.find_nearest_node(Vec2::ZERO, 100.0).is_none());
    }

    #[test]
    fn flat_ground_walk_links_are_bidirectional() {
        let mut builder = builder();
        let graph = builder.rebuild(&flat_ground());
        let stats = graph.stats();
        assert_eq!(stats.edge_nodes, 2);
        assert_eq!(stats.walk_links, 2 * (stats.nodes - 1));
        for link in graph.links().iter().filter(|l| l.kind == LinkKind::Walk) {
            assert!(graph.has_link(link.to, link.from, LinkKind::Walk));
            let d = graph.nodes()[link.from as usize]
                .position
                .distance(graph.nodes()[link.to as usize].position);
            assert!((link.cost - d).abs() < 1e-5);
        }
        for node in graph.nodes() {
            assert!(node.position.y.abs() < 1e-5);
        }
    }

    #[test]
    fn stacked_tiles_drop_buried_tops_and_split_spans_by_gap() {
        // Two columns of terrain with a pit between them, all one handle.
        //   row 1: ##..##
        //   row 0: ##..##
        let tiles = [1, 1, 0, 0, 1, 1, 1, 1, 0, 0, 1, 1];
        let handle = PlatformHandle(50);
        let mut world = ShapeWorld::new();
        world.extend(LevelShape::tile_rows(handle, Vec2::ZERO, 1.0, 6, 2, &tiles));
        let mut builder = builder();
        let graph = builder.rebuild(&world);

        assert!(graph.nodes().iter().all(|n| (n.position.y - 2.0).abs() < 1e-5));
        let spans: std::collections::BTreeSet<u32> = graph.nodes().iter().map(|n| n.span).collect();
        assert_eq!(spans.len(), 2);
        for link in graph.links().iter().filter(|l| l.kind == LinkKind::Walk) {
            assert_eq!(
                graph.nodes()[link.from as usize].span,
                graph.nodes()[link.to as usize].span,
                "walk links never cross the pit"
            );
        }
    }

    fn ground_with_pillar(pillar_left: f32, pillar_right: f32) -> ShapeWorld {
        ShapeWorld::new()
            .with(LevelShape::rect(PlatformHandle(1), Vec2::new(0.0, -1.0), Vec2::new(10.0, 0.0)))
            .with(LevelShape::rect(
                PlatformHandle(2),
                Vec2::new(pillar_left, 0.0),
                Vec2::new(pillar_right, 2.0),
            ))
    }

    fn ground_xs(graph: &NavGraph) -> Vec<f32> {
        graph
            .nodes()
            .iter()
            .filter(|n| n.platform == PlatformHandle(1))
            .map(|n| n.position.x)
            .collect()
    }

    #[test]
    fn pillar_in_the_middle_splits_ground_instead_of_burying_it() {
        let graph = builder().rebuild(&ground_with_pillar(4.0, 6.0));
        let xs = ground_xs(&graph);
        assert!(xs.iter().any(|&x| x < 4.0), "{xs:?}");
        assert!(xs.iter().any(|&x| x > 6.0), "{xs:?}");
        assert!(xs.iter().all(|&x| !(4.0..=6.0).contains(&x)), "{xs:?}");

        for link in graph.links().iter().filter(|l| l.kind == LinkKind::Walk) {
            let a = graph.nodes()[link.from as usize].position.x;
            let b = graph.nodes()[link.to as usize].position.x;
            assert!(a.max(b) < 4.0 || a.min(b) > 6.0, "walk {a} -> {b} passes through the pillar");
        }
        // Pillar top stays walkable.
        assert!(graph.nodes().iter().any(|n| n.platform == PlatformHandle(2)));
    }

    #[test]
    fn off_centre_pillar_leaves_no_nodes_inside_it() {
        let graph = builder().rebuild(&ground_with_pillar(1.0, 3.0));
        let xs = ground_xs(&graph);
        assert!(xs.iter().all(|&x| !(1.0..=3.0).contains(&x)), "{xs:?}");
        assert!(xs.iter().filter(|&&x| x > 3.0).count() >= 3, "{xs:?}");
        assert!(xs.iter().any(|&x| x < 1.0), "{xs:?}");
    }

    #[test]
    fn rebuild_round_trip_reproduces_counts() {
        let world = two_platforms(3.0)
            .with(LevelShape::rect(PlatformHandle(20), Vec2::new(2.0, 2.0), Vec2::new(5.0, 2.3)).one_way());
        let mut first = builder();
        let stats_a = first.rebuild(&world).stats();
        let json = serde_json::to_string(&stats_a).expect("stats serialize");
        drop(first);

        let mut second = builder();
        let stats_b = second.rebuild(&world).stats();
        let restored: crate::graph::GraphStats = serde_json::from_str(&json).expect("stats parse");
        assert_eq!(restored, stats_b);
        assert!(stats_b.jump_links > 0);
    }

    #[test]
    fn rebuild_publishes_new_version_without_touching_held_snapshot() {
        let mut builder = builder();
        let shared = builder.shared();
        builder.rebuild(&flat_ground());
        let held = shared.load();
        assert_eq!(held.version, 1);
        let held_nodes = held.nodes().len();

        builder.rebuild(&two_platforms(3.0));
        assert_eq!(shared.version(), 2);
        assert_eq!(held.version, 1);
        assert_eq!(held.nodes().len(), held_nodes);
        assert!(held.links().iter().all(|l| l.kind == LinkKind::Walk));
    }
}
