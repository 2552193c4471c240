use std::sync::{Arc, RwLock};

use bevy::prelude::*;

use crate::spatial_grid::{NodeRef, SpatialGrid};
use crate::world::PlatformHandle;

pub type NodeId = NodeRef;
pub type LinkIndex = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Surface,
    LeftEdge,
    RightEdge,
}

impl NodeKind {
    pub fn is_edge(self) -> bool {
        matches!(self, NodeKind::LeftEdge | NodeKind::RightEdge)
    }

    /// Horizontal direction pointing off the platform, zero for surfaces.
    pub fn outward(self) -> f32 {
        match self {
            NodeKind::LeftEdge => -1.0,
            NodeKind::RightEdge => 1.0,
            NodeKind::Surface => 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NavNode {
    pub id: NodeId,
    pub position: Vec2,
    pub kind: NodeKind,
    pub platform: PlatformHandle,
    /// Merged walkable span the node was emitted from.
    pub span: u32,
    pub is_one_way: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LinkKind {
    Walk,
    Jump,
    Fall,
    DropThrough,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NavLink {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: LinkKind,
    pub cost: f32,
    pub duration: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    /// Sampled arc, kept for visualization and re-validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<Vec2>>,
}

impl NavLink {
    pub fn walk(from: &NavNode, to: &NavNode, walk_speed: f32) -> Self {
        let distance = from.position.distance(to.position);
        Self {
            from: from.id,
            to: to.id,
            kind: LinkKind::Walk,
            cost: distance,
            duration: distance / walk_speed,
            velocity_x: (to.position.x - from.position.x).signum() * walk_speed,
            velocity_y: 0.0,
            trajectory: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GraphStats {
    pub version: u64,
    pub nodes: usize,
    pub surface_nodes: usize,
    pub edge_nodes: usize,
    pub links: usize,
    pub walk_links: usize,
    pub jump_links: usize,
    pub fall_links: usize,
    pub drop_through_links: usize,
}

/// Traversability graph. Built by the graph builder, populated by the link
/// calculator, then frozen and shared read-only.
#[derive(Clone, Debug)]
pub struct NavGraph {
    pub version: u64,
    nodes: Vec<NavNode>,
    links: Vec<NavLink>,
    adjacency: Vec<Vec<LinkIndex>>,
    spatial: SpatialGrid,
}

impl NavGraph {
    pub fn empty(cell_size: f32) -> Result<Self, String> {
        Ok(Self {
            version: 0,
            nodes: Vec::new(),
            links: Vec::new(),
            adjacency: Vec::new(),
            spatial: SpatialGrid::new(cell_size)?,
        })
    }

    /// Assembles a graph from finished nodes: ids are reassigned densely and
    /// the spatial index is built over them.
    pub fn from_nodes(version: u64, mut nodes: Vec<NavNode>, cell_size: f32) -> Result<Self, String> {
        for (i, node) in nodes.iter_mut().enumerate() {
            node.id = i as NodeId;
        }
        let spatial = SpatialGrid::build(cell_size, nodes.iter().map(|n| n.position))?;
        Ok(Self {
            version,
            adjacency: vec![Vec::new(); nodes.len()],
            nodes,
            links: Vec::new(),
            spatial,
        })
    }

    pub fn nodes(&self) -> &[NavNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[NavLink] {
        &self.links
    }

    pub fn node(&self, id: NodeId) -> Option<&NavNode> {
        self.nodes.get(id as usize)
    }

    pub fn link(&self, index: LinkIndex) -> Option<&NavLink> {
        self.links.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn spatial(&self) -> &SpatialGrid {
        &self.spatial
    }

    /// Indices of links leaving `id`. Valid once adjacency has been rebuilt.
    pub fn outgoing(&self, id: NodeId) -> &[LinkIndex] {
        self.adjacency
            .get(id as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn outgoing_links(&self, id: NodeId) -> impl Iterator<Item = &NavLink> + '_ {
        self.outgoing(id).iter().map(|i| &self.links[*i])
    }

    pub fn find_nearest_node(&self, point: Vec2, max_distance: f32) -> Option<NodeId> {
        self.spatial.find_nearest(point, max_distance)
    }

    pub fn find_nodes_in_range(&self, point: Vec2, radius: f32, out: &mut Vec<NodeId>) {
        self.spatial.find_in_range(point, radius, out);
    }

    pub fn push_link(&mut self, link: NavLink) -> LinkIndex {
        self.links.push(link);
        self.links.len() - 1
    }

    /// O(V + E) rebuild of the outgoing-link lists.
    pub fn rebuild_adjacency(&mut self) {
        for list in &mut self.adjacency {
            list.clear();
        }
        self.adjacency.resize_with(self.nodes.len(), Vec::new);
        for (i, link) in self.links.iter().enumerate() {
            self.adjacency[link.from as usize].push(i);
        }
    }

    pub fn has_link(&self, from: NodeId, to: NodeId, kind: LinkKind) -> bool {
        self.outgoing_links(from)
            .any(|l| l.to == to && l.kind == kind)
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            version: self.version,
            nodes: self.nodes.len(),
            links: self.links.len(),
            ..GraphStats::default()
        };
        for node in &self.nodes {
            if node.kind.is_edge() {
                stats.edge_nodes += 1;
            } else {
                stats.surface_nodes += 1;
            }
        }
        for link in &self.links {
            match link.kind {
                LinkKind::Walk => stats.walk_links += 1,
                LinkKind::Jump => stats.jump_links += 1,
                LinkKind::Fall => stats.fall_links += 1,
                LinkKind::DropThrough => stats.drop_through_links += 1,
            }
        }
        stats
    }
}

/// Publication cell for the current graph. Rebuilds store a finished graph in
/// one swap; readers hold an `Arc` snapshot for as long as they need it.
#[derive(Clone, Debug)]
pub struct SharedNavGraph {
    inner: Arc<RwLock<Arc<NavGraph>>>,
}

impl SharedNavGraph {
    pub fn new(graph: NavGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(graph))),
        }
    }

    pub fn load(&self) -> Arc<NavGraph> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn store(&self, graph: Arc<NavGraph>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = graph,
            Err(poisoned) => *poisoned.into_inner() = graph,
        }
    }

    pub fn version(&self) -> u64 {
        self.load().version
    }
}
