use bevy::prelude::*;

use crate::graph::{LinkKind, NavLink, NavNode};
use crate::world::PlatformHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MoveKind {
    Walk,
    Jump,
    Fall,
    DropDown,
}

impl From<LinkKind> for MoveKind {
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::Walk => MoveKind::Walk,
            LinkKind::Jump => MoveKind::Jump,
            LinkKind::Fall => MoveKind::Fall,
            LinkKind::DropThrough => MoveKind::DropDown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Facing {
    Left,
    Keep,
    Right,
}

impl Facing {
    pub fn toward(from_x: f32, to_x: f32) -> Self {
        let dx = to_x - from_x;
        if dx > 1e-3 {
            Facing::Right
        } else if dx < -1e-3 {
            Facing::Left
        } else {
            Facing::Keep
        }
    }
}

/// One step for the movement controller. Created by the planner, consumed
/// by whatever drives the agent.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MoveCommand {
    pub kind: MoveKind,
    pub target: Vec2,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub duration: f32,
    pub platform: Option<PlatformHandle>,
    pub is_one_way: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<Vec2>>,
    pub facing: Facing,
}

impl MoveCommand {
    pub fn walk(from: Vec2, target: Vec2, walk_speed: f32, platform: Option<PlatformHandle>) -> Self {
        let facing = Facing::toward(from.x, target.x);
        let velocity_x = match facing {
            Facing::Left => -walk_speed,
            Facing::Right => walk_speed,
            Facing::Keep => 0.0,
        };
        Self {
            kind: MoveKind::Walk,
            target,
            velocity_x,
            velocity_y: 0.0,
            duration: from.distance(target) / walk_speed,
            platform,
            is_one_way: false,
            trajectory: None,
            facing,
        }
    }

    /// Command for traversing `link` from `from` onto `to`.
    pub fn from_link(link: &NavLink, from: &NavNode, to: &NavNode) -> Self {
        Self {
            kind: link.kind.into(),
            target: to.position,
            velocity_x: link.velocity_x,
            velocity_y: link.velocity_y,
            duration: link.duration,
            platform: Some(to.platform),
            is_one_way: to.is_one_way || (link.kind == LinkKind::DropThrough && from.is_one_way),
            trajectory: link.trajectory.clone(),
            facing: Facing::toward(from.position.x, to.position.x),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PathStatus {
    Valid,
    NotFound,
}

/// Why a path stopped being trustworthy. None of these are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PathInvalidation {
    Expired,
    TargetMoved,
    Deviated,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Path {
    pub status: PathStatus,
    /// Ends at the node closest to the goal rather than the goal itself.
    pub partial: bool,
    pub start: Vec2,
    pub end: Vec2,
    pub commands: Vec<MoveCommand>,
    pub cursor: usize,
    pub created_at: f64,
    pub graph_version: u64,
}

impl Path {
    pub fn not_found(start: Vec2, end: Vec2, now: f64, graph_version: u64) -> Self {
        Self {
            status: PathStatus::NotFound,
            partial: false,
            start,
            end,
            commands: Vec::new(),
            cursor: 0,
            created_at: now,
            graph_version,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == PathStatus::Valid
    }

    pub fn current(&self) -> Option<&MoveCommand> {
        self.commands.get(self.cursor)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.commands.len()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.created_at
    }

    /// Where the current command starts: the previous target, or the path
    /// start for the first command.
    pub fn current_origin(&self) -> Vec2 {
        match self.cursor {
            0 => self.start,
            i => self
                .commands
                .get(i - 1)
                .map_or(self.start, |prev| prev.target),
        }
    }
}
