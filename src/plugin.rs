use bevy::prelude::*;

use crate::graph_builder::GraphBuilder;
use crate::path::MoveCommand;
use crate::planner::Planner;
use crate::settings::NavSettings;
use crate::world::ShapeWorld;

/// Adds navigation to an app: the level geometry, the graph store, and the
/// systems that rebuild the graph and drive [`NavAgent`]s.
#[derive(Default)]
pub struct PlatformNavPlugin {
    pub settings: NavSettings,
}

/// Level geometry the graph is built from. Replacing or mutating it
/// triggers a rebuild on the next update.
#[derive(Resource, Clone, Debug, Default)]
pub struct NavLevel(pub ShapeWorld);

#[derive(Resource)]
pub struct NavGraphStore(pub GraphBuilder);

/// A navigating entity. The host game writes `position`, `grounded` and
/// `goal`, then reads `current_command()`.
#[derive(Component)]
pub struct NavAgent {
    pub position: Vec2,
    pub grounded: bool,
    pub goal: Option<Vec2>,
    planner: Planner,
}

impl NavAgent {
    pub fn new(store: &NavGraphStore, position: Vec2) -> Result<Self, String> {
        let planner = Planner::new(store.0.settings().clone(), store.0.shared())?;
        Ok(Self {
            position,
            grounded: true,
            goal: None,
            planner,
        })
    }

    /// Attach to a new graph store, dropping the current path.
    pub fn rebind(&mut self, store: &NavGraphStore) -> Result<(), String> {
        self.planner = Planner::new(store.0.settings().clone(), store.0.shared())?;
        Ok(())
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn current_command(&self) -> Option<&MoveCommand> {
        self.planner.current_command()
    }
}

impl Plugin for PlatformNavPlugin {
    fn build(&self, app: &mut App) {
        let builder = match GraphBuilder::new(self.settings.clone()) {
            Ok(builder) => builder,
            Err(e) => {
                error!("[PlatNav] Invalid navigation settings, plugin disabled: {e}");
                return;
            }
        };
        app.insert_resource(self.settings.clone())
            .init_resource::<NavLevel>()
            .insert_resource(NavGraphStore(builder))
            .add_systems(Update, (rebuild_nav_graph, drive_nav_agents).chain());
    }
}

fn rebuild_nav_graph(level: Res<NavLevel>, mut store: ResMut<NavGraphStore>) {
    if level.is_changed() {
        store.0.rebuild(&level.0);
    }
}

fn drive_nav_agents(
    time: Res<Time>,
    level: Res<NavLevel>,
    store: Res<NavGraphStore>,
    mut agents: Query<&mut NavAgent>,
) {
    let now = time.elapsed_secs_f64();
    let version = store.0.shared().version();

    for mut agent in &mut agents {
        let agent = &mut *agent;
        let Some(goal) = agent.goal else {
            if agent.planner.path().is_some() {
                agent.planner.clear();
            }
            continue;
        };

        match agent.planner.path() {
            None => {
                agent.planner.request_path(&level.0, agent.position, goal, now, false);
                continue;
            }
            Some(path) if !path.is_valid() => {
                // Retry failed requests at the rate limit.
                agent.planner.request_path(&level.0, agent.position, goal, now, false);
                continue;
            }
            Some(path) if path.graph_version != version => {
                agent.planner.request_path(&level.0, agent.position, goal, now, true);
                continue;
            }
            Some(_) => {}
        }

        agent
            .planner
            .try_auto_revalidate(&level.0, agent.position, goal, now);
        while agent
            .planner
            .is_current_command_complete(agent.position, agent.grounded)
        {
            if !agent.planner.advance() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::MoveKind;
    use crate::planner::PlannerState;
    use crate::world::fixtures::*;

    fn app_with_level(world: ShapeWorld) -> App {
        let mut app = App::new();
        app.init_resource::<Time>()
            .add_plugins(PlatformNavPlugin::default())
            .insert_resource(NavLevel(world));
        app
    }

    fn spawn_agent(app: &mut App, position: Vec2, goal: Vec2) -> Entity {
        let mut agent =
            NavAgent::new(app.world().resource::<NavGraphStore>(), position).expect("agent");
        agent.goal = Some(goal);
        app.world_mut().spawn(agent).id()
    }

    fn agent(app: &App, entity: Entity) -> &NavAgent {
        app.world().get::<NavAgent>(entity).expect("agent exists")
    }

    #[test]
    fn first_update_builds_graph_and_plans() {
        let mut app = app_with_level(two_platforms(3.0));
        let entity = spawn_agent(&mut app, Vec2::new(1.0, 0.0), Vec2::new(9.5, 0.0));
        app.update();

        assert_eq!(app.world().resource::<NavGraphStore>().0.graph().version, 1);
        let agent = agent(&app, entity);
        let path = agent.planner().path().expect("path requested");
        assert!(path.is_valid());
        assert!(path.commands.iter().any(|c| c.kind == MoveKind::Jump));
        assert_eq!(agent.planner().state(), PlannerState::Following { cursor: 0 });
    }

    #[test]
    fn reaching_a_target_advances_the_command() {
        let mut app = app_with_level(two_platforms(3.0));
        let entity = spawn_agent(&mut app, Vec2::new(1.0, 0.0), Vec2::new(9.5, 0.0));
        app.update();

        let first = agent(&app, entity)
            .current_command()
            .expect("first command")
            .clone();
        app.world_mut()
            .get_mut::<NavAgent>(entity)
            .expect("agent exists")
            .position = first.target;
        app.update();

        let path = agent(&app, entity).planner().path().expect("path");
        assert_eq!(path.cursor, 1, "{:?}", path.commands);
    }

    #[test]
    fn level_change_rebuilds_and_replans() {
        let mut app = app_with_level(flat_ground());
        let entity = spawn_agent(&mut app, Vec2::new(-4.0, 0.0), Vec2::new(4.0, 0.0));
        app.update();
        assert_eq!(agent(&app, entity).planner().path().map(|p| p.graph_version), Some(1));

        app.world_mut().resource_mut::<NavLevel>().0 = two_platforms(3.0);
        app.world_mut()
            .get_mut::<NavAgent>(entity)
            .expect("agent exists")
            .position = Vec2::new(1.0, 0.0);
        app.world_mut()
            .get_mut::<NavAgent>(entity)
            .expect("agent exists")
            .goal = Some(Vec2::new(9.5, 0.0));
        app.update();

        assert_eq!(app.world().resource::<NavGraphStore>().0.graph().version, 2);
        let path = agent(&app, entity).planner().path().expect("path");
        assert_eq!(path.graph_version, 2);
        assert!(path.is_valid());
    }

    #[test]
    fn clearing_the_goal_drops_the_path() {
        let mut app = app_with_level(flat_ground());
        let entity = spawn_agent(&mut app, Vec2::new(-4.0, 0.0), Vec2::new(4.0, 0.0));
        app.update();
        assert!(agent(&app, entity).planner().path().is_some());

        app.world_mut()
            .get_mut::<NavAgent>(entity)
            .expect("agent exists")
            .goal = None;
        app.update();
        assert!(agent(&app, entity).planner().path().is_none());
        assert_eq!(agent(&app, entity).planner().state(), PlannerState::Idle);
    }
}
