use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

use crate::graph_builder::GraphBuilder;
use crate::level::parse_level;
use crate::plugin::{NavAgent, NavGraphStore, NavLevel};
use crate::settings::NavSettings;

/// File contents read after a create or modify event.
#[derive(Debug, PartialEq)]
pub enum LevelWatchEvent {
    LevelChanged(String),
    SettingsChanged(String),
}

/// Watch a level file (and optionally a settings file) on a background
/// thread. The thread lives as long as the process.
pub fn spawn_level_watcher(
    level_path: PathBuf,
    settings_path: Option<PathBuf>,
) -> Receiver<LevelWatchEvent> {
    let (tx, rx) = crossbeam_channel::unbounded::<LevelWatchEvent>();
    std::thread::spawn(move || {
        run_watcher(tx, level_path, settings_path);
    });
    rx
}

fn run_watcher(tx: Sender<LevelWatchEvent>, level_path: PathBuf, settings_path: Option<PathBuf>) {
    let level_clone = level_path.clone();
    let settings_clone = settings_path.clone();

    let mut watcher: RecommendedWatcher =
        match notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                handle_fs_event(event, &tx, &level_clone, settings_clone.as_deref());
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                eprintln!("[PlatNav Watcher] Failed to create watcher: {e}");
                return;
            }
        };

    // notify needs a directory for single files
    let targets = std::iter::once(("level", &level_path))
        .chain(settings_path.iter().map(|p| ("settings", p)));
    for (label, path) in targets {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
            eprintln!("[PlatNav Watcher] Failed to watch {label} dir: {e}");
        } else {
            println!("[PlatNav Watcher] Watching {label}: {}", path.display());
        }
    }

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

fn handle_fs_event(
    event: NotifyEvent,
    tx: &Sender<LevelWatchEvent>,
    level_path: &Path,
    settings_path: Option<&Path>,
) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    for path in &event.paths {
        let wrap: fn(String) -> LevelWatchEvent = if path_matches(path, level_path) {
            LevelWatchEvent::LevelChanged
        } else if settings_path.is_some_and(|s| path_matches(path, s)) {
            LevelWatchEvent::SettingsChanged
        } else {
            continue;
        };
        // Truncate-then-write saves fire once with an empty file.
        match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                let _ = tx.send(wrap(content));
            }
            _ => {}
        }
    }
}

fn path_matches(a: &Path, b: &Path) -> bool {
    let ca = std::fs::canonicalize(a).unwrap_or_else(|_| a.to_path_buf());
    let cb = std::fs::canonicalize(b).unwrap_or_else(|_| b.to_path_buf());
    ca == cb
}

#[derive(Resource)]
pub struct LevelWatcherReceiver(pub Receiver<LevelWatchEvent>);

/// Hot-reloads [`NavLevel`] from a level file and, when given, the
/// navigation settings from a settings file.
pub struct LevelWatcherPlugin {
    pub level_path: PathBuf,
    pub settings_path: Option<PathBuf>,
}

impl Plugin for LevelWatcherPlugin {
    fn build(&self, app: &mut App) {
        let rx = spawn_level_watcher(self.level_path.clone(), self.settings_path.clone());
        app.insert_resource(LevelWatcherReceiver(rx))
            .add_systems(PreUpdate, process_level_watch_events);
    }
}

fn process_level_watch_events(
    watcher: Option<Res<LevelWatcherReceiver>>,
    mut level: ResMut<NavLevel>,
    mut commands: Commands,
    mut agents: Query<&mut NavAgent>,
) {
    let Some(watcher) = watcher else { return };

    for event in watcher.0.try_iter().take(16) {
        match event {
            LevelWatchEvent::LevelChanged(content) => match parse_level(&content) {
                Ok(file) => {
                    info!("[PlatNav Watcher] Reloading level '{}'", file.name);
                    level.0 = file.to_world();
                }
                Err(e) => warn!("[PlatNav Watcher] Level reload failed: {e}"),
            },
            LevelWatchEvent::SettingsChanged(content) => {
                let store = serde_json::from_str::<NavSettings>(&content)
                    .map_err(|e| e.to_string())
                    .and_then(|settings| GraphBuilder::new(settings).map(NavGraphStore));
                let store = match store {
                    Ok(store) => store,
                    Err(e) => {
                        warn!("[PlatNav Watcher] Settings reload failed: {e}");
                        continue;
                    }
                };
                info!("[PlatNav Watcher] Reloading navigation settings");
                for mut agent in &mut agents {
                    if let Err(e) = agent.rebind(&store) {
                        warn!("[PlatNav Watcher] Agent kept old settings: {e}");
                    }
                }
                commands.insert_resource(store.0.settings().clone());
                commands.insert_resource(store);
                // Forces a rebuild against the new store.
                level.set_changed();
            }
        }
    }
}
