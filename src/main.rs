use std::path::PathBuf;
use std::sync::Arc;

use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::time::TimePlugin;
use platnav::level::{load_level_file, parse_level, LevelFile};
use platnav::level_gen::{generate_level, LevelGenParams};
use platnav::{GraphStats, LinkStats, NavGraphStore, NavLevel, NavSettings, Path, PlatformNavPlugin, Planner};

const USAGE: &str = "usage: platnav [LEVEL.json] [--generate SEED] [--from X,Y] [--to X,Y] [--watch]";

const EMBEDDED_LEVEL: &str = include_str!(concat!(env!("OUT_DIR"), "/platnav_embedded_level.json"));

#[derive(Default)]
struct CliArgs {
    level_path: Option<PathBuf>,
    seed: Option<u64>,
    from: Option<Vec2>,
    to: Option<Vec2>,
    watch: bool,
}

#[derive(serde::Serialize)]
struct QueryReport {
    from: Vec2,
    to: Vec2,
    path: Option<Path>,
}

#[derive(serde::Serialize)]
struct Report<'a> {
    level: &'a str,
    graph: GraphStats,
    links: LinkStats,
    queries: Vec<QueryReport>,
}

fn parse_point(value: &str) -> Result<Vec2, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{value}'"))?;
    let x = x.trim().parse::<f32>().map_err(|e| format!("bad x in '{value}': {e}"))?;
    let y = y.trim().parse::<f32>().map_err(|e| format!("bad y in '{value}': {e}"))?;
    Ok(Vec2::new(x, y))
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--generate" => {
                let seed = value("--generate")?;
                cli.seed = Some(seed.parse().map_err(|e| format!("bad seed '{seed}': {e}"))?);
            }
            "--from" => cli.from = Some(parse_point(&value("--from")?)?),
            "--to" => cli.to = Some(parse_point(&value("--to")?)?),
            "--watch" => cli.watch = true,
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path => {
                if cli.level_path.is_some() {
                    return Err(format!("unexpected argument '{path}'"));
                }
                cli.level_path = Some(PathBuf::from(path));
            }
        }
    }
    if cli.from.is_some() != cli.to.is_some() {
        return Err("--from and --to must be given together".to_string());
    }
    Ok(cli)
}

fn settings_path() -> PathBuf {
    std::env::var("PLATNAV_SETTINGS")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "nav_settings.json".to_string())
        .into()
}

fn load_nav_settings(path: &std::path::Path) -> Option<NavSettings> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<NavSettings>(&contents) {
            Ok(settings) => {
                println!("[PlatNav] Loaded settings from {}", path.display());
                Some(settings)
            }
            Err(e) => {
                eprintln!("[PlatNav] Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(_) => None,
    }
}

fn load_level(cli: &CliArgs) -> Result<LevelFile, String> {
    if let Some(path) = &cli.level_path {
        return load_level_file(path);
    }
    if let Some(seed) = cli.seed {
        return Ok(generate_level(seed, &LevelGenParams::default()));
    }
    let embedded = EMBEDDED_LEVEL.trim();
    if !embedded.is_empty() && embedded != "{}" {
        return parse_level(embedded).map_err(|e| format!("embedded level: {e}"));
    }
    Ok(generate_level(0, &LevelGenParams::default()))
}

fn print_report(app: &App, level_name: &str, queries: &[(Vec2, Vec2)]) {
    let store = app.world().resource::<NavGraphStore>();
    let world = &app.world().resource::<NavLevel>().0;
    let graph = store.0.graph();

    let mut planner = match Planner::new(store.0.settings().clone(), store.0.shared()) {
        Ok(planner) => planner,
        Err(e) => {
            eprintln!("[PlatNav] {e}");
            return;
        }
    };
    let queries = queries
        .iter()
        .map(|&(from, to)| {
            planner.request_path(world, from, to, 0.0, true);
            QueryReport {
                from,
                to,
                path: planner.path().cloned(),
            }
        })
        .collect();

    let report = Report {
        level: level_name,
        graph: graph.stats(),
        links: store.0.last_link_stats().clone(),
        queries,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("[PlatNav] Failed to serialize report: {e}"),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return;
    }
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("[PlatNav] {e}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    let level = match load_level(&cli) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("[PlatNav] {e}");
            std::process::exit(1);
        }
    };
    let settings_file = settings_path();
    let settings = load_nav_settings(&settings_file)
        .or_else(|| level.settings.clone())
        .unwrap_or_default();
    if let Err(e) = settings.validate() {
        eprintln!("[PlatNav] Invalid settings: {e}");
        std::process::exit(1);
    }

    let queries: Vec<(Vec2, Vec2)> = match (cli.from, cli.to) {
        (Some(from), Some(to)) => vec![(from, to)],
        _ => level.queries.iter().map(|q| (q.from, q.to)).collect(),
    };

    let mut app = App::new();
    app.add_plugins((
        LogPlugin {
            filter: "warn,platnav=info".to_string(),
            ..default()
        },
        TimePlugin,
        PlatformNavPlugin { settings },
    ))
    .insert_resource(NavLevel(level.to_world()));

    #[cfg(not(target_arch = "wasm32"))]
    if cli.watch {
        match &cli.level_path {
            Some(path) => {
                app.add_plugins(platnav::file_watcher::LevelWatcherPlugin {
                    level_path: path.clone(),
                    settings_path: Some(settings_file.clone()),
                });
            }
            None => eprintln!("[PlatNav] --watch needs a level file, ignoring"),
        }
    }

    app.update();
    print_report(&app, &level.name, &queries);
    if !cli.watch || cli.level_path.is_none() {
        return;
    }

    println!("[PlatNav] Watching for changes, Ctrl-C to stop");
    let mut shown = app.world().resource::<NavGraphStore>().0.graph();
    loop {
        app.update();
        let current = app.world().resource::<NavGraphStore>().0.graph();
        if !Arc::ptr_eq(&shown, &current) {
            println!("[PlatNav] Graph rebuilt (v{})", current.version);
            print_report(&app, &level.name, &queries);
            shown = current;
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_full_command_line() {
        let cli = parse_args(&args(&["level.json", "--from", "1,0", "--to", "9.5, 2", "--watch"]))
            .expect("valid args");
        assert_eq!(cli.level_path, Some(PathBuf::from("level.json")));
        assert_eq!(cli.from, Some(Vec2::new(1.0, 0.0)));
        assert_eq!(cli.to, Some(Vec2::new(9.5, 2.0)));
        assert!(cli.watch);
        assert_eq!(cli.seed, None);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(&args(&["--generate"])).is_err());
        assert!(parse_args(&args(&["--generate", "abc"])).is_err());
        assert!(parse_args(&args(&["--from", "1,2"])).is_err());
        assert!(parse_args(&args(&["--from", "1;2", "--to", "3,4"])).is_err());
        assert!(parse_args(&args(&["a.json", "b.json"])).is_err());
        assert!(parse_args(&args(&["--fast"])).is_err());
    }

    #[test]
    fn generated_level_used_for_seed() {
        let cli = parse_args(&args(&["--generate", "9"])).expect("valid args");
        let level = load_level(&cli).expect("generated");
        assert_eq!(level.name, "generated-9");
    }
}
