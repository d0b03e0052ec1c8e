//! padlight: command-line front end for the light-show engine

mod config;
mod demo;

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use padlight_core::{Color, ControllerId, Path};
use padlight_services::{Chain, Context, Controller, Project, UndoEntry, UndoManager, VirtualController};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, ConfigSource, CONFIG_ENV};

/// Grid controller light-show engine
#[derive(Parser, Debug)]
#[command(name = "padlight", version, about, long_about = None)]
struct Args {
    /// Config file, defaults to $PADLIGHT_CONFIG, then <config dir>/padlight/config.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play pad presses through a project into a virtual controller
    Play {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Pads to press, all at once
        #[arg(short, long, required = true, num_args = 1..)]
        press: Vec<u8>,

        /// Track receiving the presses
        #[arg(short, long, default_value_t = 0)]
        track: usize,

        /// How long the pads stay held
        #[arg(long, default_value_t = 300)]
        hold_ms: u64,

        /// Total run time before exiting
        #[arg(long, default_value_t = 2000)]
        run_ms: u64,
    },

    /// Write a demo project
    New {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Tempo, defaults to the configured BPM
        #[arg(long)]
        bpm: Option<u32>,
    },

    /// Print the device tree with the path of every node
    Inspect {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
    },

    /// Apply edits through the undo history and save the result
    Edit {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Edits in order: bpm=N, disable=PATH, enable=PATH, remove=PATH, rename=PATH=NAME
        #[arg(value_name = "EDIT", value_parser = parse_edit)]
        edits: Vec<Edit>,

        /// Undo this many edits before saving
        #[arg(long, default_value_t = 0)]
        undo: usize,

        /// Write here instead of overwriting the project
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration and where it came from
    Config {
        /// Write the effective configuration to the resolved config path
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Clone)]
enum Edit {
    Bpm(u32),
    Enable(Path, bool),
    Remove(Path),
    Rename(Path, String),
}

fn parse_path(s: &str) -> Result<Path> {
    let indices = s
        .trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<i32>().with_context(|| format!("bad path segment '{p}'")))
        .collect::<Result<Vec<_>>>()?;
    Ok(Path::from(indices))
}

fn parse_edit(s: &str) -> Result<Edit> {
    let Some((op, arg)) = s.split_once('=') else { bail!("expected OP=VALUE, got '{s}'") };
    Ok(match op {
        "bpm" => Edit::Bpm(arg.parse().context("bad tempo")?),
        "enable" => Edit::Enable(parse_path(arg)?, true),
        "disable" => Edit::Enable(parse_path(arg)?, false),
        "remove" => Edit::Remove(parse_path(arg)?),
        "rename" => {
            let Some((path, name)) = arg.split_once('=') else { bail!("expected rename=PATH=NAME") };
            Edit::Rename(parse_path(path)?, name.to_string())
        }
        _ => bail!("unknown edit '{op}'"),
    })
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).with(filter).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    let source = ConfigSource::resolve(args.config.as_deref(), std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let config = Config::load(&source)?;
    init_logging(&config);
    debug!(source = %source, "Config loaded");

    match args.command {
        Commands::Play { project, press, track, hold_ms, run_ms } => {
            play(&config, &project, &press, track, Duration::from_millis(hold_ms), Duration::from_millis(run_ms))
        }
        Commands::New { path, bpm } => {
            let params = demo::demo_project(bpm.unwrap_or(config.default_bpm));
            std::fs::write(&path, params.to_json()?).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Demo project written");
            Ok(())
        }
        Commands::Inspect { project } => {
            let project = load(&project)?;
            inspect(&project);
            Ok(())
        }
        Commands::Edit { project: path, edits, undo, output } => {
            edit(&config, &path, &edits, undo, output.as_deref().unwrap_or(&path))
        }
        Commands::Config { init } => {
            if init {
                config.save(source.path())?;
                info!(path = %source.path().display(), "Config written");
            }
            println!("# {source}");
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load(path: &FsPath) -> Result<Project> {
    Project::load(path, &Context::standalone()).with_context(|| format!("loading {}", path.display()))
}

fn play(config: &Config, path: &FsPath, pads: &[u8], track: usize, hold: Duration, run: Duration) -> Result<()> {
    let project = load(path)?;
    let Some(target) = project.track(track) else {
        bail!("project has {} tracks, no track {track}", project.len());
    };

    let controller = Arc::new(VirtualController::new(ControllerId(1), config.controller_name.clone()));
    target.set_controller(Some(controller.clone()));
    let frames = controller.subscribe();

    let start = Instant::now();
    let printer = thread::spawn(move || {
        let mut count = 0usize;
        while let Ok(frame) = frames.recv() {
            let Color { red, green, blue } = frame.color;
            println!("{:>6}ms  pad {:>2}  rgb({red:>2}, {green:>2}, {blue:>2})", start.elapsed().as_millis(), frame.index);
            count += 1;
        }
        count
    });

    info!(pads = ?pads, track, "Pressing");
    for &pad in pads {
        target.press(pad, Color::WHITE, Some(controller.id()));
    }
    thread::sleep(hold);
    for &pad in pads {
        target.press(pad, Color::OFF, Some(controller.id()));
    }
    thread::sleep(run.saturating_sub(hold));

    let lit = controller.lit_pads();
    target.set_controller(None);
    drop(project);
    drop(controller);
    let count = printer.join().unwrap_or_default();
    println!("{count} frames, still lit: {lit:?}");
    Ok(())
}

fn inspect(project: &Project) {
    println!("bpm {}  macros {:?}", project.bpm(), project.context().macros().snapshot());
    for (i, track) in project.tracks().iter().enumerate() {
        let path = Path::track(i);
        println!("{path}  track \"{}\"", track.name());
        print_chain(track.chain(), &path, 1);
    }
}

fn print_chain(chain: &Arc<Chain>, path: &Path, depth: usize) {
    let indent = "  ".repeat(depth);
    for (i, device) in chain.devices().iter().enumerate() {
        let device_path = path.child(i as i32);
        let state = if device.is_enabled() { "" } else { " (disabled)" };
        println!("{indent}{device_path}  {}{state}", device.name());
        if let Some(preprocess) = device.preprocess() {
            let branch_path = device_path.child(padlight_core::PREPROCESS);
            println!("{indent}  {branch_path}  preprocess");
            print_chain(&preprocess, &branch_path, depth + 2);
        }
        for (b, branch) in device.branches().iter().enumerate() {
            let branch_path = device_path.child(b as i32);
            println!("{indent}  {branch_path}  chain \"{}\"", branch.name());
            print_chain(branch, &branch_path, depth + 2);
        }
    }
}

fn edit(config: &Config, path: &FsPath, edits: &[Edit], undo: usize, output: &FsPath) -> Result<()> {
    let mut project = load(path)?;
    let mut history = UndoManager::with_limit(config.undo_limit);

    for edit in edits {
        let entry = match edit {
            Edit::Bpm(bpm) => Some(UndoEntry::set_bpm(&project, *bpm)),
            Edit::Enable(path, enabled) => UndoEntry::set_enabled(&project, path.clone(), *enabled),
            Edit::Remove(path) => path
                .parent()
                .and_then(|(chain, index)| UndoEntry::remove_device(&project, chain, usize::try_from(index).ok()?)),
            Edit::Rename(path, name) => UndoEntry::set_chain_name(&project, path.clone(), name.clone()),
        };
        let Some(entry) = entry else { bail!("{edit:?} does not address a node") };
        history.add_and_execute(&mut project, entry).with_context(|| format!("applying {edit:?}"))?;
    }
    for _ in 0..undo {
        if !history.undo(&mut project) {
            break;
        }
    }

    for (i, entry) in history.history().iter().enumerate() {
        let marker = if i < history.position() { "*" } else { " " };
        println!("{marker} {entry}");
    }
    project.save(output).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
