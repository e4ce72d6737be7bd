//! Tumble headless runner
//!
//! Loads a level document, switches straight to simulation and steps frames
//! at 60 FPS until an end condition fires or the frame budget runs out. The
//! level summary (or the live goal statuses, if the run never ended) is
//! printed to stdout as JSON.
//!
//! Usage: `tumble-headless [level.json] [frames] [store-dir]`
//!
//! Without a level path the built-in default level is played. Set
//! `TUMBLE_SESSION_CONFIG` to a JSON file to override session tuning.

mod store;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tumble_core::{
    Collaborators, GoalStatus, LevelConfig, LevelSession, LevelSummary, MemoryStore, NullVisuals,
    Persistence, SessionCommand, SessionConfig, UiSink,
};

use crate::store::FileStore;

const FRAME_DT: f32 = 1.0 / 60.0;
const DEFAULT_FRAMES: u32 = 60 * 60;
const CONFIG_ENV: &str = "TUMBLE_SESSION_CONFIG";

/// Reports session notifications through tracing.
#[derive(Debug, Default)]
struct LogUi {
    last_status: Vec<GoalStatus>,
}

impl UiSink for LogUi {
    fn show_status(&mut self, statuses: &[GoalStatus]) {
        if self.last_status.as_slice() != statuses {
            for status in statuses {
                tracing::debug!("[ui] {} - {}", status.display_name, status.status_text);
            }
            self.last_status = statuses.to_vec();
        }
    }

    fn show_level_end(&mut self, summary: &LevelSummary) {
        tracing::info!(
            "[ui] level `{}` ended by `{}` at {:.2}s (all complete: {})",
            summary.level_id,
            summary.ended_by,
            summary.end_time,
            summary.all_complete
        );
    }
}

struct Args {
    level: Option<PathBuf>,
    frames: u32,
    store_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let level = args.next().map(PathBuf::from);
    let frames = match args.next() {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("frame count `{raw}` is not a number"))?,
        None => DEFAULT_FRAMES,
    };
    let store_dir = args.next().map(PathBuf::from);
    Ok(Args {
        level,
        frames,
        store_dir,
    })
}

fn load_session_config() -> Result<SessionConfig> {
    let Ok(path) = std::env::var(CONFIG_ENV) else {
        return Ok(SessionConfig::default());
    };
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading session config {path}"))?;
    let config =
        SessionConfig::from_json(&json).with_context(|| format!("parsing session config {path}"))?;
    tracing::info!("[config] session config loaded from {}", path);
    Ok(config)
}

fn load_level(path: Option<&PathBuf>) -> Result<LevelConfig> {
    let Some(path) = path else {
        tracing::info!("[config] no level given, playing the default level");
        return Ok(LevelConfig::default_level());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading level {}", path.display()))?;
    LevelConfig::from_json(&json).with_context(|| format!("parsing level {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = load_session_config()?;
    let level = load_level(args.level.as_ref())?;

    let persistence: Box<dyn Persistence> = match &args.store_dir {
        Some(dir) => {
            tracing::info!("[persistence] storing under {}", dir.display());
            Box::new(FileStore::new(dir))
        }
        None => Box::new(MemoryStore::new()),
    };
    let collab = Collaborators {
        persistence,
        visuals: Box::new(NullVisuals::default()),
        ui: Box::new(LogUi::default()),
    };

    let mut session = LevelSession::new(config, collab, level);
    session.commands().push(SessionCommand::ToggleSimulation);

    let mut frames = 0;
    while frames < args.frames && !session.is_level_ended() {
        session.frame(FRAME_DT);
        frames += 1;
    }

    let output = if let Some(summary) = session.last_summary() {
        serde_json::to_string_pretty(summary)?
    } else {
        tracing::warn!(
            "[session] level `{}` still running after {} frames",
            session.level().meta.id,
            frames
        );
        serde_json::to_string_pretty(&session.goals().statuses())?
    };
    println!("{output}");

    session.exit();
    Ok(())
}
