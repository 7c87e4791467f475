//! CCM - Combo-chip session manager tool
//!
//! Validates chip configuration files and exercises the session registry
//! against simulated collaborators.
//!
//! # Usage
//!
//! ```bash
//! # Print the sections of the configuration file
//! ccm check-config --path /etc/ccm/vac_config.toml
//!
//! # Two owners on chip 0, chip reports version 1.2.0 via the init manager
//! ccm simulate --owners 2 --version 1.2.0
//!
//! # Make audio coordinator creation fail and print the journal as JSON
//! ccm simulate --fail audio-create --json
//!
//! # Quiet everything but fatal events of the core
//! ccm --log-mask ccm=0x01 simulate
//! ```

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use ccm_config::{ConfigSettings, FileConfigLoader};
use ccm_core::{ChipId, ChipVersion, ConfigLoader, MemoryProfile, ModuleMaskFilter, ModuleMasks};
use ccm_session::sim::{AdapterStrategy, FaultPoint, SimBackend};
use ccm_session::{ChipSessionRegistry, SessionHandle};

// ============================================================================
// CLI Arguments
// ============================================================================

/// Combo-chip session manager
#[derive(Parser, Debug)]
#[command(name = "ccm", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v debug, -vv function trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Per-module severity masks, e.g. "ccm=0x1f,ccm_vac=0x03"
    #[arg(long, global = true, value_name = "MASKS")]
    log_mask: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the chip configuration file and print its sections
    CheckConfig {
        /// Configuration file (default: $CCM_CONFIG_DIR or /etc/ccm/, vac_config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Run a session lifecycle against simulated collaborators
    Simulate {
        /// Chip to acquire
        #[arg(long, default_value_t = 0)]
        chip: u8,

        /// Number of owners acquiring the chip
        #[arg(long, default_value_t = 2)]
        owners: usize,

        /// How the adapter is obtained
        #[arg(long, default_value_t = AdapterStrategy::InitManager)]
        strategy: AdapterStrategy,

        /// Version the chip reports on power up (project.major.minor)
        #[arg(long, default_value = "1.0.0")]
        version: ChipVersion,

        /// Collaborator call to make fail (repeatable)
        #[arg(long, value_name = "STEP")]
        fail: Vec<FaultPoint>,

        /// Directory holding the configuration file
        #[arg(long)]
        config_dir: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.log_mask.as_deref())?;

    match args.command {
        Command::CheckConfig { path } => check_config(path),
        Command::Simulate {
            chip,
            owners,
            strategy,
            version,
            fail,
            config_dir,
            json,
        } => {
            let settings = match config_dir {
                Some(dir) => ConfigSettings::in_dir(dir),
                None => ConfigSettings::from_env(),
            };
            simulate(Simulation {
                chip_id: ChipId::new(chip),
                owners,
                strategy,
                version,
                faults: fail,
                settings,
                json,
            })
        }
    }
}

fn init_logging(verbose: u8, log_mask: Option<&str>) -> Result<()> {
    let masks = match log_mask {
        Some(spec) => ModuleMasks::parse(spec).context("Invalid --log-mask")?,
        None => ModuleMasks::default(),
    };
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("ccm={level}").parse()?)
        .add_directive(format!("hal={level}").parse()?);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_filter(ModuleMaskFilter::new(masks)),
        )
        .init();

    Ok(())
}

// ============================================================================
// check-config
// ============================================================================

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| ConfigSettings::from_env().path());

    // No fallback: a missing file is reported, not papered over.
    let config = FileConfigLoader::new()
        .load(&path, &MemoryProfile::EMPTY)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    println!("# {}", config.source());
    for name in config.section_names() {
        println!("[{name}]");
        if let Some(section) = config.section(name) {
            for (key, value) in section {
                println!("{key} = {value}");
            }
        }
    }

    if config.is_empty() {
        warn!(path = %path.display(), "Configuration file has no keys");
    }
    Ok(())
}

// ============================================================================
// simulate
// ============================================================================

struct Simulation {
    chip_id: ChipId,
    owners: usize,
    strategy: AdapterStrategy,
    version: ChipVersion,
    faults: Vec<FaultPoint>,
    settings: ConfigSettings,
    json: bool,
}

fn simulate(sim: Simulation) -> Result<()> {
    let backend = SimBackend::new(sim.strategy);
    for point in &sim.faults {
        backend.inject(*point);
    }
    let registry = ChipSessionRegistry::new(backend.collaborators(), sim.settings);
    let mut events = registry.subscribe();
    let mut errors = Vec::new();

    info!(
        chip_id = %sim.chip_id,
        owners = sim.owners,
        strategy = %sim.strategy,
        "Starting simulation"
    );

    let mut handles: Vec<SessionHandle> = Vec::with_capacity(sim.owners);
    for i in 0..sim.owners {
        match registry.acquire(sim.chip_id, format!("owner-{i}")) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                errors.push(format!("acquire owner-{i}: {e}"));
                break;
            }
        }
    }

    if let Some(first) = handles.first() {
        let fired = backend.power_up(sim.chip_id, sim.version);
        if !fired {
            if let Err(e) = registry.configure(first) {
                errors.push(format!("configure: {e}"));
            }
        }
    }

    let live_view = registry.session(sim.chip_id);

    for handle in &mut handles {
        if let Err(e) = registry.release(handle) {
            errors.push(format!("release: {e}"));
        }
    }

    let mut session_events = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => session_events.push(event),
            Err(TryRecvError::Lagged(n)) => warn!(skipped = n, "Session events lagged"),
            Err(_) => break,
        }
    }

    let journal = backend.journal().events();
    if sim.json {
        let report = serde_json::json!({
            "chip_id": sim.chip_id,
            "strategy": sim.strategy,
            "owners": sim.owners,
            "version": sim.version,
            "journal": journal,
            "session": live_view,
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Collaborator calls:");
        for (i, event) in journal.iter().enumerate() {
            println!("  {:>2}. {event}", i + 1);
        }
        println!("Session events:");
        for event in &session_events {
            println!("  {event:?}");
        }
        if let Some(view) = &live_view {
            println!(
                "Peak session: chip {} owners {} generation {} version {}",
                view.chip_id,
                view.owner_count,
                view.generation,
                view.chip_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        for error in &errors {
            println!("error: {error}");
        }
    }

    if !errors.is_empty() {
        bail!("Simulation finished with {} error(s)", errors.len());
    }
    Ok(())
}
