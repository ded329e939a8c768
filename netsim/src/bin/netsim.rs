//! Command-line entry point: load a scenario file, build the network, run the scheduler to
//! completion, and flush the event log. Error handling follows
//! `shadow-shadow/src/main/core/main.rs`'s `anyhow::Context`-chained style.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use netsim::config::ScenarioFile;
use netsim::Network;
use simlog::eventlog::EventLog;

/// Run a simulated TCP network from a scenario file.
#[derive(Parser, Debug)]
#[command(name = "netsim", version, about)]
struct Cli {
    /// Path to the scenario YAML file.
    scenario: PathBuf,

    /// Diagnostic log verbosity.
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevelArg,

    /// Override the scenario file's congestion variant ("tahoe" or "reno").
    #[arg(long)]
    congestion: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Off => LevelFilter::Off,
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    simlog::init(cli.log_level.into()).context("installing the simulation logger")?;

    let contents = fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading scenario file {}", cli.scenario.display()))?;
    let scenario: ScenarioFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing scenario file {}", cli.scenario.display()))?;

    let topology = scenario.to_topology();
    topology
        .validate()
        .context("scenario topology failed validation")?;

    let congestion_token = cli.congestion.as_deref().unwrap_or(&scenario.congestion);
    let congestion = netsim::config::parse_congestion(congestion_token)
        .context("parsing --congestion / scenario `congestion` field")?;

    let scheduler = scheduler::Scheduler::new();
    let log = Rc::new(EventLog::stdout());
    let _network = Network::build_with_congestion(&topology, scheduler.clone(), log, congestion);

    if let Some(stop_time) = scenario.stop_time {
        scheduler.schedule(stop_time, i32::MIN, || {
            log::info!("reached configured stop_time, any still-pending flows are left suspended");
        });
    }

    // Driving application traffic (who connects to whom, what bytes they exchange) is the demo
    // client/server layer spec.md §1 places out of scope; this binary's job ends at building the
    // topology and letting the scheduler run whatever the embedding caller spawned onto it before
    // `run()`. A real deployment links against the `netsim` library and spawns its own flows using
    // `network.tcp_socket(..)` before reaching this point.
    scheduler.run();

    Ok(())
}
