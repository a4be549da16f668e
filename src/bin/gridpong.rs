//! gridpong daemon entrypoint.
//!
//! Wires configuration, logging, the engine, and the reactor loop. Exchange
//! adapters plug in behind the `Transport` trait; this binary ships with the
//! in-process paper transport, which records outbound commands and is
//! driven entirely by injected events (useful for config rehearsal and
//! integration smoke runs).

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use gridpong::{DaemonConfig, Engine, Reactor, SimTransport};

#[derive(Parser)]
#[command(name = "gridpong")]
#[command(version, about = "Grid ping-pong market-making daemon", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "gridpong.toml")]
    config: String,

    /// Print a sample config and exit
    #[arg(long)]
    sample_config: bool,

    /// Run the engine in test mode (acks synthesized locally)
    #[arg(long)]
    testing: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.sample_config {
        println!("{}", DaemonConfig::sample_toml());
        return ExitCode::SUCCESS;
    }

    let config = match DaemonConfig::load(Path::new(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", cli.config);
            return ExitCode::FAILURE;
        }
    };

    let _guard = gridpong::init_logging(&config.logging);
    info!(config = %cli.config, "gridpong starting");

    let mut engine = Engine::new(config.engine.clone(), SimTransport::new());
    engine.set_testing(cli.testing);

    match config.apply_markets(&mut engine) {
        Ok(applied) => info!(applied, markets = config.markets.len(), "markets configured"),
        Err(e) => {
            error!(%e, "failed to apply market settings");
            return ExitCode::FAILURE;
        }
    }

    let (reactor, events) = Reactor::new(engine, config.timers.clone());

    // dropping the sole sender closes the channel and stops the reactor
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        drop(events);
    });

    // run until the event channel closes, then snapshot the grid
    let engine = reactor.run().await;
    if let Err(e) = engine.save_market("all", 15) {
        error!(%e, "shutdown save failed");
        return ExitCode::FAILURE;
    }
    info!("gridpong stopped");
    ExitCode::SUCCESS
}
