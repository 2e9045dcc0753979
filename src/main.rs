use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use neurolab_engine::config::Config;
use neurolab_engine::engine::{pump_driver_events, EvolutionEngine};

/// Neurolab evolution engine - evolves agent parameters against live task
/// environments and fans results out to authenticated subscribers.
#[derive(Parser, Debug)]
#[command(name = "neurolab-engine", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// JWT secret for subscriber tokens (used when no config file is given)
    #[arg(long, default_value = "dev-secret")]
    jwt_secret: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default_local(args.jwt_secret.clone()),
    };

    info!(
        population_size = config.engine.population_size,
        tasks = config.tasks.len(),
        interval_ms = config.engine.generation_interval_ms,
        "neurolab engine starting"
    );

    let engine = EvolutionEngine::from_config(&config)?;

    // The simulation driver writes newline-delimited JSON events on stdin.
    // EOF closes the channel, which stops the engine loop.
    let (driver_tx, driver_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        pump_driver_events(stdin, driver_tx).await;
    });
    engine.run(driver_rx).await;

    Ok(())
}
