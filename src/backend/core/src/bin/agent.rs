//! EdgeSwarm worker agent - main entry point.
//!
//! Connects to the coordinator, serves bids and awarded jobs, and offers
//! a stdin command loop for submitting work into the fleet.

use clap::Parser;

use edgeswarm_core::agent::{Agent, AgentOptions};
use edgeswarm_core::config::Config;
use edgeswarm_core::telemetry;

#[derive(Parser)]
#[command(name = "edgeswarm-agent", about = "EdgeSwarm worker agent")]
struct Cli {
    /// Stable worker identifier
    agent_id: String,
    /// Coordinator address
    coordinator_ip: String,
    /// Coordinator port
    port: u16,

    /// Advertise an idle inference accelerator (NPU)
    #[arg(long)]
    npu: bool,

    /// Configuration file (environment variables override it)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: could not load config: {}. Using defaults.", e);
            Config::default()
        }),
    };

    telemetry::init_logging(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        agent_id = %cli.agent_id,
        coordinator = %format!("{}:{}", cli.coordinator_ip, cli.port),
        npu = cli.npu,
        "Starting EdgeSwarm agent"
    );

    let agent = Agent::start(AgentOptions {
        agent_id: cli.agent_id,
        coordinator_ip: cli.coordinator_ip,
        coordinator_port: cli.port,
        has_accelerator: cli.npu,
        config,
    })
    .await?;

    tokio::select! {
        result = agent.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nReceived interrupt, exiting agent.");
        }
    }

    Ok(())
}
