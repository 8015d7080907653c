//! DiscoPanel daemon - Minecraft control plane
//!
//! Manages a fleet of containerized game servers on a single host: lifecycle
//! reconciliation, scheduled tasks, console streaming, player-traffic
//! routing, and resumable uploads, all behind a JSON API.

use anyhow::Result;
use clap::Parser;

mod cmd;

#[derive(Parser)]
#[command(name = "discopaneld")]
#[command(about = "DiscoPanel Minecraft control-plane daemon")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "discopanel.toml")]
    config: String,

    /// Enable debug logging regardless of the configured level
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cmd::root::run(&cli.config, cli.debug).await {
        eprintln!("Daemon error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
