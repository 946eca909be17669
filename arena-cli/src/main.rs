//! Arena CLI - Command-line interface
//!
//! Commands:
//! - tournament: Run a round robin between engine competitors
//! - play: Let the AI proxy play one game against itself

mod play_cmd;
mod tournament_cmd;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arena")]
#[command(about = "Run engine tournaments on an isolated worker pool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a round-robin tournament
    Tournament(tournament_cmd::TournamentArgs),
    /// Play a single AI-vs-AI game through the proxy
    Play(play_cmd::PlayArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tournament(args) => tournament_cmd::run(args).await,
        Commands::Play(args) => play_cmd::run(args).await,
    }
}
