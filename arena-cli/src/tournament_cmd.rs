//! Tournament command - round robin between engine competitors
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: run() - orchestration
//! - Level 2: load_competitors(), build_backend(), play_tournament(), report_results()
//! - Level 3: progress bar handling
//! - Level 4: formatting utilities

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use arena_core::{CoinEngineFactory, CompetitorSpec, EngineFactory, DEFAULT_COINS};
use arena_pool::{ComputeBackend, InlineBackend, WorkerPool};
use arena_tournament::{run_tournament, Standing, TournamentConfig, TournamentResult};

// ============================================================================
// COMMAND ARGUMENTS (Level 4 - Configuration)
// ============================================================================

#[derive(Args)]
pub struct TournamentArgs {
    /// Roster JSON file (array of {name, depth, noise}); built-in roster if omitted
    #[arg(long, value_name = "FILE")]
    pub competitors: Option<PathBuf>,

    /// Worker threads (defaults to available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Matches per pair (even counts give both move orders equal play)
    #[arg(long, default_value = "10")]
    pub matches: usize,

    /// Coins per generated line
    #[arg(long, default_value_t = DEFAULT_COINS)]
    pub coins: usize,

    /// Seed for the generated lines
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Time budget per move in milliseconds
    #[arg(long, default_value = "500")]
    pub time_limit_ms: u64,

    /// Node budget per move
    #[arg(long)]
    pub max_nodes: Option<u64>,

    /// Run matchups in-process instead of on worker threads
    #[arg(long)]
    pub inline: bool,

    /// Trace search diagnostics for every move (shown with RUST_LOG=debug)
    #[arg(long)]
    pub debug: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl TournamentArgs {
    fn config(&self) -> TournamentConfig {
        let mut config = TournamentConfig::round_robin(self.matches)
            .with_coins(self.coins)
            .with_seed(self.seed)
            .with_time_limit(Duration::from_millis(self.time_limit_ms))
            .with_max_nodes(self.max_nodes)
            .with_debug(self.debug);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config.inline = self.inline;
        config
    }
}

// ============================================================================
// LEVEL 1 - ORCHESTRATION
// ============================================================================

/// Run tournament command
///
/// This function reads like a table of contents:
/// 1. Load the roster
/// 2. Start the backend (worker pool or inline)
/// 3. Play every matchup with live progress
/// 4. Report standings
pub async fn run(args: TournamentArgs) -> Result<()> {
    let competitors = load_competitors(&args)?;
    let config = args.config();

    tracing::info!(
        "Starting tournament: {} competitors, {} matches per pair, {} coins",
        competitors.len(),
        config.matches_per_pair,
        config.coins
    );

    let factory: Arc<dyn EngineFactory> = Arc::new(CoinEngineFactory);
    let backend = build_backend(factory, &config).await?;

    let result = play_tournament(&competitors, &config, backend.as_ref()).await;
    backend.shutdown();
    let result = result?;

    report_results(&result, args.json)?;

    Ok(())
}

// ============================================================================
// LEVEL 2 - PHASES
// ============================================================================

fn load_competitors(args: &TournamentArgs) -> Result<Vec<CompetitorSpec>> {
    match &args.competitors {
        Some(path) => CompetitorSpec::load_roster(path),
        None => Ok(CompetitorSpec::default_roster()),
    }
}

async fn build_backend(
    factory: Arc<dyn EngineFactory>,
    config: &TournamentConfig,
) -> Result<Box<dyn ComputeBackend>> {
    if config.inline {
        let backend = InlineBackend::new(factory, &config.engine_config())
            .context("Failed to create inline engine")?;
        return Ok(Box::new(backend));
    }

    let pool = WorkerPool::initialize(factory, config.pool_config())
        .await
        .with_context(|| format!("Failed to start {} workers", config.workers))?;
    Ok(Box::new(pool))
}

async fn play_tournament(
    competitors: &[CompetitorSpec],
    config: &TournamentConfig,
    backend: &dyn ComputeBackend,
) -> Result<TournamentResult> {
    let progress = create_progress_bar();

    let result = run_tournament(competitors, config, backend, &mut |update| {
        if let Some(pb) = &progress {
            pb.set_length(update.total_matches as u64);
            pb.set_position(update.completed_matches as u64);
            pb.set_message(format!(
                "{}/{} matchups, {} failed",
                update.finished_matchups, update.total_matchups, update.failed_matchups
            ));
        }
    })
    .await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    result.context("Tournament failed")
}

fn report_results(result: &TournamentResult, json: bool) -> Result<()> {
    if json {
        print_json_results(result)
    } else {
        print_text_results(result);
        Ok(())
    }
}

// ============================================================================
// LEVEL 3 - PROGRESS
// ============================================================================

/// Progress bar on stderr, only when stderr is a terminal
fn create_progress_bar() -> Option<ProgressBar> {
    if !std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        return None;
    }
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} matches {msg} ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    Some(pb)
}

// ============================================================================
// LEVEL 4 - UTILITIES
// ============================================================================

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    result: &'a TournamentResult,
    elapsed_secs: f64,
}

fn print_json_results(result: &TournamentResult) -> Result<()> {
    let report = JsonReport {
        result,
        elapsed_secs: result.elapsed.as_secs_f64(),
    };
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

fn print_text_results(result: &TournamentResult) {
    println!("=== Tournament Results ===");
    println!(
        "{} matches in {:.1}s",
        result.matches_played,
        result.elapsed.as_secs_f64()
    );
    println!();
    println!(
        "{:<4} {:<16} {:>6} {:>5} {:>5} {:>14} {:>8} {:>8}",
        "#", "Competitor", "Games", "Wins", "Loss", "Win rate", "Points", "Win len"
    );

    for (rank, standing) in result.standings.iter().enumerate() {
        print_standing(rank + 1, standing);
    }

    if !result.failed.is_empty() {
        println!();
        println!("Failed matchups:");
        for failed in &result.failed {
            println!(
                "  {} vs {}: {}",
                failed.competitor_a, failed.competitor_b, failed.error
            );
        }
    }
}

fn print_standing(rank: usize, standing: &Standing) {
    let stats = &standing.stats;
    let win_rate = match (standing.win_rate(), standing.margin_of_error()) {
        (Some(rate), Some(margin)) => format!("{:.1}% ±{:.1}", rate * 100.0, margin * 100.0),
        _ => "-".to_string(),
    };
    println!(
        "{:<4} {:<16} {:>6} {:>5} {:>5} {:>14} {:>8} {:>8}",
        rank,
        standing.name,
        stats.games_played,
        stats.wins,
        stats.losses,
        win_rate,
        format_optional(stats.average_points()),
        format_optional(stats.average_win_length()),
    );
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: TournamentArgs,
    }

    #[test]
    fn test_args_build_config() {
        let harness = Harness::parse_from([
            "arena",
            "--matches",
            "4",
            "--workers",
            "3",
            "--time-limit-ms",
            "50",
            "--inline",
            "--debug",
        ]);
        let config = harness.args.config();
        assert_eq!(config.matches_per_pair, 4);
        assert_eq!(config.workers, 3);
        assert_eq!(config.time_limit, Duration::from_millis(50));
        assert_eq!(config.coins, DEFAULT_COINS);
        assert!(config.inline);
        assert!(config.engine_config().debug);
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(None), "-");
        assert_eq!(format_optional(Some(12.34)), "12.3");
    }
}
