//! Play command - one AI-vs-AI game through the proxy
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: run() - orchestration
//! - Level 2: start_proxy(), play_game(), report_game()
//! - Level 3: play_turn()
//! - Level 4: formatting utilities

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use arena_core::{
    CoinEngineFactory, CoinLine, Difficulty, EngineConfig, EngineFactory, GameResult, Player,
    SearchDiagnostics, Side, DEFAULT_COINS,
};
use arena_pool::{AiProxy, ProxyConfig};

// ============================================================================
// COMMAND ARGUMENTS (Level 4 - Configuration)
// ============================================================================

#[derive(Args)]
pub struct PlayArgs {
    /// Search strength: easy, medium, hard or expert
    #[arg(long, default_value = "medium")]
    pub difficulty: Difficulty,

    /// Time budget per move in milliseconds
    #[arg(long, default_value = "500")]
    pub time_limit_ms: u64,

    /// Hard deadline per request in milliseconds
    #[arg(long, default_value = "5000")]
    pub request_timeout_ms: u64,

    /// Coins in the generated line
    #[arg(long, default_value_t = DEFAULT_COINS)]
    pub coins: usize,

    /// Seed for the generated line
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Print search diagnostics for every move
    #[arg(long)]
    pub debug: bool,

    /// Run the engine in-process instead of on a worker thread
    #[arg(long)]
    pub inline: bool,

    /// Output the game record as JSON
    #[arg(long)]
    pub json: bool,
}

impl PlayArgs {
    fn proxy_config(&self) -> ProxyConfig {
        let engine = EngineConfig::default()
            .with_difficulty(self.difficulty)
            .with_time_limit(Duration::from_millis(self.time_limit_ms))
            .with_debug(self.debug)
            .with_seed(self.seed);
        let config = ProxyConfig::new(engine)
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        if self.inline {
            config.inline()
        } else {
            config
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct MoveRecord {
    turn: u32,
    player: Player,
    side: Side,
    coin: u8,
    diagnostics: Option<SearchDiagnostics>,
}

#[derive(Clone, Debug, Serialize)]
struct GameRecord {
    coins: Vec<u8>,
    moves: Vec<MoveRecord>,
    winner: Option<Player>,
    scores: [u32; 2],
    degraded: bool,
}

// ============================================================================
// LEVEL 1 - ORCHESTRATION
// ============================================================================

/// Run play command
///
/// This function reads like a table of contents:
/// 1. Start the proxy
/// 2. Ask it for every move until the line is empty
/// 3. Release the engine and report the game
pub async fn run(args: PlayArgs) -> Result<()> {
    let proxy = start_proxy(&args).await?;

    tracing::info!(
        "Playing {} coins at {:?} difficulty ({} backend)",
        args.coins,
        args.difficulty,
        proxy.mode().await
    );

    let game = play_game(&proxy, &args).await;
    proxy.terminate().await;
    let game = game?;

    report_game(&game, args.json)?;

    Ok(())
}

// ============================================================================
// LEVEL 2 - PHASES
// ============================================================================

async fn start_proxy(args: &PlayArgs) -> Result<AiProxy> {
    let factory: Arc<dyn EngineFactory> = Arc::new(CoinEngineFactory);
    AiProxy::initialize(factory, args.proxy_config())
        .await
        .context("Failed to start the engine")
}

async fn play_game(proxy: &AiProxy, args: &PlayArgs) -> Result<GameRecord> {
    let mut state = CoinLine::generate(args.seed, args.coins, Player::One);
    let coins = state.remaining().to_vec();
    let mut moves = Vec::new();

    while state.result() == GameResult::Ongoing {
        let (next, record) = play_turn(proxy, &state).await?;
        tracing::debug!(
            "Turn {}: {:?} takes {} from the {:?}",
            record.turn,
            record.player,
            record.coin,
            record.side
        );
        moves.push(record);
        state = next;
    }

    Ok(GameRecord {
        coins,
        moves,
        winner: state.result().winner(),
        scores: [state.score(Player::One), state.score(Player::Two)],
        degraded: proxy.is_degraded(),
    })
}

fn report_game(game: &GameRecord, json: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(game).context("Failed to serialize game")?;
        println!("{}", json);
    } else {
        print_text_game(game);
    }
    Ok(())
}

// ============================================================================
// LEVEL 3 - STEPS
// ============================================================================

/// Request one move and apply it
async fn play_turn(proxy: &AiProxy, state: &CoinLine) -> Result<(CoinLine, MoveRecord)> {
    let player = state.to_move();
    let decision = proxy
        .request_action(&state.to_json(), player)
        .await
        .with_context(|| format!("Engine failed on turn {}", state.turn()))?;

    let side = decision.side().context("Engine returned a malformed action")?;
    if !state.legal_moves().contains(&side) {
        anyhow::bail!("Engine chose an illegal move: {:?}", side);
    }
    let coin = state.coin_at(side).unwrap_or_default();

    let record = MoveRecord {
        turn: state.turn(),
        player,
        side,
        coin,
        diagnostics: decision.diagnostics,
    };
    Ok((state.apply_move(side), record))
}

// ============================================================================
// LEVEL 4 - UTILITIES
// ============================================================================

fn print_text_game(game: &GameRecord) {
    println!("=== Game ===");
    println!("Line: {:?}", game.coins);
    if game.degraded {
        println!("(worker unavailable, played in-process)");
    }
    println!();

    for mv in &game.moves {
        print!(
            "{:>3}. {:<4} {:<5} {}",
            mv.turn + 1,
            player_label(mv.player),
            format!("{:?}", mv.side),
            mv.coin
        );
        if let Some(diag) = &mv.diagnostics {
            print!(
                "   [score {}, depth {}, {} nodes, {}ms]",
                diag.score, diag.depth, diag.nodes, diag.elapsed_ms
            );
        }
        println!();
    }

    println!();
    println!(
        "Score: {} {} - {} {}",
        player_label(Player::One),
        game.scores[0],
        game.scores[1],
        player_label(Player::Two)
    );
    match game.winner {
        Some(winner) => println!("Winner: {}", player_label(winner)),
        None => println!("No winner"),
    }
}

fn player_label(player: Player) -> &'static str {
    match player {
        Player::One => "P1",
        Player::Two => "P2",
    }
}
