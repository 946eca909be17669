//! Arena Core - Compute engine binding
//!
//! This crate provides everything a worker needs to host an engine:
//! - The `Engine` / `EngineFactory` traits consumed by the orchestration layer
//! - Engine configuration and competitor definitions
//! - Match results exchanged between workers and the aggregator
//! - A reference engine: the coin-line game and an iterative-deepening searcher

pub mod coins;
pub mod config;
pub mod engine;
pub mod search;

// Re-exports for convenient access
pub use coins::{CoinLine, GameResult, Player, Side, DEFAULT_COINS};
pub use config::{CompetitorSpec, ConfigUpdate, Difficulty, EngineConfig};
pub use engine::{
    CoinEngine, CoinEngineFactory, Decision, Engine, EngineError, EngineFactory, MatchResult,
    MatchupSpec, SearchDiagnostics, Slot,
};
pub use search::{SearchBudget, SearchReport, Searcher};
