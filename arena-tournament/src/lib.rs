//! Arena Tournament - Round-robin play between engine competitors
//!
//! This crate provides tournament infrastructure:
//! - Round-robin scheduling of matchups between configured competitors
//! - Submission of every matchup to a compute backend
//! - Live, order-independent aggregation of match results
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: run_tournament (orchestration)
//! - Level 2: validation, submission folding (phases)
//! - Level 3: scheduling, stats accumulation, standings (steps)
//! - Level 4: configuration

mod config;
mod schedule;
mod stats;
mod tournament;

pub use config::TournamentConfig;
pub use schedule::{generate_round_robin_pairings, schedule_round_robin};
pub use stats::{aggregate, average_win_length, win_rate, AggregateStats, CompetitorStats};
pub use tournament::{
    run_tournament, FailedMatchup, Standing, TournamentError, TournamentProgress, TournamentResult,
};
