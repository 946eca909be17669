//! Configuration types for tournament play
//!
//! Level 4 - Utilities and configuration

use std::time::Duration;

use arena_core::{EngineConfig, DEFAULT_COINS};
use arena_pool::PoolConfig;

/// Tournament configuration
///
/// The search budgets apply uniformly to every competitor; competitors only
/// differ in their own depth and noise.
#[derive(Clone, Debug)]
pub struct TournamentConfig {
    /// Matches per pair (should be even so both move orders play each line)
    pub matches_per_pair: usize,
    /// Worker threads in the pool
    pub workers: usize,
    /// Coins per generated line
    pub coins: usize,
    /// Base seed for generated lines
    pub seed: u64,
    /// Time budget per move
    pub time_limit: Duration,
    /// Node budget per move (None = unlimited)
    pub max_nodes: Option<u64>,
    /// Run matchups in-process instead of on worker threads
    pub inline: bool,
    /// Trace every move's search diagnostics while matches are played
    pub debug: bool,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            matches_per_pair: 10,
            workers: arena_pool::default_pool_size(),
            coins: DEFAULT_COINS,
            seed: 42,
            time_limit: Duration::from_millis(500),
            max_nodes: None,
            inline: false,
            debug: false,
        }
    }
}

impl TournamentConfig {
    /// Create round-robin config with the given matches per pair
    pub fn round_robin(matches_per_pair: usize) -> Self {
        Self {
            matches_per_pair,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_coins(mut self, coins: usize) -> Self {
        self.coins = coins;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: Option<u64>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Engine configuration shared by every worker
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_time_limit(self.time_limit)
            .with_max_nodes(self.max_nodes)
            .with_debug(self.debug)
            .with_seed(self.seed)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.workers, self.engine_config())
    }
}
