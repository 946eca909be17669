//! Compute engine binding
//!
//! Workers only ever talk to an engine through the [`Engine`] trait: one
//! blocking call per decision request and one per matchup. [`CoinEngine`] is
//! the reference binding over the coin-line game.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coins::{CoinLine, GameResult, Player, Side};
use crate::config::{CompetitorSpec, ConfigUpdate, EngineConfig};
use crate::search::{SearchBudget, Searcher};

// ============================================================================
// ERRORS
// ============================================================================

/// Failures reported by an engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("malformed game state: {0}")]
    MalformedState(String),

    #[error("{requested:?} asked to move but it is {to_move:?}'s turn")]
    WrongPlayer { requested: Player, to_move: Player },

    #[error("game is already over")]
    GameOver,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid matchup: {0}")]
    InvalidMatchup(String),
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Seat of a competitor within a matchup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Outcome of one match inside a matchup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matchup_id: u64,
    /// Tournament index of the competitor in slot A
    pub competitor_a: usize,
    /// Tournament index of the competitor in slot B
    pub competitor_b: usize,
    pub winner: Slot,
    /// Coins taken before the game ended
    pub turns: u32,
    pub points_a: u32,
    pub points_b: u32,
}

impl MatchResult {
    pub fn winner_index(&self) -> usize {
        match self.winner {
            Slot::A => self.competitor_a,
            Slot::B => self.competitor_b,
        }
    }

    pub fn loser_index(&self) -> usize {
        match self.winner {
            Slot::A => self.competitor_b,
            Slot::B => self.competitor_a,
        }
    }
}

/// A series of matches between two competitors
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchupSpec {
    pub matchup_id: u64,
    pub competitor_a: CompetitorSpec,
    pub competitor_b: CompetitorSpec,
    pub index_a: usize,
    pub index_b: usize,
    pub match_count: usize,
    /// Coins per generated line
    pub coins: usize,
    pub seed: u64,
}

impl MatchupSpec {
    /// Competitor A moves first in even-indexed matches
    pub fn first_mover(&self, match_index: usize) -> Slot {
        if match_index % 2 == 0 {
            Slot::A
        } else {
            Slot::B
        }
    }

    /// Consecutive match pairs share a line so both move orders play it
    pub fn board_seed(&self, match_index: usize) -> u64 {
        self.seed.wrapping_add((match_index / 2) as u64)
    }

    pub fn competitor(&self, slot: Slot) -> &CompetitorSpec {
        match slot {
            Slot::A => &self.competitor_a,
            Slot::B => &self.competitor_b,
        }
    }
}

/// Search statistics attached to a decision in debug mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDiagnostics {
    pub score: i32,
    pub nodes: u64,
    pub depth: u32,
    pub elapsed_ms: u64,
}

/// A selected action, serialized as JSON
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    pub diagnostics: Option<SearchDiagnostics>,
}

impl Decision {
    /// Decode the action as a coin-line move
    pub fn side(&self) -> Result<Side, EngineError> {
        serde_json::from_str(&self.action).map_err(|e| EngineError::MalformedState(e.to_string()))
    }
}

// ============================================================================
// ENGINE TRAITS
// ============================================================================

/// A stateful, single-threaded compute engine
pub trait Engine: Send {
    /// Apply runtime settings; takes effect on the next call
    fn configure(&mut self, update: &ConfigUpdate);

    /// Choose an action for `player` in the serialized `state`
    fn select_action(&mut self, state: &str, player: Player) -> Result<Decision, EngineError>;

    /// Play every match of a matchup, reporting `(completed, total)` after each
    fn run_matchup(
        &mut self,
        matchup: &MatchupSpec,
        on_match_done: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<MatchResult>, EngineError>;
}

/// Creates one engine per worker
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineConfig) -> Result<Box<dyn Engine>, EngineError> + Send + Sync,
{
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
        self(config)
    }
}

// ============================================================================
// COIN-LINE ENGINE
// ============================================================================

/// Reference engine playing the coin-line game
pub struct CoinEngine {
    config: EngineConfig,
    seed_counter: u64,
}

impl CoinEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        if config.time_limit.is_zero() {
            return Err(EngineError::InvalidConfig(
                "time limit must be positive".to_string(),
            ));
        }
        let seed_counter = config.seed.unwrap_or(42);
        Ok(Self {
            config,
            seed_counter,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn budget(&self, depth: u32) -> SearchBudget {
        SearchBudget::depth(depth)
            .with_max_nodes(self.config.max_nodes)
            .with_time_limit(self.config.time_limit)
    }

    fn next_seed(&mut self) -> u64 {
        let seed = self.seed_counter;
        self.seed_counter = self.seed_counter.wrapping_add(1);
        seed
    }

    /// Play one match; Player::One is whichever slot moves first
    fn play_match(&self, matchup: &MatchupSpec, match_index: usize) -> MatchResult {
        let first = matchup.first_mover(match_index);
        let slot_of = |player: Player| match player {
            Player::One => first,
            Player::Two => first.other(),
        };

        let match_seed = matchup.seed ^ ((match_index as u64) << 32);
        let mut searchers = [Player::One, Player::Two].map(|p| {
            let competitor = matchup.competitor(slot_of(p));
            Searcher::new(competitor.noise, match_seed.wrapping_add(p.index() as u64))
        });

        let board_seed = matchup.board_seed(match_index);
        let mut state = CoinLine::generate(board_seed, matchup.coins, Player::One);
        let winner = loop {
            if let Some(winner) = state.result().winner() {
                break winner;
            }
            let mover = state.to_move();
            let depth = matchup.competitor(slot_of(mover)).depth;
            let report = searchers[mover.index()].search(&state, &self.budget(depth));
            if self.config.debug {
                tracing::debug!(
                    "Matchup {} match {} turn {}: {:?} picks {:?} (score {}, depth {}, {} nodes, {:?})",
                    matchup.matchup_id,
                    match_index,
                    state.turn(),
                    matchup.competitor(slot_of(mover)).name,
                    report.best,
                    report.score,
                    report.depth,
                    report.nodes,
                    report.elapsed
                );
            }
            // Left is always legal while the game is ongoing
            state = state.apply_move(report.best.unwrap_or(Side::Left));
        };

        let player_of = |slot: Slot| {
            if slot == first {
                Player::One
            } else {
                Player::Two
            }
        };
        MatchResult {
            matchup_id: matchup.matchup_id,
            competitor_a: matchup.index_a,
            competitor_b: matchup.index_b,
            winner: slot_of(winner),
            turns: state.turn(),
            points_a: state.score(player_of(Slot::A)),
            points_b: state.score(player_of(Slot::B)),
        }
    }
}

impl Engine for CoinEngine {
    fn configure(&mut self, update: &ConfigUpdate) {
        self.config.apply(update);
    }

    fn select_action(&mut self, state: &str, player: Player) -> Result<Decision, EngineError> {
        let state = CoinLine::from_json(state)?;
        if state.result() != GameResult::Ongoing {
            return Err(EngineError::GameOver);
        }
        if state.to_move() != player {
            return Err(EngineError::WrongPlayer {
                requested: player,
                to_move: state.to_move(),
            });
        }

        let seed = self.next_seed();
        let mut searcher = Searcher::new(0, seed);
        let report = searcher.search(&state, &self.budget(self.config.difficulty.search_depth()));
        let side = report.best.ok_or(EngineError::GameOver)?;

        tracing::debug!(
            "Selected {:?} at depth {} ({} nodes, {:?})",
            side,
            report.depth,
            report.nodes,
            report.elapsed
        );

        let diagnostics = self.config.debug.then(|| SearchDiagnostics {
            score: report.score,
            nodes: report.nodes,
            depth: report.depth,
            elapsed_ms: report.elapsed.as_millis() as u64,
        });

        Ok(Decision {
            action: serde_json::to_string(&side).unwrap_or_default(),
            diagnostics,
        })
    }

    fn run_matchup(
        &mut self,
        matchup: &MatchupSpec,
        on_match_done: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<MatchResult>, EngineError> {
        if matchup.index_a == matchup.index_b {
            return Err(EngineError::InvalidMatchup(format!(
                "competitor {} cannot play itself",
                matchup.index_a
            )));
        }
        if matchup.coins == 0 {
            return Err(EngineError::InvalidMatchup(
                "lines need at least one coin".to_string(),
            ));
        }

        let total = matchup.match_count;
        let mut results = Vec::with_capacity(total);
        for match_index in 0..total {
            let result = self.play_match(matchup, match_index);
            tracing::debug!(
                "Matchup {} match {}/{}: winner {:?} after {} turns",
                matchup.matchup_id,
                match_index + 1,
                total,
                result.winner,
                result.turns
            );
            results.push(result);
            on_match_done(match_index + 1, total);
        }
        Ok(results)
    }
}

/// Factory for [`CoinEngine`]
#[derive(Clone, Copy, Debug, Default)]
pub struct CoinEngineFactory;

impl EngineFactory for CoinEngineFactory {
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(CoinEngine::new(config.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::DEFAULT_COINS;
    use std::time::Duration;

    fn matchup(match_count: usize) -> MatchupSpec {
        MatchupSpec {
            matchup_id: 3,
            competitor_a: CompetitorSpec::new("a", 1),
            competitor_b: CompetitorSpec::new("b", 4),
            index_a: 0,
            index_b: 2,
            match_count,
            coins: DEFAULT_COINS,
            seed: 99,
        }
    }

    #[test]
    fn test_first_mover_alternates() {
        let spec = matchup(4);
        assert_eq!(spec.first_mover(0), Slot::A);
        assert_eq!(spec.first_mover(1), Slot::B);
        assert_eq!(spec.first_mover(2), Slot::A);
        assert_eq!(spec.board_seed(0), spec.board_seed(1));
        assert_ne!(spec.board_seed(1), spec.board_seed(2));
    }

    #[test]
    fn test_run_matchup_reports_each_match() {
        let mut engine = CoinEngine::new(EngineConfig::default()).unwrap();
        let mut progress = Vec::new();
        let results = engine
            .run_matchup(&matchup(4), &mut |done, total| progress.push((done, total)))
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(progress, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
        for result in &results {
            assert_eq!(result.matchup_id, 3);
            assert_eq!((result.competitor_a, result.competitor_b), (0, 2));
            assert!(result.turns > 0);
            assert_ne!(result.winner_index(), result.loser_index());
        }
    }

    #[test]
    fn test_move_tracing_leaves_results_unchanged() {
        let config = EngineConfig::default().with_max_nodes(Some(5_000));
        let mut quiet = CoinEngine::new(config.clone()).unwrap();
        let mut traced = CoinEngine::new(config.with_debug(true)).unwrap();

        let expected = quiet.run_matchup(&matchup(3), &mut |_, _| {}).unwrap();
        let actual = traced.run_matchup(&matchup(3), &mut |_, _| {}).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_run_matchup_rejects_self_play() {
        let mut engine = CoinEngine::new(EngineConfig::default()).unwrap();
        let mut spec = matchup(2);
        spec.index_b = spec.index_a;
        assert!(matches!(
            engine.run_matchup(&spec, &mut |_, _| {}),
            Err(EngineError::InvalidMatchup(_))
        ));
    }

    #[test]
    fn test_select_action_returns_legal_move() {
        let mut engine = CoinEngine::new(EngineConfig::default().with_debug(true)).unwrap();
        let state = CoinLine::generate(5, 10, Player::One);
        let decision = engine.select_action(&state.to_json(), Player::One).unwrap();

        assert!(state.legal_moves().contains(&decision.side().unwrap()));
        assert!(decision.diagnostics.is_some());
    }

    #[test]
    fn test_select_action_errors() {
        let mut engine = CoinEngine::new(EngineConfig::default()).unwrap();
        let state = CoinLine::generate(5, 10, Player::One);

        assert!(matches!(
            engine.select_action(&state.to_json(), Player::Two),
            Err(EngineError::WrongPlayer { .. })
        ));
        assert!(matches!(
            engine.select_action("{", Player::One),
            Err(EngineError::MalformedState(_))
        ));
    }

    #[test]
    fn test_configure_toggles_diagnostics() {
        let mut engine = CoinEngine::new(EngineConfig::default()).unwrap();
        let state = CoinLine::generate(5, 10, Player::One).to_json();
        assert!(engine.select_action(&state, Player::One).unwrap().diagnostics.is_none());

        let update = engine.config().clone().with_debug(true).update();
        engine.configure(&update);
        assert!(engine.select_action(&state, Player::One).unwrap().diagnostics.is_some());
    }

    #[test]
    fn test_zero_time_limit_rejected() {
        let config = EngineConfig::default().with_time_limit(Duration::ZERO);
        assert!(CoinEngineFactory.create(&config).is_err());
    }
}
