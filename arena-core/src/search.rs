//! Iterative-deepening negamax searcher for the coin-line game

use std::time::{Duration, Instant};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::coins::{CoinLine, GameResult, Side};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Score of a won position (minus the ply it is reached at)
pub const WIN_VALUE: i32 = 100_000;

/// Larger than any reachable score
const INFINITY: i32 = WIN_VALUE * 2;

/// Wall clock is sampled once every CLOCK_CHECK_INTERVAL nodes
const CLOCK_CHECK_INTERVAL: u64 = 256;

// ============================================================================
// BUDGET AND REPORT
// ============================================================================

/// Limits applied to a single search
#[derive(Clone, Debug)]
pub struct SearchBudget {
    /// Deepest iteration to attempt
    pub max_depth: u32,
    /// Node budget across all iterations
    pub max_nodes: Option<u64>,
    /// Wall-clock deadline
    pub deadline: Option<Instant>,
}

impl SearchBudget {
    pub fn depth(max_depth: u32) -> Self {
        Self {
            max_depth,
            max_nodes: None,
            deadline: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.deadline = Some(Instant::now() + limit);
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: Option<u64>) -> Self {
        self.max_nodes = max_nodes;
        self
    }
}

/// Outcome of a search
#[derive(Clone, Debug)]
pub struct SearchReport {
    /// Chosen move (None only when the game is already over)
    pub best: Option<Side>,
    /// Score of the chosen move from the mover's point of view
    pub score: i32,
    /// Nodes visited across all iterations
    pub nodes: u64,
    /// Deepest fully completed iteration
    pub depth: u32,
    pub elapsed: Duration,
}

// ============================================================================
// SEARCHER
// ============================================================================

/// Negamax searcher with alpha-beta pruning and root noise
pub struct Searcher {
    noise: i32,
    rng: ChaCha8Rng,
    nodes: u64,
    max_nodes: Option<u64>,
    deadline: Option<Instant>,
    abortable: bool,
}

impl Searcher {
    pub fn new(noise: u32, seed: u64) -> Self {
        Self {
            noise: noise as i32,
            rng: ChaCha8Rng::seed_from_u64(seed),
            nodes: 0,
            max_nodes: None,
            deadline: None,
            abortable: false,
        }
    }

    /// Search the position, deepening until the budget runs out
    ///
    /// The first iteration always completes so a legal move is returned
    /// whenever one exists.
    pub fn search(&mut self, state: &CoinLine, budget: &SearchBudget) -> SearchReport {
        let started = Instant::now();
        self.nodes = 0;
        self.max_nodes = budget.max_nodes;
        self.deadline = budget.deadline;

        let horizon = (state.remaining().len() as u32).max(1);
        let max_depth = budget.max_depth.clamp(1, horizon);

        let mut best = None;
        let mut best_score = 0;
        let mut completed = 0;

        for depth in 1..=max_depth {
            self.abortable = depth > 1;
            match self.search_root(state, depth) {
                Some((side, score)) => {
                    best = side;
                    best_score = score;
                    completed = depth;
                }
                None => break,
            }
        }

        SearchReport {
            best,
            score: best_score,
            nodes: self.nodes,
            depth: completed,
            elapsed: started.elapsed(),
        }
    }

    /// Score every root move; None when the iteration was aborted
    fn search_root(&mut self, state: &CoinLine, depth: u32) -> Option<(Option<Side>, i32)> {
        let mut best: Option<(Side, i32, i32)> = None;

        for side in state.legal_moves() {
            let child = state.apply_move(side);
            let score = -self.negamax(&child, depth - 1, -INFINITY, INFINITY, 1)?;
            let jitter = if self.noise > 0 {
                self.rng.gen_range(-self.noise..=self.noise)
            } else {
                0
            };
            let noisy = score + jitter;

            if best.map_or(true, |(_, _, b)| noisy > b) {
                best = Some((side, score, noisy));
            }
        }

        Some(match best {
            Some((side, score, _)) => (Some(side), score),
            None => (None, evaluate(state)),
        })
    }

    fn negamax(
        &mut self,
        state: &CoinLine,
        depth: u32,
        mut alpha: i32,
        beta: i32,
        ply: i32,
    ) -> Option<i32> {
        self.nodes += 1;
        if self.should_abort() {
            return None;
        }

        match state.result() {
            GameResult::Ongoing => {}
            result => {
                let won = result.winner() == Some(state.to_move());
                return Some(if won { WIN_VALUE - ply } else { ply - WIN_VALUE });
            }
        }

        if depth == 0 {
            return Some(evaluate(state));
        }

        let mut best = -INFINITY;
        for side in state.legal_moves() {
            let child = state.apply_move(side);
            let score = -self.negamax(&child, depth - 1, -beta, -alpha, ply + 1)?;
            best = best.max(score);
            alpha = alpha.max(score);
            if alpha >= beta {
                break;
            }
        }
        Some(best)
    }

    fn should_abort(&self) -> bool {
        if !self.abortable {
            return false;
        }
        if self.max_nodes.map_or(false, |max| self.nodes > max) {
            return true;
        }
        self.nodes % CLOCK_CHECK_INTERVAL == 0
            && self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Static evaluation: point lead of the side to move
pub fn evaluate(state: &CoinLine) -> i32 {
    let me = state.to_move();
    state.score(me) as i32 - state.score(me.opponent()) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::Player;

    #[test]
    fn test_avoids_trap() {
        // Left is a trap, right is safe
        let state = CoinLine::new(vec![0, 5, 2, 1], Player::One);
        let mut searcher = Searcher::new(0, 1);
        let report = searcher.search(&state, &SearchBudget::depth(1));
        assert_eq!(report.best, Some(Side::Right));
    }

    #[test]
    fn test_full_depth_reaches_game_end() {
        // Four coins: the deepest iteration reaches the end of the game
        let state = CoinLine::new(vec![1, 9, 0, 2], Player::One);
        let mut searcher = Searcher::new(0, 1);
        let report = searcher.search(&state, &SearchBudget::depth(8));
        assert!(report.best.is_some());
        assert_eq!(report.depth, 4);
        assert!(report.nodes > 0);
    }

    #[test]
    fn test_node_budget_stops_deepening() {
        let state = CoinLine::generate(11, 20, Player::One);
        let mut searcher = Searcher::new(0, 1);
        let budget = SearchBudget::depth(20).with_max_nodes(Some(50));
        let report = searcher.search(&state, &budget);
        assert!(report.best.is_some());
        assert!(report.depth < 20);
    }

    #[test]
    fn test_finished_game_has_no_move() {
        let state = CoinLine::new(vec![3], Player::One).apply_move(Side::Left);
        let mut searcher = Searcher::new(0, 1);
        let report = searcher.search(&state, &SearchBudget::depth(4));
        assert_eq!(report.best, None);
    }

    #[test]
    fn test_evaluate_is_relative_to_mover() {
        let state = CoinLine::new(vec![7, 1], Player::One).apply_move(Side::Left);
        // Player Two to move, trailing by 7
        assert_eq!(evaluate(&state), -7);
    }
}
