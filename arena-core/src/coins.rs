//! Coin-line game state and move generation
//!
//! A row of coins lies on the table. Players alternately take the coin at
//! either end of the row and add its value to their total. A coin worth zero
//! is a trap: whoever takes it loses on the spot. When the row is empty the
//! higher total wins; equal totals go to the player who took the last coin.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default number of coins on a generated line
pub const DEFAULT_COINS: usize = 16;

/// Highest coin value
pub const MAX_COIN: u8 = 9;

/// One coin in TRAP_ODDS is a trap (value 0)
const TRAP_ODDS: u32 = 8;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Player seat, in move order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Player {
    One = 0,
    Two = 1,
}

impl Player {
    pub fn opponent(self) -> Self {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// End of the line a coin is taken from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Game result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    Ongoing,
    OneWins,
    TwoWins,
}

impl GameResult {
    pub fn winner(self) -> Option<Player> {
        match self {
            GameResult::Ongoing => None,
            GameResult::OneWins => Some(Player::One),
            GameResult::TwoWins => Some(Player::Two),
        }
    }

    fn won_by(player: Player) -> Self {
        match player {
            Player::One => GameResult::OneWins,
            Player::Two => GameResult::TwoWins,
        }
    }
}

/// Full game state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinLine {
    coins: Vec<u8>,
    left: usize,
    right: usize,
    scores: [u32; 2],
    to_move: Player,
    turn: u32,
    last_taker: Option<Player>,
    trapped: Option<Player>,
}

impl CoinLine {
    /// Create a game from explicit coin values
    pub fn new(coins: Vec<u8>, first: Player) -> Self {
        let right = coins.len();
        Self {
            coins,
            left: 0,
            right,
            scores: [0, 0],
            to_move: first,
            turn: 0,
            last_taker: None,
            trapped: None,
        }
    }

    /// Generate a random line of `len` coins; the two ends are never traps
    pub fn generate(seed: u64, len: usize, first: Player) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let coins = (0..len)
            .map(|i| {
                let at_end = i == 0 || i + 1 == len;
                if !at_end && rng.gen_ratio(1, TRAP_ODDS) {
                    0
                } else {
                    rng.gen_range(1..=MAX_COIN)
                }
            })
            .collect();
        Self::new(coins, first)
    }

    /// Parse a state produced by [`CoinLine::to_json`]
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let state: CoinLine =
            serde_json::from_str(json).map_err(|e| EngineError::MalformedState(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    pub fn to_json(&self) -> String {
        // Plain data with no maps keyed by non-strings: serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.left > self.right || self.right > self.coins.len() {
            return Err(EngineError::MalformedState(format!(
                "window {}..{} outside a line of {} coins",
                self.left,
                self.right,
                self.coins.len()
            )));
        }
        if self.coins.iter().any(|&c| c > MAX_COIN) {
            return Err(EngineError::MalformedState(format!(
                "coin values must not exceed {}",
                MAX_COIN
            )));
        }
        Ok(())
    }

    /// Coins still on the table, left to right
    pub fn remaining(&self) -> &[u8] {
        &self.coins[self.left..self.right]
    }

    pub fn to_move(&self) -> Player {
        self.to_move
    }

    /// Number of coins taken so far
    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn score(&self, player: Player) -> u32 {
        self.scores[player.index()]
    }

    pub fn result(&self) -> GameResult {
        if let Some(loser) = self.trapped {
            return GameResult::won_by(loser.opponent());
        }
        if self.left < self.right {
            return GameResult::Ongoing;
        }

        let (one, two) = (self.scores[0], self.scores[1]);
        if one != two {
            return if one > two {
                GameResult::OneWins
            } else {
                GameResult::TwoWins
            };
        }
        // Ties go to whoever took the last coin; an empty start favors the second seat
        let winner = self.last_taker.unwrap_or(self.to_move.opponent());
        GameResult::won_by(winner)
    }

    /// Legal moves; a single remaining coin is only offered once
    pub fn legal_moves(&self) -> Vec<Side> {
        if self.result() != GameResult::Ongoing {
            return Vec::new();
        }
        if self.right - self.left == 1 {
            vec![Side::Left]
        } else {
            vec![Side::Left, Side::Right]
        }
    }

    /// Value of the coin a move would take
    pub fn coin_at(&self, side: Side) -> Option<u8> {
        if self.left >= self.right {
            return None;
        }
        match side {
            Side::Left => Some(self.coins[self.left]),
            Side::Right => Some(self.coins[self.right - 1]),
        }
    }

    /// Apply a move, returning the new state
    pub fn apply_move(&self, side: Side) -> CoinLine {
        let mut next = self.clone();
        let Some(coin) = self.coin_at(side) else {
            return next;
        };

        match side {
            Side::Left => next.left += 1,
            Side::Right => next.right -= 1,
        }

        let mover = self.to_move;
        if coin == 0 {
            next.trapped = Some(mover);
        } else {
            next.scores[mover.index()] += coin as u32;
        }
        next.last_taker = Some(mover);
        next.turn += 1;
        next.to_move = mover.opponent();
        next
    }
}
