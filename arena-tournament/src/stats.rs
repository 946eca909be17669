//! Per-competitor statistics folded from match results
//!
//! Level 3 - Steps
//!
//! Only raw counters are stored. Every rate or average is derived from them
//! on demand, so partial folds during a tournament and the final fold over
//! the complete result set can never drift apart.

use arena_core::MatchResult;
use serde::Serialize;

/// Raw accumulators for one competitor
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompetitorStats {
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_points: u64,
    pub total_turns: u64,
    /// Turns summed over won games only
    pub total_win_turns: u64,
}

impl CompetitorStats {
    /// Wins / (wins + losses); None before any game
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.wins + self.losses;
        if decided == 0 {
            None
        } else {
            Some(self.wins as f64 / decided as f64)
        }
    }

    /// Standard error of the win-rate proportion, sqrt(p(1-p)/n)
    pub fn win_rate_std_error(&self) -> Option<f64> {
        let p = self.win_rate()?;
        let n = (self.wins + self.losses) as f64;
        Some((p * (1.0 - p) / n).sqrt())
    }

    pub fn average_points(&self) -> Option<f64> {
        ratio(self.total_points, self.games_played as u64)
    }

    pub fn average_game_length(&self) -> Option<f64> {
        ratio(self.total_turns, self.games_played as u64)
    }

    /// Average turns taken to win; None without a win
    pub fn average_win_length(&self) -> Option<f64> {
        ratio(self.total_win_turns, self.wins as u64)
    }

    pub fn merge(&mut self, other: &CompetitorStats) {
        self.games_played += other.games_played;
        self.wins += other.wins;
        self.losses += other.losses;
        self.total_points += other.total_points;
        self.total_turns += other.total_turns;
        self.total_win_turns += other.total_win_turns;
    }

    fn record_game(&mut self, won: bool, points: u32, turns: u32) {
        self.games_played += 1;
        self.total_points += points as u64;
        self.total_turns += turns as u64;
        if won {
            self.wins += 1;
            self.total_win_turns += turns as u64;
        } else {
            self.losses += 1;
        }
    }
}

fn ratio(total: u64, count: u64) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some(total as f64 / count as f64)
    }
}

/// Accumulators for every competitor, indexed by tournament index
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    competitors: Vec<CompetitorStats>,
}

impl AggregateStats {
    /// Empty stats for `n` competitors
    pub fn new(n: usize) -> Self {
        Self {
            competitors: vec![CompetitorStats::default(); n],
        }
    }

    /// Fold one match into both competitors' accumulators
    pub fn record(&mut self, result: &MatchResult) {
        let winner = result.winner_index();
        self.ensure(result.competitor_a.max(result.competitor_b));

        self.competitors[result.competitor_a].record_game(
            winner == result.competitor_a,
            result.points_a,
            result.turns,
        );
        self.competitors[result.competitor_b].record_game(
            winner == result.competitor_b,
            result.points_b,
            result.turns,
        );
    }

    pub fn record_all<'a>(&mut self, results: impl IntoIterator<Item = &'a MatchResult>) {
        for result in results {
            self.record(result);
        }
    }

    /// Combine two partial folds
    pub fn merge(&mut self, other: &AggregateStats) {
        if other.competitors.is_empty() {
            return;
        }
        self.ensure(other.competitors.len() - 1);
        for (mine, theirs) in self.competitors.iter_mut().zip(&other.competitors) {
            mine.merge(theirs);
        }
    }

    pub fn competitor(&self, index: usize) -> Option<&CompetitorStats> {
        self.competitors.get(index)
    }

    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }

    /// Matches folded so far (each match counts for two competitors)
    pub fn matches_recorded(&self) -> u64 {
        let games: u64 = self.competitors.iter().map(|c| c.games_played as u64).sum();
        games / 2
    }

    fn ensure(&mut self, index: usize) {
        if self.competitors.len() <= index {
            self.competitors
                .resize(index + 1, CompetitorStats::default());
        }
    }
}

/// Fold a list of results from scratch
pub fn aggregate(results: &[MatchResult]) -> AggregateStats {
    let mut stats = AggregateStats::default();
    stats.record_all(results);
    stats
}

/// Win rate of competitor `index`; None when it has no decided games
pub fn win_rate(stats: &AggregateStats, index: usize) -> Option<f64> {
    stats.competitor(index)?.win_rate()
}

/// Average turns-to-win of competitor `index`; None without a win
pub fn average_win_length(stats: &AggregateStats, index: usize) -> Option<f64> {
    stats.competitor(index)?.average_win_length()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::Slot;

    fn result(a: usize, b: usize, winner: Slot, turns: u32, points: (u32, u32)) -> MatchResult {
        MatchResult {
            matchup_id: 0,
            competitor_a: a,
            competitor_b: b,
            winner,
            turns,
            points_a: points.0,
            points_b: points.1,
        }
    }

    fn sample() -> Vec<MatchResult> {
        vec![
            result(0, 1, Slot::A, 10, (30, 20)),
            result(0, 1, Slot::B, 12, (15, 25)),
            result(1, 2, Slot::A, 8, (22, 18)),
            result(0, 2, Slot::A, 6, (40, 0)),
        ]
    }

    #[test]
    fn test_record_updates_both_sides() {
        let stats = aggregate(&sample()[..1]);
        let a = stats.competitor(0).unwrap();
        let b = stats.competitor(1).unwrap();

        assert_eq!((a.games_played, a.wins, a.losses), (1, 1, 0));
        assert_eq!((b.games_played, b.wins, b.losses), (1, 0, 1));
        assert_eq!(a.total_points, 30);
        assert_eq!(b.total_points, 20);
        assert_eq!(a.total_win_turns, 10);
        assert_eq!(b.total_win_turns, 0);
        assert_eq!(a.total_turns, b.total_turns);
    }

    #[test]
    fn test_wins_plus_losses_equals_games() {
        let stats = aggregate(&sample());
        for i in 0..stats.len() {
            let c = stats.competitor(i).unwrap();
            assert_eq!(c.wins + c.losses, c.games_played);
        }
        assert_eq!(stats.matches_recorded(), 4);
    }

    #[test]
    fn test_order_independent() {
        let forward = aggregate(&sample());
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(forward, aggregate(&reversed));

        let mut rotated = sample();
        rotated.rotate_left(2);
        assert_eq!(forward, aggregate(&rotated));
    }

    #[test]
    fn test_partial_folds_merge_to_full_fold() {
        let results = sample();
        let mut left = aggregate(&results[..1]);
        let right = aggregate(&results[1..]);
        left.merge(&right);
        assert_eq!(left, aggregate(&results));

        // Merging into an empty fold grows it
        let mut empty = AggregateStats::default();
        empty.merge(&right);
        assert_eq!(empty, right);
    }

    #[test]
    fn test_derived_metrics() {
        let stats = aggregate(&sample());

        // Competitor 0: won 10-turn and 6-turn games, lost a 12-turn game
        assert_eq!(win_rate(&stats, 0), Some(2.0 / 3.0));
        assert_eq!(average_win_length(&stats, 0), Some(8.0));
        let c0 = stats.competitor(0).unwrap();
        assert_eq!(c0.average_game_length(), Some(28.0 / 3.0));
        assert_eq!(c0.average_points(), Some(85.0 / 3.0));

        // Competitor 2 never won
        assert_eq!(win_rate(&stats, 2), Some(0.0));
        assert_eq!(average_win_length(&stats, 2), None);
    }

    #[test]
    fn test_undefined_without_games() {
        let stats = AggregateStats::new(3);
        assert_eq!(win_rate(&stats, 1), None);
        assert_eq!(win_rate(&stats, 9), None);
        let c = stats.competitor(0).unwrap();
        assert_eq!(c.win_rate_std_error(), None);
        assert_eq!(c.average_points(), None);
    }

    #[test]
    fn test_std_error() {
        let c = CompetitorStats {
            games_played: 100,
            wins: 50,
            losses: 50,
            ..Default::default()
        };
        assert!((c.win_rate_std_error().unwrap() - 0.05).abs() < 1e-12);

        let perfect = CompetitorStats {
            games_played: 4,
            wins: 4,
            ..Default::default()
        };
        assert_eq!(perfect.win_rate_std_error(), Some(0.0));
    }
}
