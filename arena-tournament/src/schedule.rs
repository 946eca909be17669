//! Round-robin scheduling
//!
//! Level 3 - Steps

use arena_core::{CompetitorSpec, MatchupSpec};
use arena_pool::{Task, TaskId, TaskPayload};

use crate::config::TournamentConfig;

/// Every unordered pair `(i, j)` with `i < j`
pub fn generate_round_robin_pairings(n: usize) -> Vec<(usize, usize)> {
    let mut pairings = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            pairings.push((i, j));
        }
    }
    pairings
}

/// One matchup task per pair, `config.matches_per_pair` matches each
///
/// The lower index sits in slot A and moves first in even-indexed matches.
/// Every matchup plays the same lines (derived from `config.seed`), so
/// competitors are compared on identical positions.
pub fn schedule_round_robin(competitors: &[CompetitorSpec], config: &TournamentConfig) -> Vec<Task> {
    generate_round_robin_pairings(competitors.len())
        .into_iter()
        .enumerate()
        .map(|(pair, (i, j))| {
            let spec = MatchupSpec {
                matchup_id: pair as u64,
                competitor_a: competitors[i].clone(),
                competitor_b: competitors[j].clone(),
                index_a: i,
                index_b: j,
                match_count: config.matches_per_pair,
                coins: config.coins,
                seed: config.seed,
            };
            Task::new(TaskId(pair as u64), TaskPayload::Matchup(spec))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::Slot;

    fn roster(n: usize) -> Vec<CompetitorSpec> {
        (0..n)
            .map(|i| CompetitorSpec::new(&format!("bot-{i}"), i as u32 + 1))
            .collect()
    }

    #[test]
    fn test_generate_round_robin_pairings() {
        let pairings = generate_round_robin_pairings(4);
        assert_eq!(pairings.len(), 6); // C(4,2) = 6
        assert!(pairings.contains(&(0, 1)));
        assert!(pairings.contains(&(0, 3)));
        assert!(pairings.contains(&(1, 2)));
        assert!(pairings.contains(&(2, 3)));
        assert!(pairings.iter().all(|(i, j)| i < j));
    }

    #[test]
    fn test_generate_round_robin_pairings_empty() {
        assert!(generate_round_robin_pairings(0).is_empty());
        assert!(generate_round_robin_pairings(1).is_empty());
    }

    #[test]
    fn test_schedule_one_task_per_pair() {
        let config = TournamentConfig::round_robin(10);
        let tasks = schedule_round_robin(&roster(4), &config);
        assert_eq!(tasks.len(), 6);

        let total: usize = tasks.iter().map(|t| t.payload.work_units()).sum();
        assert_eq!(total, 60);

        let ids: Vec<u64> = tasks.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_first_mover_alternates() {
        let config = TournamentConfig::round_robin(4);
        let tasks = schedule_round_robin(&roster(2), &config);
        let TaskPayload::Matchup(spec) = &tasks[0].payload else {
            panic!("expected a matchup");
        };

        assert_eq!(spec.competitor_a.name, "bot-0");
        assert_eq!(spec.index_b, 1);
        let movers: Vec<Slot> = (0..4).map(|i| spec.first_mover(i)).collect();
        assert_eq!(movers, vec![Slot::A, Slot::B, Slot::A, Slot::B]);
        assert_eq!(spec.board_seed(0), spec.board_seed(1));
        assert_ne!(spec.board_seed(1), spec.board_seed(2));
    }
}
