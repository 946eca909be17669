//! Tournament execution over any compute backend
//!
//! Level 1 - Orchestration and Level 2 - Phases

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use arena_core::CompetitorSpec;
use arena_pool::{ComputeBackend, PoolEvent, Submission, TaskId, TaskOutcome, WorkerError};
use rustc_hash::FxHashSet;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TournamentConfig;
use crate::schedule::schedule_round_robin;
use crate::stats::{AggregateStats, CompetitorStats};

#[derive(Debug, Error)]
pub enum TournamentError {
    #[error("a tournament needs at least two competitors, got {0}")]
    TooFewCompetitors(usize),

    #[error("competitor name {0:?} is used more than once")]
    DuplicateName(String),

    #[error("invalid tournament configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Backend(#[from] WorkerError),
}

/// Standing of a competitor in the tournament
#[derive(Clone, Debug, Serialize)]
pub struct Standing {
    /// Index of the competitor in the submitted roster
    pub index: usize,
    pub name: String,
    pub stats: CompetitorStats,
}

impl Standing {
    pub fn win_rate(&self) -> Option<f64> {
        self.stats.win_rate()
    }

    pub fn margin_of_error(&self) -> Option<f64> {
        self.stats.win_rate_std_error()
    }
}

/// A matchup that produced no results
#[derive(Clone, Debug, Serialize)]
pub struct FailedMatchup {
    pub task_id: u64,
    pub competitor_a: String,
    pub competitor_b: String,
    pub error: String,
}

/// Result of a tournament
#[derive(Clone, Debug, Serialize)]
pub struct TournamentResult {
    /// Final standings sorted by win rate, then average points
    pub standings: Vec<Standing>,
    pub stats: AggregateStats,
    pub failed: Vec<FailedMatchup>,
    pub matches_played: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl TournamentResult {
    /// Get winner (top standing)
    pub fn winner(&self) -> Option<&Standing> {
        self.standings.first()
    }

    /// Get top N performers
    pub fn top_n(&self, n: usize) -> &[Standing] {
        let n = n.min(self.standings.len());
        &self.standings[..n]
    }

    /// Get standing for a specific competitor index
    pub fn standing_for(&self, index: usize) -> Option<&Standing> {
        self.standings.iter().find(|s| s.index == index)
    }
}

/// Snapshot handed to the observer after every event
#[derive(Clone, Debug)]
pub struct TournamentProgress<'a> {
    pub completed_matches: usize,
    pub total_matches: usize,
    pub finished_matchups: usize,
    pub total_matchups: usize,
    pub failed_matchups: usize,
    /// Running fold of every finished matchup
    pub stats: &'a AggregateStats,
}

// ============================================================================
// Level 1 - Orchestration
// ============================================================================

/// Run a round-robin tournament (Level 1 orchestration)
///
/// Schedules one matchup per pair, submits them all to `backend`, folds
/// each matchup's results as soon as it finishes and reports progress to
/// `observer` along the way.
pub async fn run_tournament(
    competitors: &[CompetitorSpec],
    config: &TournamentConfig,
    backend: &dyn ComputeBackend,
    observer: &mut dyn FnMut(&TournamentProgress<'_>),
) -> Result<TournamentResult, TournamentError> {
    validate(competitors, config)?;
    let started = Instant::now();

    let tasks = schedule_round_robin(competitors, config);
    info!(
        "Round robin: {} competitors, {} matchups, {} matches ({} backend)",
        competitors.len(),
        tasks.len(),
        tasks.len() * config.matches_per_pair,
        backend.kind()
    );

    let submission = backend.submit_batch(tasks);
    let folded = fold_submission(submission, competitors, observer).await?;

    let standings = compute_standings(competitors, &folded.stats);
    let matches_played = folded.stats.matches_recorded();
    info!(
        "Tournament finished: {} matches in {:.1}s, {} failed matchups",
        matches_played,
        started.elapsed().as_secs_f64(),
        folded.failed.len()
    );

    Ok(TournamentResult {
        standings,
        stats: folded.stats,
        failed: folded.failed,
        matches_played,
        elapsed: started.elapsed(),
    })
}

// ============================================================================
// Level 2 - Phases
// ============================================================================

fn validate(competitors: &[CompetitorSpec], config: &TournamentConfig) -> Result<(), TournamentError> {
    if competitors.len() < 2 {
        return Err(TournamentError::TooFewCompetitors(competitors.len()));
    }
    if config.matches_per_pair == 0 {
        return Err(TournamentError::InvalidConfig(
            "matches per pair must be at least 1".to_string(),
        ));
    }
    if config.coins == 0 {
        return Err(TournamentError::InvalidConfig(
            "coin lines must not be empty".to_string(),
        ));
    }
    let mut seen = FxHashSet::default();
    for competitor in competitors {
        if !seen.insert(competitor.name.as_str()) {
            return Err(TournamentError::DuplicateName(competitor.name.clone()));
        }
    }
    Ok(())
}

struct Folded {
    stats: AggregateStats,
    failed: Vec<FailedMatchup>,
}

/// Consume the live event stream, then reconcile with the final outcomes
async fn fold_submission(
    mut submission: Submission,
    competitors: &[CompetitorSpec],
    observer: &mut dyn FnMut(&TournamentProgress<'_>),
) -> Result<Folded, TournamentError> {
    let total_matchups = submission.task_count();
    let mut stats = AggregateStats::new(competitors.len());
    let mut failed = Vec::new();
    let mut folded: FxHashSet<TaskId> = FxHashSet::default();
    let mut completed_matches = 0;
    let total_matches = submission.total_units();

    while let Some(event) = submission.next_event().await {
        match event {
            PoolEvent::MatchCompleted { completed, .. } => completed_matches = completed,
            PoolEvent::TaskFinished(outcome) => {
                if folded.insert(outcome.task_id) {
                    fold_outcome(&outcome, competitors, &mut stats, &mut failed);
                }
            }
        }
        observer(&TournamentProgress {
            completed_matches,
            total_matches,
            finished_matchups: folded.len(),
            total_matchups,
            failed_matchups: failed.len(),
            stats: &stats,
        });
    }

    for outcome in submission.wait().await? {
        if folded.insert(outcome.task_id) {
            fold_outcome(&outcome, competitors, &mut stats, &mut failed);
        }
    }

    Ok(Folded { stats, failed })
}

// ============================================================================
// Level 3 - Steps
// ============================================================================

fn fold_outcome(
    outcome: &TaskOutcome,
    competitors: &[CompetitorSpec],
    stats: &mut AggregateStats,
    failed: &mut Vec<FailedMatchup>,
) {
    match &outcome.result {
        Ok(output) => stats.record_all(output.matches()),
        Err(e) => {
            let (a, b) = pair_names(outcome.task_id, competitors);
            warn!("Matchup {} vs {} failed: {}", a, b, e.root_cause());
            failed.push(FailedMatchup {
                task_id: outcome.task_id.0,
                competitor_a: a,
                competitor_b: b,
                error: e.root_cause().to_string(),
            });
        }
    }
}

/// Names of the pair scheduled under `task_id`
fn pair_names(task_id: TaskId, competitors: &[CompetitorSpec]) -> (String, String) {
    crate::schedule::generate_round_robin_pairings(competitors.len())
        .get(task_id.0 as usize)
        .map(|&(i, j)| (competitors[i].name.clone(), competitors[j].name.clone()))
        .unwrap_or_else(|| ("?".to_string(), "?".to_string()))
}

/// Compute final standings, best first
fn compute_standings(competitors: &[CompetitorSpec], stats: &AggregateStats) -> Vec<Standing> {
    let mut standings: Vec<Standing> = competitors
        .iter()
        .enumerate()
        .map(|(index, competitor)| Standing {
            index,
            name: competitor.name.clone(),
            stats: stats.competitor(index).cloned().unwrap_or_default(),
        })
        .collect();

    // Win rate (undefined last), then average points, then roster order
    standings.sort_by(|a, b| {
        compare_metric(a.win_rate(), b.win_rate())
            .then_with(|| compare_metric(a.stats.average_points(), b.stats.average_points()))
            .then_with(|| a.index.cmp(&b.index))
    });

    standings
}

/// Descending order, with undefined values after every defined one
fn compare_metric(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::{MatchResult, Slot};

    fn roster(names: &[&str]) -> Vec<CompetitorSpec> {
        names.iter().map(|n| CompetitorSpec::new(n, 2)).collect()
    }

    fn win(a: usize, b: usize, winner: Slot) -> MatchResult {
        MatchResult {
            matchup_id: 0,
            competitor_a: a,
            competitor_b: b,
            winner,
            turns: 10,
            points_a: 20,
            points_b: 20,
        }
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let config = TournamentConfig::round_robin(2);
        assert!(matches!(
            validate(&roster(&["solo"]), &config),
            Err(TournamentError::TooFewCompetitors(1))
        ));
        assert!(matches!(
            validate(&roster(&["a", "b", "a"]), &config),
            Err(TournamentError::DuplicateName(name)) if name == "a"
        ));
        assert!(matches!(
            validate(&roster(&["a", "b"]), &TournamentConfig::round_robin(0)),
            Err(TournamentError::InvalidConfig(_))
        ));
        assert!(validate(&roster(&["a", "b"]), &config).is_ok());
    }

    #[test]
    fn test_compute_standings() {
        let competitors = roster(&["A", "B", "C"]);
        let mut stats = AggregateStats::new(3);
        stats.record(&win(0, 1, Slot::B));
        stats.record(&win(0, 1, Slot::B));
        stats.record(&win(0, 1, Slot::A));

        let standings = compute_standings(&competitors, &stats);
        assert_eq!(standings.len(), 3);
        assert_eq!(standings[0].name, "B");
        assert_eq!(standings[1].name, "A");
        // C never played and sorts last
        assert_eq!(standings[2].name, "C");
        assert_eq!(standings[2].win_rate(), None);
    }

    #[test]
    fn test_standings_break_ties_on_points() {
        let competitors = roster(&["A", "B"]);
        let mut stats = AggregateStats::new(2);
        stats.record(&MatchResult {
            points_a: 5,
            points_b: 30,
            ..win(0, 1, Slot::A)
        });
        stats.record(&MatchResult {
            points_a: 5,
            points_b: 30,
            ..win(0, 1, Slot::B)
        });

        let standings = compute_standings(&competitors, &stats);
        assert_eq!(standings[0].name, "B");
    }

    #[test]
    fn test_tournament_result_accessors() {
        let competitors = roster(&["A", "B"]);
        let mut stats = AggregateStats::new(2);
        stats.record(&win(0, 1, Slot::A));
        let result = TournamentResult {
            standings: compute_standings(&competitors, &stats),
            stats,
            failed: Vec::new(),
            matches_played: 1,
            elapsed: Duration::ZERO,
        };

        assert_eq!(result.winner().unwrap().name, "A");
        assert_eq!(result.top_n(1).len(), 1);
        assert_eq!(result.top_n(5).len(), 2);
        assert!(result.standing_for(1).is_some());
        assert!(result.standing_for(99).is_none());
    }

    #[test]
    fn test_pair_names_follow_schedule() {
        let competitors = roster(&["A", "B", "C"]);
        assert_eq!(pair_names(TaskId(2), &competitors), ("B".to_string(), "C".to_string()));
        assert_eq!(pair_names(TaskId(7), &competitors), ("?".to_string(), "?".to_string()));
    }
}
