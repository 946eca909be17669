//! Scripted engines for exercising workers without a real search

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arena_core::{
    CompetitorSpec, ConfigUpdate, Decision, Engine, EngineConfig, EngineError, EngineFactory,
    MatchResult, MatchupSpec, Player,
};
use arena_pool::{Task, TaskId, TaskPayload};

/// How long a "slow" decision takes
pub const SLOW: Duration = Duration::from_millis(200);

/// Behaviour keyed by the request's state string (or competitor A's name):
/// - `slow`: sleeps for [`SLOW`] then answers
/// - `panic`: sleeps briefly then panics, killing the worker thread
/// - `error`: returns an engine error
/// - anything else: answers immediately
pub struct ScriptedEngine;

impl ScriptedEngine {
    fn act(script: &str) -> Result<(), EngineError> {
        match script {
            "slow" => thread::sleep(SLOW),
            "panic" => {
                thread::sleep(Duration::from_millis(50));
                panic!("scripted engine crash");
            }
            "error" => return Err(EngineError::MalformedState("scripted failure".to_string())),
            _ => {}
        }
        Ok(())
    }
}

impl Engine for ScriptedEngine {
    fn configure(&mut self, _update: &ConfigUpdate) {}

    fn select_action(&mut self, state: &str, _player: Player) -> Result<Decision, EngineError> {
        Self::act(state)?;
        Ok(Decision {
            action: "\"Left\"".to_string(),
            diagnostics: None,
        })
    }

    fn run_matchup(
        &mut self,
        matchup: &MatchupSpec,
        on_match_done: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<MatchResult>, EngineError> {
        Self::act(&matchup.competitor_a.name)?;
        let mut results = Vec::with_capacity(matchup.match_count);
        for i in 0..matchup.match_count {
            thread::sleep(Duration::from_millis(10));
            results.push(MatchResult {
                matchup_id: matchup.matchup_id,
                competitor_a: matchup.index_a,
                competitor_b: matchup.index_b,
                winner: matchup.first_mover(i),
                turns: 4,
                points_a: 10,
                points_b: 8,
            });
            on_match_done(i + 1, matchup.match_count);
        }
        Ok(results)
    }
}

fn scripted(_: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
    Ok(Box::new(ScriptedEngine))
}

fn failing(_: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
    Err(EngineError::InvalidConfig("no engine today".to_string()))
}

fn sluggish(_: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
    thread::sleep(Duration::from_millis(500));
    Ok(Box::new(ScriptedEngine))
}

pub fn scripted_factory() -> Arc<dyn EngineFactory> {
    Arc::new(scripted)
}

/// Fails every engine creation
pub fn failing_factory() -> Arc<dyn EngineFactory> {
    Arc::new(failing)
}

/// Takes longer to create an engine than any test's init timeout
pub fn sluggish_factory() -> Arc<dyn EngineFactory> {
    Arc::new(sluggish)
}

/// Fails only the `fail_on`-th creation (1-based); all others succeed
pub fn flaky_factory(fail_on: usize) -> Arc<dyn EngineFactory> {
    let created = AtomicUsize::new(0);
    Arc::new(
        move |_: &EngineConfig| -> Result<Box<dyn Engine>, EngineError> {
            let attempt = created.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt == fail_on {
                Err(EngineError::InvalidConfig("flaky start".to_string()))
            } else {
                Ok(Box::new(ScriptedEngine))
            }
        },
    )
}

/// A matchup task whose behaviour follows competitor A's name
pub fn matchup_task(id: u64, script: &str, match_count: usize) -> Task {
    Task::new(
        TaskId(id),
        TaskPayload::Matchup(MatchupSpec {
            matchup_id: id,
            competitor_a: CompetitorSpec::new(script, 1),
            competitor_b: CompetitorSpec::new("rival", 1),
            index_a: 0,
            index_b: 1,
            match_count,
            coins: 8,
            seed: id,
        }),
    )
}
