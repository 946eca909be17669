//! Messages exchanged between the orchestrator and worker units
//!
//! Level 4 - Protocol types
//!
//! Every message kind is a closed enum variant; nothing crosses a worker
//! boundary as an untyped bag of fields.

use std::fmt;

use arena_core::{ConfigUpdate, Decision, EngineConfig, MatchResult, MatchupSpec, Player};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Identity of a task or proxy request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a worker incarnation
///
/// The generation changes whenever a slot is recreated, so events from a
/// previous incarnation can be told apart and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    pub index: usize,
    pub generation: u32,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Work carried by a task; opaque to the pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPayload {
    /// Pick one action for `player` in a JSON-serialized state
    SelectAction { state: String, player: Player },
    /// Play a series of matches between two competitors
    Matchup(MatchupSpec),
}

impl TaskPayload {
    /// Progress units this payload reports: one per match, or one for a decision
    pub fn work_units(&self) -> usize {
        match self {
            TaskPayload::SelectAction { .. } => 1,
            TaskPayload::Matchup(spec) => spec.match_count,
        }
    }
}

/// A unit of submitted work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
}

impl Task {
    pub fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self { id, payload }
    }
}

/// A single decision request issued through a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    pub id: TaskId,
    pub state: String,
    pub player: Player,
}

impl ActionRequest {
    pub fn into_task(self) -> Task {
        Task::new(
            self.id,
            TaskPayload::SelectAction {
                state: self.state,
                player: self.player,
            },
        )
    }
}

/// Successful result of a task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutput {
    Decision(Decision),
    Matches(Vec<MatchResult>),
}

impl TaskOutput {
    pub fn matches(&self) -> &[MatchResult] {
        match self {
            TaskOutput::Matches(results) => results,
            TaskOutput::Decision(_) => &[],
        }
    }
}

/// Terminal outcome of one submitted task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// Worker that ran the task, if it reached one
    pub worker: Option<usize>,
    pub result: Result<TaskOutput, WorkerError>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn matches(&self) -> &[MatchResult] {
        match &self.result {
            Ok(output) => output.matches(),
            Err(_) => &[],
        }
    }
}

/// Orchestrator -> worker
#[derive(Clone, Debug)]
pub enum ToWorker {
    Init(EngineConfig),
    Compute { task_id: TaskId, payload: TaskPayload },
    ConfigUpdate(ConfigUpdate),
    Shutdown,
}

/// Worker -> orchestrator
#[derive(Clone, Debug)]
pub enum FromWorker {
    Ready,
    InitError(String),
    TaskResult { task_id: TaskId, output: TaskOutput },
    TaskError { task_id: TaskId, error: String },
    Progress { task_id: TaskId, completed: usize, total: usize },
}

/// Everything an orchestrator hears from its workers
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// A reply sent by the worker itself
    Message { worker: WorkerId, message: FromWorker },
    /// Side channel: the worker thread died without replying
    Crashed { worker: WorkerId, reason: String },
}

impl WorkerEvent {
    pub fn worker(&self) -> WorkerId {
        match self {
            WorkerEvent::Message { worker, .. } | WorkerEvent::Crashed { worker, .. } => *worker,
        }
    }
}
