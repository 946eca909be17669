//! Batch submissions: the caller's handle and the backend's bookkeeping
//!
//! Level 3 - Step-level implementation
//!
//! A [`Submission`] is handed to the caller; the matching
//! [`SubmissionTracker`] stays with whichever backend runs the tasks. The
//! tracker turns per-task progress into a running count across the whole
//! submission and resolves the caller once every task has an outcome.

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, WorkerError};
use crate::protocol::{Task, TaskId, TaskOutcome};

/// Live notification from a running submission
#[derive(Clone, Debug)]
pub enum PoolEvent {
    /// One more match finished somewhere in the submission
    MatchCompleted {
        task: TaskId,
        completed: usize,
        total: usize,
    },
    /// A task reached its terminal outcome
    TaskFinished(TaskOutcome),
}

/// Caller-side handle to a batch of tasks
///
/// The event stream is finite: it closes once the submission resolves.
/// Dropping it (see [`Submission::close_events`]) stops delivery without
/// affecting the tasks themselves.
pub struct Submission {
    events: Option<mpsc::UnboundedReceiver<PoolEvent>>,
    done: oneshot::Receiver<Vec<TaskOutcome>>,
    task_count: usize,
    total_units: usize,
}

impl Submission {
    /// Create a submission handle and its tracker for `tasks`
    ///
    /// Returns the tasks that should actually run. A task whose id repeats an
    /// earlier one in the batch is not run; it resolves at once with a
    /// `DuplicateTask` error, so the outcome count still equals the number of
    /// tasks submitted.
    pub(crate) fn channel(tasks: Vec<Task>) -> (Submission, SubmissionTracker, Vec<Task>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let submitted = tasks.len();
        let mut progress: FxHashMap<TaskId, TaskProgress> = FxHashMap::default();
        let mut accepted = Vec::with_capacity(submitted);
        let mut duplicates = Vec::new();
        for task in tasks {
            if progress.contains_key(&task.id) {
                duplicates.push(task.id);
                continue;
            }
            progress.insert(
                task.id,
                TaskProgress {
                    reported: 0,
                    units: task.payload.work_units(),
                },
            );
            accepted.push(task);
        }
        let total_units = progress.values().map(|p| p.units).sum();

        let mut tracker = SubmissionTracker {
            events: events_tx,
            done: Some(done_tx),
            outcomes: Vec::with_capacity(submitted),
            progress,
            expected: submitted,
            completed: 0,
            total: total_units,
        };
        for task_id in duplicates {
            tracker.record(TaskOutcome {
                task_id,
                worker: None,
                result: Err(WorkerError::for_task(
                    task_id,
                    WorkerError::DuplicateTask(task_id),
                )),
            });
        }
        tracker.resolve_if_complete();

        let submission = Submission {
            events: Some(events_rx),
            done: done_rx,
            task_count: submitted,
            total_units,
        };
        (submission, tracker, accepted)
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Matches (or decisions) the whole submission will report
    pub fn total_units(&self) -> usize {
        self.total_units
    }

    /// Next live event; `None` once the submission has resolved
    pub async fn next_event(&mut self) -> Option<PoolEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Stop receiving live events
    pub fn close_events(&mut self) {
        self.events = None;
    }

    /// Wait for every task's outcome, in completion order
    ///
    /// Fails with `Terminated` if the backend was shut down first.
    pub async fn wait(self) -> Result<Vec<TaskOutcome>> {
        self.done.await.map_err(|_| WorkerError::Terminated)
    }
}

#[derive(Clone, Copy, Debug)]
struct TaskProgress {
    reported: usize,
    units: usize,
}

/// Backend-side state of one submission
pub(crate) struct SubmissionTracker {
    events: mpsc::UnboundedSender<PoolEvent>,
    done: Option<oneshot::Sender<Vec<TaskOutcome>>>,
    outcomes: Vec<TaskOutcome>,
    progress: FxHashMap<TaskId, TaskProgress>,
    expected: usize,
    completed: usize,
    total: usize,
}

impl SubmissionTracker {
    /// Record that `task` has finished `completed` of its own matches
    pub fn progress(&mut self, task: TaskId, completed: usize) {
        let Some(entry) = self.progress.get_mut(&task) else {
            return;
        };
        let completed = completed.min(entry.units);
        if completed <= entry.reported {
            return;
        }
        self.completed += completed - entry.reported;
        entry.reported = completed;
        self.emit_progress(task);
    }

    /// Record a task's terminal outcome; returns true once all tasks are done
    ///
    /// Matches a task never reported (because it failed) are counted here so
    /// the running total still reaches the submission's total.
    pub fn finish(&mut self, outcome: TaskOutcome) -> bool {
        if let Some(entry) = self.progress.remove(&outcome.task_id) {
            if entry.reported < entry.units {
                self.completed += entry.units - entry.reported;
                self.emit_progress(outcome.task_id);
            }
        } else {
            // Unknown or already finished
            return self.is_complete();
        }

        self.record(outcome);
        self.is_complete()
    }

    /// Fail every task that has no outcome yet
    pub fn fail_unfinished(&mut self, cause: WorkerError) {
        let mut unfinished: Vec<TaskId> = self.progress.keys().copied().collect();
        unfinished.sort();
        for task_id in unfinished {
            self.finish(TaskOutcome {
                task_id,
                worker: None,
                result: Err(WorkerError::for_task(task_id, cause.clone())),
            });
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done.is_none()
    }

    fn record(&mut self, outcome: TaskOutcome) {
        let _ = self.events.send(PoolEvent::TaskFinished(outcome.clone()));
        self.outcomes.push(outcome);
        self.resolve_if_complete();
    }

    fn emit_progress(&self, task: TaskId) {
        let _ = self.events.send(PoolEvent::MatchCompleted {
            task,
            completed: self.completed,
            total: self.total,
        });
    }

    fn resolve_if_complete(&mut self) {
        if self.outcomes.len() < self.expected {
            return;
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(std::mem::take(&mut self.outcomes));
        }
    }
}
