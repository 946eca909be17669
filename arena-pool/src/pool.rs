//! Worker pool: a FIFO queue of tasks over N isolated workers
//!
//! Level 1 - Orchestration
//!
//! All pool state (queue, worker slots, open submissions) belongs to one
//! dispatcher task. Callers talk to it through commands; workers talk to it
//! through their event channel. Nothing else mutates it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arena_core::{ConfigUpdate, Decision, EngineFactory};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{expect_decision, BackendKind, ComputeBackend};
use crate::config::PoolConfig;
use crate::error::{Result, WorkerError};
use crate::protocol::{
    ActionRequest, FromWorker, Task, TaskId, TaskOutcome, TaskOutput, ToWorker, WorkerEvent,
    WorkerId,
};
use crate::submission::{Submission, SubmissionTracker};
use crate::worker::{await_ready, WorkerStatus, WorkerUnit};

/// Live counters, readable without going through the dispatcher
#[derive(Debug, Default)]
pub struct PoolMetrics {
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    live: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
}

impl PoolMetrics {
    /// Workers currently running a task
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously busy workers seen so far
    pub fn peak_busy(&self) -> usize {
        self.peak_busy.load(Ordering::Acquire)
    }

    /// Workers that have not crashed or been stopped
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Tasks that reached a terminal outcome
    pub fn completed_tasks(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn task_started(&self) {
        let busy = self.busy.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_busy.fetch_max(busy, Ordering::AcqRel);
    }

    fn task_stopped(&self) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }
}

type SubmissionId = u64;

enum Command {
    Submit {
        tasks: Vec<Task>,
        tracker: SubmissionTracker,
    },
    Status {
        reply: oneshot::Sender<Vec<(WorkerId, WorkerStatus)>>,
    },
    UpdateConfig(ConfigUpdate),
    Terminate,
}

/// A fixed set of workers fed from a shared queue
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<PoolMetrics>,
    size: usize,
}

impl WorkerPool {
    /// Start `config.size` workers and wait until every one is ready
    ///
    /// Any init failure or timeout tears down the workers already started.
    pub async fn initialize(factory: Arc<dyn EngineFactory>, config: PoolConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(WorkerError::Init("pool size must be at least 1".to_string()));
        }
        info!("Starting worker pool with {} workers", config.size);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut units = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let id = WorkerId {
                index,
                generation: 0,
            };
            match WorkerUnit::spawn(id, Arc::clone(&factory), &config.engine, events_tx.clone()) {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    shutdown_units(&mut units);
                    return Err(e);
                }
            }
        }
        drop(events_tx);

        if let Err(e) = await_ready(&mut events_rx, &mut units, config.init_timeout).await {
            warn!("Worker pool failed to start: {}", e);
            shutdown_units(&mut units);
            return Err(e);
        }

        let metrics = Arc::new(PoolMetrics::default());
        metrics.live.store(units.len(), Ordering::Release);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            slots: units
                .into_iter()
                .map(|unit| WorkerSlot { unit, task: None })
                .collect(),
            queue: VecDeque::new(),
            submissions: FxHashMap::default(),
            next_submission: 0,
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(dispatcher.run(commands_rx, events_rx));
        info!("Worker pool ready");

        Ok(Self {
            commands: commands_tx,
            dispatcher: Mutex::new(Some(handle)),
            metrics,
            size: config.size,
        })
    }

    /// Queue a batch of tasks
    ///
    /// The submission resolves with one outcome per submitted task, in
    /// completion order. Repeated task ids are not run and fail with
    /// `DuplicateTask`.
    pub fn submit(&self, tasks: Vec<Task>) -> Submission {
        let (submission, tracker, tasks) = Submission::channel(tasks);
        if tracker.is_complete() {
            return submission;
        }
        debug!("Submitting {} tasks", tasks.len());
        // If the dispatcher is gone the tracker is dropped and the
        // submission resolves with Terminated
        let _ = self.commands.send(Command::Submit { tasks, tracker });
        submission
    }

    /// Snapshot of every worker's status, in slot order
    pub async fn status(&self) -> Result<Vec<(WorkerId, WorkerStatus)>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Status { reply: reply_tx })
            .map_err(|_| WorkerError::Terminated)?;
        reply_rx.await.map_err(|_| WorkerError::Terminated)
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop every worker; open submissions resolve with `Terminated`
    pub async fn terminate(&self) {
        let _ = self.commands.send(Command::Terminate);
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Terminate);
    }
}

#[async_trait]
impl ComputeBackend for WorkerPool {
    fn kind(&self) -> BackendKind {
        BackendKind::Isolated
    }

    async fn submit_one(&self, request: ActionRequest) -> Result<Decision> {
        let task_id = request.id;
        let outcomes = self.submit(vec![request.into_task()]).wait().await?;
        let outcome = outcomes
            .into_iter()
            .find(|o| o.task_id == task_id)
            .ok_or(WorkerError::Terminated)?;
        match outcome.result {
            Ok(output) => expect_decision(output),
            Err(e) => Err(e.root_cause().clone()),
        }
    }

    fn submit_batch(&self, tasks: Vec<Task>) -> Submission {
        self.submit(tasks)
    }

    fn update_config(&self, update: &ConfigUpdate) {
        let _ = self.commands.send(Command::UpdateConfig(update.clone()));
    }

    fn pending_count(&self) -> usize {
        self.metrics.queued() + self.metrics.busy()
    }

    fn shutdown(&self) {
        let _ = self.commands.send(Command::Terminate);
    }
}

fn shutdown_units(units: &mut [WorkerUnit]) {
    for unit in units {
        unit.shutdown();
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

struct WorkerSlot {
    unit: WorkerUnit,
    task: Option<(SubmissionId, TaskId)>,
}

struct Dispatcher {
    slots: Vec<WorkerSlot>,
    queue: VecDeque<(SubmissionId, Task)>,
    submissions: FxHashMap<SubmissionId, SubmissionTracker>,
    next_submission: SubmissionId,
    metrics: Arc<PoolMetrics>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit { tasks, tracker }) => self.enqueue(tasks, tracker),
                    Some(Command::Status { reply }) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::UpdateConfig(update)) => self.broadcast_config(&update),
                    Some(Command::Terminate) | None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.assign_idle();
        }
        self.shutdown();
    }

    fn enqueue(&mut self, tasks: Vec<Task>, tracker: SubmissionTracker) {
        let submission = self.next_submission;
        self.next_submission += 1;
        self.metrics.queued.fetch_add(tasks.len(), Ordering::AcqRel);
        self.queue
            .extend(tasks.into_iter().map(|task| (submission, task)));
        self.submissions.insert(submission, tracker);
    }

    /// Hand queued tasks to idle workers until one side runs out
    fn assign_idle(&mut self) {
        if self.live_workers() == 0 {
            self.drain_queue(WorkerError::NoWorkers);
            return;
        }

        while !self.queue.is_empty() {
            let Some(index) = self
                .slots
                .iter()
                .position(|s| s.unit.status() == WorkerStatus::Idle)
            else {
                break;
            };
            let Some((submission, task)) = self.queue.pop_front() else {
                break;
            };
            self.metrics.queued.fetch_sub(1, Ordering::AcqRel);

            let slot = &mut self.slots[index];
            match slot.unit.assign(&task) {
                Ok(()) => {
                    debug!("Task {} assigned to worker {}", task.id, slot.unit.id());
                    slot.task = Some((submission, task.id));
                    self.metrics.task_started();
                }
                Err(e) => {
                    // The thread is already gone; its crash event follows
                    warn!("Could not assign task {} to worker {}: {}", task.id, index, e);
                    slot.unit.set_status(WorkerStatus::Crashed);
                    self.metrics.live.fetch_sub(1, Ordering::AcqRel);
                    self.finish(
                        submission,
                        TaskOutcome {
                            task_id: task.id,
                            worker: Some(index),
                            result: Err(WorkerError::for_task(task.id, e)),
                        },
                    );
                    if self.live_workers() == 0 {
                        self.drain_queue(WorkerError::NoWorkers);
                        return;
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        let worker = event.worker();
        let Some(index) = self.slots.iter().position(|s| s.unit.id() == worker) else {
            debug!("Ignoring event from unknown worker {}", worker);
            return;
        };

        match event {
            WorkerEvent::Message { message, .. } => match message {
                FromWorker::Progress {
                    task_id, completed, ..
                } => {
                    if let Some((submission, running)) = self.slots[index].task {
                        if running == task_id {
                            if let Some(tracker) = self.submissions.get_mut(&submission) {
                                tracker.progress(task_id, completed);
                            }
                        }
                    }
                }
                FromWorker::TaskResult { task_id, output } => {
                    self.task_done(index, task_id, Ok(output));
                }
                FromWorker::TaskError { task_id, error } => {
                    let cause = WorkerError::Compute(error);
                    self.task_done(index, task_id, Err(WorkerError::for_task(task_id, cause)));
                }
                FromWorker::Ready | FromWorker::InitError(_) => {}
            },
            WorkerEvent::Crashed { reason, .. } => self.worker_crashed(index, &reason),
        }
    }

    fn task_done(
        &mut self,
        index: usize,
        task_id: TaskId,
        result: Result<TaskOutput>,
    ) {
        let slot = &mut self.slots[index];
        let Some((submission, running)) = slot.task.take() else {
            debug!("Worker {} replied with no task assigned", slot.unit.id());
            return;
        };
        if running != task_id {
            debug!("Worker {} replied for {} while running {}", slot.unit.id(), task_id, running);
            slot.task = Some((submission, running));
            return;
        }
        if slot.unit.status() == WorkerStatus::Busy {
            slot.unit.set_status(WorkerStatus::Idle);
        }
        self.metrics.task_stopped();
        self.finish(
            submission,
            TaskOutcome {
                task_id,
                worker: Some(index),
                result,
            },
        );
    }

    /// Permanently retire a crashed worker and fail its task
    fn worker_crashed(&mut self, index: usize, reason: &str) {
        let slot = &mut self.slots[index];
        let was_live = slot.unit.status().is_live();
        slot.unit.set_status(WorkerStatus::Crashed);
        warn!("Worker {} crashed: {}", slot.unit.id(), reason);

        if was_live {
            self.metrics.live.fetch_sub(1, Ordering::AcqRel);
        }
        if let Some((submission, task_id)) = slot.task.take() {
            self.metrics.task_stopped();
            self.finish(
                submission,
                TaskOutcome {
                    task_id,
                    worker: Some(index),
                    result: Err(WorkerError::for_task(task_id, WorkerError::WorkerCrashed(index))),
                },
            );
        }
    }

    /// Fail everything still queued
    fn drain_queue(&mut self, cause: WorkerError) {
        if self.queue.is_empty() {
            return;
        }
        warn!("Failing {} queued tasks: {}", self.queue.len(), cause);
        while let Some((submission, task)) = self.queue.pop_front() {
            self.metrics.queued.fetch_sub(1, Ordering::AcqRel);
            self.finish(
                submission,
                TaskOutcome {
                    task_id: task.id,
                    worker: None,
                    result: Err(WorkerError::for_task(task.id, cause.clone())),
                },
            );
        }
    }

    fn finish(&mut self, submission: SubmissionId, outcome: TaskOutcome) {
        self.metrics.completed.fetch_add(1, Ordering::AcqRel);
        let Some(tracker) = self.submissions.get_mut(&submission) else {
            return;
        };
        if tracker.finish(outcome) {
            // Dropping the tracker closes the submission's event stream
            self.submissions.remove(&submission);
        }
    }

    fn broadcast_config(&mut self, update: &ConfigUpdate) {
        for slot in self.slots.iter().filter(|s| s.unit.status().is_live()) {
            if let Err(e) = slot.unit.send(ToWorker::ConfigUpdate(update.clone())) {
                debug!("Config update not delivered to {}: {}", slot.unit.id(), e);
            }
        }
    }

    fn live_workers(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.unit.status().is_live())
            .count()
    }

    fn snapshot(&self) -> Vec<(WorkerId, WorkerStatus)> {
        self.slots
            .iter()
            .map(|s| (s.unit.id(), s.unit.status()))
            .collect()
    }

    fn shutdown(&mut self) {
        info!(
            "Worker pool shutting down ({} queued, {} open submissions)",
            self.queue.len(),
            self.submissions.len()
        );
        for slot in &mut self.slots {
            slot.unit.shutdown();
        }
        self.metrics.live.store(0, Ordering::Release);
        self.metrics.busy.store(0, Ordering::Release);
        self.metrics.queued.store(0, Ordering::Release);
        self.queue.clear();
        // Abandoned: callers see Terminated
        self.submissions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskPayload;
    use arena_core::{CoinEngineFactory, CoinLine, EngineConfig, Player};

    async fn coin_pool(size: usize) -> WorkerPool {
        WorkerPool::initialize(
            Arc::new(CoinEngineFactory),
            PoolConfig::new(size, EngineConfig::default()),
        )
        .await
        .unwrap()
    }

    fn decision_task(id: u64) -> Task {
        Task::new(
            TaskId(id),
            TaskPayload::SelectAction {
                state: CoinLine::generate(id, 8, Player::One).to_json(),
                player: Player::One,
            },
        )
    }

    #[tokio::test]
    async fn test_zero_size_pool_is_rejected() {
        let result = WorkerPool::initialize(
            Arc::new(CoinEngineFactory),
            PoolConfig::new(0, EngineConfig::default()),
        )
        .await;
        assert!(matches!(result, Err(WorkerError::Init(_))));
    }

    #[tokio::test]
    async fn test_status_reports_every_worker() {
        let pool = coin_pool(3).await;
        let status = pool.status().await.unwrap();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|(_, s)| *s == WorkerStatus::Idle));
        assert_eq!(pool.metrics().live_workers(), 3);
        pool.terminate().await;
        assert!(pool.status().await.is_err());
    }

    #[tokio::test]
    async fn test_pool_resolves_decisions() {
        let pool = coin_pool(2).await;
        let outcomes = pool
            .submit((0..4).map(decision_task).collect())
            .wait()
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(pool.metrics().completed_tasks(), 4);
        assert_eq!(pool.metrics().busy(), 0);
    }

    #[tokio::test]
    async fn test_pool_as_backend() {
        let pool = coin_pool(1).await;
        let decision = pool
            .submit_one(ActionRequest {
                id: TaskId(99),
                state: CoinLine::generate(4, 6, Player::One).to_json(),
                player: Player::One,
            })
            .await
            .unwrap();
        assert!(decision.side().is_ok());
    }
}
