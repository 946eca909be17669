//! Single isolated worker with request/response correlation
//!
//! Level 2 - Backends
//!
//! Every request gets a wire id and an entry in the pending table. A router
//! task reads the worker's events and resolves entries by id; whoever removes
//! an entry from the table (router, timeout, crash or shutdown) is the only
//! one allowed to answer it, so each request resolves exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arena_core::{ConfigUpdate, Decision, EngineFactory};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{expect_decision, BackendKind, ComputeBackend};
use crate::config::ProxyConfig;
use crate::error::{Result, WorkerError};
use crate::protocol::{
    ActionRequest, FromWorker, Task, TaskId, TaskOutcome, TaskOutput, ToWorker, WorkerEvent,
    WorkerId,
};
use crate::submission::Submission;
use crate::worker::{await_ready, WorkerStatus, WorkerUnit};

/// Bookkeeping for one outstanding request
struct PendingRequest {
    created_at: Instant,
    reply: oneshot::Sender<Result<TaskOutput>>,
    progress: Option<mpsc::UnboundedSender<usize>>,
}

type PendingTable = Mutex<FxHashMap<TaskId, PendingRequest>>;

/// Isolated backend over exactly one worker thread
pub struct WorkerLink {
    inner: Arc<LinkInner>,
    router: JoinHandle<()>,
}

struct LinkInner {
    unit: Mutex<WorkerUnit>,
    pending: PendingTable,
    next_wire_id: AtomicU64,
    request_timeout: Duration,
    terminated: AtomicBool,
}

impl WorkerLink {
    /// Spawn the worker and wait until it is ready
    ///
    /// The returned receiver fires with the worker's id if it crashes.
    pub async fn start(
        factory: Arc<dyn EngineFactory>,
        config: &ProxyConfig,
        generation: u32,
    ) -> Result<(Self, oneshot::Receiver<WorkerId>)> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let id = WorkerId {
            index: 0,
            generation,
        };
        let unit = WorkerUnit::spawn(id, factory, &config.engine, events_tx)?;

        let mut units = [unit];
        if let Err(e) = await_ready(&mut events_rx, &mut units, config.init_timeout).await {
            for unit in &mut units {
                unit.shutdown();
            }
            return Err(e);
        }
        let [unit] = units;
        info!("Worker {} ready", id);

        let inner = Arc::new(LinkInner {
            unit: Mutex::new(unit),
            pending: Mutex::new(FxHashMap::default()),
            next_wire_id: AtomicU64::new(1),
            request_timeout: config.request_timeout,
            terminated: AtomicBool::new(false),
        });
        let (crash_tx, crash_rx) = oneshot::channel();
        let router = tokio::spawn(route_events(Arc::clone(&inner), events_rx, crash_tx));

        Ok((Self { inner, router }, crash_rx))
    }

    pub fn worker_id(&self) -> WorkerId {
        self.inner.lock_unit().id()
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl LinkInner {
    fn lock_unit(&self) -> std::sync::MutexGuard<'_, WorkerUnit> {
        self.unit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, FxHashMap<TaskId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send one task and wait for its reply
    ///
    /// `timeout` of `None` waits as long as the worker lives.
    async fn call(
        &self,
        task: Task,
        timeout: Option<Duration>,
        progress: Option<mpsc::UnboundedSender<usize>>,
    ) -> Result<TaskOutput> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(WorkerError::Terminated);
        }

        let wire_id = TaskId(self.next_wire_id.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock_pending().insert(
            wire_id,
            PendingRequest {
                created_at: Instant::now(),
                reply: reply_tx,
                progress,
            },
        );

        let sent = self.lock_unit().send(ToWorker::Compute {
            task_id: wire_id,
            payload: task.payload,
        });
        if let Err(e) = sent {
            self.lock_pending().remove(&wire_id);
            return Err(e);
        }
        debug!("Request {} sent as {}", task.id, wire_id);

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    // A reply arriving after this point finds no entry and is dropped
                    if let Some(entry) = self.lock_pending().remove(&wire_id) {
                        warn!(
                            "Request {} timed out after {:?}",
                            task.id,
                            entry.created_at.elapsed()
                        );
                    }
                    return Err(WorkerError::Timeout(limit));
                }
            },
            None => reply_rx.await,
        };
        reply.unwrap_or(Err(WorkerError::Terminated))
    }

    /// Resolve every pending entry with `cause`
    fn reject_all(&self, cause: WorkerError) -> usize {
        let drained: Vec<PendingRequest> = self.lock_pending().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(cause.clone()));
        }
        count
    }
}

/// Read worker events until the worker dies or the link is dropped
async fn route_events(
    inner: Arc<LinkInner>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    crash_tx: oneshot::Sender<WorkerId>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Message { message, .. } => match message {
                FromWorker::TaskResult { task_id, output } => {
                    resolve(&inner, task_id, Ok(output));
                }
                FromWorker::TaskError { task_id, error } => {
                    resolve(&inner, task_id, Err(WorkerError::Compute(error)));
                }
                FromWorker::Progress {
                    task_id, completed, ..
                } => {
                    let pending = inner.lock_pending();
                    if let Some(sink) = pending.get(&task_id).and_then(|p| p.progress.as_ref()) {
                        let _ = sink.send(completed);
                    }
                }
                FromWorker::Ready | FromWorker::InitError(_) => {}
            },
            WorkerEvent::Crashed { worker, reason } => {
                let rejected = inner.reject_all(WorkerError::WorkerCrashed(worker.index));
                warn!(
                    "Worker {} crashed ({}); rejected {} pending requests",
                    worker, reason, rejected
                );
                inner.lock_unit().set_status(WorkerStatus::Crashed);
                let _ = crash_tx.send(worker);
                return;
            }
        }
    }

    // Worker thread exited without a crash: it was shut down
    inner.reject_all(WorkerError::Terminated);
}

fn resolve(inner: &LinkInner, task_id: TaskId, result: Result<TaskOutput>) {
    let entry = inner.lock_pending().remove(&task_id);
    match entry {
        Some(entry) => {
            debug!(
                "Reply for {} after {:?}",
                task_id,
                entry.created_at.elapsed()
            );
            let _ = entry.reply.send(result);
        }
        None => debug!("Discarding late reply for {}", task_id),
    }
}

#[async_trait]
impl ComputeBackend for WorkerLink {
    fn kind(&self) -> BackendKind {
        BackendKind::Isolated
    }

    async fn submit_one(&self, request: ActionRequest) -> Result<Decision> {
        let timeout = self.inner.request_timeout;
        let output = self
            .inner
            .call(request.into_task(), Some(timeout), None)
            .await?;
        expect_decision(output)
    }

    /// Runs the batch one task at a time on the single worker
    fn submit_batch(&self, tasks: Vec<Task>) -> Submission {
        let (submission, mut tracker, tasks) = Submission::channel(tasks);
        if tracker.is_complete() {
            return submission;
        }
        let inner = Arc::clone(&self.inner);
        let worker = Some(self.worker_id().index);

        tokio::spawn(async move {
            for task in tasks {
                let task_id = task.id;
                let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
                let call = inner.call(task, None, Some(progress_tx));
                tokio::pin!(call);

                let result = loop {
                    tokio::select! {
                        result = &mut call => break result,
                        Some(completed) = progress_rx.recv() => tracker.progress(task_id, completed),
                    }
                };
                while let Ok(completed) = progress_rx.try_recv() {
                    tracker.progress(task_id, completed);
                }

                tracker.finish(TaskOutcome {
                    task_id,
                    worker,
                    result: result.map_err(|e| WorkerError::for_task(task_id, e)),
                });
            }
        });

        submission
    }

    fn update_config(&self, update: &ConfigUpdate) {
        if let Err(e) = self.inner.lock_unit().send(ToWorker::ConfigUpdate(update.clone())) {
            debug!("Config update not delivered: {}", e);
        }
    }

    fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    fn shutdown(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let rejected = self.inner.reject_all(WorkerError::Terminated);
        self.inner.lock_unit().shutdown();
        self.router.abort();
        info!("Worker link shut down ({} pending requests rejected)", rejected);
    }
}
