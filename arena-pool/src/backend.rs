//! The compute backend seam and the inline implementation
//!
//! Level 2 - Backends
//!
//! Callers pick a backend once, at initialization, and then only talk to
//! `dyn ComputeBackend`. Isolated backends run engines on worker threads;
//! [`InlineBackend`] runs them on the blocking thread pool with no crash
//! isolation and serves as the fallback.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arena_core::{ConfigUpdate, Decision, Engine, EngineConfig, EngineFactory};
use async_trait::async_trait;
use rayon::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, WorkerError};
use crate::protocol::{ActionRequest, Task, TaskId, TaskOutcome, TaskOutput};
use crate::submission::Submission;
use crate::worker::execute_task;

/// Where engine calls actually run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Dedicated worker threads; a crash is contained
    Isolated,
    /// In-process, no isolation
    Inline,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Isolated => write!(f, "isolated"),
            BackendKind::Inline => write!(f, "inline"),
        }
    }
}

/// Strategy for running engine work
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run one decision request to completion
    async fn submit_one(&self, request: ActionRequest) -> Result<Decision>;

    /// Start a batch; the submission resolves with one outcome per task
    fn submit_batch(&self, tasks: Vec<Task>) -> Submission;

    /// Forward new runtime settings; applies to the next task
    fn update_config(&self, update: &ConfigUpdate);

    /// Requests accepted but not yet resolved
    fn pending_count(&self) -> usize;

    /// Stop accepting work and release the engines
    fn shutdown(&self);
}

/// Pull the decision out of a single-task output
pub(crate) fn expect_decision(output: TaskOutput) -> Result<Decision> {
    match output {
        TaskOutput::Decision(decision) => Ok(decision),
        TaskOutput::Matches(_) => Err(WorkerError::Compute(
            "engine returned matches for a decision request".to_string(),
        )),
    }
}

// ============================================================================
// INLINE BACKEND
// ============================================================================

/// Runs engines in-process on tokio's blocking pool
///
/// Single decisions share one engine; batches fan out over rayon with one
/// engine per rayon thread.
pub struct InlineBackend {
    inner: Arc<InlineInner>,
    /// Deadline for `submit_one`; the engine call itself keeps running
    request_timeout: Option<Duration>,
}

struct InlineInner {
    factory: Arc<dyn EngineFactory>,
    engine: Mutex<Box<dyn Engine>>,
    config: Mutex<EngineConfig>,
    pending_update: Mutex<Option<ConfigUpdate>>,
    in_flight: AtomicUsize,
    terminated: AtomicBool,
}

impl InlineBackend {
    pub fn new(factory: Arc<dyn EngineFactory>, config: &EngineConfig) -> Result<Self> {
        let engine = factory
            .create(config)
            .map_err(|e| WorkerError::Init(e.to_string()))?;
        info!("Inline engine ready");

        Ok(Self {
            inner: Arc::new(InlineInner {
                factory,
                engine: Mutex::new(engine),
                config: Mutex::new(config.clone()),
                pending_update: Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                terminated: AtomicBool::new(false),
            }),
            request_timeout: None,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.terminated.load(Ordering::Acquire) {
            Err(WorkerError::Terminated)
        } else {
            Ok(())
        }
    }
}

impl InlineInner {
    fn select_action(&self, request: &ActionRequest) -> Result<Decision> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(update) = self.take_update() {
            engine.configure(&update);
        }
        engine
            .select_action(&request.state, request.player)
            .map_err(|e| WorkerError::Compute(e.to_string()))
    }

    fn take_update(&self) -> Option<ConfigUpdate> {
        self.pending_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn batch_config(&self) -> EngineConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Progress reported from rayon threads back to the async side
enum InlineEvent {
    Progress { task: TaskId, completed: usize },
    Finished(TaskOutcome),
}

#[async_trait]
impl ComputeBackend for InlineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Inline
    }

    async fn submit_one(&self, request: ActionRequest) -> Result<Decision> {
        self.ensure_running()?;
        let inner = Arc::clone(&self.inner);
        let id = request.id;

        // Counted until the caller gets an answer, not until the engine returns
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let call = tokio::task::spawn_blocking(move || inner.select_action(&request));
        let joined = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
                    warn!("Inline request {} timed out after {:?}", id, limit);
                    return Err(WorkerError::Timeout(limit));
                }
            },
            None => call.await,
        };
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);

        match joined {
            Ok(result) => {
                debug!("Inline request {} resolved", id);
                result
            }
            Err(e) => {
                warn!("Inline engine failed on request {}: {}", id, e);
                Err(WorkerError::Compute(format!("engine panicked: {e}")))
            }
        }
    }

    fn submit_batch(&self, tasks: Vec<Task>) -> Submission {
        let (submission, mut tracker, tasks) = Submission::channel(tasks);
        if tracker.is_complete() {
            return submission;
        }
        if self.ensure_running().is_err() {
            tracker.fail_unfinished(WorkerError::Terminated);
            return submission;
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let config = inner.batch_config();
        info!("Running {} tasks inline", tasks.len());

        tokio::task::spawn_blocking(move || {
            tasks.into_par_iter().for_each_init(
                || inner.factory.create(&config),
                |engine, task| {
                    let outcome = run_inline_task(&inner, engine, &config, task, &events_tx);
                    let _ = events_tx.send(InlineEvent::Finished(outcome));
                },
            );
        });

        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    InlineEvent::Progress { task, completed } => tracker.progress(task, completed),
                    InlineEvent::Finished(outcome) => {
                        if tracker.finish(outcome) {
                            return;
                        }
                    }
                }
            }
            // Senders dropped early: the batch thread died
            tracker.fail_unfinished(WorkerError::Compute("inline batch aborted".to_string()));
        });

        submission
    }

    fn update_config(&self, update: &ConfigUpdate) {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
        *self
            .inner
            .pending_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(update.clone());
    }

    fn pending_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if !self.inner.terminated.swap(true, Ordering::AcqRel) {
            info!("Inline backend shut down");
        }
    }
}

/// Run one batch task on a rayon thread's engine
///
/// A panicking engine is replaced so later tasks on the same thread still
/// get a fresh one.
fn run_inline_task(
    inner: &InlineInner,
    engine: &mut std::result::Result<Box<dyn Engine>, arena_core::EngineError>,
    config: &EngineConfig,
    task: Task,
    events: &mpsc::UnboundedSender<InlineEvent>,
) -> TaskOutcome {
    let task_id = task.id;
    let fail = |cause: WorkerError| TaskOutcome {
        task_id,
        worker: None,
        result: Err(WorkerError::for_task(task_id, cause)),
    };

    if inner.terminated.load(Ordering::Acquire) {
        return fail(WorkerError::Terminated);
    }
    let current = match engine.as_mut() {
        Ok(current) => current,
        Err(e) => return fail(WorkerError::Init(e.to_string())),
    };

    let mut on_progress = |completed: usize, _total: usize| {
        let _ = events.send(InlineEvent::Progress {
            task: task_id,
            completed,
        });
    };
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        execute_task(current.as_mut(), &task.payload, &mut on_progress)
    }));

    match run {
        Ok(Ok(output)) => TaskOutcome {
            task_id,
            worker: None,
            result: Ok(output),
        },
        Ok(Err(e)) => fail(WorkerError::Compute(e.to_string())),
        Err(_) => {
            warn!("Inline engine panicked on task {}", task_id);
            *engine = inner.factory.create(config);
            fail(WorkerError::Compute("engine panicked".to_string()))
        }
    }
}
