//! Worker unit - one OS thread hosting one engine
//!
//! Level 3 - Step-level implementation
//!
//! The thread owns its engine outright; the orchestrator only holds the
//! sending half of the worker's inbox. Replies and the crash notification
//! travel back over a shared tokio channel as [`WorkerEvent`]s.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arena_core::{Engine, EngineConfig, EngineError, EngineFactory};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, WorkerError};
use crate::protocol::{FromWorker, Task, TaskOutput, TaskPayload, ToWorker, WorkerEvent, WorkerId};

/// Lifecycle of a worker unit
///
/// `Initializing -> Idle <-> Busy -> (Idle | Crashed)`; `Stopped` after an
/// explicit shutdown. A crashed unit never comes back: callers that want a
/// replacement spawn a new unit with a new generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    Initializing,
    Idle,
    Busy,
    Crashed,
    Stopped,
}

impl WorkerStatus {
    pub fn is_live(self) -> bool {
        !matches!(self, WorkerStatus::Crashed | WorkerStatus::Stopped)
    }
}

/// Orchestrator-side handle to a worker thread
pub struct WorkerUnit {
    id: WorkerId,
    status: WorkerStatus,
    inbox: std_mpsc::Sender<ToWorker>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerUnit {
    /// Start a worker thread and send it the init message
    pub fn spawn(
        id: WorkerId,
        factory: Arc<dyn EngineFactory>,
        config: &EngineConfig,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let (inbox_tx, inbox_rx) = std_mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("arena-worker-{}", id.index))
            .spawn(move || worker_main(id, factory, inbox_rx, events))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        let unit = Self {
            id,
            status: WorkerStatus::Initializing,
            inbox: inbox_tx,
            handle: Some(handle),
        };
        unit.send(ToWorker::Init(config.clone()))?;
        Ok(unit)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn set_status(&mut self, status: WorkerStatus) {
        self.status = status;
    }

    /// Deliver a message; fails once the thread is gone
    pub fn send(&self, message: ToWorker) -> Result<()> {
        self.inbox
            .send(message)
            .map_err(|_| WorkerError::WorkerCrashed(self.id.index))
    }

    /// Hand the worker a task and mark it busy
    pub fn assign(&mut self, task: &Task) -> Result<()> {
        self.send(ToWorker::Compute {
            task_id: task.id,
            payload: task.payload.clone(),
        })?;
        self.status = WorkerStatus::Busy;
        Ok(())
    }

    /// Ask the thread to exit once its current call returns
    ///
    /// Blocking engine calls cannot be interrupted, so the thread is detached
    /// rather than joined.
    pub fn shutdown(&mut self) {
        let _ = self.inbox.send(ToWorker::Shutdown);
        if self.status.is_live() {
            self.status = WorkerStatus::Stopped;
        }
        self.handle.take();
    }
}

impl Drop for WorkerUnit {
    fn drop(&mut self) {
        // shutdown() already released the thread
        if self.handle.is_some() {
            let _ = self.inbox.send(ToWorker::Shutdown);
        }
    }
}

/// Wait until every unit reports ready
///
/// Fails with the first init error, a crash during startup, or
/// `InitTimeout` once `timeout` elapses.
pub(crate) async fn await_ready(
    events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    units: &mut [WorkerUnit],
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut waiting = units
        .iter()
        .filter(|u| u.status() == WorkerStatus::Initializing)
        .count();

    while waiting > 0 {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => return Err(WorkerError::InitTimeout(timeout)),
            Ok(None) => return Err(WorkerError::ChannelClosed),
            Ok(Some(event)) => event,
        };

        let Some(unit) = units.iter_mut().find(|u| u.id() == event.worker()) else {
            continue;
        };

        match event {
            WorkerEvent::Message {
                message: FromWorker::Ready,
                ..
            } => {
                if unit.status() == WorkerStatus::Initializing {
                    unit.set_status(WorkerStatus::Idle);
                    waiting -= 1;
                    debug!("Worker {} ready", unit.id());
                }
            }
            WorkerEvent::Message {
                message: FromWorker::InitError(reason),
                ..
            } => return Err(WorkerError::Init(reason)),
            WorkerEvent::Crashed { reason, .. } => {
                unit.set_status(WorkerStatus::Crashed);
                return Err(WorkerError::Init(format!(
                    "worker {} crashed during startup: {}",
                    unit.id(),
                    reason
                )));
            }
            WorkerEvent::Message { .. } => {}
        }
    }

    Ok(())
}

/// Run one task against an engine
pub(crate) fn execute_task(
    engine: &mut dyn Engine,
    payload: &TaskPayload,
    on_progress: &mut dyn FnMut(usize, usize),
) -> std::result::Result<TaskOutput, EngineError> {
    match payload {
        TaskPayload::SelectAction { state, player } => engine
            .select_action(state, *player)
            .map(TaskOutput::Decision),
        TaskPayload::Matchup(spec) => engine.run_matchup(spec, on_progress).map(TaskOutput::Matches),
    }
}

// ============================================================================
// WORKER THREAD
// ============================================================================

/// Reports the thread's death on the side channel when it unwinds
struct CrashGuard {
    id: WorkerId,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("Worker {} terminated abnormally", self.id);
            let _ = self.events.send(WorkerEvent::Crashed {
                worker: self.id,
                reason: "engine panicked".to_string(),
            });
        }
    }
}

fn worker_main(
    id: WorkerId,
    factory: Arc<dyn EngineFactory>,
    inbox: std_mpsc::Receiver<ToWorker>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let _guard = CrashGuard {
        id,
        events: events.clone(),
    };
    // The inbox is dropped while unwinding out of the loop, before the guard
    // reports the crash
    run_message_loop(id, factory.as_ref(), inbox, &events);
    debug!("Worker {} exiting", id);
}

fn run_message_loop(
    id: WorkerId,
    factory: &dyn EngineFactory,
    inbox: std_mpsc::Receiver<ToWorker>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    let reply = |message: FromWorker| {
        let _ = events.send(WorkerEvent::Message { worker: id, message });
    };
    let mut engine: Option<Box<dyn Engine>> = None;

    while let Ok(message) = inbox.recv() {
        match message {
            ToWorker::Init(config) => match factory.create(&config) {
                Ok(created) => {
                    engine = Some(created);
                    reply(FromWorker::Ready);
                }
                Err(e) => reply(FromWorker::InitError(e.to_string())),
            },
            ToWorker::ConfigUpdate(update) => {
                if let Some(engine) = engine.as_mut() {
                    engine.configure(&update);
                }
            }
            ToWorker::Compute { task_id, payload } => {
                let message = match engine.as_deref_mut() {
                    None => FromWorker::TaskError {
                        task_id,
                        error: "engine not initialized".to_string(),
                    },
                    Some(engine) => {
                        let mut on_progress = |completed, total| {
                            reply(FromWorker::Progress {
                                task_id,
                                completed,
                                total,
                            })
                        };
                        match execute_task(engine, &payload, &mut on_progress) {
                            Ok(output) => FromWorker::TaskResult { task_id, output },
                            Err(e) => FromWorker::TaskError {
                                task_id,
                                error: e.to_string(),
                            },
                        }
                    }
                };
                reply(message);
            }
            ToWorker::Shutdown => break,
        }
    }
}
