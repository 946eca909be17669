//! Arena Pool - Isolated workers for CPU-bound engine calls
//!
//! This crate keeps blocking engine work off the async caller:
//! - Worker units: one OS thread per engine, driven by typed messages
//! - Single-task proxy: one decision at a time, with timeouts and crash recovery
//! - Worker pool: FIFO queue over N workers with per-match progress
//! - Inline backend: the same interface without isolation, for fallback
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: AiProxy, WorkerPool (orchestration)
//! - Level 2: WorkerLink, InlineBackend (backends behind `ComputeBackend`)
//! - Level 3: WorkerUnit, SubmissionTracker (steps)
//! - Level 4: protocol messages, errors, configuration

mod backend;
mod config;
mod error;
mod link;
mod pool;
mod protocol;
mod proxy;
mod submission;
mod worker;

pub use backend::{BackendKind, ComputeBackend, InlineBackend};
pub use config::{
    default_pool_size, PoolConfig, ProxyConfig, DEFAULT_INIT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{Result, WorkerError};
pub use link::WorkerLink;
pub use pool::{PoolMetrics, WorkerPool};
pub use protocol::{
    ActionRequest, FromWorker, Task, TaskId, TaskOutcome, TaskOutput, TaskPayload, ToWorker,
    WorkerEvent, WorkerId,
};
pub use proxy::AiProxy;
pub use submission::{PoolEvent, Submission};
pub use worker::{WorkerStatus, WorkerUnit};
