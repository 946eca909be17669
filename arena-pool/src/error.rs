//! Error taxonomy shared by the proxy, the pool and the backends.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::TaskId;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("engine failed to initialize: {0}")]
    Init(String),

    #[error("engine was not ready within {0:?}")]
    InitTimeout(Duration),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("compute engine failed: {0}")]
    Compute(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("worker {0} crashed")]
    WorkerCrashed(usize),

    #[error("terminated while the request was pending")]
    Terminated,

    #[error("task {task} failed")]
    Task {
        task: TaskId,
        #[source]
        cause: Box<WorkerError>,
    },

    #[error("task {0} appears more than once in the submission")]
    DuplicateTask(TaskId),

    #[error("no live workers remain")]
    NoWorkers,

    #[error("worker channel closed")]
    ChannelClosed,
}

impl WorkerError {
    /// Wrap a failure as belonging to one task of a submission
    pub fn for_task(task: TaskId, cause: WorkerError) -> Self {
        WorkerError::Task {
            task,
            cause: Box::new(cause),
        }
    }

    /// The underlying failure, looking through task wrappers
    pub fn root_cause(&self) -> &WorkerError {
        match self {
            WorkerError::Task { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_keeps_cause() {
        let err = WorkerError::for_task(TaskId(7), WorkerError::WorkerCrashed(1));
        assert_eq!(err.to_string(), "task #7 failed");
        assert_eq!(err.root_cause(), &WorkerError::WorkerCrashed(1));
        assert!(std::error::Error::source(&err).is_some());
    }
}
