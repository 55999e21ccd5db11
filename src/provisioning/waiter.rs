use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Operation, TaskHandle, TaskInfo, TaskState};
use crate::errors::{ProvisionError, ProvisionResult};
use crate::platform::ManagementApi;

/// Terminal result of one observed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { result: Option<String> },
    Error { detail: String },
}

/// Maps a single poll to a terminal outcome, or `None` while the task is
/// still queued or running.
pub fn observe(info: &TaskInfo) -> Option<TaskOutcome> {
    match info.state {
        TaskState::Queued | TaskState::Running => None,
        TaskState::Success => Some(TaskOutcome::Success {
            result: info.result.clone(),
        }),
        TaskState::Error => Some(TaskOutcome::Error {
            detail: info
                .error
                .clone()
                .unwrap_or_else(|| "task failed without detail".to_string()),
        }),
    }
}

/// Polls tasks at a fixed interval until they finish, the optional deadline
/// passes, or the cancellation token fires.
#[derive(Debug, Clone)]
pub struct TaskWaiter {
    poll_interval: Duration,
    deadline: Option<Duration>,
    cancel: CancellationToken,
}

impl TaskWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waits for `task` and returns the created object id (if any) on success.
    pub async fn wait(
        &self,
        api: &dyn ManagementApi,
        task: &TaskHandle,
        operation: Operation,
    ) -> ProvisionResult<Option<String>> {
        let started = Instant::now();
        let poll = self.poll_until_done(api, task, operation);

        let bounded = async {
            match self.deadline {
                Some(limit) => timeout(limit, poll).await.map_err(|_| ProvisionError::Timeout {
                    operation,
                    waited: limit,
                })?,
                None => poll.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ProvisionError::Cancelled { operation }),
            outcome = bounded => outcome?,
        };

        debug!(%task, %operation, elapsed = ?started.elapsed(), "Task finished");
        match outcome {
            TaskOutcome::Success { result } => Ok(result),
            TaskOutcome::Error { detail } => Err(ProvisionError::Task { operation, detail }),
        }
    }

    async fn poll_until_done(
        &self,
        api: &dyn ManagementApi,
        task: &TaskHandle,
        operation: Operation,
    ) -> ProvisionResult<TaskOutcome> {
        loop {
            let info = api.task_info(task).await?;
            if let Some(outcome) = observe(&info) {
                return Ok(outcome);
            }
            debug!(%task, %operation, state = ?info.state, "Waiting for task to finish");
            sleep(self.poll_interval).await;
        }
    }
}
