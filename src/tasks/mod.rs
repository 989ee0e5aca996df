//! # Tasks
//!
//! Units of background work run by the [`TaskQueue`]. Each task class runs one job
//! at a time; different classes run concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::events::{EventTrigger, OutboundEvent};
use crate::packages::{is_plain_name, PackageScanner};
use crate::task_queue::{JobId, TaskQueue, TaskQueueError};

pub mod clean;
pub mod fetch;

pub use clean::CleanTask;
pub use fetch::{DirectoryFetcher, FetchTask, PackageFetcher};

/// Errors produced by task execution
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Job arguments do not describe valid work
    #[error("invalid arguments: {error}")]
    InvalidArgs { error: String },

    /// Execution failed
    #[error("execution failed: {error}")]
    Fail { error: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::InvalidArgs { .. } => "task_invalid_args",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Io(_) => "task_io",
        }
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    /// Task class name jobs are submitted under
    fn class(&self) -> &str;

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> std::result::Result<(), TaskError>;
}

/// Agent facilities shared by every task execution
#[derive(Clone)]
pub struct TaskEnvironment {
    pub config: Arc<AgentConfig>,
    pub trigger: EventTrigger,
    pub scanner: Arc<PackageScanner>,
}

/// Per-job view handed to [`Task::execute`]
pub struct TaskContext {
    env: TaskEnvironment,
    queue: TaskQueue,
    job_id: JobId,
}

impl TaskContext {
    pub(crate) fn new(env: TaskEnvironment, queue: TaskQueue, job_id: JobId) -> Self {
        Self { env, queue, job_id }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.env.config
    }

    pub fn scanner(&self) -> &PackageScanner {
        &self.env.scanner
    }

    pub fn node_name(&self) -> &str {
        self.env.trigger.node_name()
    }

    pub async fn trigger(&self, event: OutboundEvent) -> Result<()> {
        self.env.trigger.trigger(event).await
    }

    /// Queue follow-up work
    pub fn submit(&self, class: &str, args: Value) -> std::result::Result<JobId, TaskQueueError> {
        self.queue.submit(class, args)
    }
}

/// Required string argument
pub(crate) fn str_arg<'a>(args: &'a Value, field: &str) -> std::result::Result<&'a str, TaskError> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TaskError::InvalidArgs {
            error: format!("missing '{field}'"),
        })
}

/// Rejects names that would escape the packages directory
pub(crate) fn path_component(value: &str) -> std::result::Result<&str, TaskError> {
    if !is_plain_name(value) {
        return Err(TaskError::InvalidArgs {
            error: format!("'{value}' is not a plain name"),
        });
    }
    Ok(value)
}
