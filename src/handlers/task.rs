//! `mamiya:task` submits an arbitrary registered task class.
//!
//! The payload names the class in `task`; the remaining fields (minus the
//! sender's `name`) become the task arguments.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{EventHandler, HandlerContext, HandlerResult};
use crate::constants::{DEFAULT_ACTION, ORIGIN_FIELD};

pub struct TaskHandler {
    ctx: HandlerContext,
}

impl TaskHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EventHandler for TaskHandler {
    fn supports(&self, action: &str) -> bool {
        action == DEFAULT_ACTION
    }

    async fn invoke(&self, _action: &str) -> HandlerResult {
        let class = self.ctx.require_str("task")?;

        let mut args = self.ctx.command.payload.clone();
        args.remove("task");
        args.remove(ORIGIN_FIELD);

        let job_id = self.ctx.agent.submit(class, Value::Object(args))?;
        info!(task_class = class, job_id = %job_id, "Task requested");
        Ok(())
    }
}
