//! `mamiya:clean` prunes old packages beyond the retention limit.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{EventHandler, HandlerContext, HandlerResult};
use crate::constants::{task_classes, DEFAULT_ACTION};

pub struct CleanHandler {
    ctx: HandlerContext,
}

impl CleanHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EventHandler for CleanHandler {
    fn supports(&self, action: &str) -> bool {
        action == DEFAULT_ACTION
    }

    async fn invoke(&self, _action: &str) -> HandlerResult {
        let job_id = self.ctx.agent.submit(task_classes::CLEAN, json!({}))?;
        info!(job_id = %job_id, "Clean requested");
        Ok(())
    }
}
