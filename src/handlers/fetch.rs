//! `mamiya:fetch` asks the node to pull a package into local storage.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{EventHandler, HandlerContext, HandlerResult};
use crate::constants::{task_classes, DEFAULT_ACTION};

pub struct FetchHandler {
    ctx: HandlerContext,
}

impl FetchHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EventHandler for FetchHandler {
    fn supports(&self, action: &str) -> bool {
        action == DEFAULT_ACTION
    }

    async fn invoke(&self, _action: &str) -> HandlerResult {
        let app = self.ctx.require_str("app")?;
        let pkg = self.ctx.require_str("pkg")?;

        let job_id = self
            .ctx
            .agent
            .submit(task_classes::FETCH, json!({ "app": app, "pkg": pkg }))?;
        info!(app, pkg, job_id = %job_id, "Fetch requested");
        Ok(())
    }
}
