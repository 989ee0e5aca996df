//! Retention: keep the newest `keep_packages` valid packages per app.

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{path_component, Task, TaskContext, TaskError};
use crate::constants::task_classes;
use crate::events::OutboundEvent;

/// Removes old packages. Optional argument `app` limits the sweep to one app.
#[derive(Debug, Default)]
pub struct CleanTask;

impl CleanTask {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Task for CleanTask {
    fn class(&self) -> &str {
        task_classes::CLEAN
    }

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> Result<(), TaskError> {
        let keep = ctx.config().keep_packages;
        let apps: Vec<String> = match args.get("app") {
            None | Some(Value::Null) => ctx.scanner().scan().into_keys().collect(),
            Some(Value::String(app)) => vec![path_component(app)?.to_string()],
            Some(other) => {
                return Err(TaskError::InvalidArgs {
                    error: format!("'app' must be a string, got {other}"),
                })
            }
        };

        let mut removed = 0usize;
        for app in &apps {
            let packages = ctx.scanner().packages_by_age(app);
            if packages.len() <= keep {
                continue;
            }

            for base in &packages[..packages.len() - keep] {
                let paths = ctx.scanner().package_paths(app, base);
                // Metadata first: the package stops being valid before the tarball goes
                remove_if_exists(&paths.metadata).await?;
                remove_if_exists(&paths.tarball).await?;
                removed += 1;
                info!(app = %app, pkg = %base, "Removed old package");

                let event = OutboundEvent::new("pkg")
                    .action("remove")
                    .coalesce(false)
                    .field("app", app.as_str())
                    .field("pkg", base.as_str());
                if let Err(e) = ctx.trigger(event).await {
                    warn!(
                        app = %app,
                        pkg = %base,
                        error = %e,
                        "Failed to announce package removal"
                    );
                }
            }
        }

        info!(apps = apps.len(), removed, keep, "Clean finished");
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), TaskError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
