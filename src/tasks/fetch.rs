//! Package retrieval.
//!
//! The transfer itself belongs to a [`PackageFetcher`]. [`FetchTask`] decides
//! whether a fetch is needed, announces the result, and schedules retention.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{path_component, str_arg, Task, TaskContext, TaskError};
use crate::constants::package_files::{METADATA, TARBALL};
use crate::constants::task_classes;
use crate::events::OutboundEvent;

/// Moves one package pair into `destination` (the app's package directory).
///
/// Implementations should make the `.json` file appear last so a half-finished
/// transfer never looks valid.
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    async fn fetch(&self, app: &str, package: &str, destination: &Path) -> Result<(), TaskError>;
}

/// Fetches `{app, pkg}` into `<packages_dir>/<app>/`
pub struct FetchTask {
    fetcher: Arc<dyn PackageFetcher>,
}

impl FetchTask {
    pub fn new(fetcher: Arc<dyn PackageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Task for FetchTask {
    fn class(&self) -> &str {
        task_classes::FETCH
    }

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> Result<(), TaskError> {
        let app = path_component(str_arg(args, "app")?)?;
        let pkg = path_component(str_arg(args, "pkg")?)?;

        if ctx.scanner().is_valid(app, pkg) {
            debug!(app, pkg, "Package already present, skipping fetch");
            return Ok(());
        }

        let destination = ctx.scanner().root().join(app);
        tokio::fs::create_dir_all(&destination).await?;

        match self.fetcher.fetch(app, pkg, &destination).await {
            Ok(()) => {
                info!(app, pkg, "📦 Package fetched");
                announce(
                    ctx,
                    OutboundEvent::new("fetch")
                        .action("success")
                        .coalesce(false)
                        .field("app", app)
                        .field("pkg", pkg),
                )
                .await;
                if let Err(e) = ctx.submit(task_classes::CLEAN, json!({ "app": app })) {
                    debug!(error = %e, "Clean task not registered, skipping retention");
                }
                Ok(())
            }
            Err(e) => {
                announce(
                    ctx,
                    OutboundEvent::new("fetch")
                        .action("error")
                        .coalesce(false)
                        .field("app", app)
                        .field("pkg", pkg)
                        .field("error", e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }
}

async fn announce(ctx: &TaskContext, event: OutboundEvent) {
    let name = event.event_name();
    if let Err(e) = ctx.trigger(event).await {
        warn!(event = %name, error = %e, "Failed to announce fetch result");
    }
}

/// Copies packages from a shared directory laid out like the packages directory
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    source: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    async fn copy_into(from: &Path, destination: &Path, file_name: &str) -> Result<(), TaskError> {
        let partial = destination.join(format!(".{file_name}.part"));
        tokio::fs::copy(from, &partial).await?;
        tokio::fs::rename(&partial, destination.join(file_name)).await?;
        Ok(())
    }
}

#[async_trait]
impl PackageFetcher for DirectoryFetcher {
    async fn fetch(&self, app: &str, package: &str, destination: &Path) -> Result<(), TaskError> {
        let tarball = format!("{package}{TARBALL}");
        let metadata = format!("{package}{METADATA}");
        let source_dir = self.source.join(app);

        for file_name in [&tarball, &metadata] {
            if !source_dir.join(file_name).is_file() {
                return Err(TaskError::Fail {
                    error: format!("{} not found in {}", file_name, source_dir.display()),
                });
            }
        }

        Self::copy_into(&source_dir.join(&tarball), destination, &tarball).await?;
        Self::copy_into(&source_dir.join(&metadata), destination, &metadata).await?;
        Ok(())
    }
}
