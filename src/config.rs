//! # Agent Configuration
//!
//! Layered loading: built-in defaults, then an optional TOML file, then `MAMIYA_*`
//! environment variables. The result is validated before the agent sees it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::events::EventFilter;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MAMIYA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root of `<app>/<base>.{tar.gz,json}` package pairs
    pub packages_dir: PathBuf,
    /// Valid packages kept per app by the clean task
    pub keep_packages: usize,
    /// Shared directory the built-in fetcher copies packages from
    pub fetch_source_dir: Option<PathBuf>,
    /// Command kinds to dispatch; exact names or `/regex/`. Empty dispatches everything.
    pub event_filter: Vec<String>,
    pub poll_interval_ms: u64,
    pub ready_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Include the package map when answering the status query
    pub status_query_packages: bool,
    /// Append activity tokens (e.g. `fetching`) to the status tag
    pub report_task_activity: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            packages_dir: PathBuf::from("/var/lib/mamiya/packages"),
            keep_packages: 3,
            fetch_source_dir: None,
            event_filter: Vec::new(),
            poll_interval_ms: 1000,
            ready_timeout_ms: 30_000,
            shutdown_grace_ms: 10_000,
            status_query_packages: false,
            report_task_activity: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from an optional file plus the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration with an explicit environment map instead of the process
    /// environment. Keeps tests independent of global state.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading agent configuration file");
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("event_filter")
                .source(env),
        );

        let config: AgentConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(AgentError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.ready_timeout_ms == 0 {
            return Err(AgentError::Configuration(
                "ready_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.keep_packages == 0 {
            return Err(AgentError::Configuration(
                "keep_packages must keep at least one package".to_string(),
            ));
        }
        self.event_filter()?;
        Ok(())
    }

    /// Compiled event filter, `None` when every command kind is dispatched
    pub fn event_filter(&self) -> Result<Option<EventFilter>> {
        if self.event_filter.is_empty() {
            return Ok(None);
        }
        EventFilter::parse(&self.event_filter).map(Some)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
