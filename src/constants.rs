//! # Protocol Constants
//!
//! Names shared by every agent in the cluster. Peers running other agent versions
//! parse these, so they only ever grow.

/// Namespace owning every event and query this agent speaks
pub const NAMESPACE: &str = "mamiya";

/// Tag key the agent exclusively owns on its node
pub const STATUS_TAG_KEY: &str = "mamiya";

/// Action invoked when an event name carries no action segment
pub const DEFAULT_ACTION: &str = "run";

/// Agent version reported in status snapshots
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Payload field injected into every outbound event
pub const ORIGIN_FIELD: &str = "name";

/// Query names answered by the agent
pub mod queries {
    pub const STATUS: &str = "mamiya:status";
}

/// Task class names registered by the built-in tasks
pub mod task_classes {
    pub const FETCH: &str = "fetch";
    pub const CLEAN: &str = "clean";
}

/// Status tag tokens. Append new tokens, never rename existing ones.
pub mod tokens {
    pub const READY: &str = "ready";
    pub const FETCHING: &str = "fetching";
}

/// Package file suffixes
pub mod package_files {
    pub const TARBALL: &str = ".tar.gz";
    pub const METADATA: &str = ".json";
}

/// Prefix every inbound event name must carry, e.g. `mamiya:`
pub fn event_prefix() -> String {
    format!("{NAMESPACE}:")
}
