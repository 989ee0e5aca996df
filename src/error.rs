use std::time::Duration;

use crate::agent::LifecycleState;
use crate::gossip::GossipError;
use crate::handlers::HandlerError;
use crate::task_queue::TaskQueueError;

/// Errors surfaced to callers of the agent.
///
/// Anything caused by untrusted cluster input is contained at the router and only
/// shows up here when the router runs in propagate mode.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("Gossip adapter not ready after {timeout:?}")]
    GossipNotReady { timeout: Duration },

    #[error("Cannot {operation} while agent is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Handler for {command} ({action}) failed: {source}")]
    Handler {
        command: String,
        action: String,
        #[source]
        source: HandlerError,
    },

    #[error("Task queue error: {0}")]
    TaskQueue(#[from] TaskQueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
