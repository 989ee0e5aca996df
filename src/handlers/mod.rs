//! # Event Handlers
//!
//! Handlers translate one inbound command kind into local work: task submissions,
//! tag updates, follow-up broadcasts. They are short-lived, created per event by a
//! factory registered under the kind's CamelCase identifier.
//!
//! ```text
//! mamiya:fetch-package:retry
//!        └─ kind ─────┘ └ action
//! kind "fetch-package" ──► identifier "FetchPackage" ──► factory ──► handler
//! ```
//!
//! Nodes in a mixed-version cluster routinely see kinds they have no handler for,
//! or actions a handler does not implement; both are skipped, not reported.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agent::AgentContext;
use crate::error::AgentError;
use crate::events::ParsedCommand;
use crate::task_queue::TaskQueueError;

pub mod clean;
pub mod fetch;
pub mod task;

pub use clean::CleanHandler;
pub use fetch::FetchHandler;
pub use task::TaskHandler;

/// Errors raised while a handler runs
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Missing or invalid payload field '{0}'")]
    InvalidField(String),

    #[error("Task submission failed: {0}")]
    Submit(#[from] TaskQueueError),

    #[error("Broadcast failed: {0}")]
    Broadcast(#[source] Box<AgentError>),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<AgentError> for HandlerError {
    fn from(err: AgentError) -> Self {
        HandlerError::Broadcast(Box::new(err))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// What a handler sees: the agent and the command that created it
#[derive(Clone)]
pub struct HandlerContext {
    pub agent: AgentContext,
    pub command: ParsedCommand,
}

impl HandlerContext {
    pub fn new(agent: AgentContext, command: ParsedCommand) -> Self {
        Self { agent, command }
    }

    /// Required string field from the command payload
    pub fn require_str(&self, field: &str) -> Result<&str, HandlerError> {
        self.command
            .str_field(field)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HandlerError::InvalidField(field.to_string()))
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Whether `invoke` implements `action`
    fn supports(&self, action: &str) -> bool;

    async fn invoke(&self, action: &str) -> HandlerResult;
}

pub type HandlerFactory = Arc<dyn Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync>;

/// Command kind to handler factory bindings
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `fetch`, `clean` and `task` handlers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("Fetch", |ctx| Box::new(FetchHandler::new(ctx)));
        registry.register("Clean", |ctx| Box::new(CleanHandler::new(ctx)));
        registry.register("Task", |ctx| Box::new(TaskHandler::new(ctx)));
        registry
    }

    /// Register a factory under a CamelCase identifier
    pub fn register<F>(&mut self, identifier: &str, factory: F)
    where
        F: Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(identifier.to_string(), Arc::new(factory))
            .is_some()
        {
            warn!(identifier, "Replacing existing event handler");
        } else {
            info!(identifier, "Registered event handler");
        }
    }

    /// Register a factory for a kebab-case command kind
    pub fn register_kind<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static,
    {
        self.register(&handler_identifier(kind), factory);
    }

    pub fn resolve(&self, kind: &str) -> Option<HandlerFactory> {
        self.factories.get(&handler_identifier(kind)).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&handler_identifier(kind))
    }

    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<_> = self.factories.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

/// `fetch-package` -> `FetchPackage`
pub fn handler_identifier(kind: &str) -> String {
    kind.split('-')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
