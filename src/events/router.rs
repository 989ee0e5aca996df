//! # Event Router
//!
//! Turns inbound gossip events into handler invocations.
//!
//! ```text
//! UserEvent ──► namespace? ──► payload object? ──► filter? ──► handler? ──► supports(action)? ──► invoke
//!                  │               │                 │            │               │                │
//!               Ignored        Discarded          Ignored      Ignored         Ignored      Handled / Failed
//! ```
//!
//! Inbound events come from any node in the cluster, so nothing they trigger may
//! take this node down: handler errors and panics stop at this boundary. The
//! [`FailureMode::Propagate`] mode returns them instead, for tests.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::command::{decode_payload, EventFilter, NameParse, ParsedCommand};
use crate::agent::AgentContext;
use crate::error::{AgentError, Result};
use crate::gossip::UserEvent;
use crate::handlers::{HandlerContext, HandlerError, HandlerRegistry};
use crate::logging::log_error;
use crate::task_queue::panic_message;

/// How handler failures leave the router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Log and continue
    #[default]
    Contain,
    /// Return the failure to the caller
    Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OutsideNamespace,
    EmptyKind,
    Filtered,
    NoHandler,
    UnsupportedAction,
}

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Handled { command: String, action: String },
    Ignored(IgnoreReason),
    /// Payload was not a JSON object
    Discarded { reason: String },
    /// Handler failed and the failure was contained
    Failed {
        command: String,
        action: String,
        error: String,
    },
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchOutcome::Handled { .. })
    }
}

/// Snapshot of router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub received: u64,
    pub handled: u64,
    pub ignored: u64,
    pub discarded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct AtomicRouterStats {
    received: AtomicU64,
    handled: AtomicU64,
    ignored: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

impl AtomicRouterStats {
    #[inline]
    fn record(&self, outcome: &Result<DispatchOutcome>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(DispatchOutcome::Handled { .. }) => &self.handled,
            Ok(DispatchOutcome::Ignored(_)) => &self.ignored,
            Ok(DispatchOutcome::Discarded { .. }) => &self.discarded,
            Ok(DispatchOutcome::Failed { .. }) | Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct EventRouter {
    registry: HandlerRegistry,
    filter: Option<EventFilter>,
    failure_mode: FailureMode,
    stats: AtomicRouterStats,
}

impl EventRouter {
    pub fn new(
        registry: HandlerRegistry,
        filter: Option<EventFilter>,
        failure_mode: FailureMode,
    ) -> Self {
        Self {
            registry,
            filter,
            failure_mode,
            stats: AtomicRouterStats::default(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.snapshot()
    }

    /// Dispatch one event. Returns `Err` only in [`FailureMode::Propagate`].
    pub async fn dispatch(&self, ctx: &AgentContext, event: UserEvent) -> Result<DispatchOutcome> {
        let outcome = self.route(ctx, &event).await;
        self.stats.record(&outcome);
        outcome
    }

    async fn route(&self, ctx: &AgentContext, event: &UserEvent) -> Result<DispatchOutcome> {
        let (kind, action) = match ParsedCommand::split_name(&event.name) {
            NameParse::Command { kind, action } => (kind, action),
            NameParse::OutsideNamespace => {
                trace!(event = %event.name, "Ignoring event outside namespace");
                return Ok(DispatchOutcome::Ignored(IgnoreReason::OutsideNamespace));
            }
            NameParse::EmptyKind => {
                trace!(event = %event.name, "Ignoring event without command kind");
                return Ok(DispatchOutcome::Ignored(IgnoreReason::EmptyKind));
            }
        };

        let payload = match decode_payload(&event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    event = %event.name,
                    origin = ?event.origin,
                    error = %e,
                    "Discarding event with malformed payload"
                );
                return Ok(DispatchOutcome::Discarded {
                    reason: e.to_string(),
                });
            }
        };

        if let Some(filter) = &self.filter {
            if !filter.allows(kind) {
                trace!(command = kind, "Command filtered out");
                return Ok(DispatchOutcome::Ignored(IgnoreReason::Filtered));
            }
        }

        let Some(factory) = self.registry.resolve(kind) else {
            trace!(command = kind, "No handler for command");
            return Ok(DispatchOutcome::Ignored(IgnoreReason::NoHandler));
        };

        let command = ParsedCommand::new(kind, action, payload);
        let action = command.target_action().to_string();
        let handler_ctx = HandlerContext::new(ctx.clone(), command.clone());

        let run = async {
            let handler = factory(handler_ctx);
            if !handler.supports(&action) {
                return Ok(false);
            }
            handler.invoke(&action).await.map(|()| true)
        };
        let result = AssertUnwindSafe(run)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(true) => {
                debug!(command = kind, action = %action, "Command handled");
                Ok(DispatchOutcome::Handled {
                    command: kind.to_string(),
                    action,
                })
            }
            Ok(false) => {
                debug!(command = kind, action = %action, "Handler does not support action");
                Ok(DispatchOutcome::Ignored(IgnoreReason::UnsupportedAction))
            }
            Err(error) => self.handler_failed(&command, action, error),
        }
    }

    fn handler_failed(
        &self,
        command: &ParsedCommand,
        action: String,
        error: HandlerError,
    ) -> Result<DispatchOutcome> {
        match self.failure_mode {
            FailureMode::Propagate => Err(AgentError::Handler {
                command: command.event_name(),
                action,
                source: error,
            }),
            FailureMode::Contain => {
                let error = format!("{:#}", anyhow::Error::from(error));
                log_error(
                    "event_router",
                    "dispatch",
                    &error,
                    Some(&format!(
                        "event={} action={} payload={}",
                        command.event_name(),
                        action,
                        serde_json::Value::Object(command.payload.clone())
                    )),
                );
                Ok(DispatchOutcome::Failed {
                    command: command.kind.clone(),
                    action,
                    error,
                })
            }
        }
    }
}
