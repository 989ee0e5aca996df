//! # Agent
//!
//! Lifecycle of a node's deployment agent: bring the gossip transport and task
//! queue up, feed inbound events to the router, keep the status tag current,
//! and take everything down again on request.

pub mod context;
pub mod core;
pub mod lifecycle;

pub use context::AgentContext;
pub use self::core::{Agent, AgentBuilder};
pub use lifecycle::{LifecycleState, StopHandle};
