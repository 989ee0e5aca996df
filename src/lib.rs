#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Mamiya Agent
//!
//! Per-node deployment agent for a gossip-coordinated cluster.
//!
//! ## Overview
//!
//! Every node runs one agent. Operators (or other nodes) broadcast commands such as
//! `mamiya:fetch` over the gossip layer; each agent decodes them, hands them to a
//! handler, and the handler queues background work: fetching a package pair,
//! pruning old packages. Nodes advertise their condition through the `mamiya` tag
//! and answer the `mamiya:status` query with a JSON snapshot of their task queues
//! and, optionally, their local packages.
//!
//! ## Architecture
//!
//! ```text
//! gossip ──► delivery loop ──► EventRouter ──► EventHandler ──► TaskQueue ──► Task
//!   ▲                                               │                         │
//!   └──────────────── EventTrigger ◄────────────────┴─────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - Lifecycle controller and shared context
//! - [`events`] - Command parsing, routing and outbound events
//! - [`handlers`] - Command handlers and their registry
//! - [`task_queue`] - Per-class serial job execution
//! - [`tasks`] - Built-in fetch and clean tasks
//! - [`packages`] - Package directory scanner
//! - [`status`] - Status snapshot, tag and query responder
//! - [`gossip`] - Transport abstraction and in-memory implementation
//! - [`config`] / [`logging`] / [`error`] - Ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mamiya_agent::{Agent, AgentConfig, MemoryGossip};
//!
//! # async fn example() -> mamiya_agent::Result<()> {
//! mamiya_agent::logging::init_structured_logging();
//!
//! let config = AgentConfig::load(None)?;
//! let agent = Agent::new(Arc::new(MemoryGossip::new("node-a")), config)?;
//! agent.run_until_signal().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod gossip;
pub mod handlers;
pub mod logging;
pub mod os_signals;
pub mod packages;
pub mod status;
pub mod task_queue;
pub mod tasks;

pub use agent::{Agent, AgentBuilder, AgentContext, LifecycleState, StopHandle};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use events::{
    DispatchOutcome, EventFilter, EventRouter, EventTrigger, FailureMode, IgnoreReason,
    OutboundEvent, ParsedCommand, RouterStats,
};
pub use gossip::{GossipAdapter, GossipError, MemoryGossip, UserEvent};
pub use handlers::{EventHandler, HandlerContext, HandlerError, HandlerRegistry, HandlerResult};
pub use packages::{PackageMap, PackageScanner};
pub use status::{StatusSnapshot, StatusToken};
pub use task_queue::{JobId, QueueStatus, TaskQueue, TaskQueueError};
pub use tasks::{Task, TaskContext, TaskError};
