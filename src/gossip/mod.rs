//! # Gossip Adapter
//!
//! The agent's only window onto the cluster: membership start/stop, user-event
//! broadcast and delivery, per-node tags, and query responders. Transports
//! implement [`GossipAdapter`]; [`MemoryGossip`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub mod memory;

pub use memory::{BroadcastRecord, MemoryGossip};

/// A user event as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    pub name: String,
    pub payload: Vec<u8>,
    /// Originating node, when the transport knows it
    pub origin: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl UserEvent {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            origin: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// A query addressed to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub name: String,
    pub payload: Vec<u8>,
    pub origin: Option<String>,
}

/// Answers a named query synchronously inside the transport's callback
pub trait QueryResponder: Send + Sync {
    fn respond(&self, query: &QueryRecord) -> Result<Vec<u8>, GossipError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GossipError {
    #[error("Gossip adapter failed to start: {0}")]
    Start(String),

    #[error("Gossip adapter is not running")]
    NotRunning,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No responder registered for query {0}")]
    UnknownQuery(String),

    #[error("Query responder failed: {0}")]
    Responder(String),
}

#[async_trait]
pub trait GossipAdapter: Send + Sync {
    /// Node identity, unique cluster-wide
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), GossipError>;

    /// Must tolerate being called when already stopped
    async fn stop(&self) -> Result<(), GossipError>;

    /// Resolves once the node has joined the cluster
    async fn wait_until_ready(&self) -> Result<(), GossipError>;

    /// Make sure the transport goes down with the process
    fn auto_stop_on_process_exit(&self);

    fn tags(&self) -> HashMap<String, String>;

    /// Last writer wins
    fn set_tag(&self, key: &str, value: &str);

    /// Receiver of user events in delivery order
    fn subscribe_user_events(&self) -> mpsc::UnboundedReceiver<UserEvent>;

    async fn broadcast(&self, name: &str, payload: Vec<u8>, coalesce: bool)
        -> Result<(), GossipError>;

    /// Replaces any responder previously registered under `query`
    fn respond_to_query(&self, query: &str, responder: Arc<dyn QueryResponder>);
}
