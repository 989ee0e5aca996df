//! Outbound cluster events.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::{NAMESPACE, ORIGIN_FIELD};
use crate::error::Result;
use crate::gossip::GossipAdapter;

/// An event this node broadcasts as `mamiya:<kind>[:<action>]`
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub kind: String,
    pub action: Option<String>,
    /// Let the transport collapse rapid repeats; disable when every occurrence matters
    pub coalesce: bool,
    pub payload: Map<String, Value>,
}

impl OutboundEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            action: None,
            coalesce: true,
            payload: Map::new(),
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn event_name(&self) -> String {
        match &self.action {
            Some(action) => format!("{NAMESPACE}:{}:{action}", self.kind),
            None => format!("{NAMESPACE}:{}", self.kind),
        }
    }

    /// Payload with the sender's node name injected, JSON encoded
    pub fn encode(&self, node_name: &str) -> Result<Vec<u8>> {
        let mut payload = self.payload.clone();
        payload.insert(ORIGIN_FIELD.to_string(), Value::from(node_name));
        Ok(serde_json::to_vec(&payload)?)
    }
}

/// Broadcasts [`OutboundEvent`]s through the gossip adapter
#[derive(Clone)]
pub struct EventTrigger {
    gossip: Arc<dyn GossipAdapter>,
}

impl EventTrigger {
    pub fn new(gossip: Arc<dyn GossipAdapter>) -> Self {
        Self { gossip }
    }

    pub fn node_name(&self) -> &str {
        self.gossip.name()
    }

    pub async fn trigger(&self, event: OutboundEvent) -> Result<()> {
        let name = event.event_name();
        let payload = event.encode(self.gossip.name())?;

        debug!(event = %name, coalesce = event.coalesce, "Broadcasting event");
        self.gossip
            .broadcast(&name, payload, event.coalesce)
            .await?;
        Ok(())
    }
}
