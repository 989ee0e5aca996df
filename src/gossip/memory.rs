//! In-process gossip adapter.
//!
//! Keeps membership to a single node: broadcasts are recorded instead of sent,
//! events and queries are injected with [`MemoryGossip::deliver`] and
//! [`MemoryGossip::query`]. Start/stop calls are counted so lifecycle behaviour
//! can be observed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::{GossipAdapter, GossipError, QueryRecord, QueryResponder, UserEvent};

/// A broadcast captured by [`MemoryGossip`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRecord {
    pub name: String,
    pub payload: Vec<u8>,
    pub coalesce: bool,
    pub sent_at: DateTime<Utc>,
}

impl BroadcastRecord {
    /// Payload decoded as JSON, `Null` when it is not JSON
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Default)]
struct MemoryState {
    running: bool,
    tags: HashMap<String, String>,
    broadcasts: Vec<BroadcastRecord>,
    subscribers: Vec<mpsc::UnboundedSender<UserEvent>>,
    responders: HashMap<String, Arc<dyn QueryResponder>>,
    start_calls: usize,
    stop_calls: usize,
    auto_stop_registered: bool,
}

pub struct MemoryGossip {
    name: String,
    state: Mutex<MemoryState>,
    ready: watch::Sender<bool>,
    becomes_ready: bool,
    start_failure: Option<String>,
}

impl MemoryGossip {
    pub fn new(name: impl Into<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
            ready,
            becomes_ready: true,
            start_failure: None,
        }
    }

    /// Starts successfully but never reports readiness
    pub fn never_ready(mut self) -> Self {
        self.becomes_ready = false;
        self
    }

    /// Every `start` call fails with the given reason
    pub fn failing_start(mut self, reason: impl Into<String>) -> Self {
        self.start_failure = Some(reason.into());
        self
    }

    /// Deliver a user event to every live subscriber. Returns the number reached.
    pub fn deliver(&self, event: UserEvent) -> usize {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        state.subscribers.len()
    }

    /// Run a query against the registered responder
    pub fn query(&self, name: &str, payload: &[u8]) -> Result<Vec<u8>, GossipError> {
        let responder = self
            .state
            .lock()
            .responders
            .get(name)
            .cloned()
            .ok_or_else(|| GossipError::UnknownQuery(name.to_string()))?;

        responder.respond(&QueryRecord {
            name: name.to_string(),
            payload: payload.to_vec(),
            origin: None,
        })
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.state.lock().broadcasts.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn auto_stop_registered(&self) -> bool {
        self.state.lock().auto_stop_registered
    }

    pub fn has_responder(&self, query: &str) -> bool {
        self.state.lock().responders.contains_key(query)
    }
}

#[async_trait]
impl GossipAdapter for MemoryGossip {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), GossipError> {
        {
            let mut state = self.state.lock();
            state.start_calls += 1;
            if let Some(reason) = &self.start_failure {
                return Err(GossipError::Start(reason.clone()));
            }
            state.running = true;
        }
        if self.becomes_ready {
            self.ready.send_replace(true);
        }
        debug!(node = %self.name, "Memory gossip started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GossipError> {
        {
            let mut state = self.state.lock();
            state.stop_calls += 1;
            state.running = false;
            // Closing the channels ends every delivery loop
            state.subscribers.clear();
        }
        self.ready.send_replace(false);
        debug!(node = %self.name, "Memory gossip stopped");
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), GossipError> {
        let mut ready = self.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| GossipError::NotRunning)
    }

    fn auto_stop_on_process_exit(&self) {
        self.state.lock().auto_stop_registered = true;
    }

    fn tags(&self) -> HashMap<String, String> {
        self.state.lock().tags.clone()
    }

    fn set_tag(&self, key: &str, value: &str) {
        self.state
            .lock()
            .tags
            .insert(key.to_string(), value.to_string());
    }

    fn subscribe_user_events(&self) -> mpsc::UnboundedReceiver<UserEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        rx
    }

    async fn broadcast(
        &self,
        name: &str,
        payload: Vec<u8>,
        coalesce: bool,
    ) -> Result<(), GossipError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(GossipError::NotRunning);
        }
        trace!(event = %name, coalesce, bytes = payload.len(), "Recording broadcast");
        state.broadcasts.push(BroadcastRecord {
            name: name.to_string(),
            payload,
            coalesce,
            sent_at: Utc::now(),
        });
        Ok(())
    }

    fn respond_to_query(&self, query: &str, responder: Arc<dyn QueryResponder>) {
        self.state
            .lock()
            .responders
            .insert(query.to_string(), responder);
    }
}
