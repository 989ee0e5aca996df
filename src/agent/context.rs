//! Shared handle to the agent's running parts.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::lifecycle::StopHandle;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::events::{EventTrigger, OutboundEvent};
use crate::gossip::GossipAdapter;
use crate::packages::PackageScanner;
use crate::task_queue::{JobId, TaskQueue, TaskQueueError};

/// What handlers, responders and the lifecycle loop see of the agent.
/// Cheap to clone; every clone refers to the same agent.
#[derive(Clone)]
pub struct AgentContext {
    config: Arc<AgentConfig>,
    gossip: Arc<dyn GossipAdapter>,
    trigger: EventTrigger,
    task_queue: TaskQueue,
    scanner: Arc<PackageScanner>,
    stop: StopHandle,
    /// Last value written to the status tag
    pub(crate) last_tag: Arc<Mutex<Option<String>>>,
}

impl AgentContext {
    pub(crate) fn new(
        config: Arc<AgentConfig>,
        gossip: Arc<dyn GossipAdapter>,
        trigger: EventTrigger,
        task_queue: TaskQueue,
        scanner: Arc<PackageScanner>,
    ) -> Self {
        Self {
            config,
            gossip,
            trigger,
            task_queue,
            scanner,
            stop: StopHandle::new(),
            last_tag: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn gossip(&self) -> &Arc<dyn GossipAdapter> {
        &self.gossip
    }

    pub fn node_name(&self) -> &str {
        self.gossip.name()
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.task_queue
    }

    pub fn scanner(&self) -> &PackageScanner {
        &self.scanner
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Broadcast `mamiya:<kind>[:<action>]` stamped with this node's name
    pub async fn trigger(&self, event: OutboundEvent) -> Result<()> {
        self.trigger.trigger(event).await
    }

    /// Queue a job on a registered task class
    pub fn submit(&self, class: &str, args: Value) -> std::result::Result<JobId, TaskQueueError> {
        self.task_queue.submit(class, args)
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("node", &self.node_name())
            .field("task_classes", &self.task_queue.classes())
            .field("stop_requested", &self.stop.is_requested())
            .finish()
    }
}
