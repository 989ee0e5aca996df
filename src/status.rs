//! # Node Status
//!
//! The status snapshot answered to `mamiya:status` queries and the `mamiya` tag
//! every node advertises.
//!
//! The tag is a comma-delimited token set. Peers running older agents parse it,
//! so tokens are only ever appended: `ready`, `ready,fetching`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::agent::AgentContext;
use crate::constants::{task_classes, tokens, AGENT_VERSION, STATUS_TAG_KEY};
use crate::gossip::{GossipError, QueryRecord, QueryResponder};
use crate::packages::PackageMap;
use crate::task_queue::QueueStatus;

/// Point-in-time view of this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub version: String,
    pub queues: BTreeMap<String, QueueStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<PackageMap>,
}

/// Conditions advertised in the status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusToken {
    Ready,
    Fetching,
}

impl StatusToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusToken::Ready => tokens::READY,
            StatusToken::Fetching => tokens::FETCHING,
        }
    }
}

/// Join tokens in order, dropping repeats
pub fn format_status_tag(tokens: &[StatusToken]) -> String {
    let mut seen: Vec<StatusToken> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !seen.contains(token) {
            seen.push(*token);
        }
    }
    seen.iter()
        .map(StatusToken::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl AgentContext {
    /// Assemble the node status. Without packages this never touches the filesystem.
    pub fn status(&self, include_packages: bool) -> StatusSnapshot {
        StatusSnapshot {
            name: self.node_name().to_string(),
            version: AGENT_VERSION.to_string(),
            queues: self.task_queue().status(),
            packages: include_packages.then(|| self.scanner().scan()),
        }
    }

    /// Conditions currently worth reporting, `ready` first
    pub fn status_tokens(&self) -> Vec<StatusToken> {
        let mut tokens = vec![StatusToken::Ready];
        if self.config().report_task_activity && self.task_queue().is_busy(task_classes::FETCH) {
            tokens.push(StatusToken::Fetching);
        }
        tokens
    }

    /// Recompute and write the `mamiya` tag. Returns the written value.
    pub fn update_tags(&self) -> String {
        let value = format_status_tag(&self.status_tokens());
        self.gossip().set_tag(STATUS_TAG_KEY, &value);
        *self.last_tag.lock() = Some(value.clone());
        debug!(tag = %value, "Status tag updated");
        value
    }

    /// Write the tag only when its value changed since the last write
    pub(crate) fn refresh_tags(&self) -> bool {
        let value = format_status_tag(&self.status_tokens());
        if self.last_tag.lock().as_deref() == Some(value.as_str()) {
            trace!("Status tag unchanged");
            return false;
        }
        self.update_tags();
        true
    }
}

/// Answers the status query from inside the transport callback
pub struct StatusResponder {
    ctx: AgentContext,
    include_packages: bool,
}

impl StatusResponder {
    pub fn new(ctx: AgentContext, include_packages: bool) -> Self {
        Self {
            ctx,
            include_packages,
        }
    }
}

impl QueryResponder for StatusResponder {
    fn respond(&self, query: &QueryRecord) -> Result<Vec<u8>, GossipError> {
        trace!(query = %query.name, origin = ?query.origin, "Answering status query");
        serde_json::to_vec(&self.ctx.status(self.include_packages))
            .map_err(|e| GossipError::Responder(e.to_string()))
    }
}
