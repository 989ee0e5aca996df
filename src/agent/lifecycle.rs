//! Lifecycle states and the termination flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

/// `Created -> Starting -> Running -> Terminating -> Stopped`, and back to
/// `Starting` on restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Terminating,
    Stopped,
}

impl LifecycleState {
    pub fn can_start(&self) -> bool {
        matches!(self, LifecycleState::Created | LifecycleState::Stopped)
    }

    /// Whether components may be up and need tearing down
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Terminating
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct StopState {
    requested: AtomicBool,
    notify: Notify,
}

/// Cloneable termination flag.
///
/// [`StopHandle::stop`] only raises the flag; it never blocks and may be called
/// from a signal task, a handler, or another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
    }

    /// Wake the next [`StopHandle::wait`] without raising the flag
    pub(crate) fn wake(&self) {
        self.inner.notify.notify_one();
    }

    /// Sleep up to `interval`, waking early on [`StopHandle::stop`]. Returns the flag.
    pub(crate) async fn wait(&self, interval: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        let _ = tokio::time::timeout(interval, self.inner.notify.notified()).await;
        self.is_requested()
    }
}
