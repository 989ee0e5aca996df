//! # Task Queue Supervisor
//!
//! Holds a fixed, ordered set of task classes and runs submitted jobs in the
//! background.
//!
//! ```text
//! submit(class, args) ──► class queue ──► worker(class) ──► Task::execute
//!                          (VecDeque)      one job at a time per class
//! ```
//!
//! ## Rules
//! - `submit` never waits; jobs queue up even while the supervisor is stopped
//! - `stop` lets in-flight jobs finish within the shutdown grace, then aborts them
//! - queued jobs survive `stop` and resume on the next `start`
//! - failed jobs are logged, never retried here

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::logging::{log_error, log_task_operation};
use crate::tasks::{Task, TaskContext, TaskEnvironment};

pub type JobId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskQueueError {
    #[error("Unknown task class '{class}' (known: {known:?})")]
    UnknownTaskClass { class: String, known: Vec<String> },
}

/// One submitted unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskJob {
    pub id: JobId,
    pub class: String,
    pub args: Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Point-in-time view of one task class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub in_flight: usize,
    /// Arguments of queued jobs, oldest first
    pub queue: Vec<Value>,
    /// Arguments of the running job
    pub working: Option<Value>,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0
    }
}

#[derive(Default)]
struct ClassState {
    queue: VecDeque<TaskJob>,
    working: Option<TaskJob>,
}

struct Workers {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    tasks: Vec<Arc<dyn Task>>,
    notifiers: HashMap<String, Arc<Notify>>,
    state: Mutex<HashMap<String, ClassState>>,
    env: TaskEnvironment,
    shutdown_grace: Duration,
    workers: Mutex<Option<Workers>>,
}

/// Cloneable handle to the supervisor
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new(tasks: Vec<Arc<dyn Task>>, env: TaskEnvironment, shutdown_grace: Duration) -> Self {
        let mut unique: Vec<Arc<dyn Task>> = Vec::with_capacity(tasks.len());
        for task in tasks {
            if unique.iter().any(|known| known.class() == task.class()) {
                warn!(task_class = task.class(), "Duplicate task class ignored");
                continue;
            }
            unique.push(task);
        }

        let notifiers = unique
            .iter()
            .map(|task| (task.class().to_string(), Arc::new(Notify::new())))
            .collect();
        let state = unique
            .iter()
            .map(|task| (task.class().to_string(), ClassState::default()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                tasks: unique,
                notifiers,
                state: Mutex::new(state),
                env,
                shutdown_grace,
                workers: Mutex::new(None),
            }),
        }
    }

    /// Registered task classes in registration order
    pub fn classes(&self) -> Vec<String> {
        self.inner
            .tasks
            .iter()
            .map(|task| task.class().to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.workers.lock().is_some()
    }

    /// Spawn one worker per task class. No-op when already running.
    pub fn start(&self) {
        let mut workers = self.inner.workers.lock();
        if workers.is_some() {
            debug!("Task queue already running");
            return;
        }

        let token = CancellationToken::new();
        let handles = self
            .inner
            .tasks
            .iter()
            .map(|task| {
                let queue = self.clone();
                let task = task.clone();
                let token = token.clone();
                tokio::spawn(async move { queue.worker_loop(task, token).await })
            })
            .collect();

        *workers = Some(Workers { token, handles });
        info!(classes = ?self.classes(), "🔄 Task queue started");
    }

    /// Stop all workers, giving in-flight jobs the shutdown grace to finish.
    /// No-op when already stopped.
    pub async fn stop(&self) {
        let Some(Workers { token, handles }) = self.inner.workers.lock().take() else {
            debug!("Task queue already stopped");
            return;
        };

        token.cancel();
        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(self.inner.shutdown_grace, join_all(handles))
            .await
            .is_err()
        {
            let stuck: Vec<String> = {
                let mut state = self.inner.state.lock();
                state
                    .iter_mut()
                    .filter_map(|(class, slot)| slot.working.take().map(|_| class.clone()))
                    .collect()
            };
            warn!(
                grace = ?self.inner.shutdown_grace,
                stuck = ?stuck,
                "Shutdown grace exceeded, aborting task workers"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        info!("🛑 Task queue stopped");
    }

    /// Queue a job without waiting for it to run
    pub fn submit(&self, class: &str, args: Value) -> Result<JobId, TaskQueueError> {
        let Some(notify) = self.inner.notifiers.get(class) else {
            return Err(TaskQueueError::UnknownTaskClass {
                class: class.to_string(),
                known: self.classes(),
            });
        };

        let job = TaskJob {
            id: Uuid::new_v4(),
            class: class.to_string(),
            args,
            enqueued_at: Utc::now(),
        };
        let id = job.id;

        self.inner
            .state
            .lock()
            .entry(class.to_string())
            .or_default()
            .queue
            .push_back(job);
        notify.notify_one();

        debug!(task_class = class, job_id = %id, "Job queued");
        Ok(id)
    }

    /// Per-class snapshot, suitable for embedding in the node status
    pub fn status(&self) -> BTreeMap<String, QueueStatus> {
        let state = self.inner.state.lock();
        state
            .iter()
            .map(|(class, slot)| {
                let status = QueueStatus {
                    queued: slot.queue.len(),
                    in_flight: usize::from(slot.working.is_some()),
                    queue: slot.queue.iter().map(|job| job.args.clone()).collect(),
                    working: slot.working.as_ref().map(|job| job.args.clone()),
                };
                (class.clone(), status)
            })
            .collect()
    }

    /// Whether a class has queued or running work
    pub fn is_busy(&self, class: &str) -> bool {
        self.inner
            .state
            .lock()
            .get(class)
            .is_some_and(|slot| !slot.queue.is_empty() || slot.working.is_some())
    }

    async fn worker_loop(self, task: Arc<dyn Task>, token: CancellationToken) {
        let class = task.class().to_string();
        let Some(notify) = self.inner.notifiers.get(&class).cloned() else {
            return;
        };

        while !token.is_cancelled() {
            match self.next_job(&class) {
                Some(job) => self.run_job(&task, job).await,
                None => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = notify.notified() => {}
                    }
                }
            }
        }
        debug!(task_class = %class, "Task worker exited");
    }

    fn next_job(&self, class: &str) -> Option<TaskJob> {
        let mut state = self.inner.state.lock();
        let slot = state.get_mut(class)?;
        let job = slot.queue.pop_front()?;
        slot.working = Some(job.clone());
        Some(job)
    }

    async fn run_job(&self, task: &Arc<dyn Task>, job: TaskJob) {
        let job_id = job.id.to_string();
        log_task_operation("execute", &job.class, Some(&job_id), "started", None);

        let ctx = TaskContext::new(self.inner.env.clone(), self.clone(), job.id);
        let outcome = AssertUnwindSafe(task.execute(&ctx, &job.args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                log_task_operation("execute", &job.class, Some(&job_id), "finished", None);
            }
            Ok(Err(e)) => {
                log_error(
                    "task_queue",
                    e.as_label(),
                    &e.to_string(),
                    Some(&format!("class={} job={} args={}", job.class, job_id, job.args)),
                );
            }
            Err(panic) => {
                log_error(
                    "task_queue",
                    "task_panicked",
                    &panic_message(panic.as_ref()),
                    Some(&format!("class={} job={} args={}", job.class, job_id, job.args)),
                );
            }
        }

        if let Some(slot) = self.inner.state.lock().get_mut(&job.class) {
            slot.working = None;
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::events::EventTrigger;
    use crate::gossip::MemoryGossip;
    use crate::packages::PackageScanner;
    use crate::tasks::TaskError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Blocks each job until the test releases a permit
    struct Gate {
        runs: AtomicUsize,
        permits: Arc<Semaphore>,
    }

    #[async_trait]
    impl Task for Gate {
        fn class(&self) -> &str {
            "gate"
        }

        async fn execute(&self, _ctx: &TaskContext, _args: &Value) -> Result<(), TaskError> {
            let permit = self.permits.acquire().await.map_err(|e| TaskError::Fail {
                error: e.to_string(),
            })?;
            permit.forget();
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Task for Panics {
        fn class(&self) -> &str {
            "panics"
        }

        async fn execute(&self, _ctx: &TaskContext, _args: &Value) -> Result<(), TaskError> {
            panic!("boom");
        }
    }

    fn env() -> TaskEnvironment {
        TaskEnvironment {
            config: Arc::new(AgentConfig::default()),
            trigger: EventTrigger::new(Arc::new(MemoryGossip::new("node-a"))),
            scanner: Arc::new(PackageScanner::new("/nonexistent")),
        }
    }

    fn gate() -> (Arc<Gate>, Arc<Semaphore>) {
        let permits = Arc::new(Semaphore::new(0));
        let gate = Arc::new(Gate {
            runs: AtomicUsize::new(0),
            permits: permits.clone(),
        });
        (gate, permits)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let (gate, _) = gate();
        let queue = TaskQueue::new(vec![gate as Arc<dyn Task>], env(), Duration::from_secs(1));

        let err = queue.submit("deploy", json!({})).unwrap_err();
        assert_eq!(
            err,
            TaskQueueError::UnknownTaskClass {
                class: "deploy".to_string(),
                known: vec!["gate".to_string()],
            }
        );
    }

    #[test]
    fn test_submit_while_stopped_queues() {
        let (gate, _) = gate();
        let queue = TaskQueue::new(vec![gate as Arc<dyn Task>], env(), Duration::from_secs(1));

        queue.submit("gate", json!({"n": 1})).unwrap();
        queue.submit("gate", json!({"n": 2})).unwrap();

        let status = queue.status();
        assert_eq!(status["gate"].queued, 2);
        assert_eq!(status["gate"].in_flight, 0);
        assert_eq!(status["gate"].queue, vec![json!({"n": 1}), json!({"n": 2})]);
        assert!(queue.is_busy("gate"));
    }

    #[tokio::test]
    async fn test_jobs_run_in_order_per_class() {
        let (gate, permits) = gate();
        let queue = TaskQueue::new(
            vec![gate.clone() as Arc<dyn Task>],
            env(),
            Duration::from_secs(1),
        );
        queue.start();
        queue.start();

        queue.submit("gate", json!({"n": 1})).unwrap();
        queue.submit("gate", json!({"n": 2})).unwrap();

        wait_until(|| queue.status()["gate"].in_flight == 1).await;
        let status = queue.status();
        assert_eq!(status["gate"].working, Some(json!({"n": 1})));
        assert_eq!(status["gate"].queued, 1);

        permits.add_permits(2);
        wait_until(|| gate.runs.load(Ordering::SeqCst) == 2).await;
        wait_until(|| queue.status()["gate"].is_idle()).await;

        queue.stop().await;
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_job() {
        let (gate, permits) = gate();
        let queue = TaskQueue::new(
            vec![gate.clone() as Arc<dyn Task>],
            env(),
            Duration::from_secs(5),
        );
        queue.start();
        queue.submit("gate", json!({})).unwrap();
        wait_until(|| queue.status()["gate"].in_flight == 1).await;

        let release = {
            let permits = permits.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                permits.add_permits(1);
            })
        };

        queue.stop().await;
        release.await.unwrap();
        assert_eq!(gate.runs.load(Ordering::SeqCst), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_aborts_after_grace() {
        let (gate, _permits) = gate();
        let queue = TaskQueue::new(
            vec![gate.clone() as Arc<dyn Task>],
            env(),
            Duration::from_millis(20),
        );
        queue.start();
        queue.submit("gate", json!({})).unwrap();
        wait_until(|| queue.status()["gate"].in_flight == 1).await;

        queue.stop().await;
        assert_eq!(gate.runs.load(Ordering::SeqCst), 0);
        assert_eq!(queue.status()["gate"].in_flight, 0);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let queue = TaskQueue::new(
            vec![Arc::new(Panics) as Arc<dyn Task>],
            env(),
            Duration::from_secs(1),
        );
        queue.start();

        queue.submit("panics", json!({})).unwrap();
        queue.submit("panics", json!({})).unwrap();
        wait_until(|| queue.status()["panics"].is_idle()).await;

        queue.stop().await;
    }
}
