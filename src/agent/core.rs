//! Agent bootstrap, run loop and teardown.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::AgentContext;
use super::lifecycle::{LifecycleState, StopHandle};
use crate::config::AgentConfig;
use crate::constants::queries;
use crate::error::{AgentError, Result};
use crate::events::{DispatchOutcome, EventRouter, EventTrigger, FailureMode, OutboundEvent};
use crate::gossip::{GossipAdapter, UserEvent};
use crate::handlers::HandlerRegistry;
use crate::os_signals::wait_for_shutdown_signal;
use crate::packages::PackageScanner;
use crate::status::{StatusResponder, StatusSnapshot};
use crate::task_queue::TaskQueue;
use crate::tasks::{CleanTask, DirectoryFetcher, FetchTask, PackageFetcher, Task, TaskEnvironment};

/// Assembles an [`Agent`] from a gossip adapter and configuration
pub struct AgentBuilder {
    gossip: Arc<dyn GossipAdapter>,
    config: AgentConfig,
    handlers: Option<HandlerRegistry>,
    tasks: Vec<Arc<dyn Task>>,
    fetcher: Option<Arc<dyn PackageFetcher>>,
    default_tasks: bool,
    failure_mode: FailureMode,
}

impl AgentBuilder {
    pub fn new(gossip: Arc<dyn GossipAdapter>, config: AgentConfig) -> Self {
        Self {
            gossip,
            config,
            handlers: None,
            tasks: Vec::new(),
            fetcher: None,
            default_tasks: true,
            failure_mode: FailureMode::default(),
        }
    }

    /// Replace the built-in `fetch`/`clean`/`task` handlers
    pub fn handlers(mut self, registry: HandlerRegistry) -> Self {
        self.handlers = Some(registry);
        self
    }

    /// Add a task class. Classes added here win over built-ins of the same name.
    pub fn task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Transfer backend for the built-in fetch task
    pub fn fetcher(mut self, fetcher: Arc<dyn PackageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Register the built-in fetch and clean tasks (on by default)
    pub fn default_tasks(mut self, enabled: bool) -> Self {
        self.default_tasks = enabled;
        self
    }

    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Return handler failures from dispatch instead of logging them
    pub fn propagate_handler_failures(self) -> Self {
        self.failure_mode(FailureMode::Propagate)
    }

    pub fn build(self) -> Result<Agent> {
        self.config.validate()?;
        let filter = self.config.event_filter()?;
        let config = Arc::new(self.config);

        let trigger = EventTrigger::new(self.gossip.clone());
        let scanner = Arc::new(PackageScanner::new(config.packages_dir.clone()));

        let mut tasks = self.tasks;
        if self.default_tasks {
            let fetcher = self.fetcher.or_else(|| {
                config
                    .fetch_source_dir
                    .as_ref()
                    .map(|dir| Arc::new(DirectoryFetcher::new(dir)) as Arc<dyn PackageFetcher>)
            });
            match fetcher {
                Some(fetcher) => tasks.push(Arc::new(FetchTask::new(fetcher))),
                None => debug!("No package fetcher configured, fetch task disabled"),
            }
            tasks.push(Arc::new(CleanTask::new()));
        }

        let env = TaskEnvironment {
            config: config.clone(),
            trigger: trigger.clone(),
            scanner: scanner.clone(),
        };
        let task_queue = TaskQueue::new(tasks, env, config.shutdown_grace());

        let context = AgentContext::new(config, self.gossip, trigger, task_queue, scanner);
        let registry = self.handlers.unwrap_or_else(HandlerRegistry::with_defaults);
        let router = EventRouter::new(registry, filter, self.failure_mode);

        debug!(
            node = %context.node_name(),
            handlers = ?router.registry().identifiers(),
            task_classes = ?context.task_queue().classes(),
            "Agent assembled"
        );

        Ok(Agent {
            context,
            router: Arc::new(router),
            state: RwLock::new(LifecycleState::Created),
            delivery: Mutex::new(None),
        })
    }
}

struct Delivery {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-node deployment agent
pub struct Agent {
    context: AgentContext,
    router: Arc<EventRouter>,
    state: RwLock<LifecycleState>,
    delivery: Mutex<Option<Delivery>>,
}

impl Agent {
    pub fn builder(gossip: Arc<dyn GossipAdapter>, config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(gossip, config)
    }

    /// Agent with the built-in handlers and tasks
    pub fn new(gossip: Arc<dyn GossipAdapter>, config: AgentConfig) -> Result<Self> {
        AgentBuilder::new(gossip, config).build()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.context.stop_handle().clone()
    }

    /// Bring the agent up. Allowed from `Created` or `Stopped`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if !state.can_start() {
                return Err(AgentError::InvalidTransition {
                    operation: "start",
                    state: *state,
                });
            }
            *state = LifecycleState::Starting;
        }
        info!(node = %self.context.node_name(), "🚀 Starting mamiya agent");

        match self.bring_up().await {
            Ok(()) => {
                *self.state.write() = LifecycleState::Running;
                info!(node = %self.context.node_name(), "✅ Mamiya agent running");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Agent failed to start");
                self.shutdown_components().await;
                *self.state.write() = LifecycleState::Stopped;
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<()> {
        let gossip = self.context.gossip();
        let config = self.context.config();

        gossip.respond_to_query(
            queries::STATUS,
            Arc::new(StatusResponder::new(
                self.context.clone(),
                config.status_query_packages,
            )),
        );
        let events = gossip.subscribe_user_events();

        gossip.start().await?;
        let timeout = config.ready_timeout();
        tokio::time::timeout(timeout, gossip.wait_until_ready())
            .await
            .map_err(|_| AgentError::GossipNotReady { timeout })??;
        gossip.auto_stop_on_process_exit();

        self.context.task_queue().start();
        self.spawn_delivery(events);
        self.context.update_tags();
        Ok(())
    }

    fn spawn_delivery(&self, mut events: mpsc::UnboundedReceiver<UserEvent>) {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let router = self.router.clone();
        let ctx = self.context.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = loop_token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if let Err(e) = router.dispatch(&ctx, event).await {
                    error!(error = %e, "Event dispatch failed");
                }
            }
            debug!("Event delivery loop exited");
        });

        if let Some(previous) = self.delivery.lock().replace(Delivery { token, handle }) {
            previous.token.cancel();
        }
    }

    /// Start if needed, then poll until [`Agent::stop`] and tear down
    pub async fn run(&self) -> Result<()> {
        if self.state() != LifecycleState::Running {
            self.start().await?;
        }

        let stop = self.context.stop_handle().clone();
        let interval = self.context.config().poll_interval();
        loop {
            let requested = stop.wait(interval).await;
            if self.state() != LifecycleState::Running {
                debug!(state = %self.state(), "Agent terminated outside the run loop");
                return Ok(());
            }
            if requested {
                break;
            }
            self.context.refresh_tags();
        }

        info!("🛑 Termination requested");
        self.terminate().await;
        Ok(())
    }

    /// Run until SIGINT, SIGTERM or SIGQUIT (Ctrl-C off Unix)
    pub async fn run_until_signal(&self) -> Result<()> {
        let stop = self.stop_handle();
        let signals = tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(signal) => {
                    info!(%signal, "Shutdown signal received");
                    stop.stop();
                }
                Err(e) => warn!(error = %e, "Signal handlers unavailable"),
            }
        });

        let result = self.run().await;
        signals.abort();
        result
    }

    /// Request termination. Never blocks.
    pub fn stop(&self) {
        self.context.stop_handle().stop();
    }

    /// Take every component down. Safe to call repeatedly.
    pub async fn terminate(&self) {
        let _reset = TerminationGuard { agent: self };
        {
            let mut state = self.state.write();
            if !state.is_active() {
                debug!(state = %*state, "Agent not running, nothing to terminate");
                return;
            }
            *state = LifecycleState::Terminating;
        }
        // A run loop in flight sees the state change and returns
        self.context.stop_handle().wake();

        info!(node = %self.context.node_name(), "🛑 Shutting down mamiya agent");
        self.shutdown_components().await;
        info!("✅ Mamiya agent stopped");
    }

    async fn shutdown_components(&self) {
        let delivery = self.delivery.lock().take();
        if let Some(Delivery { token, handle }) = delivery {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Event delivery loop ended abnormally");
            }
        }

        if let Err(e) = self.context.gossip().stop().await {
            warn!(error = %e, "Gossip adapter stop failed");
        }

        self.context.task_queue().stop().await;
    }

    /// Route one event as if gossip had delivered it
    pub async fn dispatch(&self, event: UserEvent) -> Result<DispatchOutcome> {
        self.router.dispatch(&self.context, event).await
    }

    pub fn status(&self, include_packages: bool) -> StatusSnapshot {
        self.context.status(include_packages)
    }

    pub async fn trigger(&self, event: OutboundEvent) -> Result<()> {
        self.context.trigger(event).await
    }

    pub fn update_tags(&self) -> String {
        self.context.update_tags()
    }
}

/// Leaves the agent restartable however `terminate` exits
struct TerminationGuard<'a> {
    agent: &'a Agent,
}

impl Drop for TerminationGuard<'_> {
    fn drop(&mut self) {
        self.agent.context.stop_handle().clear();
        let mut state = self.agent.state.write();
        if *state != LifecycleState::Created {
            *state = LifecycleState::Stopped;
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("state", &self.state())
            .field("context", &self.context)
            .field("router", &self.router.stats())
            .finish()
    }
}
