//! Test handlers and agent wiring

use std::sync::Arc;

use async_trait::async_trait;
use mamiya_agent::{
    Agent, AgentConfig, EventHandler, HandlerContext, HandlerError, HandlerRegistry,
    HandlerResult, MemoryGossip,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};

/// One observed handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: String,
    pub action: String,
    pub payload: Map<String, Value>,
}

/// Shared log of handler invocations
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, ctx: &HandlerContext, action: &str) {
        self.calls.lock().push(RecordedCall {
            kind: ctx.command.kind.clone(),
            action: action.to_string(),
            payload: ctx.command.payload.clone(),
        });
    }

    /// Factory for a handler supporting `actions`
    pub fn handler(
        &self,
        actions: &'static [&'static str],
    ) -> impl Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static {
        let recorder = self.clone();
        move |ctx| {
            Box::new(RecordingHandler {
                ctx,
                recorder: recorder.clone(),
                actions,
                behavior: Behavior::Succeed,
            })
        }
    }

    /// Factory for a handler that records, then fails
    pub fn failing_handler(
        &self,
    ) -> impl Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static {
        let recorder = self.clone();
        move |ctx| {
            Box::new(RecordingHandler {
                ctx,
                recorder: recorder.clone(),
                actions: &["run"],
                behavior: Behavior::Fail,
            })
        }
    }

    /// Factory for a handler that records, then panics
    pub fn panicking_handler(
        &self,
    ) -> impl Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static {
        let recorder = self.clone();
        move |ctx| {
            Box::new(RecordingHandler {
                ctx,
                recorder: recorder.clone(),
                actions: &["run"],
                behavior: Behavior::Panic,
            })
        }
    }

    /// Factory for a handler that records, then asks the agent to stop
    pub fn stopping_handler(
        &self,
    ) -> impl Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static {
        let recorder = self.clone();
        move |ctx| {
            Box::new(RecordingHandler {
                ctx,
                recorder: recorder.clone(),
                actions: &["run"],
                behavior: Behavior::Stop,
            })
        }
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
    Stop,
}

struct RecordingHandler {
    ctx: HandlerContext,
    recorder: Recorder,
    actions: &'static [&'static str],
    behavior: Behavior,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn supports(&self, action: &str) -> bool {
        self.actions.contains(&action)
    }

    async fn invoke(&self, action: &str) -> HandlerResult {
        self.recorder.record(&self.ctx, action);
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(HandlerError::InvalidField("app".to_string())),
            Behavior::Panic => panic!("handler exploded"),
            Behavior::Stop => {
                self.ctx.agent.stop_handle().stop();
                Ok(())
            }
        }
    }
}

/// Agent over a fresh in-memory gossip node
pub fn agent_with(config: AgentConfig, registry: HandlerRegistry) -> (Agent, Arc<MemoryGossip>) {
    let gossip = Arc::new(MemoryGossip::new("node-a"));
    let agent = Agent::builder(gossip.clone(), config)
        .handlers(registry)
        .build()
        .unwrap();
    (agent, gossip)
}

/// Registry with a single handler bound to `kind`
pub fn registry_with<F>(kind: &str, factory: F) -> HandlerRegistry
where
    F: Fn(HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static,
{
    let mut registry = HandlerRegistry::new();
    registry.register_kind(kind, factory);
    registry
}
