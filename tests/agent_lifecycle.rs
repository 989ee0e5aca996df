//! Lifecycle Tests
//!
//! Start, run, stop and terminate against the in-memory gossip adapter.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use mamiya_agent::GossipAdapter;
use mamiya_agent::constants::{queries, STATUS_TAG_KEY};
use mamiya_agent::{
    Agent, AgentConfig, AgentError, GossipError, HandlerRegistry, LifecycleState, MemoryGossip,
    UserEvent,
};
use tempfile::TempDir;
use tokio_test::assert_ok;

#[tokio::test]
async fn start_brings_everything_up() {
    let dir = TempDir::new().unwrap();
    let (agent, gossip) = agent_with(test_config(dir.path()), HandlerRegistry::with_defaults());

    assert_ok!(agent.start().await);

    assert_eq!(agent.state(), LifecycleState::Running);
    assert_eq!(gossip.start_calls(), 1);
    assert!(gossip.is_running());
    assert!(gossip.auto_stop_registered());
    assert!(gossip.has_responder(queries::STATUS));
    assert!(agent.context().task_queue().is_running());
    assert_eq!(gossip.tags().get(STATUS_TAG_KEY).map(String::as_str), Some("ready"));

    agent.terminate().await;
}

#[tokio::test]
async fn stop_ends_run_loop_and_stops_subsystems_once() {
    let dir = TempDir::new().unwrap();
    let config = AgentConfig {
        poll_interval_ms: 60_000,
        ..test_config(dir.path())
    };
    let (agent, gossip) = agent_with(config, HandlerRegistry::with_defaults());
    let agent = Arc::new(agent);

    let runner = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run().await }
    });
    assert!(wait_until(Duration::from_secs(2), || agent.state() == LifecycleState::Running).await);

    let requested = Instant::now();
    agent.stop();
    within(runner).await.unwrap().unwrap();

    // Stop wakes the loop without waiting out the poll interval
    assert!(requested.elapsed() < Duration::from_secs(5));
    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert_eq!(gossip.stop_calls(), 1);
    assert!(!gossip.is_running());
    assert!(!agent.context().task_queue().is_running());
    assert!(!agent.stop_handle().is_requested());
}

#[tokio::test]
async fn terminate_during_run_returns_control_to_runner() {
    let dir = TempDir::new().unwrap();
    let config = AgentConfig {
        poll_interval_ms: 60_000,
        ..test_config(dir.path())
    };
    let (agent, gossip) = agent_with(config, HandlerRegistry::with_defaults());
    let agent = Arc::new(agent);

    let runner = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run().await }
    });
    assert!(wait_until(Duration::from_secs(2), || agent.state() == LifecycleState::Running).await);

    agent.terminate().await;
    within(runner).await.unwrap().unwrap();

    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert_eq!(gossip.stop_calls(), 1);
    assert!(!gossip.is_running());
    assert!(!agent.stop_handle().is_requested());
}

#[tokio::test]
async fn handler_can_stop_the_agent() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new();
    let (agent, gossip) = agent_with(
        test_config(dir.path()),
        registry_with("shutdown", recorder.stopping_handler()),
    );
    let agent = Arc::new(agent);

    let runner = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run().await }
    });
    assert!(wait_until(Duration::from_secs(2), || agent.state() == LifecycleState::Running).await);

    gossip.deliver(UserEvent::new("mamiya:shutdown", b"{}".to_vec()));
    within(runner).await.unwrap().unwrap();

    assert_eq!(recorder.count(), 1);
    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert_eq!(gossip.stop_calls(), 1);
}

#[tokio::test]
async fn gossip_start_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let gossip = Arc::new(MemoryGossip::new("node-a").failing_start("bind: address in use"));
    let agent = Agent::new(gossip.clone(), test_config(dir.path())).unwrap();

    let err = agent.start().await.unwrap_err();
    assert!(matches!(err, AgentError::Gossip(GossipError::Start(_))), "{err}");
    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert!(!agent.context().task_queue().is_running());
    assert_eq!(gossip.stop_calls(), 1, "best-effort adapter stop");

    // run() surfaces the same failure instead of looping
    let err = agent.run().await.unwrap_err();
    assert!(matches!(err, AgentError::Gossip(_)));
}

#[tokio::test]
async fn readiness_wait_is_bounded() {
    let dir = TempDir::new().unwrap();
    let gossip = Arc::new(MemoryGossip::new("node-a").never_ready());
    let config = AgentConfig {
        ready_timeout_ms: 50,
        ..test_config(dir.path())
    };
    let agent = Agent::new(gossip.clone(), config).unwrap();

    let err = within(agent.start()).await.unwrap_err();
    match err {
        AgentError::GossipNotReady { timeout } => assert_eq!(timeout, Duration::from_millis(50)),
        other => panic!("expected readiness timeout, got {other}"),
    }
    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert!(!gossip.is_running());
}

#[tokio::test]
async fn start_while_running_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (agent, gossip) = agent_with(test_config(dir.path()), HandlerRegistry::new());
    agent.start().await.unwrap();

    let err = agent.start().await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::InvalidTransition {
            state: LifecycleState::Running,
            ..
        }
    ));
    assert_eq!(gossip.start_calls(), 1);
    agent.terminate().await;
}

#[tokio::test]
async fn terminate_twice_is_harmless() {
    let dir = TempDir::new().unwrap();
    let (agent, gossip) = agent_with(test_config(dir.path()), HandlerRegistry::new());
    agent.start().await.unwrap();
    agent.stop();

    agent.terminate().await;
    agent.terminate().await;

    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert!(!agent.stop_handle().is_requested());
    assert_eq!(gossip.stop_calls(), 1);
}

#[tokio::test]
async fn agent_restarts_after_terminate() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new();
    let (agent, gossip) = agent_with(
        test_config(dir.path()),
        registry_with("ping", recorder.handler(&["run"])),
    );

    agent.start().await.unwrap();
    agent.terminate().await;
    agent.start().await.unwrap();

    assert_eq!(agent.state(), LifecycleState::Running);
    assert_eq!(gossip.start_calls(), 2);
    assert!(agent.context().task_queue().is_running());

    gossip.deliver(UserEvent::new("mamiya:ping", b"{}".to_vec()));
    assert!(wait_until(Duration::from_secs(2), || recorder.count() == 1).await);

    agent.terminate().await;
}

#[tokio::test]
async fn stop_before_run_returns_promptly() {
    let dir = TempDir::new().unwrap();
    let (agent, gossip) = agent_with(test_config(dir.path()), HandlerRegistry::new());

    agent.stop_handle().stop();
    within(agent.run()).await.unwrap();

    assert_eq!(gossip.start_calls(), 1);
    assert_eq!(gossip.stop_calls(), 1);
    assert_eq!(agent.state(), LifecycleState::Stopped);
}

#[test]
fn invalid_configuration_is_rejected_at_build() {
    let dir = TempDir::new().unwrap();
    let config = AgentConfig {
        event_filter: vec!["/[unclosed/".to_string()],
        ..test_config(dir.path())
    };
    let err = Agent::new(Arc::new(MemoryGossip::new("node-a")), config).unwrap_err();
    assert!(matches!(err, AgentError::Configuration(_)), "{err}");
}
