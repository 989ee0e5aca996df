#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use mamiya_agent::AgentConfig;

/// Configuration tuned for fast tests: short polls, short timeouts
pub fn test_config(packages_dir: &Path) -> AgentConfig {
    AgentConfig {
        packages_dir: packages_dir.to_path_buf(),
        poll_interval_ms: 10,
        ready_timeout_ms: 200,
        shutdown_grace_ms: 500,
        ..AgentConfig::default()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Fail the test instead of hanging when `future` does not finish
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation did not finish in time")
}

/// Write a `<app>/<base>.tar.gz` + `<app>/<base>.json` pair
pub fn write_package(root: &Path, app: &str, base: &str) {
    let dir = root.join(app);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{base}.tar.gz")), b"tarball").unwrap();
    std::fs::write(dir.join(format!("{base}.json")), b"{}").unwrap();
}
