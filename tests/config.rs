//! Configuration Tests
//!
//! Layering of defaults, configuration files and `MAMIYA_*` overrides.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use mamiya_agent::{AgentConfig, AgentError};

fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    )
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn config_has_expected_defaults() {
    let config = AgentConfig::default();

    assert_eq!(config.keep_packages, 3);
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.ready_timeout(), Duration::from_secs(30));
    assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    assert!(config.fetch_source_dir.is_none());
    assert!(config.event_filter.is_empty());
    assert!(!config.status_query_packages);
    assert!(!config.report_task_activity);
}

#[test]
fn environment_overrides_file() {
    let file = config_file(
        ".toml",
        r#"
packages_dir = "/data/packages"
keep_packages = 7
event_filter = ["fetch"]
"#,
    );

    let config = AgentConfig::load_with_env(
        Some(file.path()),
        env(&[("MAMIYA_KEEP_PACKAGES", "2"), ("MAMIYA_FETCH_SOURCE_DIR", "/mnt/share")]),
    )
    .unwrap();

    assert_eq!(config.packages_dir, PathBuf::from("/data/packages"));
    assert_eq!(config.keep_packages, 2);
    assert_eq!(config.fetch_source_dir, Some(PathBuf::from("/mnt/share")));
    assert_eq!(config.event_filter, vec!["fetch"]);
}

#[test]
fn json_files_are_accepted() {
    let file = config_file(".json", r#"{ "report_task_activity": true, "shutdown_grace_ms": 50 }"#);

    let config = AgentConfig::load_with_env(Some(file.path()), env(&[])).unwrap();

    assert!(config.report_task_activity);
    assert_eq!(config.shutdown_grace(), Duration::from_millis(50));
}

#[test]
fn unrelated_mamiya_variables_are_ignored() {
    let config = AgentConfig::load_with_env(
        None,
        env(&[("MAMIYA_LOG", "debug"), ("MAMIYA_ENV", "production")]),
    )
    .unwrap();

    assert_eq!(config, AgentConfig::default());
}

#[test]
fn missing_file_is_an_error() {
    let err = AgentConfig::load_with_env(
        Some(std::path::Path::new("/nonexistent/mamiya.toml")),
        env(&[]),
    )
    .unwrap_err();

    assert!(matches!(err, AgentError::Configuration(_)), "{err}");
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let err =
        AgentConfig::load_with_env(None, env(&[("MAMIYA_POLL_INTERVAL_MS", "0")])).unwrap_err();
    assert!(err.to_string().contains("poll_interval_ms"), "{err}");

    let err = AgentConfig::load_with_env(None, env(&[("MAMIYA_EVENT_FILTER", "/(unclosed/")]))
        .unwrap_err();
    assert!(matches!(err, AgentError::Configuration(_)), "{err}");
}
