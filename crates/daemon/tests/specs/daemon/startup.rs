//! Daemon startup specs
//!
//! Verify startup failures are reported before the daemon signals ready.

use crate::prelude::*;

const UNREACHABLE: &str = "[daemon]\nredis_url = \"redis://127.0.0.1:1\"\n";

#[test]
fn unreachable_store_fails_startup() {
    Project::with_config(UNREACHABLE)
        .tetherd()
        .fails()
        .stdout_lacks("READY")
        .stderr_has("store unavailable");
}

#[test]
fn invalid_config_fails_before_connecting() {
    Project::with_config("key_prefix = \"\"\n")
        .tetherd()
        .fails()
        .stderr_has("key_prefix must not be empty");
}

#[test]
fn startup_failure_is_written_to_log_file() {
    let project = Project::with_config(&format!(
        "{}log_path = \"logs/tetherd.log\"\n",
        UNREACHABLE
    ));
    project.tetherd().fails();

    let log = std::fs::read_to_string(project.path().join("logs/tetherd.log")).unwrap();
    assert!(log.starts_with("--- tetherd: starting (pid: "), "{}", log);
    assert!(log.contains("Failed to start daemon"), "{}", log);
}
