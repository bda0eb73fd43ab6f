// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::MemoryStore;
use std::io::Write;
use yare::parameterized;

#[test]
fn empty_document_uses_defaults() {
    let config = TetherConfig::parse("").unwrap();
    assert_eq!(config, TetherConfig::default());
    assert_eq!(config.key_prefix, "tether");
    assert_eq!(config.lock.ttl, Duration::from_secs(30));
    assert_eq!(config.queue.max_backoff, Duration::from_secs(3600));
    assert!(config.sync.ttl.is_none());
}

#[test]
fn durations_are_human_readable() {
    let config = TetherConfig::parse(
        r#"
key_prefix = "prod"

[lock]
ttl = "45s"
retry_delay = "250ms"

[queue]
visibility_timeout = "10m"
max_retries = 5

[sync]
ttl = "7days"
auto_start = false

[maintenance]
interval = "1m"
completed_retention = "2h"
lock_prefix = "prod:lock:legacy-"
"#,
    )
    .unwrap();

    assert_eq!(config.key_prefix, "prod");
    assert_eq!(config.lock.ttl, Duration::from_secs(45));
    assert_eq!(config.lock.retry_delay, Duration::from_millis(250));
    assert_eq!(config.lock.retry_count, 10);
    assert_eq!(config.queue.visibility_timeout, Duration::from_secs(600));
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.sync.ttl, Some(Duration::from_secs(7 * 86400)));
    assert!(!config.sync.auto_start);
    assert_eq!(config.maintenance.interval, Duration::from_secs(60));
    assert_eq!(
        config.maintenance.lock_prefix.as_deref(),
        Some("prod:lock:legacy-")
    );
}

#[parameterized(
    empty_prefix = { "key_prefix = \"\"" },
    zero_lock_ttl = { "[lock]\nttl = \"0s\"" },
    zero_retries = { "[lock]\nretry_count = 0" },
    short_visibility = { "[queue]\nvisibility_timeout = \"500ms\"" },
    zero_sweep = { "[maintenance]\ninterval = \"0s\"" },
    sweep_whole_prefix = { "[maintenance]\nlock_prefix = \"tether:\"" },
    sweep_everything = { "[maintenance]\nlock_prefix = \"\"" },
    sweep_other_prefix = { "key_prefix = \"svc\"\n[maintenance]\nlock_prefix = \"tether:lock:\"" },
)]
fn invalid_settings_are_rejected(content: &str) {
    assert!(matches!(
        TetherConfig::parse(content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn malformed_toml_is_reported() {
    assert!(matches!(
        TetherConfig::parse("[lock\nttl = 1"),
        Err(ConfigError::Toml(_))
    ));
    assert!(matches!(
        TetherConfig::parse("[lock]\nttl = \"soon\""),
        Err(ConfigError::Toml(_))
    ));
}

#[test]
fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "key_prefix = \"from-file\"").unwrap();
    let config = TetherConfig::load(file.path()).unwrap();
    assert_eq!(config.key_prefix, "from-file");
}

#[test]
fn load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = TetherConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[tokio::test]
async fn builds_primitives_with_configured_prefix() {
    let config = TetherConfig::parse("key_prefix = \"svc\"").unwrap();
    let store = MemoryStore::new();

    let locks = config.lock_manager(store.clone());
    assert_eq!(locks.get("db").key(), "svc:lock:db");

    let queue = config.task_queue(store.clone(), "jobs");
    assert_eq!(queue.keys().pending, "svc:queue:jobs:pending");

    let syncs = config.sync_manager(store);
    let sync = syncs.get("flags").await;
    assert_eq!(sync.keys().channel, "svc:state:flags:updates");
    syncs.stop_all().await;
}
