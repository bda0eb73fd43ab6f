// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;
use std::time::Duration;

#[test]
fn empty_file_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.daemon.redis_url, "redis://127.0.0.1:6379");
    assert!(config.daemon.queues.is_empty());
    assert!(config.daemon.log_path.is_none());
}

#[test]
fn daemon_section_and_shared_sections_parse_together() {
    let config = Config::parse(
        r#"
key_prefix = "prod"

[queue]
visibility_timeout = "2m"

[maintenance]
interval = "10s"

[daemon]
redis_url = "redis://cache:6379/2"
queues = ["emails", "reports"]
log_path = "/var/log/tetherd.log"
"#,
    )
    .unwrap();

    assert_eq!(config.tether.key_prefix, "prod");
    assert_eq!(
        config.tether.queue.visibility_timeout,
        Duration::from_secs(120)
    );
    assert_eq!(config.tether.maintenance.interval, Duration::from_secs(10));
    assert_eq!(config.daemon.redis_url, "redis://cache:6379/2");
    assert_eq!(config.daemon.queues, vec!["emails", "reports"]);
    assert_eq!(
        config.daemon.log_path,
        Some(PathBuf::from("/var/log/tetherd.log"))
    );
}

#[test]
fn duplicate_queues_are_rejected() {
    let err = Config::parse("[daemon]\nqueues = [\"a\", \"b\", \"a\"]").unwrap_err();
    assert!(err.to_string().contains("queue a listed twice"), "{}", err);
}

#[test]
fn shared_validation_applies() {
    let err = Config::parse("key_prefix = \"\"").unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Config(ConfigError::Invalid(_))
    ));
}

#[test]
fn empty_redis_url_is_rejected() {
    assert!(Config::parse("[daemon]\nredis_url = \"\"").is_err());
}

#[test]
fn render_round_trips() {
    let config = Config::parse("[daemon]\nqueues = [\"jobs\"]").unwrap();
    let rendered = config.render().unwrap();
    assert!(rendered.contains("key_prefix = \"tether\""), "{}", rendered);
    assert!(rendered.contains("interval = \"30s\""), "{}", rendered);
    assert_eq!(Config::parse(&rendered).unwrap(), config);
}

#[test]
fn load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[daemon]\nqueues = [\"jobs\"]").unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.daemon.queues, vec!["jobs"]);
}

#[test]
fn load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(err.to_string().contains("missing.toml"), "{}", err);
}

#[tokio::test]
async fn startup_fails_when_store_unreachable() {
    let config = Config::parse("[daemon]\nredis_url = \"redis://127.0.0.1:1\"").unwrap();
    let err = match startup(&config).await {
        Ok(_) => panic!("startup should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, LifecycleError::Store(StoreError::Unavailable(_))));
}
