//! Configuration check specs
//!
//! Verify `tetherd --check` validates and prints the effective configuration.

use crate::prelude::*;

#[test]
fn check_without_config_uses_defaults() {
    Project::empty()
        .tetherd()
        .args(["--check"])
        .passes()
        .stdout_has("configuration ok")
        .stdout_has("key_prefix = \"tether\"")
        .stdout_has("redis_url = \"redis://127.0.0.1:6379\"")
        .stdout_has("visibility_timeout = \"5m\"");
}

#[test]
fn check_reads_default_file_from_working_directory() {
    Project::with_config("key_prefix = \"from-cwd\"\n")
        .tetherd()
        .args(["--check"])
        .passes()
        .stdout_has("key_prefix = \"from-cwd\"");
}

#[test]
fn check_reads_explicit_file() {
    let project = Project::empty();
    let path = project.file(
        "conf/prod.toml",
        r#"
key_prefix = "prod"

[lock]
ttl = "45s"

[daemon]
queues = ["emails", "reports"]
"#,
    );

    project
        .tetherd()
        .args([std::ffi::OsStr::new("--check"), path.as_os_str()])
        .passes()
        .stdout_has("key_prefix = \"prod\"")
        .stdout_has("ttl = \"45s\"")
        .stdout_has("\"emails\"")
        .stdout_has("\"reports\"");
}

#[test]
fn check_output_is_a_fixed_point() {
    let project = Project::with_config("[queue]\nmax_retries = 7\n[sync]\nttl = \"2h\"\n");
    let first = project.tetherd().args(["--check"]).passes().stdout();
    let rendered = first
        .strip_prefix("configuration ok\n")
        .expect("status line first");

    project.file("rendered.toml", rendered);
    let second = project
        .tetherd()
        .args(["--check", "rendered.toml"])
        .passes()
        .stdout();

    similar_asserts::assert_eq!(first, second);
}

#[test]
fn check_rejects_invalid_values() {
    Project::with_config("[lock]\nttl = \"0s\"\n")
        .tetherd()
        .args(["--check"])
        .fails()
        .stderr_has("invalid configuration: lock.ttl must be positive");
}

#[test]
fn check_rejects_malformed_toml() {
    Project::with_config("[lock\n")
        .tetherd()
        .args(["--check"])
        .fails()
        .stderr_has("invalid TOML");
}

#[test]
fn check_rejects_bad_durations() {
    Project::with_config("[queue]\npoll_interval = \"soon\"\n")
        .tetherd()
        .args(["--check"])
        .fails()
        .stderr_has("invalid TOML");
}

#[test]
fn check_reports_missing_file() {
    Project::empty()
        .tetherd()
        .args(["--check", "absent.toml"])
        .fails()
        .stderr_has("failed to read absent.toml");
}
