//! Command line specs
//!
//! Verify help output and argument errors.

use crate::prelude::*;

#[test]
fn help_prints_usage() {
    Project::empty()
        .tetherd()
        .args(["--help"])
        .passes()
        .stdout_has("Usage: tetherd [OPTIONS] [CONFIG]")
        .stdout_has("--check")
        .stdout_has("tether.toml");
}

#[test]
fn unknown_option_is_a_usage_error() {
    let run = Project::empty().tetherd().args(["--verbose"]).fails();
    assert_eq!(run.code(), Some(2));
    run.stderr_has("unexpected argument '--verbose'")
        .stderr_has("Usage: tetherd");
}

#[test]
fn second_config_path_is_rejected() {
    let run = Project::empty()
        .tetherd()
        .args(["a.toml", "b.toml"])
        .fails();
    assert_eq!(run.code(), Some(2));
    run.stderr_has("unexpected argument 'b.toml'");
}
