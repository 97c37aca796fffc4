#![cfg(unix)]

use std::path::Path;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

fn forge(home: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("forge")?;
    cmd.env("FORGE_HOME", home).env_remove("RUST_LOG");
    Ok(cmd)
}

fn write_config(home: &TempDir) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let records = home.path().join("records");
    let config = home.path().join("forge.toml");
    std::fs::write(
        &config,
        format!("[records]\ndir = {:?}\n", records.display().to_string()),
    )?;
    Ok(config)
}

#[test]
fn run_streams_lines_then_counter() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;

    let output = forge(home.path())?
        .args(["run", "--", "printf", "alpha\\nbeta\\n"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(
        String::from_utf8(output)?,
        "alpha\nbeta\ndiscontinuities: 0\n"
    );
    Ok(())
}

#[test]
fn run_reports_failing_command_exit() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;

    forge(home.path())?
        .args(["run", "--shell", "--", "echo", "boom;", "exit", "3"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("boom"));
    Ok(())
}

#[test]
fn run_json_prints_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;

    let output = forge(home.path())?
        .args(["run", "--id", "json-run", "--json", "--", "echo", "hi"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: Value = serde_json::from_slice(&output)?;
    assert_eq!(json["session_id"], "json-run");
    assert_eq!(json["lines"], serde_json::json!(["hi"]));
    assert_eq!(json["discontinuities"], 0);
    assert!(json.get("degraded").is_none(), "live run must not degrade");
    Ok(())
}

#[test]
fn logs_shows_persisted_output_in_degraded_mode() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    let config = write_config(&home)?;

    forge(home.path())?
        .arg("--config")
        .arg(&config)
        .args(["run", "--id", "kept", "--", "echo", "persisted-output-line"])
        .assert()
        .success();

    forge(home.path())?
        .arg("--config")
        .arg(&config)
        .args(["logs", "kept"])
        .assert()
        .success()
        .stdout(predicate::str::contains("persisted-output-line"))
        .stdout(predicate::str::contains("Stream degraded"))
        .stdout(predicate::str::contains("Showing persisted logs only"));
    Ok(())
}

#[test]
fn logs_for_unknown_session_fails_with_alert() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    let config = write_config(&home)?;

    forge(home.path())?
        .arg("--config")
        .arg(&config)
        .args(["logs", "missing"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Stream degraded"));
    Ok(())
}

#[test]
fn logs_requires_records_dir() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;

    forge(home.path())?
        .args(["logs", "anything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("records"));
    Ok(())
}
