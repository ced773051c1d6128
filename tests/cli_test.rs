// ABOUTME: Tests for the database-mirror binary's argument handling
// ABOUTME: Runs the binary without databases; only failures before connecting are checked

use std::process::{Command, Output};
use tempfile::TempDir;

const DB_VARS: [&str; 10] = [
    "SOURCE_DB_HOST",
    "SOURCE_DB_PORT",
    "SOURCE_DB_USER",
    "SOURCE_DB_PASSWORD",
    "SOURCE_DB_NAME",
    "DEST_DB_HOST",
    "DEST_DB_PORT",
    "DEST_DB_USER",
    "DEST_DB_PASSWORD",
    "DEST_DB_NAME",
];

/// Run the binary in an empty directory (no .env) with database variables cleared.
fn run(args: &[&str]) -> Output {
    let dir = TempDir::new().unwrap();
    let mut command = Command::new(env!("CARGO_BIN_EXE_database-mirror"));
    command.current_dir(dir.path()).args(args);
    for var in DB_VARS {
        command.env_remove(var);
    }
    command.output().expect("Failed to execute command")
}

#[test]
fn test_help_lists_commands() {
    let output = run(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["sync", "init", "prune", "schema", "resync", "tables"] {
        assert!(stdout.contains(command), "missing {} in:\n{}", command, stdout);
    }
}

#[test]
fn test_sync_without_source_host_fails() {
    let output = run(&["sync"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SOURCE_DB_HOST"), "stderr: {}", stderr);
}

#[test]
fn test_tables_only_needs_mirror() {
    let output = run(&["tables", "--source-host", "primary"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DEST_DB_HOST"), "stderr: {}", stderr);
}

#[test]
fn test_same_endpoint_is_rejected_before_connecting() {
    let endpoint = [
        "--source-host",
        "db.local",
        "--source-user",
        "app",
        "--source-db",
        "shop",
        "--mirror-host",
        "DB.local",
        "--mirror-user",
        "app",
        "--mirror-db",
        "shop",
    ];
    let mut args = vec!["sync"];
    args.extend(endpoint);

    let output = run(&args);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("same database"), "stderr: {}", stderr);
}

#[test]
fn test_zero_batch_size_is_rejected() {
    let output = run(&["sync", "--batch-size", "0"]);
    assert!(!output.status.success());
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mirror.toml");
    std::fs::write(&path, "[sync]\nbatchsize = 10\n").unwrap();

    let output = run(&["sync", "--config", path.to_str().unwrap()]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("mirror.toml"), "stderr: {}", stderr);
}
