// Copyright 2024-2025 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Run the hoard CLI as a subprocess and test it.

use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

mod backup;
mod maintenance;

fn run_hoard() -> Command {
    Command::cargo_bin("hoard").expect("locate hoard binary")
}

/// A source tree and a path for a destination that doesn't exist yet.
fn source_and_destination() -> (TempDir, TempDir) {
    let src = TempDir::new().unwrap();
    src.child("hello.txt").write_str("hello world\n").unwrap();
    src.child("sub/copy.txt").write_str("hello world\n").unwrap();
    src.child("sub/other.txt").write_str("other\n").unwrap();
    let dest = TempDir::new().unwrap();
    (src, dest)
}

fn backup_cmd(src: &TempDir, dest: &TempDir) -> Command {
    let mut cmd = run_hoard();
    cmd.arg("backup")
        .arg(dest.child("store").path())
        .args(["--set-name", "daily", "--from"])
        .arg(src.path());
    cmd
}

#[test]
fn no_args() {
    run_hoard()
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn help_lists_commands() {
    let output = run_hoard().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    for command in [
        "backup", "verify", "list", "restore", "cat", "clean", "fsck", "rm", "serve",
    ] {
        assert!(stdout.contains(command), "{command} missing from {stdout}");
    }
}

#[test]
fn version() {
    run_hoard()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("hoard "));
}

#[test]
fn missing_destination_is_an_error() {
    let dest = TempDir::new().unwrap();
    run_hoard()
        .arg("list")
        .arg(dest.child("nothing").path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Not a backup destination"));
}

#[test]
fn json_log_is_written() {
    let (src, dest) = source_and_destination();
    let log = dest.child("log.json");
    backup_cmd(&src, &dest)
        .arg("--no-stats")
        .arg("--log-json")
        .arg(log.path())
        .assert()
        .success();
    log.assert(predicate::path::is_file());
    let text = std::fs::read_to_string(log.path()).unwrap();
    for line in text.lines() {
        serde_json::from_str::<serde_json::Value>(line).expect("log line is json");
    }
}
