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

//! Backup, list, restore and cat from the command line.

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use crate::{backup_cmd, run_hoard, source_and_destination};

#[test]
fn backup_prints_stats() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 files"))
        .stdout(predicate::str::contains("2 new files stored"));
    dest.child("store/config.json")
        .assert(predicate::str::contains("hash-v5"));
    dest.child("store/backups/daily.current")
        .assert(predicate::path::is_file());
}

#[test]
fn verbose_backup_prints_file_names() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest)
        .args(["--no-stats", "-v"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello.txt"))
        .stdout(predicate::str::contains("other.txt"));
}

#[test]
fn list_runs_then_files() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();
    let store = dest.child("store");

    run_hoard()
        .arg("list")
        .arg(store.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Backup Set: daily\n"))
        .stdout(predicate::str::contains(" 3 files "));

    run_hoard()
        .arg("list")
        .arg(store.path())
        .args(["-s", "daily", "--when", "current", "--exclude", "sub"])
        .assert()
        .success()
        .stdout(predicate::str::contains(" hello.txt\n"))
        .stdout(predicate::str::contains("copy.txt").not());

    run_hoard()
        .arg("list")
        .arg(store.path())
        .args(["-s", "daily", "--when", "current", "--sources"])
        .assert()
        .success()
        .stdout(predicate::str::contains(src.path().to_str().unwrap()));
}

#[test]
fn restore_and_cat() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();
    let store = dest.child("store");
    let out = TempDir::new().unwrap();

    run_hoard()
        .arg("restore")
        .arg(store.path())
        .args(["-s", "daily", "--no-stats", "-o"])
        .arg(out.path())
        .assert()
        .success();
    out.child("hello.txt").assert("hello world\n");
    out.child("sub/other.txt").assert("other\n");

    run_hoard()
        .arg("cat")
        .arg(store.path())
        .args(["-s", "daily", "sub/other.txt"])
        .assert()
        .success()
        .stdout("other\n");
}

#[test]
fn restore_needs_output_or_force() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();

    run_hoard()
        .arg("restore")
        .arg(dest.child("store").path())
        .args(["-s", "daily"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn excludes_after_a_source_apply_to_it_alone() {
    let first = TempDir::new().unwrap();
    first.child("keep").write_str("1").unwrap();
    first.child("junk.tmp").write_str("2").unwrap();
    let second = TempDir::new().unwrap();
    second.child("also.tmp").write_str("3").unwrap();
    let dest = TempDir::new().unwrap();
    let store = dest.child("store");

    run_hoard()
        .arg("backup")
        .arg(store.path())
        .arg("--from")
        .arg(first.path())
        .args(["--exclude", "*.tmp", "--from"])
        .arg(second.path())
        .arg("--no-stats")
        .assert()
        .success();

    run_hoard()
        .arg("list")
        .arg(store.path())
        .args(["-s", "default", "--when", "current"])
        .assert()
        .success()
        .stdout(predicate::str::contains(" keep\n"))
        .stdout(predicate::str::contains(" also.tmp\n"))
        .stdout(predicate::str::contains("junk.tmp").not());
}
