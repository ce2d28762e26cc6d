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

//! Verify, fsck, clean and rm from the command line.

use std::fs;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;

use crate::{backup_cmd, run_hoard, source_and_destination};

#[test]
fn verify_a_set() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();

    run_hoard()
        .arg("verify")
        .arg(dest.child("store").path())
        .args(["-s", "daily", "--compare"])
        .assert()
        .success()
        .stdout("3 ok, 0 changed, 0 deleted, 0 errors\n");

    src.child("hello.txt").write_str("HELLO WORLD\n").unwrap();
    run_hoard()
        .arg("verify")
        .arg(dest.child("store").path())
        .args(["-s", "daily", "--compare"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("CHANGED "))
        .stdout(predicate::str::contains("\"hello.txt\""));
}

#[test]
fn verify_without_a_set_checks_the_store() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();

    run_hoard()
        .arg("verify")
        .arg(dest.child("store").path())
        .assert()
        .success()
        .stdout("2 ok, 0 orphaned, 0 errors, 0 missing\n");
}

#[test]
fn fsck_reports_missing_objects() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();
    let files_db = dest.child("store").child("files.db");
    // Remove one object from deep in the store.
    let mut dirs = vec![files_db.path().to_owned()];
    let mut removed = false;
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                dirs.push(path);
            } else if !removed {
                fs::remove_file(path).unwrap();
                removed = true;
            }
        }
    }
    assert!(removed);

    run_hoard()
        .arg("fsck")
        .arg(dest.child("store").path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("MISSING "))
        .stdout(predicate::str::contains("1 missing"));
}

#[test]
fn rm_then_clean() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();
    let store = dest.child("store");

    run_hoard()
        .arg("rm")
        .arg(store.path())
        .args(["-s", "daily", "sub/other.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("RM \"sub/other.txt\""));

    run_hoard()
        .arg("clean")
        .arg(store.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("REMOVE "))
        .stdout(predicate::str::contains("1 removed"));

    run_hoard()
        .arg("clean")
        .arg(store.path())
        .assert()
        .success();

    run_hoard()
        .arg("fsck")
        .arg(store.path())
        .assert()
        .success()
        .stdout("1 ok, 0 orphaned, 0 errors, 0 missing\n");
}

#[test]
fn mismatched_fstype_is_refused() {
    let (src, dest) = source_and_destination();
    backup_cmd(&src, &dest).arg("--no-stats").assert().success();

    backup_cmd(&src, &dest)
        .args(["--no-stats", "--fstype", "hash-v4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hash-v4"));
}
