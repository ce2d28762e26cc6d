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

//! Restoring backups into directories.

use std::fs;

use assert_matches::assert_matches;
use filetime::FileTime;
use pretty_assertions::assert_eq;

use hoard::monitor::test::TestMonitor;
use hoard::test_fixtures::{ScratchDestination, TreeFixture};
use hoard::*;

use crate::{local_target, stored_keys};

fn into(output: &std::path::Path) -> RestoreOptions {
    RestoreOptions {
        output: Some(output.to_owned()),
        ..Default::default()
    }
}

#[tokio::test]
async fn restore_tree_with_content_and_times() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = TreeFixture::new();
    tf.create_file_with_contents("top", b"top content");
    tf.create_file_with_contents("a/b/c.txt", b"deep content");
    tf.create_dir("empty");
    let old = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(tf.path().join("top"), old).unwrap();
    crate::backup_dir(&target, "daily", tf.path()).await;

    let restored = TreeFixture::new();
    let monitor = TestMonitor::arc();
    let stats = target
        .restore("daily", &into(restored.path()), monitor.clone())
        .await
        .unwrap();
    monitor.assert_no_errors();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.dirs, 4);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.bytes, 11 + 12);

    let root = restored.path();
    assert_eq!(fs::read(root.join("top")).unwrap(), b"top content");
    assert_eq!(fs::read(root.join("a/b/c.txt")).unwrap(), b"deep content");
    assert!(root.join("empty").is_dir());
    let mtime = FileTime::from_last_modification_time(&fs::metadata(root.join("top")).unwrap());
    assert_eq!(mtime, old);
}

#[cfg(unix)]
#[tokio::test]
async fn permissions_are_restored() {
    use std::os::unix::fs::PermissionsExt;

    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = TreeFixture::new();
    let script = tf.create_file_with_contents("run.sh", b"#!/bin/sh\n");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
    crate::backup_dir(&target, "daily", tf.path()).await;

    let restored = TreeFixture::new();
    target
        .restore("daily", &into(restored.path()), TestMonitor::arc())
        .await
        .unwrap();
    let mode = fs::metadata(restored.path().join("run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o7777, 0o750);
}

#[tokio::test]
async fn filter_limits_what_is_restored() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let _tf = dest
        .backup_tree(&[
            ("keep/a", b"a".as_slice()),
            ("keep/b.tmp", b"b".as_slice()),
            ("skip/c", b"c".as_slice()),
        ])
        .await;

    let restored = TreeFixture::new();
    let options = RestoreOptions {
        filter: Filter::new(&["skip", "**/*.tmp"]).unwrap(),
        ..into(restored.path())
    };
    let stats = target
        .restore(test_set(), &options, TestMonitor::arc())
        .await
        .unwrap();
    assert_eq!(stats.files, 1);
    assert!(restored.path().join("keep/a").is_file());
    assert!(!restored.path().join("keep/b.tmp").exists());
    assert!(!restored.path().join("skip").exists());
}

#[tokio::test]
async fn restore_over_source_needs_force() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = dest.backup_tree(&[("doc", b"version one".as_slice())]).await;
    tf.create_file_with_contents("doc", b"version two");

    let err = target
        .restore(test_set(), &RestoreOptions::default(), TestMonitor::arc())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RestoreNeedsOutput), "{err}");
    assert_eq!(fs::read(tf.path().join("doc")).unwrap(), b"version two");

    let options = RestoreOptions {
        force: true,
        ..Default::default()
    };
    target
        .restore(test_set(), &options, TestMonitor::arc())
        .await
        .unwrap();
    assert_eq!(fs::read(tf.path().join("doc")).unwrap(), b"version one");
}

#[tokio::test]
async fn skip_unchanged_leaves_matching_files() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let _tf = dest
        .backup_tree(&[("same", b"same".as_slice()), ("differs", b"stored".as_slice())])
        .await;
    let restored = TreeFixture::new();
    restored.create_file_with_contents("same", b"same");
    restored.create_file_with_contents("differs", b"edited");

    let options = RestoreOptions {
        skip_unchanged: true,
        ..into(restored.path())
    };
    let stats = target
        .restore(test_set(), &options, TestMonitor::arc())
        .await
        .unwrap();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(fs::read(restored.path().join("differs")).unwrap(), b"stored");
}

#[tokio::test]
async fn removed_entries_are_not_restored() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let _tf = dest
        .backup_tree(&[("wanted", b"w".as_slice()), ("secret.key", b"k".as_slice())])
        .await;

    let monitor = TestMonitor::new();
    let filter = Filter::new(&["*.key"]).unwrap();
    let stats = target
        .rm(test_set(), &When::Current, &filter, false, &monitor)
        .await
        .unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(monitor.take_lines(), ["RM \"secret.key\""]);

    let restored = TreeFixture::new();
    target
        .restore(test_set(), &into(restored.path()), TestMonitor::arc())
        .await
        .unwrap();
    assert!(restored.path().join("wanted").is_file());
    assert!(!restored.path().join("secret.key").exists());
}

#[tokio::test]
async fn missing_object_leaves_existing_file_alone() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = dest
        .backup_tree(&[("lost", b"lost content".as_slice()), ("kept", b"kept content".as_slice())])
        .await;
    let store = dest.backup().store().clone();
    let lost = stored_keys(&dest)
        .into_iter()
        .find(|k| k.hash == hoard::key::hash_bytes(b"lost content"))
        .unwrap();
    fs::remove_file(store.path(&lost)).unwrap();
    tf.create_file_with_contents("lost", b"live data");
    tf.create_file_with_contents("kept", b"edited");

    let monitor = TestMonitor::arc();
    let options = RestoreOptions {
        force: true,
        ..Default::default()
    };
    let stats = target
        .restore(test_set(), &options, monitor.clone())
        .await
        .unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.files, 1);
    let errors = monitor.take_errors();
    assert_matches!(errors[..], [Error::ObjectNotFound { .. }]);
    assert_eq!(fs::read(tf.path().join("lost")).unwrap(), b"live data");
    assert_eq!(fs::read(tf.path().join("kept")).unwrap(), b"kept content");
    let names: Vec<_> = fs::read_dir(tf.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 2, "{names:?}");
}

fn test_set() -> &'static str {
    hoard::test_fixtures::SCRATCH_SET
}
