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

//! Backups through the target facade.

use std::fs;

use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use hoard::counters::Counter;
use hoard::manifest::final_status;
use hoard::monitor::test::TestMonitor;
use hoard::test_fixtures::{ScratchDestination, TreeFixture};
use hoard::*;

use crate::{backup_dir, local_target, stored_keys};

#[tokio::test]
#[traced_test]
async fn duplicate_content_is_stored_once() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = TreeFixture::new();
    tf.create_file_with_contents("hello", b"hello world");
    tf.create_file_with_contents("sub/copy", b"hello world");
    tf.create_file_with_contents("other", b"something else");

    let (stats, monitor) = backup_dir(&target, "daily", tf.path()).await;
    monitor.assert_no_errors();

    assert_eq!(stats.files, 3);
    assert_eq!(stats.folders, 2);
    assert_eq!(stats.bytes, 11 + 11 + 14);
    assert_eq!(stats.backed_up.files, 2);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stored_keys(&dest).len(), 2);
    monitor.assert_counter(Counter::ObjectsDeduplicated, 1);
    assert!(!logs_contain("ERROR") && !logs_contain("WARN"));
}

#[tokio::test]
async fn sealing_leaves_stamped_and_current_manifests() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = TreeFixture::new();
    tf.create_file("a");

    backup_dir(&target, "daily", tf.path()).await;

    let backups = dest.path().join(BACKUPS_DIR);
    let mut names: Vec<String> = fs::read_dir(&backups)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2, "{names:?}");
    assert_eq!(names[1], "daily.current");
    assert!(names[0].starts_with("daily."));
    assert!(!names.iter().any(|n| n.ends_with(".running")));
    assert_eq!(
        fs::read(backups.join(&names[0])).unwrap(),
        fs::read(backups.join(&names[1])).unwrap()
    );

    let lines = target
        .instance("daily")
        .unwrap()
        .lines(&When::Current)
        .await
        .unwrap();
    let status = final_status(&lines).unwrap();
    assert!(status.is_ok());
    assert_eq!(status.stats.as_ref().unwrap().files, 1);
}

#[tokio::test]
async fn unchanged_files_are_not_stored_again() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = TreeFixture::new();
    tf.create_file_with_contents("a", b"aaa");
    tf.create_file_with_contents("b", b"bbb");

    let (first, _) = backup_dir(&target, "daily", tf.path()).await;
    assert_eq!(first.backed_up.files, 2);

    let (second, monitor) = backup_dir(&target, "daily", tf.path()).await;
    assert_eq!(second.files, 2);
    assert_eq!(second.backed_up.files, 0);
    monitor.assert_counter(Counter::FilesUnchanged, 2);
    monitor.assert_counter(Counter::FilesHashed, 0);

    let backups = dest.backup().backups_dir(None).unwrap();
    assert_eq!(backups.sealed("daily").unwrap().len(), 2);
}

#[tokio::test]
async fn sets_are_independent() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let photos = TreeFixture::new();
    photos.create_file_with_contents("cat.jpg", b"meow");
    let docs = TreeFixture::new();
    docs.create_file_with_contents("letter.txt", b"dear");

    backup_dir(&target, "photos", photos.path()).await;
    backup_dir(&target, "docs", docs.path()).await;

    let monitor = TestMonitor::new();
    target
        .list(&ListOptions::default(), &monitor)
        .await
        .unwrap();
    let lines = monitor.take_lines();
    assert!(lines.contains(&"Backup Set: docs".to_owned()), "{lines:?}");
    assert!(lines.contains(&"Backup Set: photos".to_owned()), "{lines:?}");

    let mut out = Vec::new();
    target
        .cat("photos", &When::Current, "cat.jpg", &mut out)
        .await
        .unwrap();
    assert_eq!(out, b"meow");
    let err = target
        .cat("docs", &When::Current, "cat.jpg", &mut Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EntryNotFound { .. }), "{err}");
}

#[tokio::test]
async fn user_ids_namespace_manifests() {
    let dest = ScratchDestination::new();
    let tf = TreeFixture::new();
    tf.create_file("a");
    let options = TargetOptions {
        userid: Some("alice".to_owned()),
        ..Default::default()
    };
    let target = BackupTarget::connect(dest.path().to_str().unwrap(), &options, false)
        .await
        .unwrap();

    backup_dir(&target, "daily", tf.path()).await;

    assert!(dest
        .path()
        .join(BACKUPS_DIR)
        .join("alice")
        .join("daily.current")
        .is_file());
    let err = local_target(&dest)
        .instance("daily")
        .unwrap()
        .lines(&When::Current)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ManifestNotFound { .. }), "{err}");
}
