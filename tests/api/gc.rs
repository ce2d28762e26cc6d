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

//! Removing unreferenced objects, and checking the store.

use std::fs;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use hoard::monitor::test::TestMonitor;
use hoard::test_fixtures::{ScratchDestination, TreeFixture};
use hoard::*;

use crate::{backup_dir, local_target, stored_keys};

#[tokio::test]
async fn clean_removes_only_superseded_objects() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = TreeFixture::new();
    tf.create_file_with_contents("a", b"content of a");
    tf.create_file_with_contents("b", b"content of b");
    tf.create_file_with_contents("deep/c", b"content of c");

    backup_dir(&target, "daily", tf.path()).await;
    let before = stored_keys(&dest);
    assert_eq!(before.len(), 3);

    let monitor = TestMonitor::new();
    let stats = target.clean(false, &monitor).await.unwrap();
    assert_eq!(stats.removed_objects, 0);
    assert_eq!(stored_keys(&dest), before);

    // The old run still refers to b, so drop it along with the file.
    fs::remove_file(tf.path().join("b")).unwrap();
    let backups = dest.backup().backups_dir(None).unwrap();
    let old = backups.sealed("daily").unwrap();
    backup_dir(&target, "daily", tf.path()).await;
    for stamp in old {
        fs::remove_file(backups.path("daily", hoard::manifest::Suffix::Stamp(stamp))).unwrap();
    }

    let stats = target.clean(false, &monitor).await.unwrap();
    assert_eq!(stats.removed_objects, 1);
    let after = stored_keys(&dest);
    assert_eq!(after.len(), 2);
    let removed: Vec<_> = before.iter().filter(|k| !after.contains(k)).collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(monitor.take_lines(), [format!("REMOVE {}", removed[0])]);

    // Directories holding the surviving objects are still there.
    for key in &after {
        assert!(dest.backup().store().path(key).is_file());
    }
}

#[tokio::test]
async fn dry_run_removes_nothing() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = dest.backup_tree(&[("a", b"aaa".as_slice())]).await;
    let backups = dest.backup().backups_dir(None).unwrap();
    for name in backups.list(None).unwrap() {
        fs::remove_file(backups.dir().join(name.file_name())).unwrap();
    }

    let monitor = TestMonitor::new();
    let stats = target.clean(true, &monitor).await.unwrap();
    assert_eq!(stats.removed_objects, 1);
    assert_eq!(stored_keys(&dest).len(), 1);
    assert_eq!(monitor.take_lines().len(), 1);

    target.clean(false, &monitor).await.unwrap();
    assert!(stored_keys(&dest).is_empty());
    drop(tf);
}

#[tokio::test]
async fn clean_refuses_while_a_backup_runs() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    dest.backup_tree(&[("a", b"aaa".as_slice())]).await;
    let mut instance = target.instance("other").unwrap();
    instance.create_new_instance().await.unwrap();

    let err = target.clean(false, &TestMonitor::new()).await.unwrap_err();
    assert_matches!(err, Error::CleanWhileRunning { .. });
    assert_eq!(stored_keys(&dest).len(), 1);

    instance.abandon().await.unwrap();
    target.clean(false, &TestMonitor::new()).await.unwrap();
}

#[tokio::test]
async fn fsck_finds_damage() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let _tf = dest
        .backup_tree(&[
            ("good", b"good content".as_slice()),
            ("bad", b"bad content".as_slice()),
            ("gone", b"gone content".as_slice()),
        ])
        .await;
    let store = dest.backup().store().clone();
    let key_of = |content: &[u8]| {
        stored_keys(&dest)
            .into_iter()
            .find(|k| k.hash == hoard::key::hash_bytes(content))
            .unwrap()
    };
    let bad = key_of(b"bad content");
    let gone = key_of(b"gone content");
    // Overwrite the object with something that decompresses but hashes differently.
    let mut damaged = Vec::new();
    hoard::compress::compress(&mut b"not the bad content".as_slice(), &mut damaged).unwrap();
    fs::write(store.path(&bad), damaged).unwrap();
    fs::remove_file(store.path(&gone)).unwrap();

    let monitor = TestMonitor::new();
    let stats = target.fsck(false, &monitor).await.unwrap();
    assert_eq!(stats.ok, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.missing, 1);
    assert_eq!(stats.orphaned, 0);
    assert!(stats.has_problems());
    let lines = monitor.take_lines();
    assert!(lines.contains(&format!("ERROR {bad}")), "{lines:?}");
    assert!(lines.contains(&format!("MISSING {gone}")), "{lines:?}");
}
