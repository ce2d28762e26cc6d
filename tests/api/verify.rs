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

//! Verifying backups against the store and the source.

use std::fs;

use pretty_assertions::assert_eq;

use hoard::key::hash_bytes;
use hoard::monitor::test::TestMonitor;
use hoard::test_fixtures::ScratchDestination;
use hoard::*;

use crate::{local_target, stored_keys};

fn key_of(dest: &ScratchDestination, content: &[u8]) -> ObjectKey {
    stored_keys(dest)
        .into_iter()
        .find(|k| k.hash == hash_bytes(content))
        .unwrap()
}

#[tokio::test]
async fn each_kind_of_problem_is_classified() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = dest
        .backup_tree(&[
            ("ok", b"unchanged".as_slice()),
            ("changed", b"before".as_slice()),
            ("deleted", b"will vanish".as_slice()),
            ("corrupt", b"will rot".as_slice()),
        ])
        .await;
    let store = dest.backup().store().clone();

    fs::remove_file(store.path(&key_of(&dest, b"will vanish"))).unwrap();
    let corrupt = key_of(&dest, b"will rot");
    let mut damaged = Vec::new();
    hoard::compress::compress(b"rotten".as_slice(), &mut damaged).unwrap();
    fs::write(store.path(&corrupt), damaged).unwrap();
    tf.create_file_with_contents("changed", b"after!");

    let monitor = TestMonitor::arc();
    let options = VerifyOptions {
        compare: true,
        ..Default::default()
    };
    let stats = target.verify("daily", &options, monitor.clone()).await.unwrap();
    assert_eq!(
        stats,
        VerifyStats {
            ok: 1,
            changed: 1,
            deleted: 1,
            errors: 1,
        }
    );
    let mut labels: Vec<String> = monitor
        .take_lines()
        .iter()
        .map(|line| {
            let mut words = line.split(' ');
            let label = words.next().unwrap();
            let path = words.nth(1).unwrap();
            format!("{label} {path}")
        })
        .collect();
    labels.sort();
    assert_eq!(
        labels,
        [
            "CHANGED \"changed\"",
            "DELETED \"deleted\"",
            "ERROR \"corrupt\"",
        ]
    );
}

#[tokio::test]
async fn without_compare_the_source_is_not_read() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let tf = dest.backup_tree(&[("a", b"original".as_slice())]).await;
    fs::remove_file(tf.path().join("a")).unwrap();

    let monitor = TestMonitor::arc();
    let options = VerifyOptions {
        verbose: true,
        ..Default::default()
    };
    let stats = target.verify("daily", &options, monitor.clone()).await.unwrap();
    assert!(!stats.has_problems());
    assert_eq!(stats.ok, 1);
    let lines = monitor.take_lines();
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines[0].starts_with("SOURCE "));
    assert!(lines[1].starts_with("OK "));
}

#[tokio::test]
async fn compare_with_another_directory() {
    let dest = ScratchDestination::new();
    let target = local_target(&dest);
    let _tf = dest.backup_tree(&[("a", b"original".as_slice())]).await;
    let copy = tempfile::TempDir::new().unwrap();
    fs::write(copy.path().join("a"), b"original").unwrap();

    let options = VerifyOptions {
        compare: true,
        compare_with: Some(copy.path().to_owned()),
        ..Default::default()
    };
    let stats = target
        .verify("daily", &options, TestMonitor::arc())
        .await
        .unwrap();
    assert_eq!(stats.ok, 1);

    fs::write(copy.path().join("a"), b"modified").unwrap();
    let stats = target
        .verify("daily", &options, TestMonitor::arc())
        .await
        .unwrap();
    assert_eq!(stats.changed, 1);
}

#[tokio::test]
async fn verifying_a_missing_set_fails() {
    let dest = ScratchDestination::new();
    let err = local_target(&dest)
        .verify("nothing", &VerifyOptions::default(), TestMonitor::arc())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ManifestNotFound { .. }), "{err}");
}
