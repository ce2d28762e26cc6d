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

//! A client backing up to a server over a real socket.

use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;

use hoard::monitor::test::TestMonitor;
use hoard::server::{serve_listener, AppState, ServeOptions};
use hoard::test_fixtures::{ScratchDestination, TreeFixture};
use hoard::*;

use crate::{backup_dir, stored_keys};

/// Start a server for the destination, returning its URL.
async fn start_server(dest: &ScratchDestination) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let state = AppState::open(&ServeOptions::new(dest.path(), addr)).unwrap();
    tokio::spawn(serve_listener(listener, state, Duration::from_secs(60)));
    format!("http://{addr}")
}

async fn connect(url: &str, access_key: Option<&str>) -> Result<BackupTarget> {
    let options = TargetOptions {
        access_key: access_key.map(str::to_owned),
        ..Default::default()
    };
    BackupTarget::connect(url, &options, false).await
}

#[tokio::test]
async fn remote_backup_verify_and_restore() {
    let dest = ScratchDestination::new();
    let url = start_server(&dest).await;
    let target = connect(&url, None).await.unwrap();
    assert!(target.is_remote());
    let tf = TreeFixture::new();
    tf.create_file_with_contents("one", b"same bytes");
    tf.create_file_with_contents("sub/two", b"same bytes");
    tf.create_file_with_contents("three", b"different bytes");

    let (stats, monitor) = backup_dir(&target, "laptop", tf.path()).await;
    monitor.assert_no_errors();
    assert_eq!(stats.files, 3);
    assert_eq!(stats.folders, 2);
    assert_eq!(stats.backed_up.files, 2);
    assert_eq!(stored_keys(&dest).len(), 2);
    assert!(dest
        .path()
        .join(BACKUPS_DIR)
        .join("laptop.current")
        .is_file());

    let monitor = TestMonitor::arc();
    let verified = target
        .verify("laptop", &VerifyOptions::default(), monitor.clone())
        .await
        .unwrap();
    assert_eq!(verified.ok, 3);
    assert!(!verified.has_problems());

    let restored = TreeFixture::new();
    let options = RestoreOptions {
        output: Some(restored.path().to_owned()),
        ..Default::default()
    };
    let restore_stats = target
        .restore("laptop", &options, TestMonitor::arc())
        .await
        .unwrap();
    assert_eq!(restore_stats.files, 3);
    assert_eq!(restore_stats.errors, 0);
    assert_eq!(
        fs::read(restored.path().join("sub/two")).unwrap(),
        b"same bytes"
    );

    let mut out = Vec::new();
    target
        .cat("laptop", &When::Current, "three", &mut out)
        .await
        .unwrap();
    assert_eq!(out, b"different bytes");

    let monitor = TestMonitor::new();
    target
        .list(&ListOptions::default(), &monitor)
        .await
        .unwrap();
    let lines = monitor.take_lines();
    assert_eq!(lines[0], "Backup Set: laptop");
    assert!(lines[1].contains(" 3 files "), "{lines:?}");

    target.disconnect().await.unwrap();
}

#[tokio::test]
async fn second_remote_backup_sends_nothing_new() {
    let dest = ScratchDestination::new();
    let url = start_server(&dest).await;
    let target = connect(&url, None).await.unwrap();
    let tf = TreeFixture::new();
    tf.create_file_with_contents("a", b"aaa");
    tf.create_file_with_contents("b", b"bbb");

    backup_dir(&target, "laptop", tf.path()).await;
    tf.create_file_with_contents("c", b"ccc");
    let (stats, _) = backup_dir(&target, "laptop", tf.path()).await;
    assert_eq!(stats.files, 3);
    assert_eq!(stats.backed_up.files, 1);
    assert_eq!(stored_keys(&dest).len(), 3);
}

#[tokio::test]
async fn remote_clean_and_fsck() {
    let dest = ScratchDestination::new();
    let url = start_server(&dest).await;
    let target = connect(&url, None).await.unwrap();
    let tf = TreeFixture::new();
    tf.create_file_with_contents("a", b"aaa");
    backup_dir(&target, "laptop", tf.path()).await;

    let monitor = TestMonitor::new();
    let fsck = target.fsck(true, &monitor).await.unwrap();
    assert_eq!(fsck.ok, 1);
    assert!(!fsck.has_problems());
    assert_eq!(monitor.take_lines().len(), 1);

    let clean = target.clean(false, &monitor).await.unwrap();
    assert_eq!(clean.removed_objects, 0);

    // A backup in progress keeps clean away.
    let mut instance = target.instance("other").unwrap();
    instance.create_new_instance().await.unwrap();
    let err = target.clean(false, &monitor).await.unwrap_err();
    assert_matches!(err, Error::Remote { status: 403, .. });
    instance.abandon().await.unwrap();
    target.clean(false, &monitor).await.unwrap();
}

#[tokio::test]
async fn concurrent_backups_of_one_set_conflict() {
    let dest = ScratchDestination::new();
    let url = start_server(&dest).await;
    let first = connect(&url, None).await.unwrap();
    let second = connect(&url, None).await.unwrap();

    let mut running = first.instance("laptop").unwrap();
    running.create_new_instance().await.unwrap();
    let mut other = second.instance("laptop").unwrap();
    let err = other.create_new_instance().await.unwrap_err();
    assert_matches!(err, Error::OpConflict { .. });

    // Other sets are still free.
    let mut desktop = second.instance("desktop").unwrap();
    desktop.create_new_instance().await.unwrap();
    desktop.abandon().await.unwrap();
    running.abandon().await.unwrap();
}

#[tokio::test]
async fn access_keys_map_to_user_namespaces() {
    let dest = ScratchDestination::new();
    fs::write(
        dest.path().join(AUTH_FILENAME),
        r#"{ "keys": { "sekrit": { "userid": "alice", "allow": ["127.0.0.0/8"] } } }"#,
    )
    .unwrap();
    let url = start_server(&dest).await;

    let err = connect(&url, Some("wrong")).await.unwrap_err();
    assert_matches!(err, Error::AccessDenied);

    let anonymous = connect(&url, None).await.unwrap();
    let err = anonymous
        .list(&ListOptions::default(), &TestMonitor::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Unauthorized);

    let target = connect(&url, Some("sekrit")).await.unwrap();
    let tf = TreeFixture::new();
    tf.create_file("a");
    backup_dir(&target, "laptop", tf.path()).await;
    assert!(dest
        .path()
        .join(BACKUPS_DIR)
        .join("alice")
        .join("laptop.current")
        .is_file());

    target.disconnect().await.unwrap();
    let err = target
        .list(&ListOptions::default(), &TestMonitor::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Unauthorized);
}
