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

//! Tests for the Hoard library API.

use std::sync::Arc;

use hoard::monitor::test::TestMonitor;
use hoard::test_fixtures::ScratchDestination;
use hoard::*;

mod backup;
mod gc;
mod restore;
mod server;
mod verify;

/// Keys of every object in a destination's store, sorted.
fn stored_keys(dest: &ScratchDestination) -> Vec<ObjectKey> {
    let mut keys: Vec<ObjectKey> = dest
        .backup()
        .store()
        .list_files()
        .unwrap()
        .into_iter()
        .filter_map(|file| file.key)
        .collect();
    keys.sort();
    keys
}

/// Back up one source directory as `set`.
async fn backup_dir(
    target: &BackupTarget,
    set: &str,
    source: &std::path::Path,
) -> (BackupStats, Arc<TestMonitor>) {
    let monitor = TestMonitor::arc();
    let backup_set = BackupSet::new(set, vec![BackupSource::new(source)]);
    let stats = target
        .backup(&backup_set, &BackupOptions::default(), monitor.clone())
        .await
        .unwrap();
    (stats, monitor)
}

fn local_target(dest: &ScratchDestination) -> BackupTarget {
    BackupTarget::Local {
        backup: dest.backup(),
        user: None,
    }
}
