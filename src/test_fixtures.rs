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

//! Utilities to set up test environments.
//!
//! Fixtures that create directories will be automatically deleted when the object
//! is deleted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::backup::{backup, BackupOptions, BackupSet, BackupSource};
use crate::monitor::test::TestMonitor;
use crate::{LocalBackup, TargetOptions};

/// Name of the set written by [ScratchDestination::backup_tree].
pub const SCRATCH_SET: &str = "daily";

/// A temporary local destination, deleted when it goes out of scope.
pub struct ScratchDestination {
    _tempdir: TempDir, // held only for cleanup
    path: PathBuf,
    backup: Arc<LocalBackup>,
}

impl ScratchDestination {
    pub fn new() -> ScratchDestination {
        ScratchDestination::with_options(&TargetOptions::default())
    }

    pub fn with_options(options: &TargetOptions) -> ScratchDestination {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("dest");
        let backup = Arc::new(LocalBackup::open(&path, options, true).unwrap());
        ScratchDestination {
            _tempdir: tempdir,
            path,
            backup,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup(&self) -> Arc<LocalBackup> {
        Arc::clone(&self.backup)
    }

    /// Make a source tree holding these files, and back it up as
    /// [SCRATCH_SET].
    pub async fn backup_tree(&self, files: &[(&str, &[u8])]) -> TreeFixture {
        let tree = TreeFixture::new();
        for (path, contents) in files {
            tree.create_file_with_contents(path, contents);
        }
        let mut instance = self.backup.instance(None, SCRATCH_SET).unwrap();
        let set = BackupSet::new(SCRATCH_SET, vec![BackupSource::new(tree.path())]);
        let monitor = TestMonitor::arc();
        backup(&mut instance, &set, &BackupOptions::default(), monitor.clone())
            .await
            .unwrap();
        monitor.assert_no_errors();
        tree
    }
}

impl Default for ScratchDestination {
    fn default() -> Self {
        Self::new()
    }
}

/// A temporary tree for running a test.
///
/// Created in a temporary directory and automatically disposed when done.
pub struct TreeFixture {
    pub root: PathBuf,
    _tempdir: TempDir, // held only for cleanup
}

impl TreeFixture {
    pub fn new() -> TreeFixture {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().to_path_buf();
        TreeFixture {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Make a file in the tree, with arbitrary contents. Returns the full path.
    pub fn create_file(&self, relative_path: &str) -> PathBuf {
        self.create_file_with_contents(relative_path, b"contents")
    }

    /// Make a file in the tree, with given contents, creating parent
    /// directories as needed. Returns the full path.
    pub fn create_file_with_contents(&self, relative_path: &str, contents: &[u8]) -> PathBuf {
        let full_path = self.root.join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = fs::File::create(&full_path).unwrap();
        f.write_all(contents).unwrap();
        full_path
    }

    pub fn create_dir(&self, relative_path: &str) {
        fs::create_dir(self.root.join(relative_path)).unwrap();
    }

    #[cfg(unix)]
    pub fn create_symlink(&self, relative_path: &str, target: &str) {
        use std::os::unix::fs as unix_fs;

        unix_fs::symlink(target, self.root.join(relative_path)).unwrap();
    }

    /// Symlinks are just not present on Windows.
    #[cfg(windows)]
    pub fn create_symlink(&self, _relative_path: &str, _target: &str) {}

    #[cfg(unix)]
    pub fn make_file_unreadable(&self, relative_path: &str) {
        use std::os::unix::fs::PermissionsExt;
        let p = self.root.join(relative_path);
        let mut perms = fs::metadata(&p).unwrap().permissions();
        perms.set_mode(0);
        fs::set_permissions(&p, perms).unwrap();
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}
