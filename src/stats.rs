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

//! Statistics reported by backup, verify, restore and maintenance operations.

use std::fmt;

use derive_more::{Add, AddAssign};
use serde::{Deserialize, Serialize};
use thousands::Separable;

/// Megabytes with two decimals, truncated, as shown in listings.
pub fn mb_string(bytes: u64) -> String {
    let hundredths = bytes * 100 / (1024 * 1024);
    format!("{}", hundredths as f64 / 100.0)
}

/// Files and bytes actually written to the store during a backup.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transferred {
    pub files: u64,
    pub bytes: u64,
}

/// Totals for one backup run.
///
/// Serialized as JSON into the manifest's STATUS line.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BackupStats {
    /// Entries that could not be backed up.
    #[serde(default)]
    pub skipped: u64,
    /// Directories recorded, including each source root.
    #[serde(default)]
    pub folders: u64,
    /// Files recorded.
    #[serde(default)]
    pub files: u64,
    /// Total length of recorded files.
    #[serde(default)]
    pub bytes: u64,
    /// Files that were not already present in the store.
    #[serde(rename = "backedUp", default)]
    pub backed_up: Transferred,
    /// Elapsed milliseconds.
    #[serde(default)]
    pub took: u64,
}

impl fmt::Display for BackupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>12} files", self.files.separate_with_commas())?;
        writeln!(f, "{:>12} directories", self.folders.separate_with_commas())?;
        writeln!(f, "{:>12} MB in files", mb_string(self.bytes))?;
        writeln!(
            f,
            "{:>12} new files stored",
            self.backed_up.files.separate_with_commas()
        )?;
        writeln!(f, "{:>12} MB stored", mb_string(self.backed_up.bytes))?;
        writeln!(f, "{:>12} skipped", self.skipped.separate_with_commas())?;
        writeln!(f, "{:>12} seconds elapsed", self.took as f64 / 1000.0)
    }
}

/// Classification counts from verifying a manifest.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VerifyStats {
    pub ok: usize,
    pub changed: usize,
    pub deleted: usize,
    pub errors: usize,
}

impl VerifyStats {
    pub fn has_problems(&self) -> bool {
        self.changed > 0 || self.deleted > 0 || self.errors > 0
    }
}

impl fmt::Display for VerifyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} changed, {} deleted, {} errors",
            self.ok.separate_with_commas(),
            self.changed.separate_with_commas(),
            self.deleted.separate_with_commas(),
            self.errors.separate_with_commas()
        )
    }
}

#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RestoreStats {
    pub dirs: usize,
    pub files: usize,
    /// Files that were already present with the right content.
    pub unchanged: usize,
    pub bytes: u64,
    pub errors: usize,
}

impl fmt::Display for RestoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files ({} unchanged), {} directories, {} MB, {} errors",
            self.files.separate_with_commas(),
            self.unchanged.separate_with_commas(),
            self.dirs.separate_with_commas(),
            mb_string(self.bytes),
            self.errors.separate_with_commas()
        )
    }
}

/// Results of checking every stored object.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FsckStats {
    pub ok: usize,
    /// Stored but not referenced by any manifest.
    pub orphaned: usize,
    /// Stored content doesn't match the key.
    pub errors: usize,
    /// Referenced by a manifest but not stored.
    pub missing: usize,
}

impl FsckStats {
    pub fn has_problems(&self) -> bool {
        self.errors > 0 || self.missing > 0
    }
}

impl fmt::Display for FsckStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} orphaned, {} errors, {} missing",
            self.ok.separate_with_commas(),
            self.orphaned.separate_with_commas(),
            self.errors.separate_with_commas(),
            self.missing.separate_with_commas()
        )
    }
}

#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CleanStats {
    pub referenced_objects: usize,
    pub removed_objects: usize,
    /// Bytes on disk freed.
    pub removed_bytes: u64,
}

impl fmt::Display for CleanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} objects referenced, {} removed, {} MB freed",
            self.referenced_objects.separate_with_commas(),
            self.removed_objects.separate_with_commas(),
            mb_string(self.removed_bytes)
        )
    }
}

/// Entries removed from a manifest by `rm`.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RmStats {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

impl fmt::Display for RmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files and {} directories removed, {} MB",
            self.files.separate_with_commas(),
            self.dirs.separate_with_commas(),
            mb_string(self.bytes)
        )
    }
}
