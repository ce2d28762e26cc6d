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

//! What the previous backup of a set recorded, for deciding which files
//! need to be hashed again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use super::Line;
use crate::{Error, Kind, Result};

/// A file as recorded by the last backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub hash: String,
    pub variant: u32,
    pub size: u64,
    pub mtime: OffsetDateTime,
    pub ctime: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    File(FileSnapshot),
    Dir {
        mtime: OffsetDateTime,
        ctime: OffsetDateTime,
    },
}

/// Files and directories of one sealed manifest, keyed by full path under
/// their source root.
///
/// Built in memory when a backup starts and never written out.
#[derive(Debug, Clone, Default)]
pub struct LastBackupIndex {
    entries: HashMap<PathBuf, Snapshot>,
}

impl LastBackupIndex {
    /// Fold the lines of a manifest into an index. Later entries for the
    /// same path replace earlier ones.
    pub fn from_lines(lines: &[Line]) -> Result<LastBackupIndex> {
        let mut entries = HashMap::new();
        let mut root: Option<PathBuf> = None;
        for line in lines {
            match line {
                Line::Source { root: r } => root = Some(PathBuf::from(r)),
                Line::Entry(entry) => {
                    let Some(root) = &root else {
                        return Err(Error::MissingRoot {
                            path: entry.path.clone(),
                        });
                    };
                    let snapshot = match (entry.kind, &entry.hash, entry.size) {
                        (Kind::File, Some(hash), Some(size)) => Snapshot::File(FileSnapshot {
                            hash: hash.clone(),
                            variant: entry.variant,
                            size,
                            mtime: entry.mtime,
                            ctime: entry.ctime,
                        }),
                        (Kind::Dir, _, _) => Snapshot::Dir {
                            mtime: entry.mtime,
                            ctime: entry.ctime,
                        },
                        _ => continue,
                    };
                    entries.insert(entry.full_path(root), snapshot);
                }
                _ => (),
            }
        }
        Ok(LastBackupIndex { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Snapshot> {
        self.entries.get(path)
    }

    /// The recorded file at `path`, if its size and times are unchanged.
    pub fn unchanged_file(
        &self,
        path: &Path,
        size: u64,
        mtime: OffsetDateTime,
        ctime: OffsetDateTime,
    ) -> Option<&FileSnapshot> {
        match self.entries.get(path) {
            Some(Snapshot::File(file))
                if file.size == size && file.mtime == mtime && file.ctime == ctime =>
            {
                Some(file)
            }
            _ => None,
        }
    }
}
