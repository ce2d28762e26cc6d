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

//! Append lines to a running manifest.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::{Entry, Line, RunStatus};
use crate::{Error, Result};

/// Writes one manifest, from its header to its final status.
///
/// Each line goes to the file in a single write, so a reader never sees
/// part of a line followed by another line.
#[derive(Debug)]
pub struct ManifestWriter {
    path: PathBuf,
    file: File,
}

impl ManifestWriter {
    /// Create a new manifest, failing if one is already there, which means
    /// a backup of the set is already running.
    pub fn create(path: &Path, set: &str) -> Result<ManifestWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    Error::BackupRunning {
                        set: set.to_owned(),
                    }
                } else {
                    Error::WriteManifest {
                        path: path.to_owned(),
                        source,
                    }
                }
            })?;
        debug!(?path, "Created manifest");
        let mut writer = ManifestWriter {
            path: path.to_owned(),
            file,
        };
        writer.write_line(&Line::header())?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &Line) -> Result<()> {
        let mut text = line.to_string();
        trace!(%text);
        text.push('\n');
        self.file
            .write_all(text.as_bytes())
            .map_err(|source| Error::WriteManifest {
                path: self.path.clone(),
                source,
            })
    }

    pub fn write_source(&mut self, root: &str) -> Result<()> {
        self.write_line(&Line::Source {
            root: root.to_owned(),
        })
    }

    pub fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        self.write_line(&Line::Entry(entry.clone()))
    }

    /// Write the final status line and flush the file to disk.
    ///
    /// No more lines can be written afterwards.
    pub fn finish(mut self, status: &RunStatus) -> Result<()> {
        self.write_line(&Line::Status(status.clone()))?;
        self.file.sync_all().map_err(|source| Error::WriteManifest {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = ?self.path, outcome = %status.outcome, "Finished manifest");
        Ok(())
    }
}
