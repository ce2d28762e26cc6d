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

//! One run of a backup set against a destination.
//!
//! An instance owns the running manifest of a set while a backup is in
//! progress: it is created, has entries written into it, is finished with a
//! status line, and is then completed (sealed) or abandoned. Instances also
//! verify and restore sealed runs.
//!
//! [LocalInstance] works directly on a local destination; [RemoteInstance]
//! does the same things through a `hoard serve` server.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::manifest::{Entry, LastBackupIndex, Line, RunStatus};
use crate::monitor::Monitor;
use crate::objects::PutOutcome;
use crate::stats::{RestoreStats, VerifyStats};
use crate::{Filter, ObjectKey, Result, Stamp, When};

mod local;
mod remote;
pub(crate) mod restore;

pub use local::LocalInstance;
pub use remote::RemoteInstance;

/// Options for checking a sealed run.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub when: When,
    /// Also compare each file's stored content with the file in the source tree.
    pub compare: bool,
    /// Compare against this directory instead of the recorded source root.
    pub compare_with: Option<PathBuf>,
    /// Report files that are OK, not just problems.
    pub verbose: bool,
}

/// Options for restoring a sealed run.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub when: When,
    /// Entries ignored by this filter are not restored.
    pub filter: Filter,
    /// Restore into this directory, rather than the original source root.
    pub output: Option<PathBuf>,
    /// Allow restoring over the original source when there's no output.
    pub force: bool,
    /// Don't rewrite files that already have the right size and content.
    pub skip_unchanged: bool,
}

/// The operations of one backup set's instance, common to local and remote
/// destinations.
#[async_trait]
pub trait Instance: Send + Sync {
    fn set_name(&self) -> &str;

    /// Create the running manifest for a new backup.
    async fn create_new_instance(&mut self) -> Result<()>;

    /// Record that following entries are under this source root.
    async fn write_source(&mut self, root: &str) -> Result<()>;

    async fn write_entry(&mut self, entry: &Entry) -> Result<()>;

    /// Store the content of a file, already hashed by the caller.
    async fn put(
        &mut self,
        path: &Path,
        size: u64,
        hash: &str,
        monitor: Arc<dyn Monitor>,
    ) -> Result<PutOutcome>;

    /// Write the final status line of the running manifest.
    async fn finish(&mut self, status: &RunStatus) -> Result<()>;

    /// Seal the finished manifest under the time the run started.
    async fn complete(&mut self, started: Stamp) -> Result<()>;

    /// Give up on the running backup, discarding its manifest.
    async fn abandon(&mut self) -> Result<()>;

    /// What the newest sealed run of this set recorded, if there is one.
    async fn last_backup(&self) -> Result<Option<LastBackupIndex>>;

    async fn lines(&self, when: &When) -> Result<Vec<Line>>;

    async fn verify(
        &self,
        options: &VerifyOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<VerifyStats>;

    async fn restore(
        &self,
        options: &RestoreOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<RestoreStats>;
}

/// Reads object content for restore, from wherever the objects are kept.
#[async_trait]
pub trait FetchObject: Send + Sync {
    /// Write the plain content of an object to `out`, returning its length.
    async fn fetch(&self, key: &ObjectKey, out: File) -> Result<u64>;
}
