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

//! Hoard: a deduplicating, content-addressed backup engine.
//!
//! Files are stored once per distinct content in a hash-keyed object store,
//! and each backup run is recorded in an append-only manifest that can later
//! be verified, listed, or restored. Destinations are either a local
//! directory or a remote `hoard serve` instance spoken to over HTTP.

pub mod backup;
pub mod compress;
pub mod config;
pub mod counters;
pub mod errors;
pub mod filter;
pub mod instance;
pub mod jsonio;
pub mod key;
pub mod kind;
pub mod manifest;
pub mod monitor;
pub mod objects;
pub mod owner;
pub mod remote;
pub mod server;
pub mod stamp;
pub mod stats;
pub mod store;
pub mod target;
pub mod test_fixtures;
pub mod unix_mode;
pub mod unix_time;

pub use crate::backup::{BackupOptions, BackupSet, BackupSource};
pub use crate::config::{DestinationConfig, TargetOptions};
pub use crate::errors::{Error, Result};
pub use crate::filter::Filter;
pub use crate::instance::{Instance, RestoreOptions, VerifyOptions};
pub use crate::key::ObjectKey;
pub use crate::kind::Kind;
pub use crate::manifest::{Entry, Line, RunStatus};
pub use crate::monitor::Monitor;
pub use crate::objects::{ObjectStore, PutOutcome};
pub use crate::owner::Owner;
pub use crate::stamp::{Stamp, When};
pub use crate::stats::{BackupStats, CleanStats, FsckStats, RestoreStats, RmStats, VerifyStats};
pub use crate::store::{ContentStore, FsType};
pub use crate::target::{BackupTarget, ListOptions, LocalBackup, RemoteBackup};
pub use crate::unix_mode::UnixMode;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The version of this program, as reported by `--version` and the server.
pub fn version() -> &'static str {
    VERSION
}

/// Name of the object store directory within a local destination.
pub const FILES_DB: &str = "files.db";

/// Name of the directory holding manifests within a local destination.
pub const BACKUPS_DIR: &str = "backups";

/// Name of the destination configuration file.
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the server access-key database, at the destination root.
pub const AUTH_FILENAME: &str = "auth.json";

/// Temporary files in the object store are created with this prefix, and
/// are never mistaken for objects.
pub const TMP_PREFIX: &str = "tmp";

/// Run filesystem work on the blocking thread pool, so that it doesn't
/// hold up other tasks on the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}
