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

//! Hoard error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::ObjectKey;
use crate::store::FsType;

pub type Result<T> = std::result::Result<T, Error>;

/// Hoard specific error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The stored object and the other file have different content.
    ///
    /// This is an expected condition while storing objects, and drives
    /// variant escalation rather than failing the run.
    #[error("Stored object {key} differs from {path:?}")]
    ContentChanged { key: ObjectKey, path: PathBuf },

    #[error("Object {key} not found")]
    ObjectNotFound { key: ObjectKey },

    #[error("Object {key} is corrupt: content hashes to {actual_hash}")]
    ObjectCorrupt { key: ObjectKey, actual_hash: String },

    #[error("Failed to read object {key}: {source}")]
    ReadObject { key: ObjectKey, source: io::Error },

    #[error("Failed to store object {key}: {source}")]
    StoreObject { key: ObjectKey, source: io::Error },

    #[error("File {path:?} changed while backing up: hash was {expected}, now {actual}")]
    FileChangedDuringBackup {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Store layout {fstype} can't hold variant {variant} of {hash}")]
    VariantsNotSupported {
        fstype: FsType,
        hash: String,
        variant: u32,
    },

    #[error("A backup of set {set:?} is already running")]
    BackupRunning { set: String },

    #[error("Backup of set {set:?} is not running")]
    NotRunning { set: String },

    #[error("Can't clean while a backup is running: {path:?}")]
    CleanWhileRunning { path: PathBuf },

    #[error("Destination {path:?} uses {persisted}, but {requested} was requested")]
    FsTypeMismatch {
        path: PathBuf,
        persisted: FsType,
        requested: FsType,
    },

    #[error("Store layout {0:?} is no longer supported")]
    UnsupportedFsType(String),

    #[error("Unsupported destination config version {version} in {path:?}")]
    UnsupportedConfigVersion { path: PathBuf, version: u32 },

    #[error("Not a backup destination: {path:?}")]
    NotADestination { path: PathBuf },

    #[error("No {when} backup of set {set:?}")]
    ManifestNotFound { set: String, when: String },

    #[error("No file {path:?} in backup of set {set:?}")]
    EntryNotFound { set: String, path: String },

    #[error("Restore needs an output directory, or --force to restore over the source")]
    RestoreNeedsOutput,

    #[error("Manifest entry {path:?} appears before any SOURCE line")]
    MissingRoot { path: String },

    #[error("Invalid backup set name {name:?}")]
    InvalidSetName { name: String },

    #[error("Invalid user id {name:?}")]
    InvalidUserId { name: String },

    #[error("Invalid timestamp {0:?}")]
    InvalidStamp(String),

    #[error("Invalid object key {0:?}")]
    InvalidKey(String),

    #[error("Invalid filter pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        source: globset::Error,
    },

    #[error("Set {set:?} is in use by {op}")]
    OpConflict { set: String, op: String },

    #[error("Access key rejected")]
    AccessDenied,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Server returned {status} for {url}: {message}")]
    Remote {
        status: u16,
        url: String,
        message: String,
    },

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("Invalid URL {url:?}: {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },

    #[error("{0} is not supported on remote destinations")]
    Unsupported(&'static str),

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize JSON: {source}")]
    SerializeJson {
        #[from]
        source: serde_json::Error,
    },

    #[error("Failed to write manifest {path:?}: {source}")]
    WriteManifest { path: PathBuf, source: io::Error },

    #[error("Failed to read manifest {path:?}: {source}")]
    ReadManifest { path: PathBuf, source: io::Error },

    #[error("Failed to read source {path:?}: {source}")]
    ReadSource { path: PathBuf, source: io::Error },

    #[error("Failed to list source directory {path:?}: {source}")]
    ListSourceDirectory { path: PathBuf, source: io::Error },

    #[error("Failed to restore directory {path:?}: {source}")]
    RestoreDirectory { path: PathBuf, source: io::Error },

    #[error("Failed to restore file {path:?}: {source}")]
    RestoreFile { path: PathBuf, source: io::Error },

    #[error("Failed to restore permissions on {path:?}: {source}")]
    RestorePermissions { path: PathBuf, source: io::Error },

    #[error("Failed to restore ownership of {path:?}: {source}")]
    RestoreOwnership { path: PathBuf, source: io::Error },

    #[error("Failed to restore modification time on {path:?}: {source}")]
    RestoreModificationTime { path: PathBuf, source: io::Error },

    #[error("I/O error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("Background task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// Wrap an IO error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True if this error means some file or object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ObjectNotFound { .. }
            | Error::ManifestNotFound { .. }
            | Error::EntryNotFound { .. } => true,
            Error::Io { source, .. }
            | Error::IOError { source }
            | Error::ReadObject { source, .. }
            | Error::ReadSource { source, .. }
            | Error::ReadManifest { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Error::Remote { status, .. } => *status == 404,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::*;

    #[test]
    fn not_found_is_detected_through_wrappers() {
        let err = Error::io("/nonexistent", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        let err = Error::io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_not_found());
        let err = Error::ObjectNotFound {
            key: ObjectKey::new("abcd1234", 0, 10),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Object abcd1234.0.10 not found");
    }
}
