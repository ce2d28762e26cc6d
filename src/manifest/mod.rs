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

//! Manifests: line-oriented records of one backup run.
//!
//! A manifest starts with a header, then for each source tree a `SOURCE`
//! line followed by entries for the directories and files found in it, in
//! the order they were visited, so every directory precedes its children.
//! A sealed manifest ends with a single `STATUS` line carrying the run's
//! statistics.
//!
//! ```text
//! V2 type mode ctime mtime - size hash path
//! SOURCE /home/me
//! D 1000:1000:40755 2024-01-02T03:04:05Z 2024-01-02T03:04:05Z - - - 0 ""
//! F 1000:1000:100644 2024-01-02T03:04:05Z 2024-01-02T03:04:05Z - 6 5891b5b5... 0 "hello"
//! V2 STATUS OK {"skipped":0,"folders":1,"files":1,...}
//! ```

use std::borrow::Cow;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::owner::Owner;
use crate::stats::BackupStats;
use crate::unix_time::{ctime, mtime};
use crate::{Kind, ObjectKey, UnixMode};

mod backups_dir;
mod last_backup;
mod writer;

pub(crate) use backups_dir::check_set_name;
pub use backups_dir::{is_valid_name, BackupsDir, ManifestName, Suffix};
pub use last_backup::{FileSnapshot, LastBackupIndex, Snapshot};
pub use writer::ManifestWriter;

/// Version tag written into new manifests.
pub const VERSION_TAG: &str = "V2";

const HEADER_COLUMNS: &str = "type mode ctime mtime - size hash path";

/// One file or directory recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: Kind,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: UnixMode,
    #[serde(with = "time::serde::rfc3339")]
    pub ctime: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub mtime: OffsetDateTime,
    /// Length of a file; None for directories.
    pub size: Option<u64>,
    /// Content hash of a file; None for directories.
    pub hash: Option<String>,
    pub variant: u32,
    /// Path relative to the source root, separated by `/`; empty for the root itself.
    pub path: String,
}

impl Entry {
    /// Describe a directory from its metadata.
    pub fn dir(path: &str, metadata: &Metadata) -> Entry {
        let owner = Owner::from(metadata);
        Entry {
            kind: Kind::Dir,
            uid: owner.uid,
            gid: owner.gid,
            mode: UnixMode::from(metadata),
            ctime: ctime(metadata),
            mtime: mtime(metadata),
            size: None,
            hash: None,
            variant: 0,
            path: path.to_owned(),
        }
    }

    /// Describe a stored file from its metadata and the object holding it.
    pub fn file(path: &str, metadata: &Metadata, hash: &str, variant: u32) -> Entry {
        Entry {
            kind: Kind::File,
            size: Some(metadata.len()),
            hash: Some(hash.to_owned()),
            variant,
            ..Entry::dir(path, metadata)
        }
    }

    pub fn owner(&self) -> Owner {
        Owner {
            uid: self.uid,
            gid: self.gid,
        }
    }

    /// The object holding a file's content.
    pub fn key(&self) -> Option<ObjectKey> {
        match (&self.hash, self.size) {
            (Some(hash), Some(size)) if self.kind.is_file() => {
                Some(ObjectKey::new(hash.clone(), self.variant, size))
            }
            _ => None,
        }
    }

    /// Where this entry lives under a source or restore root.
    pub fn full_path(&self, root: &Path) -> PathBuf {
        if self.path.is_empty() {
            root.to_owned()
        } else {
            root.join(&self.path)
        }
    }

    fn parse(line: &str) -> Option<Entry> {
        let mut fields = line.splitn(9, ' ');
        let kind = Kind::from_manifest_letter(fields.next()?)?;
        let (uid, gid, mode) = parse_mode(fields.next()?)?;
        let ctime = OffsetDateTime::parse(fields.next()?, &Rfc3339).ok()?;
        let mtime = OffsetDateTime::parse(fields.next()?, &Rfc3339).ok()?;
        let _atime = fields.next()?;
        let size = fields.next()?;
        let hash = fields.next()?;
        let variant = fields.next()?.parse().ok()?;
        let path: String = serde_json::from_str(fields.next()?).ok()?;
        let (size, hash) = if kind.is_file() {
            (Some(size.parse().ok()?), Some(hash.to_owned()))
        } else {
            (None, None)
        };
        Some(Entry {
            kind,
            uid,
            gid,
            mode,
            ctime,
            mtime,
            size,
            hash,
            variant,
            path,
        })
    }
}

/// Parse `uid:gid:mode`, or a bare octal mode from older manifests.
fn parse_mode(field: &str) -> Option<(Option<u32>, Option<u32>, UnixMode)> {
    fn id(s: &str) -> Option<Option<u32>> {
        if s.is_empty() || s == "-" {
            Some(None)
        } else {
            s.parse().ok().map(Some)
        }
    }
    let parts: Vec<&str> = field.split(':').collect();
    match parts[..] {
        [mode] => Some((None, None, mode.parse().ok()?)),
        [uid, gid, mode] => Some((id(uid)?, id(gid)?, mode.parse().ok()?)),
        _ => None,
    }
}

fn format_time(t: &OffsetDateTime) -> Result<String, fmt::Error> {
    t.format(&Rfc3339).map_err(|_| fmt::Error)
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = |i: Option<u32>| i.map(|i| i.to_string()).unwrap_or_default();
        let path = serde_json::to_string(&self.path).map_err(|_| fmt::Error)?;
        write!(
            f,
            "{} {}:{}:{} {} {} - {} {} {} {}",
            self.kind.manifest_letter().unwrap_or("?"),
            id(self.uid),
            id(self.gid),
            self.mode.to_octal(),
            format_time(&self.ctime)?,
            format_time(&self.mtime)?,
            self.size
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_owned()),
            self.hash.as_deref().unwrap_or("-"),
            self.variant,
            path,
        )
    }
}

/// The outcome of a run, from the final line of a sealed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    /// `OK`, or a description of the failure.
    pub outcome: String,
    pub stats: Option<BackupStats>,
}

impl RunStatus {
    pub fn ok(stats: BackupStats) -> RunStatus {
        RunStatus {
            outcome: "OK".to_owned(),
            stats: Some(stats),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == "OK"
    }

    /// Parse the text after `STATUS`: an outcome, then optionally JSON stats.
    pub fn parse_tail(tail: &str) -> RunStatus {
        match tail.find('{') {
            Some(brace) => RunStatus {
                outcome: tail[..brace].trim().to_owned(),
                stats: serde_json::from_str(&tail[brace..]).ok(),
            },
            None => RunStatus {
                outcome: tail.trim().to_owned(),
                stats: None,
            },
        }
    }

    /// The text after `STATUS`, also used as the body of a remote finish request.
    pub fn tail(&self) -> String {
        match self
            .stats
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
        {
            Some(json) => format!("{} {}", self.outcome, json),
            None => self.outcome.clone(),
        }
    }
}

/// One parsed line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// The first line, whole.
    Header(String),
    /// Following entries are relative to this root.
    Source { root: String },
    Entry(Entry),
    Status(RunStatus),
    /// Anything else, kept so that tools can pass it through.
    Unknown(String),
}

impl Line {
    /// A header for a new manifest.
    pub fn header() -> Line {
        Line::Header(format!("{VERSION_TAG} {HEADER_COLUMNS}"))
    }

    pub fn parse(line: &str) -> Line {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(root) = line.strip_prefix("SOURCE ") {
            return Line::Source {
                root: parse_root(root),
            };
        }
        if let Some(rest) = line
            .strip_prefix("V1 ")
            .or_else(|| line.strip_prefix("V2 "))
        {
            return match rest.strip_prefix("STATUS") {
                Some(tail) => Line::Status(RunStatus::parse_tail(tail)),
                None => Line::Header(line.to_owned()),
            };
        }
        match Entry::parse(line) {
            Some(entry) => Line::Entry(entry),
            None => Line::Unknown(line.to_owned()),
        }
    }

    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            Line::Entry(entry) => Some(entry),
            _ => None,
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Header(text) | Line::Unknown(text) => f.write_str(text),
            Line::Source { root } => write!(f, "SOURCE {}", format_root(root)?),
            Line::Entry(entry) => entry.fmt(f),
            Line::Status(status) => write!(f, "{VERSION_TAG} STATUS {}", status.tail()),
        }
    }
}

/// Source roots are written as they are, unless they would break the line
/// or look quoted, in which case they're JSON strings like entry paths.
fn format_root(root: &str) -> Result<Cow<'_, str>, fmt::Error> {
    if root.starts_with('"') || root.chars().any(char::is_control) {
        serde_json::to_string(root)
            .map(Cow::Owned)
            .map_err(|_| fmt::Error)
    } else {
        Ok(Cow::Borrowed(root))
    }
}

fn parse_root(text: &str) -> String {
    if text.starts_with('"') {
        if let Ok(root) = serde_json::from_str::<String>(text) {
            return root;
        }
    }
    text.to_owned()
}

/// The final status of a sequence of lines, if it has one.
pub fn final_status(lines: &[Line]) -> Option<&RunStatus> {
    match lines.last() {
        Some(Line::Status(status)) => Some(status),
        _ => None,
    }
}
