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

//! Naming, finding, and sealing manifests in a `backups` directory.
//!
//! Manifests are named `<set>.running` while the run is in progress, then
//! renamed to `<set>.<stamp>` when it completes. `<set>.current` is a hard
//! link to (or, where links are not supported, a copy of) the newest sealed
//! manifest of the set.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Line, ManifestWriter};
use crate::{Error, Result, Stamp, When};

/// What a manifest file holds, from the part of its name after the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suffix {
    Stamp(Stamp),
    Current,
    Running,
}

impl Suffix {
    fn parse(s: &str) -> Option<Suffix> {
        match s {
            "running" => Some(Suffix::Running),
            "current" => Some(Suffix::Current),
            _ => s.parse().ok().map(Suffix::Stamp),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Suffix::Stamp(_) => 0,
            Suffix::Current => 1,
            Suffix::Running => 2,
        }
    }
}

/// Sealed runs sort in time order, followed by `current` and `running`.
impl Ord for Suffix {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Suffix::Stamp(a), Suffix::Stamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Suffix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suffix::Stamp(stamp) => stamp.fmt(f),
            Suffix::Current => f.write_str("current"),
            Suffix::Running => f.write_str("running"),
        }
    }
}

/// The name of one manifest file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestName {
    pub set: String,
    pub suffix: Suffix,
}

impl ManifestName {
    /// Parse a file name, returning None for anything that isn't a manifest.
    pub fn parse(file_name: &str) -> Option<ManifestName> {
        if file_name.starts_with('.') {
            return None;
        }
        let (set, suffix) = file_name.rsplit_once('.')?;
        if !is_valid_name(set) {
            return None;
        }
        Some(ManifestName {
            set: set.to_owned(),
            suffix: Suffix::parse(suffix)?,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.set, self.suffix)
    }
}

/// True if `name` can be used as a set name or user id.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
}

pub(crate) fn check_set_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidSetName {
            name: name.to_owned(),
        })
    }
}

/// A directory of manifests: either `backups/` or, for a named user,
/// `backups/<userid>/`.
#[derive(Debug, Clone)]
pub struct BackupsDir {
    dir: PathBuf,
}

impl BackupsDir {
    pub fn new(backups_root: &Path, user: Option<&str>) -> Result<BackupsDir> {
        let dir = match user {
            None => backups_root.to_owned(),
            Some(user) if is_valid_name(user) => backups_root.join(user),
            Some(user) => {
                return Err(Error::InvalidUserId {
                    name: user.to_owned(),
                })
            }
        };
        Ok(BackupsDir { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, set: &str, suffix: Suffix) -> PathBuf {
        self.dir.join(
            ManifestName {
                set: set.to_owned(),
                suffix,
            }
            .file_name(),
        )
    }

    /// List manifests, optionally of just one set, sorted by set and then
    /// suffix.
    pub fn list(&self, set: Option<&str>) -> Result<Vec<ManifestName>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(Error::io(&self.dir, source)),
        };
        let mut names = Vec::new();
        for dirent in read_dir {
            let dirent = dirent.map_err(|source| Error::io(&self.dir, source))?;
            let is_file = dirent
                .file_type()
                .map_err(|source| Error::io(dirent.path(), source))?
                .is_file();
            if !is_file {
                continue;
            }
            let Some(name) = dirent.file_name().to_str().and_then(ManifestName::parse) else {
                continue;
            };
            if set.map_or(true, |set| set == name.set) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Start times of sealed runs of a set, oldest first.
    pub fn sealed(&self, set: &str) -> Result<Vec<Stamp>> {
        Ok(self
            .list(Some(set))?
            .into_iter()
            .filter_map(|name| match name.suffix {
                Suffix::Stamp(stamp) => Some(stamp),
                _ => None,
            })
            .collect())
    }

    pub fn latest_sealed(&self, set: &str) -> Result<Option<Stamp>> {
        Ok(self.sealed(set)?.pop())
    }

    pub fn is_running(&self, set: &str) -> bool {
        self.path(set, Suffix::Running).is_file()
    }

    /// Find the manifest file selected by `when`.
    pub fn resolve(&self, set: &str, when: &When) -> Result<PathBuf> {
        check_set_name(set)?;
        let suffix = match when {
            When::Current => Suffix::Current,
            When::Running => Suffix::Running,
            When::At(stamp) => Suffix::Stamp(*stamp),
        };
        let path = self.path(set, suffix);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::ManifestNotFound {
                set: set.to_owned(),
                when: when.to_string(),
            })
        }
    }

    /// Parse every line of a manifest file.
    pub fn read_lines(path: &Path) -> Result<Vec<Line>> {
        let read_err = |source| Error::ReadManifest {
            path: path.to_owned(),
            source,
        };
        let file = fs::File::open(path).map_err(read_err)?;
        BufReader::new(file)
            .lines()
            .map(|line| line.map(|line| Line::parse(&line)).map_err(read_err))
            .collect()
    }

    pub fn lines(&self, set: &str, when: &When) -> Result<Vec<Line>> {
        BackupsDir::read_lines(&self.resolve(set, when)?)
    }

    /// Start writing the running manifest of a set.
    pub fn create_running(&self, set: &str) -> Result<ManifestWriter> {
        check_set_name(set)?;
        fs::create_dir_all(&self.dir).map_err(|source| Error::io(&self.dir, source))?;
        ManifestWriter::create(&self.path(set, Suffix::Running), set)
    }

    /// Delete the running manifest of a set, if there is one.
    pub fn remove_running(&self, set: &str) -> Result<bool> {
        let path = self.path(set, Suffix::Running);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(?path, "Removed running manifest");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(Error::io(path, source)),
        }
    }

    /// Rename the running manifest to its start time, and point `current` at it.
    ///
    /// Returns the path of the sealed manifest.
    pub fn seal(&self, set: &str, stamp: Stamp) -> Result<PathBuf> {
        let running = self.path(set, Suffix::Running);
        if !running.is_file() {
            return Err(Error::NotRunning {
                set: set.to_owned(),
            });
        }
        // Runs started within the same millisecond are kept apart.
        let mut stamp = stamp;
        let mut sealed = self.path(set, Suffix::Stamp(stamp));
        while sealed.exists() {
            stamp = stamp.next();
            sealed = self.path(set, Suffix::Stamp(stamp));
        }
        fs::rename(&running, &sealed).map_err(|source| Error::io(&running, source))?;
        self.link_current(set, &sealed)?;
        debug!(?sealed, "Sealed manifest");
        Ok(sealed)
    }

    /// Point `current` at the newest sealed manifest, or remove it if there
    /// are none.
    pub fn refresh_current(&self, set: &str) -> Result<()> {
        match self.latest_sealed(set)? {
            Some(stamp) => self.link_current(set, &self.path(set, Suffix::Stamp(stamp))),
            None => {
                let current = self.path(set, Suffix::Current);
                match fs::remove_file(&current) {
                    Err(err) if err.kind() != io::ErrorKind::NotFound => {
                        Err(Error::io(current, err))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    fn link_current(&self, set: &str, sealed: &Path) -> Result<()> {
        let current = self.path(set, Suffix::Current);
        match fs::remove_file(&current) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                return Err(Error::io(&current, err))
            }
            _ => (),
        }
        if let Err(err) = fs::hard_link(sealed, &current) {
            warn!(?current, "Can't hard link manifest, copying instead: {err}");
            fs::copy(sealed, &current).map_err(|source| Error::io(&current, source))?;
        }
        Ok(())
    }
}
