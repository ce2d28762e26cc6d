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

//! A backup destination in a local directory.
//!
//! ```text
//! <destination>/
//!   config.json
//!   files.db/        objects
//!   backups/         manifests, with a subdirectory per user id
//! ```

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::ListOptions;
use crate::config::DestinationConfig;
use crate::counters::Counter;
use crate::instance::LocalInstance;
use crate::manifest::{self, is_valid_name, BackupsDir, Line, Suffix};
use crate::monitor::Monitor;
use crate::objects::ObjectStore;
use crate::stats::{mb_string, CleanStats, FsckStats, RmStats};
use crate::{
    ContentStore, Error, Filter, FsType, ObjectKey, Result, TargetOptions, When, BACKUPS_DIR,
    CONFIG_FILENAME, FILES_DB,
};

#[derive(Debug)]
pub struct LocalBackup {
    root: PathBuf,
    config: DestinationConfig,
    objects: ObjectStore,
}

impl LocalBackup {
    /// Open a destination, first creating it if `create` is true and it
    /// doesn't exist.
    ///
    /// The store layout is fixed when the destination is created; asking
    /// for a different one later is an error.
    #[instrument(skip(options))]
    pub fn open(root: &Path, options: &TargetOptions, create: bool) -> Result<LocalBackup> {
        let config_path = root.join(CONFIG_FILENAME);
        if create {
            fs::create_dir_all(root).map_err(|source| Error::io(root, source))?;
            for dir in [FILES_DB, BACKUPS_DIR] {
                let path = root.join(dir);
                fs::create_dir_all(&path).map_err(|source| Error::io(&path, source))?;
            }
            if DestinationConfig::read(&config_path)?.is_none() {
                let fstype = options.fstype.unwrap_or(FsType::CURRENT);
                info!(?root, %fstype, "Create new destination");
                DestinationConfig::new(fstype).write(&config_path)?;
            }
        }
        let config = DestinationConfig::read(&config_path)?.ok_or_else(|| {
            Error::NotADestination {
                path: root.to_owned(),
            }
        })?;
        if let Some(requested) = options.fstype {
            if requested != config.fstype {
                return Err(Error::FsTypeMismatch {
                    path: root.to_owned(),
                    persisted: config.fstype,
                    requested,
                });
            }
        }
        let store = ContentStore::mount(&root.join(FILES_DB), config.fstype)?;
        Ok(LocalBackup {
            root: root.to_owned(),
            config,
            objects: ObjectStore::new(store, options.fast),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn store(&self) -> &ContentStore {
        self.objects.content_store()
    }

    /// Manifests of the given user, or of the default namespace.
    pub fn backups_dir(&self, user: Option<&str>) -> Result<BackupsDir> {
        BackupsDir::new(&self.root.join(BACKUPS_DIR), user)
    }

    pub fn instance(self: &Arc<Self>, user: Option<&str>, set: &str) -> Result<LocalInstance> {
        LocalInstance::new(Arc::clone(self), user, set)
    }

    /// Every manifest directory: the default namespace and each user's.
    fn all_backups_dirs(&self) -> Result<Vec<BackupsDir>> {
        let backups_root = self.root.join(BACKUPS_DIR);
        let mut dirs = vec![self.backups_dir(None)?];
        let read_dir = match fs::read_dir(&backups_root) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(dirs),
            Err(source) => return Err(Error::io(&backups_root, source)),
        };
        let mut users = Vec::new();
        for dirent in read_dir {
            let dirent = dirent.map_err(|source| Error::io(&backups_root, source))?;
            let is_dir = dirent
                .file_type()
                .map_err(|source| Error::io(dirent.path(), source))?
                .is_dir();
            if let Some(name) = dirent.file_name().to_str() {
                if is_dir && is_valid_name(name) {
                    users.push(name.to_owned());
                }
            }
        }
        users.sort();
        for user in users {
            dirs.push(self.backups_dir(Some(&user))?);
        }
        Ok(dirs)
    }

    /// Fail if a backup of any set, by any user, is running.
    pub fn check_none_running(&self) -> Result<()> {
        for dir in self.all_backups_dirs()? {
            if let Some(name) = dir
                .list(None)?
                .into_iter()
                .find(|name| matches!(name.suffix, Suffix::Running))
            {
                return Err(Error::CleanWhileRunning {
                    path: dir.path(&name.set, name.suffix),
                });
            }
        }
        Ok(())
    }

    /// Keys of every object referenced by a sealed manifest, of any set
    /// and user.
    ///
    /// Fails if any backup is running, because its objects are not yet
    /// referenced by a sealed manifest.
    pub fn referenced_keys(&self) -> Result<HashSet<ObjectKey>> {
        self.check_none_running()?;
        let store = self.store();
        let mut keys = HashSet::new();
        for dir in self.all_backups_dirs()? {
            for name in dir.list(None)? {
                let Suffix::Stamp(stamp) = name.suffix else {
                    continue;
                };
                let path = dir.path(&name.set, Suffix::Stamp(stamp));
                for line in BackupsDir::read_lines(&path)? {
                    if let Some(key) = line.as_entry().and_then(manifest::Entry::key) {
                        keys.insert(store.key(&key.hash, key.variant, key.size));
                    }
                }
            }
        }
        debug!(referenced = keys.len(), "Found referenced objects");
        Ok(keys)
    }

    /// Delete objects not referenced by any sealed manifest.
    #[instrument(skip(self, monitor))]
    pub fn clean(&self, dry_run: bool, monitor: &dyn Monitor) -> Result<CleanStats> {
        let referenced = self.referenced_keys()?;
        let mut stats = CleanStats {
            referenced_objects: referenced.len(),
            ..Default::default()
        };
        for file in self.store().list_files()? {
            let Some(key) = file.key else {
                continue;
            };
            if referenced.contains(&key) {
                continue;
            }
            monitor.line(format!("REMOVE {key}"));
            let len = fs::metadata(&file.path).map(|m| m.len()).unwrap_or_default();
            if !dry_run {
                if let Err(err) = self.store().remove_file(&file.path) {
                    monitor.error(err);
                    continue;
                }
                monitor.count(Counter::ObjectsRemoved, 1);
            }
            stats.removed_objects += 1;
            stats.removed_bytes += len;
        }
        info!(%stats, dry_run, "Clean complete");
        Ok(stats)
    }

    /// Check every stored object against its key, and every referenced
    /// object is present.
    #[instrument(skip(self, monitor))]
    pub fn fsck(&self, verbose: bool, monitor: &dyn Monitor) -> Result<FsckStats> {
        let referenced = self.referenced_keys()?;
        let store = self.store();
        let mut stats = FsckStats::default();
        let mut found = HashSet::new();
        for file in store.list_files()? {
            let Some(key) = file.key else {
                continue;
            };
            monitor.count(Counter::ObjectsChecked, 1);
            if !referenced.contains(&key) {
                monitor.line(format!("ORPHANED {key}"));
                stats.orphaned += 1;
                continue;
            }
            match store.hash_key(&key) {
                Ok(actual) if actual == key.hash => {
                    if verbose {
                        monitor.line(format!("OK {key}"));
                    }
                    stats.ok += 1;
                }
                Ok(actual) => {
                    warn!(%key, %actual, "Stored object is corrupt");
                    monitor.line(format!("ERROR {key}"));
                    stats.errors += 1;
                }
                Err(err) => {
                    warn!(%key, "Failed to check object: {err}");
                    monitor.line(format!("ERROR {key}"));
                    stats.errors += 1;
                }
            }
            found.insert(key);
        }
        let missing: BTreeSet<&ObjectKey> = referenced.difference(&found).collect();
        for key in missing {
            monitor.line(format!("MISSING {key}"));
            stats.missing += 1;
        }
        info!(%stats, "Fsck complete");
        Ok(stats)
    }

    /// Remove entries matched by `filter` from a sealed manifest.
    ///
    /// The objects they referenced are left for [LocalBackup::clean].
    #[instrument(skip(self, filter, monitor))]
    pub fn rm(
        &self,
        user: Option<&str>,
        set: &str,
        when: &When,
        filter: &Filter,
        dry_run: bool,
        monitor: &dyn Monitor,
    ) -> Result<RmStats> {
        let backups = self.backups_dir(user)?;
        let stamp = match when {
            When::At(stamp) => *stamp,
            When::Current => {
                backups
                    .latest_sealed(set)?
                    .ok_or_else(|| Error::ManifestNotFound {
                        set: set.to_owned(),
                        when: when.to_string(),
                    })?
            }
            When::Running => {
                return Err(Error::BackupRunning {
                    set: set.to_owned(),
                })
            }
        };
        let path = backups.resolve(set, &When::At(stamp))?;
        let mut stats = RmStats::default();
        let mut kept = Vec::new();
        for line in BackupsDir::read_lines(&path)? {
            match &line {
                Line::Entry(entry) if filter.ignores(&entry.path) => {
                    monitor.line(format!("RM {}", serde_json::to_string(&entry.path)?));
                    if entry.kind.is_dir() {
                        stats.dirs += 1;
                    } else {
                        stats.files += 1;
                        stats.bytes += entry.size.unwrap_or_default();
                    }
                    continue;
                }
                _ => (),
            }
            kept.push(line);
        }
        if dry_run || (stats.files == 0 && stats.dirs == 0) {
            return Ok(stats);
        }
        for line in &mut kept {
            if let Line::Status(status) = line {
                if let Some(run) = &mut status.stats {
                    run.files = run.files.saturating_sub(stats.files as u64);
                    run.folders = run.folders.saturating_sub(stats.dirs as u64);
                    run.bytes = run.bytes.saturating_sub(stats.bytes);
                }
            }
        }
        replace_manifest(&path, &kept)?;
        if backups.latest_sealed(set)? == Some(stamp) {
            backups.refresh_current(set)?;
        }
        info!(?path, %stats, "Removed entries");
        Ok(stats)
    }

    /// List runs, or the files of one run.
    pub fn list(
        &self,
        user: Option<&str>,
        options: &ListOptions,
        monitor: &dyn Monitor,
    ) -> Result<()> {
        let backups = self.backups_dir(user)?;
        match &options.when {
            None => list_runs(&backups, options, monitor),
            Some(when) => {
                let sets = match &options.set {
                    Some(set) => vec![set.clone()],
                    None => set_names(&backups)?,
                };
                for set in &sets {
                    let lines = match backups.lines(set, when) {
                        Ok(lines) => lines,
                        Err(err) if err.is_not_found() && options.set.is_none() => continue,
                        Err(err) => return Err(err),
                    };
                    if options.set.is_none() {
                        monitor.line(format!("Backup Set: {set}"));
                    }
                    list_files(&lines, options, monitor)?;
                }
                Ok(())
            }
        }
    }

    /// Write the content of one file from a run.
    pub fn cat(
        &self,
        user: Option<&str>,
        set: &str,
        when: &When,
        path: &str,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let lines = self.backups_dir(user)?.lines(set, when)?;
        let key = find_file(&lines, set, path)?;
        self.store().restore(&key, out, false)
    }
}

/// Find the object holding a file, by its path relative to its source root.
pub(crate) fn find_file(lines: &[Line], set: &str, path: &str) -> Result<ObjectKey> {
    let path = path.trim_start_matches('/');
    lines
        .iter()
        .rev()
        .filter_map(Line::as_entry)
        .find(|entry| entry.path == path)
        .and_then(manifest::Entry::key)
        .ok_or_else(|| Error::EntryNotFound {
            set: set.to_owned(),
            path: path.to_owned(),
        })
}

fn set_names(backups: &BackupsDir) -> Result<Vec<String>> {
    let mut sets: Vec<String> = backups.list(None)?.into_iter().map(|n| n.set).collect();
    sets.dedup();
    Ok(sets)
}

fn list_runs(backups: &BackupsDir, options: &ListOptions, monitor: &dyn Monitor) -> Result<()> {
    let mut last_set: Option<String> = None;
    for name in backups.list(options.set.as_deref())? {
        let Suffix::Stamp(stamp) = name.suffix else {
            continue;
        };
        if options.since.is_some_and(|since| stamp < since) {
            continue;
        }
        if last_set.as_deref() != Some(name.set.as_str()) {
            monitor.line(format!("Backup Set: {}", name.set));
            last_set = Some(name.set.clone());
        }
        let lines = backups.lines(&name.set, &When::At(stamp))?;
        let stats = manifest::final_status(&lines)
            .and_then(|status| status.stats.clone())
            .unwrap_or_default();
        monitor.line(format!(
            "{} {} files {} MB took {} seconds",
            stamp.to_iso(),
            stats.files,
            mb_string(stats.bytes),
            stats.took as f64 / 1000.0
        ));
        if options.sources {
            list_files(&lines, options, monitor)?;
        }
    }
    Ok(())
}

/// Emit the listing of one manifest's files, or just its sources.
pub(crate) fn list_files(lines: &[Line], options: &ListOptions, monitor: &dyn Monitor) -> Result<()> {
    for line in lines {
        match line {
            Line::Source { root } if options.sources => monitor.line(root.clone()),
            Line::Entry(entry)
                if !options.sources
                    && entry.kind.is_file()
                    && !options.filter.ignores(&entry.path) =>
            {
                let id = |i: Option<u32>| i.map_or_else(|| "-".to_owned(), |i| i.to_string());
                let mtime = entry
                    .mtime
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default();
                monitor.line(format!(
                    "{} {}:{} {} {:>10} {}",
                    mtime,
                    id(entry.uid),
                    id(entry.gid),
                    entry.mode.to_octal(),
                    entry.size.unwrap_or_default(),
                    entry.path
                ));
            }
            _ => (),
        }
    }
    Ok(())
}

/// Atomically replace a manifest with new lines, keeping its permissions.
fn replace_manifest(path: &Path, lines: &[Line]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix(".rm-")
        .tempfile_in(dir)
        .map_err(|source| Error::io(dir, source))?;
    let write_err = |source| Error::WriteManifest {
        path: path.to_owned(),
        source,
    };
    let mut text = String::new();
    for line in lines {
        text.push_str(&line.to_string());
        text.push('\n');
    }
    temp.write_all(text.as_bytes()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    let permissions = fs::metadata(path).map_err(write_err)?.permissions();
    fs::set_permissions(temp.path(), permissions).map_err(write_err)?;
    let old = dir.join(format!(".{name}.rm-old"));
    fs::rename(path, &old).map_err(write_err)?;
    if let Err(err) = temp.persist(path) {
        put_back(&old, path);
        return Err(write_err(err.error));
    }
    fs::remove_file(&old).map_err(|source| Error::io(&old, source))?;
    Ok(())
}

/// Move the original manifest back after failing to replace it.
fn put_back(old: &Path, path: &Path) {
    if let Err(err) = fs::rename(old, path) {
        error!(?old, ?path, "Failed to put back the original manifest: {err}");
    }
}
