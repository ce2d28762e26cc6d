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

//! Make a backup by walking source directories and putting their files
//! into an [Instance].
//!
//! Trees are walked depth first, one file at a time, with directory
//! entries sorted by name. Each directory's entry is written before any of
//! its children.

use std::fs::{self, DirEntry, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, trace, warn};

use crate::counters::Counter;
use crate::key::hash_file;
use crate::manifest::{Entry, LastBackupIndex, RunStatus};
use crate::monitor::Monitor;
use crate::stats::BackupStats;
use crate::unix_time::{ctime, mtime};
use crate::{Error, Filter, Instance, Kind, Result, Stamp};

/// One source tree to back up.
#[derive(Debug, Clone)]
pub struct BackupSource {
    pub root: PathBuf,
    /// Applied to paths in this tree, after the set's filter.
    pub filter: Filter,
}

impl BackupSource {
    pub fn new(root: impl Into<PathBuf>) -> BackupSource {
        BackupSource {
            root: root.into(),
            filter: Filter::nothing(),
        }
    }
}

/// A named group of sources that are backed up together into one manifest.
#[derive(Debug, Clone)]
pub struct BackupSet {
    pub name: String,
    pub sources: Vec<BackupSource>,
    /// Applied to every source.
    pub filter: Filter,
}

impl BackupSet {
    pub fn new(name: &str, sources: Vec<BackupSource>) -> BackupSet {
        BackupSet {
            name: name.to_owned(),
            sources,
            filter: Filter::nothing(),
        }
    }
}

/// Configuration of how to make a backup.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Hash every file, ignoring what the last backup recorded.
    pub deep_scan: bool,
    /// Hash files even if they look unchanged since the last backup, and
    /// warn if the content changed anyway.
    pub check_hash: bool,
    /// Report each path as it's backed up.
    pub print_filenames: bool,
}

/// Back up every source of a set, then seal the manifest.
///
/// Files that can't be read are reported, counted as skipped, and left
/// out; failing to write the manifest abandons the whole run.
#[instrument(skip_all, fields(set = %set.name))]
pub async fn backup(
    instance: &mut dyn Instance,
    set: &BackupSet,
    options: &BackupOptions,
    monitor: Arc<dyn Monitor>,
) -> Result<BackupStats> {
    let started = Stamp::now();
    let start_time = Instant::now();
    instance.create_new_instance().await?;
    let index = if options.deep_scan {
        LastBackupIndex::default()
    } else {
        match instance.last_backup().await {
            Ok(index) => index.unwrap_or_default(),
            Err(err) => {
                warn!("Can't read last backup, hashing every file: {err}");
                LastBackupIndex::default()
            }
        }
    };
    debug!(entries = index.len(), "Loaded last backup");
    let mut stats = BackupStats::default();
    let result = async {
        for source in &set.sources {
            let mut filter = set.filter.clone();
            filter.extend(&source.filter);
            let mut walker = Walker {
                instance: &mut *instance,
                filter: &filter,
                index: &index,
                options,
                stats: &mut stats,
                monitor: Arc::clone(&monitor),
            };
            walker.backup_source(&source.root).await?;
        }
        stats.took = start_time.elapsed().as_millis() as u64;
        instance.finish(&RunStatus::ok(stats.clone())).await
    }
    .await;
    if let Err(err) = result {
        if let Err(abandon_err) = instance.abandon().await {
            warn!("Failed to abandon backup: {abandon_err}");
        }
        return Err(err);
    }
    instance.complete(started).await?;
    info!(
        files = stats.files,
        backed_up = stats.backed_up.files,
        "Backup complete"
    );
    Ok(stats)
}

struct Walker<'a> {
    instance: &'a mut dyn Instance,
    filter: &'a Filter,
    index: &'a LastBackupIndex,
    options: &'a BackupOptions,
    stats: &'a mut BackupStats,
    monitor: Arc<dyn Monitor>,
}

fn list_dir(path: &Path) -> Result<std::vec::IntoIter<DirEntry>> {
    let list_err = |source| Error::ListSourceDirectory {
        path: path.to_owned(),
        source,
    };
    let mut children = fs::read_dir(path)
        .map_err(list_err)?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(list_err)?;
    children.sort_by_key(DirEntry::file_name);
    Ok(children.into_iter())
}

fn child_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}

impl Walker<'_> {
    fn skip(&mut self, err: Error) {
        self.stats.skipped += 1;
        self.monitor.count(Counter::EntriesSkipped, 1);
        self.monitor.error(err);
    }

    async fn backup_source(&mut self, root: &Path) -> Result<()> {
        let root = std::path::absolute(root).map_err(|source| Error::ReadSource {
            path: root.to_owned(),
            source,
        })?;
        debug!(?root, "Back up source");
        self.instance
            .write_source(&root.to_string_lossy())
            .await?;
        let children = match fs::metadata(&root)
            .map_err(|source| Error::ReadSource {
                path: root.clone(),
                source,
            })
            .and_then(|metadata| Ok((metadata, list_dir(&root)?)))
        {
            Ok((metadata, children)) => {
                self.write_dir("", &metadata).await?;
                children
            }
            Err(err) => {
                self.skip(err);
                return Ok(());
            }
        };
        let mut stack = vec![(String::new(), children)];
        while let Some((dir, children)) = stack.last_mut() {
            let Some(dirent) = children.next() else {
                stack.pop();
                continue;
            };
            let Some(name) = dirent.file_name().to_str().map(str::to_owned) else {
                let path = dirent.path();
                self.skip(Error::ReadSource {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "file name is not UTF-8",
                    ),
                });
                continue;
            };
            let rel = child_path(dir, &name);
            let path = dirent.path();
            let ignored = self.filter.ignores(&rel);
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(source) => {
                    self.skip(Error::ReadSource { path, source });
                    continue;
                }
            };
            match Kind::from(metadata.file_type()) {
                Kind::Dir => {
                    // An excluded directory may still hold included children.
                    if ignored && !self.filter.has_includes() {
                        self.monitor.count(Counter::EntriesSkipped, 1);
                        continue;
                    }
                    let children = match list_dir(&path) {
                        Ok(children) => children,
                        Err(err) => {
                            self.skip(err);
                            continue;
                        }
                    };
                    if !ignored {
                        self.write_dir(&rel, &metadata).await?;
                    }
                    stack.push((rel, children));
                }
                Kind::File if ignored => {
                    self.monitor.count(Counter::EntriesSkipped, 1);
                }
                Kind::File => {
                    if self.options.print_filenames {
                        self.monitor.line(path.display().to_string());
                    }
                    match self.store_file(&path, &rel, &metadata).await {
                        Ok(entry) => self.instance.write_entry(&entry).await?,
                        Err(err) => self.skip(err),
                    }
                }
                Kind::Symlink | Kind::Unknown => {
                    trace!(?path, "Skip special file");
                    self.monitor.count(Counter::EntriesSkipped, 1);
                }
            }
        }
        Ok(())
    }

    async fn write_dir(&mut self, rel: &str, metadata: &Metadata) -> Result<()> {
        self.stats.folders += 1;
        self.monitor.count(Counter::Dirs, 1);
        self.instance.write_entry(&Entry::dir(rel, metadata)).await
    }

    /// Hash and store one file, returning its manifest entry.
    async fn store_file(&mut self, path: &Path, rel: &str, metadata: &Metadata) -> Result<Entry> {
        let size = metadata.len();
        let known = self
            .index
            .unchanged_file(path, size, mtime(metadata), ctime(metadata));
        self.monitor.count(Counter::Files, 1);
        self.monitor.count(Counter::FileBytes, size as usize);
        if let Some(known) = known {
            if !self.options.check_hash {
                trace!(?path, "Unchanged since last backup");
                self.monitor.count(Counter::FilesUnchanged, 1);
                self.stats.files += 1;
                self.stats.bytes += size;
                return Ok(Entry::file(rel, metadata, &known.hash, known.variant));
            }
        }
        self.monitor.count(Counter::FilesHashed, 1);
        let owned = path.to_owned();
        let hash = crate::blocking(move || hash_file(&owned)).await?;
        if let Some(known) = known {
            if known.hash != hash {
                warn!(
                    ?path,
                    "Content changed although size and times are the same as the last backup"
                );
            }
        }
        self.stats.files += 1;
        self.stats.bytes += size;
        let outcome = self
            .instance
            .put(path, size, &hash, Arc::clone(&self.monitor))
            .await?;
        if outcome.stored {
            self.stats.backed_up.files += 1;
            self.stats.backed_up.bytes += size;
        }
        Ok(Entry::file(rel, metadata, &hash, outcome.variant))
    }
}
