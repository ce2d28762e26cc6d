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

//! Instances of backup sets in a local destination.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::restore::restore_lines;
use super::{FetchObject, Instance, RestoreOptions, VerifyOptions};
use crate::counters::Counter;
use crate::manifest::{BackupsDir, Entry, LastBackupIndex, Line, ManifestWriter, RunStatus};
use crate::monitor::Monitor;
use crate::objects::{PutOutcome, SeenCache};
use crate::stats::{RestoreStats, VerifyStats};
use crate::{ContentStore, Error, LocalBackup, ObjectKey, Result, Stamp, When};

/// One backup set in a local destination, optionally in a user's namespace.
#[derive(Debug)]
pub struct LocalInstance {
    target: Arc<LocalBackup>,
    backups: BackupsDir,
    set: String,
    writer: Option<ManifestWriter>,
    /// True from creating the running manifest until it is sealed or
    /// abandoned, including after its status line is written.
    started: bool,
    seen: SeenCache,
}

/// How one file entry compared during verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ok,
    Changed,
    Deleted,
    Error,
}

impl Verdict {
    fn label(self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Changed => "CHANGED",
            Verdict::Deleted => "DELETED",
            Verdict::Error => "ERROR",
        }
    }
}

impl LocalInstance {
    pub fn new(target: Arc<LocalBackup>, user: Option<&str>, set: &str) -> Result<LocalInstance> {
        crate::manifest::check_set_name(set)?;
        let backups = target.backups_dir(user)?;
        Ok(LocalInstance {
            target,
            backups,
            set: set.to_owned(),
            writer: None,
            started: false,
            seen: SeenCache::default(),
        })
    }

    pub fn backups(&self) -> &BackupsDir {
        &self.backups
    }

    /// True while this instance holds the running manifest open.
    pub fn is_writing(&self) -> bool {
        self.writer.is_some()
    }

    fn writer(&mut self) -> Result<&mut ManifestWriter> {
        let set = &self.set;
        self.writer.as_mut().ok_or_else(|| Error::NotRunning { set: set.clone() })
    }
}

/// Check one file entry against the store, and optionally against a live
/// copy of the file.
fn verify_file(store: &ContentStore, key: &ObjectKey, compare_path: Option<&Path>) -> Verdict {
    match store.hash_key(key) {
        Ok(actual) if actual == key.hash => (),
        Ok(actual) => {
            warn!(%key, %actual, "Stored object is corrupt");
            return Verdict::Error;
        }
        Err(Error::ObjectNotFound { .. }) => return Verdict::Deleted,
        Err(err) => {
            warn!(%key, "Failed to check object: {err}");
            return Verdict::Error;
        }
    }
    let Some(compare_path) = compare_path else {
        return Verdict::Ok;
    };
    match store.compare(key, compare_path) {
        Ok(()) => Verdict::Ok,
        Err(Error::ContentChanged { .. }) => Verdict::Changed,
        Err(err) if err.is_not_found() => Verdict::Deleted,
        Err(err) => {
            warn!(%key, ?compare_path, "Failed to compare: {err}");
            Verdict::Error
        }
    }
}

fn verify_lines(
    store: &ContentStore,
    lines: Vec<Line>,
    options: &VerifyOptions,
    monitor: &dyn Monitor,
) -> Result<VerifyStats> {
    let mut stats = VerifyStats::default();
    let mut root: Option<PathBuf> = None;
    for line in lines {
        let entry = match line {
            Line::Source { root: r } => {
                if options.verbose {
                    monitor.line(format!("SOURCE {r}"));
                }
                root = Some(PathBuf::from(r));
                continue;
            }
            Line::Entry(entry) => entry,
            _ => continue,
        };
        let Some(key) = entry.key() else {
            continue;
        };
        monitor.count(Counter::EntriesVerified, 1);
        let compare_path = if options.compare {
            let base = options.compare_with.as_ref().or(root.as_ref());
            match base {
                Some(base) => Some(entry.full_path(base)),
                None => {
                    return Err(Error::MissingRoot {
                        path: entry.path.clone(),
                    })
                }
            }
        } else {
            None
        };
        let verdict = verify_file(store, &key, compare_path.as_deref());
        match verdict {
            Verdict::Ok => stats.ok += 1,
            Verdict::Changed => stats.changed += 1,
            Verdict::Deleted => stats.deleted += 1,
            Verdict::Error => stats.errors += 1,
        }
        if verdict != Verdict::Ok || options.verbose {
            monitor.line(format!(
                "{} {} {}",
                verdict.label(),
                key,
                serde_json::to_string(&entry.path)?
            ));
        }
    }
    Ok(stats)
}

#[async_trait]
impl Instance for LocalInstance {
    fn set_name(&self) -> &str {
        &self.set
    }

    #[instrument(skip(self), fields(set = %self.set))]
    async fn create_new_instance(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Err(Error::BackupRunning {
                set: self.set.clone(),
            });
        }
        self.writer = Some(self.backups.create_running(&self.set)?);
        self.started = true;
        self.seen = SeenCache::default();
        Ok(())
    }

    async fn write_source(&mut self, root: &str) -> Result<()> {
        self.writer()?.write_source(root)
    }

    async fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        self.writer()?.write_entry(entry)
    }

    async fn put(
        &mut self,
        path: &Path,
        size: u64,
        hash: &str,
        monitor: Arc<dyn Monitor>,
    ) -> Result<PutOutcome> {
        let objects = self.target.objects().clone();
        let (path, hash) = (path.to_owned(), hash.to_owned());
        let mut seen = std::mem::take(&mut self.seen);
        let (seen, outcome) = crate::blocking(move || {
            let outcome = objects.put(&path, size, &hash, 0, &mut seen, monitor.as_ref());
            Ok((seen, outcome))
        })
        .await?;
        self.seen = seen;
        outcome
    }

    async fn finish(&mut self, status: &RunStatus) -> Result<()> {
        let writer = self.writer.take().ok_or_else(|| Error::NotRunning {
            set: self.set.clone(),
        })?;
        writer.finish(status)
    }

    async fn complete(&mut self, started: Stamp) -> Result<()> {
        if self.writer.is_some() {
            // Sealing a manifest without its status line would leave it
            // looking like a complete run.
            return Err(Error::BackupRunning {
                set: self.set.clone(),
            });
        }
        if !self.started {
            return Err(Error::NotRunning {
                set: self.set.clone(),
            });
        }
        self.backups.seal(&self.set, started)?;
        self.started = false;
        Ok(())
    }

    async fn abandon(&mut self) -> Result<()> {
        self.writer = None;
        if !std::mem::take(&mut self.started) {
            // Whatever is running belongs to someone else.
            return Ok(());
        }
        if self.backups.remove_running(&self.set)? {
            warn!(set = %self.set, "Abandoned running backup");
        }
        Ok(())
    }

    async fn last_backup(&self) -> Result<Option<LastBackupIndex>> {
        let Some(stamp) = self.backups.latest_sealed(&self.set)? else {
            debug!(set = %self.set, "No previous backup");
            return Ok(None);
        };
        let lines = self.backups.lines(&self.set, &When::At(stamp))?;
        LastBackupIndex::from_lines(&lines).map(Some)
    }

    async fn lines(&self, when: &When) -> Result<Vec<Line>> {
        self.backups.lines(&self.set, when)
    }

    #[instrument(skip(self, monitor), fields(set = %self.set))]
    async fn verify(
        &self,
        options: &VerifyOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<VerifyStats> {
        let lines = self.lines(&options.when).await?;
        let store = self.target.store().clone();
        let options = options.clone();
        crate::blocking(move || verify_lines(&store, lines, &options, monitor.as_ref())).await
    }

    async fn restore(
        &self,
        options: &RestoreOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<RestoreStats> {
        let lines = self.lines(&options.when).await?;
        restore_lines(&lines, options, self.target.store(), monitor).await
    }
}

#[async_trait]
impl FetchObject for ContentStore {
    async fn fetch(&self, key: &ObjectKey, mut out: File) -> Result<u64> {
        let (store, key) = (self.clone(), key.clone());
        crate::blocking(move || store.restore(&key, &mut out, false)).await
    }
}
