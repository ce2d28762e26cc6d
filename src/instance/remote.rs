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

//! Instances of backup sets on a `hoard serve` server.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::restore::restore_lines;
use super::{FetchObject, Instance, RestoreOptions, VerifyOptions};
use crate::counters::Counter;
use crate::filter::FilterSpec;
use crate::manifest::{check_set_name, Entry, LastBackupIndex, Line, RunStatus};
use crate::monitor::Monitor;
use crate::objects::PutOutcome;
use crate::remote::RemoteClient;
use crate::stats::{RestoreStats, VerifyStats};
use crate::{Error, ObjectKey, Result, Stamp, When};

#[derive(Debug)]
pub struct RemoteInstance {
    client: Arc<RemoteClient>,
    set: String,
}

impl RemoteInstance {
    pub fn new(client: Arc<RemoteClient>, set: &str) -> Result<RemoteInstance> {
        check_set_name(set)?;
        Ok(RemoteInstance {
            client,
            set: set.to_owned(),
        })
    }

    fn backup_path<'a>(&'a self, action: &'a str) -> [&'a str; 3] {
        ["backup", action, &self.set]
    }

    /// The manifest lines of a run, less entries ignored by `filter`.
    async fn fetch_lines(&self, when: &When, filter: &FilterSpec) -> Result<Vec<Line>> {
        let when = when.to_string();
        let text = self
            .client
            .post_json(&["restore", "get", &self.set, &when], filter)
            .await
            .map_err(|err| match err {
                Error::Remote { status: 404, .. } => Error::ManifestNotFound {
                    set: self.set.clone(),
                    when: when.clone(),
                },
                err => err,
            })?;
        Ok(text.lines().map(Line::parse).collect())
    }
}

#[async_trait]
impl Instance for RemoteInstance {
    fn set_name(&self) -> &str {
        &self.set
    }

    #[instrument(skip(self), fields(set = %self.set))]
    async fn create_new_instance(&mut self) -> Result<()> {
        let builder = self.client.post(&self.backup_path("create"))?;
        match self.client.text(builder).await {
            Ok(run) => {
                debug!(run = run.trim(), "Created remote run");
                Ok(())
            }
            Err(Error::Remote {
                status: 403,
                message,
                ..
            }) => Err(Error::OpConflict {
                set: self.set.clone(),
                op: message,
            }),
            Err(err) => Err(err),
        }
    }

    async fn write_source(&mut self, root: &str) -> Result<()> {
        self.client
            .post_json(&["backup", "log", &self.set, "source"], root)
            .await
            .map(|_| ())
    }

    async fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        self.client
            .post_json(&["backup", "log", &self.set, "entry"], entry)
            .await
            .map(|_| ())
    }

    async fn put(
        &mut self,
        path: &Path,
        size: u64,
        hash: &str,
        monitor: Arc<dyn Monitor>,
    ) -> Result<PutOutcome> {
        let outcome = self.client.put_object(path, size, hash).await?;
        monitor.count(Counter::RemoteRequests, if outcome.stored { 2 } else { 1 });
        if outcome.stored {
            monitor.count(Counter::ObjectsStored, 1);
        } else {
            monitor.count(Counter::ObjectsDeduplicated, 1);
        }
        Ok(outcome)
    }

    async fn finish(&mut self, status: &RunStatus) -> Result<()> {
        self.client
            .post_text(&self.backup_path("finish"), status.tail())
            .await
            .map(|_| ())
    }

    async fn complete(&mut self, started: Stamp) -> Result<()> {
        let stamp = started.to_string();
        let builder = self.client.post(&["backup", "complete", &self.set, &stamp])?;
        self.client.send(builder).await.map(|_| ())
    }

    async fn abandon(&mut self) -> Result<()> {
        let builder = self.client.post(&self.backup_path("abandon"))?;
        self.client.send(builder).await.map(|_| ())
    }

    async fn last_backup(&self) -> Result<Option<LastBackupIndex>> {
        match self.fetch_lines(&When::Current, &FilterSpec::default()).await {
            Ok(lines) => LastBackupIndex::from_lines(&lines).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn lines(&self, when: &When) -> Result<Vec<Line>> {
        self.fetch_lines(when, &FilterSpec::default()).await
    }

    /// Ask the server to verify its stored objects for a run.
    ///
    /// Comparing against the source tree needs the objects' content here,
    /// and isn't supported.
    async fn verify(
        &self,
        options: &VerifyOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<VerifyStats> {
        if options.compare || options.compare_with.is_some() {
            return Err(Error::Unsupported("Verify with comparison"));
        }
        let builder = self
            .client
            .get(&["verify", &self.set, &options.when.to_string()])?
            .query(&[("verbose", "1")]);
        let mut stats = VerifyStats::default();
        self.client
            .lines(builder, |line| {
                let tally = match line.split(' ').next().unwrap_or_default() {
                    "OK" => Some(&mut stats.ok),
                    "CHANGED" => Some(&mut stats.changed),
                    "DELETED" => Some(&mut stats.deleted),
                    "ERROR" => Some(&mut stats.errors),
                    _ => None,
                };
                let Some(tally) = tally else {
                    if options.verbose {
                        monitor.line(line);
                    }
                    return;
                };
                *tally += 1;
                monitor.count(Counter::EntriesVerified, 1);
                if options.verbose || !line.starts_with("OK ") {
                    monitor.line(line);
                }
            })
            .await?;
        Ok(stats)
    }

    async fn restore(
        &self,
        options: &RestoreOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<RestoreStats> {
        let lines = self
            .fetch_lines(&options.when, &options.filter.to_spec())
            .await?;
        restore_lines(&lines, options, self.client.as_ref(), monitor).await
    }
}

#[async_trait]
impl FetchObject for RemoteClient {
    async fn fetch(&self, key: &ObjectKey, mut out: File) -> Result<u64> {
        self.get_object(key, &mut out).await.map_err(|err| match err {
            Error::Remote { status: 404, .. } => Error::ObjectNotFound { key: key.clone() },
            err => err,
        })
    }
}
