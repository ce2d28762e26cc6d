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

//! A destination served by `hoard serve`, reached over HTTP.

use std::io::Write;
use std::sync::Arc;

use tracing::{info, instrument};

use super::local::find_file;
use super::ListOptions;
use crate::instance::{Instance, RemoteInstance};
use crate::monitor::Monitor;
use crate::remote::RemoteClient;
use crate::stats::{CleanStats, FsckStats};
use crate::{Result, TargetOptions, When};

#[derive(Debug)]
pub struct RemoteBackup {
    client: Arc<RemoteClient>,
}

impl RemoteBackup {
    /// Remember the server's location, and log in if there's an access key.
    ///
    /// Nothing else is sent until an operation needs it.
    #[instrument(skip(options))]
    pub async fn connect(location: &str, options: &TargetOptions) -> Result<RemoteBackup> {
        let client = Arc::new(RemoteClient::new(location)?);
        if let Some(access_key) = &options.access_key {
            client.login(access_key).await?;
        }
        Ok(RemoteBackup { client })
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn instance(&self, set: &str) -> Result<RemoteInstance> {
        RemoteInstance::new(Arc::clone(&self.client), set)
    }

    /// Ask the server to delete unreferenced objects.
    pub async fn clean(&self, dry_run: bool, monitor: &dyn Monitor) -> Result<CleanStats> {
        let builder = self
            .client
            .get(&["fs", "clean"])?
            .query(&[("dry_run", flag(dry_run))]);
        let mut stats = CleanStats::default();
        self.client
            .lines(builder, |line| {
                if line.starts_with("REMOVE ") {
                    stats.removed_objects += 1;
                }
                monitor.line(line);
            })
            .await?;
        info!(%stats, "Remote clean complete");
        Ok(stats)
    }

    pub async fn fsck(&self, verbose: bool, monitor: &dyn Monitor) -> Result<FsckStats> {
        let builder = self.client.get(&["fsck"])?.query(&[("verbose", "1")]);
        let mut stats = FsckStats::default();
        self.client
            .lines(builder, |line| {
                let tally = match line.split(' ').next().unwrap_or_default() {
                    "OK" => &mut stats.ok,
                    "ORPHANED" => &mut stats.orphaned,
                    "MISSING" => &mut stats.missing,
                    _ => &mut stats.errors,
                };
                *tally += 1;
                if verbose || !line.starts_with("OK ") {
                    monitor.line(line);
                }
            })
            .await?;
        Ok(stats)
    }

    pub async fn list(&self, options: &ListOptions, monitor: &dyn Monitor) -> Result<()> {
        let mut query = vec![("sources", flag(options.sources).to_owned())];
        if let Some(since) = options.since {
            query.push(("since", since.to_string()));
        }
        if !options.filter.is_empty() {
            query.push(("filters", options.filter.rules().join("\n")));
        }
        let when = options.when.map(|when| when.to_string());
        let builder = match (&options.set, when) {
            (Some(set), Some(when)) => self.client.get(&["list", set, &when])?,
            (Some(set), None) => self.client.get(&["list", set])?,
            (None, when) => {
                if let Some(when) = when {
                    query.push(("when", when));
                }
                self.client.get(&["list"])?
            }
        };
        self.client
            .lines(builder.query(&query), |line| monitor.line(line))
            .await
    }

    /// Write the content of one file from a run.
    pub async fn cat(
        &self,
        set: &str,
        when: &When,
        path: &str,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let lines = self.instance(set)?.lines(when).await?;
        let key = find_file(&lines, set, path)?;
        self.client.get_object(&key, out).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client.logout().await
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
