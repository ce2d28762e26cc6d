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

//! Destinations that hold backups: a local directory, or a server.
//!
//! [BackupTarget] is the facade used by the command line: it dispatches each
//! operation to the local or remote implementation.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::backup::{backup, BackupOptions, BackupSet};
use crate::instance::{Instance, RestoreOptions, VerifyOptions};
use crate::monitor::Monitor;
use crate::stats::{BackupStats, CleanStats, FsckStats, RestoreStats, RmStats, VerifyStats};
use crate::{Error, Filter, Result, Stamp, TargetOptions, When};

mod local;
mod remote;

pub use local::LocalBackup;
pub use remote::RemoteBackup;

/// What to list.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only this set; otherwise every set.
    pub set: Option<String>,
    /// List the files of this run; otherwise list the runs.
    pub when: Option<When>,
    /// Files ignored by this filter are not listed.
    pub filter: Filter,
    /// Print only the source roots.
    pub sources: bool,
    /// Hide runs that started before this time.
    pub since: Option<Stamp>,
}

#[derive(Debug)]
pub enum BackupTarget {
    Local {
        backup: Arc<LocalBackup>,
        user: Option<String>,
    },
    Remote(Arc<RemoteBackup>),
}

/// True if the location names a server rather than a directory.
pub fn is_remote_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

impl BackupTarget {
    /// Open a destination by path or `http(s)://` URL.
    ///
    /// A local destination is created if `create` is true; remote
    /// destinations always exist.
    #[instrument(skip(options))]
    pub async fn connect(
        location: &str,
        options: &TargetOptions,
        create: bool,
    ) -> Result<BackupTarget> {
        if is_remote_location(location) {
            let remote = RemoteBackup::connect(location, options).await?;
            Ok(BackupTarget::Remote(Arc::new(remote)))
        } else {
            let backup = LocalBackup::open(Path::new(location), options, create)?;
            // Fail early on a bad user id.
            backup.backups_dir(options.userid.as_deref())?;
            Ok(BackupTarget::Local {
                backup: Arc::new(backup),
                user: options.userid.clone(),
            })
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, BackupTarget::Remote(_))
    }

    pub fn instance(&self, set: &str) -> Result<Box<dyn Instance>> {
        Ok(match self {
            BackupTarget::Local { backup, user } => Box::new(backup.instance(user.as_deref(), set)?),
            BackupTarget::Remote(remote) => Box::new(remote.instance(set)?),
        })
    }

    pub async fn backup(
        &self,
        set: &BackupSet,
        options: &BackupOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<BackupStats> {
        let mut instance = self.instance(&set.name)?;
        backup(instance.as_mut(), set, options, monitor).await
    }

    pub async fn verify(
        &self,
        set: &str,
        options: &VerifyOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<VerifyStats> {
        self.instance(set)?.verify(options, monitor).await
    }

    pub async fn restore(
        &self,
        set: &str,
        options: &RestoreOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<RestoreStats> {
        self.instance(set)?.restore(options, monitor).await
    }

    pub async fn list(&self, options: &ListOptions, monitor: &dyn Monitor) -> Result<()> {
        match self {
            BackupTarget::Local { backup, user } => backup.list(user.as_deref(), options, monitor),
            BackupTarget::Remote(remote) => remote.list(options, monitor).await,
        }
    }

    pub async fn cat(
        &self,
        set: &str,
        when: &When,
        path: &str,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        match self {
            BackupTarget::Local { backup, user } => {
                backup.cat(user.as_deref(), set, when, path, out)
            }
            BackupTarget::Remote(remote) => remote.cat(set, when, path, out).await,
        }
    }

    pub async fn clean(&self, dry_run: bool, monitor: &dyn Monitor) -> Result<CleanStats> {
        match self {
            BackupTarget::Local { backup, .. } => backup.clean(dry_run, monitor),
            BackupTarget::Remote(remote) => remote.clean(dry_run, monitor).await,
        }
    }

    pub async fn fsck(&self, verbose: bool, monitor: &dyn Monitor) -> Result<FsckStats> {
        match self {
            BackupTarget::Local { backup, .. } => backup.fsck(verbose, monitor),
            BackupTarget::Remote(remote) => remote.fsck(verbose, monitor).await,
        }
    }

    pub async fn rm(
        &self,
        set: &str,
        when: &When,
        filter: &Filter,
        dry_run: bool,
        monitor: &dyn Monitor,
    ) -> Result<RmStats> {
        match self {
            BackupTarget::Local { backup, user } => {
                backup.rm(user.as_deref(), set, when, filter, dry_run, monitor)
            }
            BackupTarget::Remote(_) => Err(Error::Unsupported("rm")),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        if let BackupTarget::Remote(remote) = self {
            remote.disconnect().await?;
            debug!("Disconnected");
        }
        Ok(())
    }
}
