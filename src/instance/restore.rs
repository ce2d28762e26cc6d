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

//! Replay a manifest into a directory tree.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::set_file_handle_times;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, instrument, trace};

use super::{FetchObject, RestoreOptions};
use crate::counters::Counter;
use crate::key::hash_file;
use crate::manifest::{Entry, Line};
use crate::monitor::Monitor;
use crate::stats::RestoreStats;
use crate::unix_time::ToFileTime;
use crate::{Error, Owner, Result, UnixMode};

/// Restore the entries of a manifest, in order.
///
/// Directories are created as they are reached, which is always before
/// their children; their mode, owner and mtime are applied at the end so
/// that read-only directories can still be filled.
///
/// Errors restoring one entry are reported to the monitor and counted, and
/// the rest of the manifest is still restored.
pub(crate) async fn restore_lines(
    lines: &[Line],
    options: &RestoreOptions,
    fetch: &dyn FetchObject,
    monitor: Arc<dyn Monitor>,
) -> Result<RestoreStats> {
    if options.output.is_none() && !options.force {
        return Err(Error::RestoreNeedsOutput);
    }
    let mut stats = RestoreStats::default();
    let mut base: Option<PathBuf> = None;
    let mut deferrals = Vec::new();
    for line in lines {
        let entry = match line {
            Line::Source { root } => {
                let root = options.output.clone().unwrap_or_else(|| PathBuf::from(root));
                debug!(?root, "Restore source");
                base = Some(root);
                continue;
            }
            Line::Entry(entry) => entry,
            _ => continue,
        };
        let Some(base) = &base else {
            return Err(Error::MissingRoot {
                path: entry.path.clone(),
            });
        };
        if options.filter.ignores(&entry.path) {
            continue;
        }
        let path = entry.full_path(base);
        if entry.kind.is_dir() {
            monitor.count(Counter::Dirs, 1);
            if let Err(source) = restore_dir(&path) {
                monitor.error(Error::RestoreDirectory { path, source });
                stats.errors += 1;
                continue;
            }
            stats.dirs += 1;
            deferrals.push(DirDeferral {
                path,
                unix_mode: entry.mode,
                mtime: entry.mtime,
                owner: entry.owner(),
            });
        } else if entry.kind.is_file() {
            monitor.count(Counter::Files, 1);
            match restore_file(&path, entry, options, fetch, monitor.as_ref()).await {
                Ok(Restored::Written(bytes)) => {
                    stats.files += 1;
                    stats.bytes += bytes;
                }
                Ok(Restored::Unchanged) => {
                    stats.files += 1;
                    stats.unchanged += 1;
                    monitor.count(Counter::FilesUnchanged, 1);
                }
                Err(err) => {
                    monitor.error(err);
                    stats.errors += 1;
                }
            }
        }
    }
    apply_deferrals(&deferrals, monitor.as_ref());
    Ok(stats)
}

fn restore_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).or_else(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            Ok(())
        } else {
            Err(err)
        }
    })
}

/// Recorded changes to apply to directories after all their contents
/// have been applied.
///
/// For example we might want to make the directory read-only, but we
/// shouldn't do that until we added all the children.
struct DirDeferral {
    path: PathBuf,
    unix_mode: UnixMode,
    mtime: OffsetDateTime,
    owner: Owner,
}

fn apply_deferrals(deferrals: &[DirDeferral], monitor: &dyn Monitor) {
    // Children first, so that setting a child's mtime doesn't disturb its parent's.
    for DirDeferral {
        path,
        unix_mode,
        mtime,
        owner,
    } in deferrals.iter().rev()
    {
        if let Err(source) = owner.set_owner(path) {
            monitor.error(Error::RestoreOwnership {
                path: path.clone(),
                source,
            });
        }
        if let Err(source) = unix_mode.set_permissions(path) {
            monitor.error(Error::RestorePermissions {
                path: path.clone(),
                source,
            });
        }
        if let Err(source) = filetime::set_file_mtime(path, mtime.to_file_time()) {
            monitor.error(Error::RestoreModificationTime {
                path: path.clone(),
                source,
            });
        }
    }
}

enum Restored {
    Written(u64),
    Unchanged,
}

/// True if the file at `path` already has the content recorded in `entry`.
fn is_unchanged(path: &Path, entry: &Entry) -> bool {
    let (Some(size), Some(hash)) = (entry.size, &entry.hash) else {
        return false;
    };
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() && metadata.len() == size => {
            hash_file(path).is_ok_and(|actual| actual == *hash)
        }
        _ => false,
    }
}

#[instrument(skip(entry, options, fetch, monitor))]
async fn restore_file(
    path: &Path,
    entry: &Entry,
    options: &RestoreOptions,
    fetch: &dyn FetchObject,
    monitor: &dyn Monitor,
) -> Result<Restored> {
    let restore_err = |source| Error::RestoreFile {
        path: path.to_owned(),
        source,
    };
    let key = entry.key().ok_or_else(|| {
        restore_err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file entry has no hash",
        ))
    })?;
    if let Some(parent) = path.parent() {
        restore_dir(parent).map_err(|source| Error::RestoreDirectory {
            path: parent.to_owned(),
            source,
        })?;
    }
    let unchanged = options.skip_unchanged && {
        let (path, entry) = (path.to_owned(), entry.clone());
        crate::blocking(move || Ok(is_unchanged(&path, &entry))).await?
    };
    let (out, restored) = if unchanged {
        trace!("File is unchanged");
        let out = File::open(path).map_err(restore_err)?;
        (out, Restored::Unchanged)
    } else {
        // Any existing file is only replaced once the whole object is fetched.
        let parent = path.parent().unwrap_or(Path::new("."));
        let temp = NamedTempFile::new_in(parent).map_err(restore_err)?;
        let bytes = fetch
            .fetch(&key, temp.as_file().try_clone().map_err(restore_err)?)
            .await?;
        let out = temp.persist(path).map_err(|err| restore_err(err.error))?;
        monitor.count(Counter::FileBytes, bytes as usize);
        (out, Restored::Written(bytes))
    };

    let mtime = Some(entry.mtime.to_file_time());
    set_file_handle_times(&out, mtime, mtime).map_err(|source| {
        Error::RestoreModificationTime {
            path: path.to_owned(),
            source,
        }
    })?;
    drop(out);

    if let Err(source) = entry.mode.set_permissions(path) {
        monitor.error(Error::RestorePermissions {
            path: path.to_owned(),
            source,
        });
    }
    // Lack of privilege to chown is already ignored; anything else is only
    // reported, since the content is restored.
    if let Err(source) = entry.owner().set_owner(path) {
        monitor.error(Error::RestoreOwnership {
            path: path.to_owned(),
            source,
        });
    }
    trace!("Restored file");
    Ok(restored)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::key::hash_bytes;
    use crate::monitor::test::TestMonitor;
    use crate::{Filter, ObjectKey};

    /// Objects held in memory, recording which were fetched.
    #[derive(Default)]
    struct MemoryObjects {
        objects: HashMap<ObjectKey, Vec<u8>>,
        fetched: Mutex<Vec<ObjectKey>>,
    }

    impl MemoryObjects {
        fn add(&mut self, content: &[u8]) -> String {
            let hash = hash_bytes(content);
            self.objects.insert(
                ObjectKey::new(hash.clone(), 0, content.len() as u64),
                content.to_vec(),
            );
            hash
        }
    }

    #[async_trait]
    impl FetchObject for MemoryObjects {
        async fn fetch(&self, key: &ObjectKey, mut out: File) -> Result<u64> {
            self.fetched.lock().unwrap().push(key.clone());
            let content = self
                .objects
                .get(key)
                .ok_or_else(|| Error::ObjectNotFound { key: key.clone() })?;
            out.write_all(content)?;
            Ok(content.len() as u64)
        }
    }

    fn manifest(hash: &str) -> Vec<Line> {
        format!(
            r#"V2 type mode ctime mtime - size hash path
SOURCE /nonexistent/source
D ::40755 2024-01-01T00:00:00Z 2024-01-01T00:00:00Z - - - 0 ""
D ::40755 2024-01-01T00:00:00Z 2024-01-01T00:00:00Z - - - 0 "a"
D ::40700 2024-01-01T00:00:00Z 2024-01-01T00:00:00Z - - - 0 "a/b"
F ::100640 2024-01-01T00:00:00Z 2023-06-01T00:00:00Z - 5 {hash} 0 "a/b/c.txt"
V2 STATUS OK {{"files":1}}"#
        )
        .lines()
        .map(Line::parse)
        .collect()
    }

    #[tokio::test]
    async fn directories_before_files() {
        let mut objects = MemoryObjects::default();
        let hash = objects.add(b"hello");
        let out = TempDir::new().unwrap();
        let monitor = TestMonitor::arc();
        let options = RestoreOptions {
            output: Some(out.path().to_owned()),
            ..Default::default()
        };
        let stats = restore_lines(&manifest(&hash), &options, &objects, monitor.clone())
            .await
            .unwrap();
        monitor.assert_no_errors();
        assert_eq!(stats.dirs, 3);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 5);
        let c = out.path().join("a/b/c.txt");
        assert_eq!(fs::read(&c).unwrap(), b"hello");
        let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&c).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_685_577_600);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&c).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
            let mode = fs::metadata(out.path().join("a/b")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[tokio::test]
    async fn needs_output_or_force() {
        let objects = MemoryObjects::default();
        assert_matches!(
            restore_lines(
                &manifest("aaaaaaaa"),
                &RestoreOptions::default(),
                &objects,
                TestMonitor::arc()
            )
            .await,
            Err(Error::RestoreNeedsOutput)
        );
    }

    #[tokio::test]
    async fn entry_before_source_is_missing_root() {
        let lines: Vec<Line> = [
            "V2 type mode ctime mtime - size hash path",
            r#"D ::40755 2024-01-01T00:00:00Z 2024-01-01T00:00:00Z - - - 0 "a""#,
        ]
        .into_iter()
        .map(Line::parse)
        .collect();
        let out = TempDir::new().unwrap();
        let options = RestoreOptions {
            output: Some(out.path().to_owned()),
            ..Default::default()
        };
        assert_matches!(
            restore_lines(&lines, &options, &MemoryObjects::default(), TestMonitor::arc()).await,
            Err(Error::MissingRoot { .. })
        );
    }

    #[tokio::test]
    async fn missing_object_is_counted_and_restore_continues() {
        let objects = MemoryObjects::default();
        let out = TempDir::new().unwrap();
        let existing = out.path().join("a/b/c.txt");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"live data").unwrap();
        let monitor = TestMonitor::arc();
        let options = RestoreOptions {
            output: Some(out.path().to_owned()),
            ..Default::default()
        };
        let stats = restore_lines(
            &manifest(&hash_bytes(b"hello")),
            &options,
            &objects,
            monitor.clone(),
        )
        .await
        .unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.dirs, 3);
        let errors = monitor.take_errors();
        assert_matches!(errors[..], [Error::ObjectNotFound { .. }]);
        assert_eq!(fs::read(&existing).unwrap(), b"live data");
        assert_eq!(fs::read_dir(existing.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn filter_and_skip_unchanged() {
        let mut objects = MemoryObjects::default();
        let hash = objects.add(b"hello");
        let out = TempDir::new().unwrap();
        let options = RestoreOptions {
            output: Some(out.path().to_owned()),
            skip_unchanged: true,
            ..Default::default()
        };
        let lines = manifest(&hash);
        restore_lines(&lines, &options, &objects, TestMonitor::arc())
            .await
            .unwrap();
        assert_eq!(objects.fetched.lock().unwrap().len(), 1);

        let stats = restore_lines(&lines, &options, &objects, TestMonitor::arc())
            .await
            .unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(objects.fetched.lock().unwrap().len(), 1);

        let other = TempDir::new().unwrap();
        let options = RestoreOptions {
            output: Some(other.path().to_owned()),
            filter: Filter::new(&["-a/b"]).unwrap(),
            ..Default::default()
        };
        let stats = restore_lines(&lines, &options, &objects, TestMonitor::arc())
            .await
            .unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.dirs, 2);
        assert!(!other.path().join("a/b").exists());
    }
}
