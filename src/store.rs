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

//! Content-addressed object storage on the local filesystem.
//!
//! Objects are addressed by an [ObjectKey] and stored in a directory tree
//! whose layout depends on the store's [FsType]:
//!
//! * `hash-v3`: `<crc8(first half of hash)>/<crc8(second half)>/<hash>.<variant>.<size>`,
//!   stored uncompressed.
//! * `hash-v4`: the same paths as v3, gzip-compressed.
//! * `hash-v5`: `<hash[0:2]>/<hash[2:4]>/<hash[4:]>.<size>`, gzip-compressed.
//!   There is no variant in the path, so only variant 0 can be stored.
//!
//! `hash-v1` and `hash-v2` stores are recognized but can't be mounted.
//!
//! The layout is fixed when the destination is created, and every mapping
//! from key to path has an inverse, [ContentStore::key_from_file], used by
//! garbage collection to find out which object a file holds.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crc::{Crc, CRC_8_SMBUS};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, trace};

use crate::compress;
use crate::key::{hash_reader, is_valid_hash, ObjectKey};
use crate::{Error, Result, TMP_PREFIX};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// On-disk layout version of an object store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub enum FsType {
    V1,
    V2,
    V3,
    V4,
    V5,
}

impl FsType {
    /// The layout used for new destinations.
    pub const CURRENT: FsType = FsType::V5;

    pub fn name(self) -> &'static str {
        match self {
            FsType::V1 => "hash-v1",
            FsType::V2 => "hash-v2",
            FsType::V3 => "hash-v3",
            FsType::V4 => "hash-v4",
            FsType::V5 => "hash-v5",
        }
    }

    /// True if objects are gzipped at rest.
    pub fn is_compressed(self) -> bool {
        matches!(self, FsType::V4 | FsType::V5)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<FsType> {
        match s {
            "hash-v1" => Ok(FsType::V1),
            "hash-v2" => Ok(FsType::V2),
            "hash-v3" => Ok(FsType::V3),
            "hash-v4" => Ok(FsType::V4),
            "hash-v5" => Ok(FsType::V5),
            other => Err(Error::UnsupportedFsType(other.to_owned())),
        }
    }
}

impl From<FsType> for String {
    fn from(fstype: FsType) -> String {
        fstype.name().to_owned()
    }
}

impl TryFrom<String> for FsType {
    type Error = Error;

    fn try_from(s: String) -> Result<FsType> {
        s.parse()
    }
}

/// A layout that can be mounted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    /// CRC8 buckets, uncompressed.
    V3,
    /// CRC8 buckets, gzipped.
    V4,
    /// Hash-prefix buckets without variants, gzipped.
    V5,
}

/// A file found while walking the store.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Full path of the file.
    pub path: PathBuf,
    /// The object it holds, or None if it's not an object file.
    pub key: Option<ObjectKey>,
}

/// Objects stored under one directory, in one layout.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    layout: Layout,
}

impl ContentStore {
    /// Mount an existing or new store directory with a given layout.
    ///
    /// The directory is created if it does not exist.
    pub fn mount(root: &Path, fstype: FsType) -> Result<ContentStore> {
        let layout = match fstype {
            FsType::V1 | FsType::V2 => {
                return Err(Error::UnsupportedFsType(fstype.name().to_owned()))
            }
            FsType::V3 => Layout::V3,
            FsType::V4 => Layout::V4,
            FsType::V5 => Layout::V5,
        };
        fs::create_dir_all(root).map_err(|source| Error::io(root, source))?;
        Ok(ContentStore {
            root: root.to_owned(),
            layout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fstype(&self) -> FsType {
        match self.layout {
            Layout::V3 => FsType::V3,
            Layout::V4 => FsType::V4,
            Layout::V5 => FsType::V5,
        }
    }

    /// True if the layout can hold more than one variant for a hash and size.
    pub fn supports_variants(&self) -> bool {
        self.layout != Layout::V5
    }

    /// The canonical key for an object in this store.
    ///
    /// v5 has no variants, so the variant is always 0 there.
    pub fn key(&self, hash: &str, variant: u32, size: u64) -> ObjectKey {
        let variant = if self.supports_variants() { variant } else { 0 };
        ObjectKey::new(hash, variant, size)
    }

    /// Relative path of the object within the store. Does no IO.
    pub fn relpath(&self, key: &ObjectKey) -> PathBuf {
        let hash = &key.hash;
        match self.layout {
            Layout::V3 | Layout::V4 => {
                let mid = hash.len() / 2;
                let (a, b) = if hash.is_char_boundary(mid) {
                    hash.split_at(mid)
                } else {
                    (hash.as_str(), "")
                };
                let mut path = PathBuf::from(format!("{:02x}", CRC8.checksum(a.as_bytes())));
                path.push(format!("{:02x}", CRC8.checksum(b.as_bytes())));
                path.push(format!("{}.{}.{}", hash, key.variant, key.size));
                path
            }
            Layout::V5 => {
                let mut path = PathBuf::from(hash.get(0..2).unwrap_or_default());
                path.push(hash.get(2..4).unwrap_or_default());
                path.push(format!("{}.{}", hash.get(4..).unwrap_or_default(), key.size));
                path
            }
        }
    }

    /// Full path of the object file.
    pub fn path(&self, key: &ObjectKey) -> PathBuf {
        self.root.join(self.relpath(key))
    }

    /// Recover the key of the object held in a file, from its directory
    /// relative to the store root and its name.
    ///
    /// Returns None for files that are not objects, including temporary files.
    pub fn key_from_file(&self, dir: &Path, name: &str) -> Option<ObjectKey> {
        if name.starts_with(TMP_PREFIX) || name.starts_with('.') {
            return None;
        }
        match self.layout {
            Layout::V3 | Layout::V4 => {
                let key: ObjectKey = name.parse().ok()?;
                (self.relpath(&key).parent()? == dir).then_some(key)
            }
            Layout::V5 => {
                let mut dirs = dir.iter().map(|c| c.to_str());
                let (Some(Some(a)), Some(Some(b)), None) = (dirs.next(), dirs.next(), dirs.next())
                else {
                    return None;
                };
                let (rest, size) = name.split_once('.')?;
                let hash = format!("{a}{b}{rest}");
                if a.len() != 2 || b.len() != 2 || !is_valid_hash(&hash) {
                    return None;
                }
                Some(ObjectKey::new(hash, 0, size.parse().ok()?))
            }
        }
    }

    pub fn exists(&self, key: &ObjectKey) -> bool {
        self.path(key).is_file()
    }

    fn create_parent(&self, path: &Path) -> io::Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        if self.layout == Layout::V5 {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(parent)
    }

    /// Store the content of a local file as an object.
    ///
    /// If `precompressed` is true the source is already a gzip stream, as
    /// received from a remote client, and is decompressed or passed through
    /// as the layout requires.
    ///
    /// Storing an object that is already present leaves the existing copy in place.
    ///
    /// Returns the number of bytes written to disk.
    #[instrument(skip(self))]
    pub fn store(&self, source: &Path, key: &ObjectKey, precompressed: bool) -> Result<u64> {
        let store_err = |source| Error::StoreObject {
            key: key.clone(),
            source,
        };
        if !self.supports_variants() && key.variant != 0 {
            return Err(Error::VariantsNotSupported {
                fstype: self.fstype(),
                hash: key.hash.clone(),
                variant: key.variant,
            });
        }
        let input = File::open(source).map_err(|source_err| Error::ReadSource {
            path: source.to_owned(),
            source: source_err,
        })?;
        let path = self.path(key);
        self.create_parent(&path).map_err(store_err)?;
        let dir = path.parent().unwrap_or(&self.root);
        let mut temp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(dir)
            .map_err(store_err)?;
        let written = match (self.fstype().is_compressed(), precompressed) {
            (true, false) => compress::compress(input, temp.as_file_mut()),
            (false, true) => compress::decompress(input, temp.as_file_mut()),
            _ => io::copy(&mut &input, temp.as_file_mut()),
        }
        .map_err(store_err)?;
        temp.as_file_mut().flush().map_err(store_err)?;
        persist(temp, &path).map_err(store_err)?;
        trace!(%key, written, "Stored object");
        Ok(written)
    }

    fn open(&self, key: &ObjectKey) -> Result<File> {
        File::open(self.path(key)).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                Error::ObjectNotFound { key: key.clone() }
            } else {
                Error::ReadObject {
                    key: key.clone(),
                    source,
                }
            }
        })
    }

    /// Write the content of an object to `out`.
    ///
    /// If `compressed` is true, the gzip form is written, as sent to remote
    /// clients; otherwise the plain content.
    ///
    /// Returns the number of bytes written.
    pub fn restore<W: Write + ?Sized>(
        &self,
        key: &ObjectKey,
        out: &mut W,
        compressed: bool,
    ) -> Result<u64> {
        let mut file = self.open(key)?;
        match (self.fstype().is_compressed(), compressed) {
            (true, false) => compress::decompress(file, out),
            (false, true) => compress::compress(file, out),
            _ => io::copy(&mut file, out),
        }
        .map_err(|source| Error::ReadObject {
            key: key.clone(),
            source,
        })
    }

    /// Open a file holding the gzip form of the object, positioned at the start.
    ///
    /// For compressed layouts this is the object file itself; otherwise a
    /// compressed copy is made in an anonymous temporary file.
    pub fn open_compressed(&self, key: &ObjectKey) -> Result<File> {
        if self.fstype().is_compressed() {
            return self.open(key);
        }
        let read_err = |source| Error::ReadObject {
            key: key.clone(),
            source,
        };
        let mut temp = tempfile::tempfile().map_err(read_err)?;
        self.restore(key, &mut temp, true)?;
        temp.rewind().map_err(read_err)?;
        Ok(temp)
    }

    /// Compare the content of an object to a local file.
    ///
    /// Returns [Error::ContentChanged] if they differ.
    pub fn compare(&self, key: &ObjectKey, other: &Path) -> Result<()> {
        let stored = self.open(key)?;
        let other_file = File::open(other).map_err(|source| Error::io(other, source))?;
        let equal = if self.fstype().is_compressed() {
            compress::readers_equal(compress::decompressing_reader(stored), other_file)
        } else {
            compress::readers_equal(stored, other_file)
        }
        .map_err(|source| Error::ReadObject {
            key: key.clone(),
            source,
        })?;
        if equal {
            Ok(())
        } else {
            debug!(%key, ?other, "Content differs");
            Err(Error::ContentChanged {
                key: key.clone(),
                path: other.to_owned(),
            })
        }
    }

    /// Recompute the hash of an object's stored content.
    pub fn hash_key(&self, key: &ObjectKey) -> Result<String> {
        let file = self.open(key)?;
        if self.fstype().is_compressed() {
            hash_reader(compress::decompressing_reader(file))
        } else {
            hash_reader(file)
        }
        .map_err(|source| Error::ReadObject {
            key: key.clone(),
            source,
        })
    }

    /// Hash a local file, in the same way as objects are hashed.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        crate::key::hash_file(path)
    }

    /// List every file under the store root, with the object it holds if any.
    pub fn list_files(&self) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        let mut dirs = vec![PathBuf::new()];
        while let Some(rel_dir) = dirs.pop() {
            let full_dir = self.root.join(&rel_dir);
            let mut children = fs::read_dir(&full_dir)
                .map_err(|source| Error::io(&full_dir, source))?
                .collect::<io::Result<Vec<_>>>()
                .map_err(|source| Error::io(&full_dir, source))?;
            children.sort_by_key(|entry| entry.file_name());
            for child in children {
                let file_type = child
                    .file_type()
                    .map_err(|source| Error::io(child.path(), source))?;
                let Some(name) = child.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if file_type.is_dir() {
                    dirs.push(rel_dir.join(&name));
                } else if file_type.is_file() {
                    files.push(StoredFile {
                        key: self.key_from_file(&rel_dir, &name),
                        path: child.path(),
                    });
                }
            }
        }
        Ok(files)
    }

    /// Delete an object file, then any parent directories that are left
    /// empty, stopping at the store root.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|source| Error::io(path, source))?;
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            match fs::remove_dir(d) {
                Ok(()) => trace!(?d, "Removed empty directory"),
                // Not empty, or somehow already gone: either way stop here.
                Err(_) => break,
            }
            dir = d.parent();
        }
        Ok(())
    }
}

/// Move a completed temporary file into place, keeping any object that's
/// already there.
fn persist(temp: NamedTempFile, path: &Path) -> io::Result<()> {
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.error),
    }
}
