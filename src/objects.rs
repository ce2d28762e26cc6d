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

//! Deduplicating object storage on top of a [ContentStore].
//!
//! Callers supply the hash they computed while reading the file. If an
//! object with the same hash and size is already stored, its content is
//! compared to the source, and a different variant is allocated if they
//! differ.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::counters::Counter;
use crate::key::is_valid_hash;
use crate::monitor::Monitor;
use crate::{ContentStore, Error, ObjectKey, Result};

/// Result of putting one file into the store.
///
/// Also the JSON body of the server's response to an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    /// The variant holding this content.
    pub variant: u32,
    /// True if new content was written; false if it was already present.
    pub stored: bool,
}

/// Keys already known to be present during one run, used only in fast mode.
///
/// In fast mode a hash match is trusted without comparing content, so
/// remembering keys here skips even the existence check for duplicate files.
#[derive(Debug, Default)]
pub struct SeenCache {
    keys: HashSet<ObjectKey>,
}

impl SeenCache {
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.keys.contains(key)
    }

    pub fn insert(&mut self, key: ObjectKey) {
        self.keys.insert(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Puts files into a content store, resolving hash collisions with variants.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    store: ContentStore,
    fast: bool,
}

impl ObjectStore {
    pub fn new(store: ContentStore, fast: bool) -> ObjectStore {
        ObjectStore { store, fast }
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.store
    }

    pub fn is_fast(&self) -> bool {
        self.fast
    }

    /// Store the content of `source`, which was hashed to `hash` and has
    /// length `size`, starting from `start_variant`.
    ///
    /// If the candidate object exists and its content differs from the
    /// source, the source is hashed again. If it still hashes to `hash`, the
    /// two really are different contents with the same hash, and the next
    /// variant is tried. Otherwise the file changed after it was hashed,
    /// which fails this file.
    #[instrument(skip(self, seen, monitor))]
    pub fn put(
        &self,
        source: &Path,
        size: u64,
        hash: &str,
        start_variant: u32,
        seen: &mut SeenCache,
        monitor: &dyn Monitor,
    ) -> Result<PutOutcome> {
        if !is_valid_hash(hash) {
            return Err(Error::InvalidKey(hash.to_owned()));
        }
        let mut variant = start_variant;
        loop {
            let key = self.store.key(hash, variant, size);
            variant = key.variant;
            if self.fast && seen.contains(&key) {
                monitor.count(Counter::ObjectsDeduplicated, 1);
                return Ok(PutOutcome {
                    variant,
                    stored: false,
                });
            }
            if self.store.exists(&key) {
                if self.fast {
                    seen.insert(key);
                    monitor.count(Counter::ObjectsDeduplicated, 1);
                    return Ok(PutOutcome {
                        variant,
                        stored: false,
                    });
                }
                match self.store.compare(&key, source) {
                    Ok(()) => {
                        monitor.count(Counter::ObjectsDeduplicated, 1);
                        return Ok(PutOutcome {
                            variant,
                            stored: false,
                        });
                    }
                    Err(Error::ContentChanged { .. }) => {
                        let actual = self.store.hash_file(source)?;
                        if actual != hash {
                            return Err(Error::FileChangedDuringBackup {
                                path: source.to_owned(),
                                expected: hash.to_owned(),
                                actual,
                            });
                        }
                        if !self.store.supports_variants() {
                            warn!(%key, ?source, "Hash collision with different content");
                            return Err(Error::VariantsNotSupported {
                                fstype: self.store.fstype(),
                                hash: hash.to_owned(),
                                variant: variant + 1,
                            });
                        }
                        debug!(%key, ?source, "Content differs; trying next variant");
                        monitor.count(Counter::VariantsAllocated, 1);
                        variant += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
            let written = self.store.store(source, &key, false)?;
            monitor.count(Counter::ObjectsStored, 1);
            monitor.count(Counter::ObjectBytesStored, written as usize);
            if self.fast {
                seen.insert(key);
            }
            return Ok(PutOutcome {
                variant,
                stored: true,
            });
        }
    }

    /// Store a gzip stream received from a remote client, unless the object
    /// is already present.
    ///
    /// The client has already found the variant, so no comparison is done.
    pub fn put_precompressed(&self, source: &Path, key: &ObjectKey) -> Result<bool> {
        if self.store.exists(key) {
            return Ok(false);
        }
        self.store.store(source, key, true)?;
        Ok(true)
    }
}
