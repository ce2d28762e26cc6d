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

//! Counters of files, bytes and objects processed.
//!
//! Library code sets counters through the [Monitor](crate::monitor::Monitor) interface.

#![warn(missing_docs)]

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

/// Counters of events or bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumCount, EnumIter)]
pub enum Counter {
    /// Number of files processed (backed up, verified, restored).
    Files,
    /// Total bytes in files processed.
    FileBytes,
    /// Number of directories processed.
    Dirs,
    /// Files whose hash was taken from the last backup because their
    /// size and times had not changed.
    FilesUnchanged,
    /// Files hashed during this run.
    FilesHashed,
    /// Files or directories that could not be backed up.
    EntriesSkipped,
    /// Objects newly written to the store.
    ObjectsStored,
    /// Uncompressed bytes in objects newly written to the store.
    ObjectBytesStored,
    /// Objects that were already present.
    ObjectsDeduplicated,
    /// Times a new variant was allocated because of a hash collision.
    VariantsAllocated,
    /// Manifest entries verified.
    EntriesVerified,
    /// Objects checked by fsck.
    ObjectsChecked,
    /// Orphaned objects removed by clean.
    ObjectsRemoved,
    /// Requests sent to a remote server.
    RemoteRequests,
}

/// Counter values, identified by a [Counter].
#[derive(Default)]
pub struct Counters {
    counters: [AtomicUsize; Counter::COUNT],
}

impl Counters {
    /// Increase the value for a given counter by an amount.
    pub fn count(&self, counter: Counter, increment: usize) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }

    /// Set the absolute value of a counter.
    pub fn set(&self, counter: Counter, value: usize) {
        self.counters[counter as usize].store(value, Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Relaxed)
    }

    /// Return an iterator over counter, value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, usize)> {
        Counter::iter()
            .map(move |c| (c, self.counters[c as usize].load(Relaxed)))
            .collect_vec()
            .into_iter()
    }

    /// Counters that have been incremented, for a compact summary.
    pub fn nonzero(&self) -> Vec<(Counter, usize)> {
        self.iter().filter(|(_, v)| *v > 0).collect()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Counters");
        for i in Counter::iter() {
            s.field(
                &format!("{:?}", i),
                &self.counters[i as usize].load(Relaxed),
            );
        }
        s.finish()
    }
}
