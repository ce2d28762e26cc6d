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

//! Times relative to the Unix epoch.
//!
//! In particular, glue between [filetime], [std::fs::Metadata] and [time].

use std::fs::Metadata;

use filetime::FileTime;
use time::OffsetDateTime;

pub(crate) trait FromUnixAndNanos {
    fn from_unix_seconds_and_nanos(unix_seconds: i64, nanoseconds: u32) -> Self;
}

impl FromUnixAndNanos for OffsetDateTime {
    fn from_unix_seconds_and_nanos(unix_seconds: i64, nanoseconds: u32) -> Self {
        let seconds =
            OffsetDateTime::from_unix_timestamp(unix_seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        seconds.replace_nanosecond(nanoseconds).unwrap_or(seconds)
    }
}

pub(crate) trait ToOffsetDateTime {
    fn to_offset_date_time(&self) -> OffsetDateTime;
}

impl ToOffsetDateTime for FileTime {
    fn to_offset_date_time(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_seconds_and_nanos(self.unix_seconds(), self.nanoseconds())
    }
}

pub(crate) trait ToFileTime {
    fn to_file_time(&self) -> FileTime;
}

impl ToFileTime for OffsetDateTime {
    fn to_file_time(&self) -> FileTime {
        FileTime::from_unix_time(self.unix_timestamp(), self.nanosecond())
    }
}

/// Modification time of a file.
pub(crate) fn mtime(metadata: &Metadata) -> OffsetDateTime {
    FileTime::from_last_modification_time(metadata).to_offset_date_time()
}

/// Inode change time of a file, or the creation or modification time where
/// there is no such thing.
pub(crate) fn ctime(metadata: &Metadata) -> OffsetDateTime {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        OffsetDateTime::from_unix_seconds_and_nanos(
            metadata.ctime(),
            metadata.ctime_nsec().clamp(0, 999_999_999) as u32,
        )
    }
    #[cfg(not(unix))]
    {
        FileTime::from_creation_time(metadata)
            .unwrap_or_else(|| FileTime::from_last_modification_time(metadata))
            .to_offset_date_time()
    }
}
