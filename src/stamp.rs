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

//! Timestamps identifying backup runs, and selection of a run.

use std::fmt;
use std::str::FromStr;

use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::{Error, Result};

/// Compact form used as a manifest filename suffix, such as `20240102T030405678Z`.
const COMPACT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second][subsecond digits:3]Z");

/// Expanded ISO-8601 form used when listing, such as `2024-01-02T03:04:05.678Z`.
const EXPANDED: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

const COMPACT_LEN: usize = 19;

/// The UTC time a backup run started, at millisecond precision.
///
/// Stamps sort chronologically, and so do their string forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp(OffsetDateTime);

impl Stamp {
    pub fn now() -> Stamp {
        Stamp::from(OffsetDateTime::now_utc())
    }

    pub fn time(&self) -> OffsetDateTime {
        self.0
    }

    /// The next later stamp, one millisecond on.
    pub fn next(&self) -> Stamp {
        Stamp(self.0 + time::Duration::milliseconds(1))
    }

    /// Format with punctuation, for people to read.
    pub fn to_iso(&self) -> String {
        self.0
            .format(EXPANDED)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl From<OffsetDateTime> for Stamp {
    fn from(time: OffsetDateTime) -> Stamp {
        let time = time.to_offset(UtcOffset::UTC);
        let millis = time.millisecond();
        Stamp(time.replace_millisecond(millis).unwrap_or(time))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.format(COMPACT).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

impl FromStr for Stamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Stamp> {
        if s.len() != COMPACT_LEN || !s.is_ascii() {
            return Err(Error::InvalidStamp(s.to_owned()));
        }
        PrimitiveDateTime::parse(s, COMPACT)
            .map(|t| Stamp(t.assume_utc()))
            .map_err(|_| Error::InvalidStamp(s.to_owned()))
    }
}

/// Selects one manifest of a backup set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum When {
    /// The most recent sealed run.
    #[default]
    Current,
    /// The run in progress, if any.
    Running,
    /// A sealed run that started at this time.
    At(Stamp),
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            When::Current => f.write_str("current"),
            When::Running => f.write_str("running"),
            When::At(stamp) => stamp.fmt(f),
        }
    }
}

impl FromStr for When {
    type Err = Error;

    /// Accepts `current`, `running`, a compact stamp, or an RFC 3339 time.
    fn from_str(s: &str) -> Result<When> {
        match s {
            "current" => Ok(When::Current),
            "running" => Ok(When::Running),
            _ => match s.parse::<Stamp>() {
                Ok(stamp) => Ok(When::At(stamp)),
                Err(_) => OffsetDateTime::parse(s, &Rfc3339)
                    .map(|t| When::At(Stamp::from(t)))
                    .map_err(|_| Error::InvalidStamp(s.to_owned())),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn format_compact() {
        let stamp = Stamp::from(datetime!(2024-01-02 03:04:05.678912 UTC));
        assert_eq!(stamp.to_string(), "20240102T030405678Z");
        assert_eq!(stamp.to_iso(), "2024-01-02T03:04:05.678Z");
    }

    #[test]
    fn parse_reverses_format() {
        let stamp = Stamp::from(datetime!(1999-12-31 23:59:59.001 UTC));
        let parsed: Stamp = stamp.to_string().parse().unwrap();
        assert_eq!(parsed, stamp);
    }

    #[test]
    fn local_offsets_become_utc() {
        let stamp = Stamp::from(datetime!(2024-06-01 12:00:00 +02:00));
        assert_eq!(stamp.to_string(), "20240601T100000000Z");
    }

    #[test]
    fn order_matches_string_order() {
        let a = Stamp::from(datetime!(2024-01-02 03:04:05.678 UTC));
        let b = Stamp::from(datetime!(2024-01-02 03:04:05.679 UTC));
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
        assert_eq!(a.next(), b);
    }

    #[test]
    fn reject_bad_stamps() {
        for bad in [
            "",
            "20240102T030405678",
            "20240102T030405678Zx",
            "2024-01-02T03:04:05Z",
            "20241302T030405678Z",
            "2024010aT030405678Z",
        ] {
            assert_matches!(bad.parse::<Stamp>(), Err(Error::InvalidStamp(_)), "{bad:?}");
        }
    }

    #[test]
    fn parse_when() {
        assert_eq!("current".parse::<When>().unwrap(), When::Current);
        assert_eq!("running".parse::<When>().unwrap(), When::Running);
        let expected = When::At("20240102T030405678Z".parse().unwrap());
        assert_eq!("20240102T030405678Z".parse::<When>().unwrap(), expected);
        assert_eq!(
            "2024-01-02T03:04:05.678Z".parse::<When>().unwrap(),
            expected
        );
        assert!("yesterday".parse::<When>().is_err());
        assert_eq!(expected.to_string(), "20240102T030405678Z");
    }
}
