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

//! Object keys, and the content hash that addresses them.
//!
//! An object is identified by the hex SHA-256 of its uncompressed content,
//! its length, and a variant number that distinguishes different content
//! that happens to have the same hash and size.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Identifies one stored object.
///
/// The text form is `hash.variant.size`, used on the wire and in
/// garbage-collection reports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub struct ObjectKey {
    pub hash: String,
    pub variant: u32,
    pub size: u64,
}

impl ObjectKey {
    pub fn new(hash: impl Into<String>, variant: u32, size: u64) -> ObjectKey {
        ObjectKey {
            hash: hash.into(),
            variant,
            size,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.hash, self.variant, self.size)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<ObjectKey> {
        let invalid = || Error::InvalidKey(s.to_owned());
        let mut parts = s.split('.');
        let (Some(hash), Some(variant), Some(size), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if !is_valid_hash(hash) {
            return Err(invalid());
        }
        Ok(ObjectKey {
            hash: hash.to_owned(),
            variant: variant.parse().map_err(|_| invalid())?,
            size: size.parse().map_err(|_| invalid())?,
        })
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> String {
        key.to_string()
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = Error;

    fn try_from(s: String) -> Result<ObjectKey> {
        s.parse()
    }
}

/// True if `hash` looks like a lowercase hex digest long enough to be
/// split into the store's directory levels.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() >= 8
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Hash everything readable from `r`.
pub fn hash_reader(mut r: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 << 10];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash the content of a local file.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|source| Error::ReadSource {
        path: path.to_owned(),
        source,
    })?;
    hash_reader(file).map_err(|source| Error::ReadSource {
        path: path.to_owned(),
        source,
    })
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
