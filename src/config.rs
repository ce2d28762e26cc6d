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

//! Configuration of backup destinations.

use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::jsonio::{read_json, write_json};
use crate::store::FsType;
use crate::{Error, Result};

/// Current version of the `config.json` format.
pub const CONFIG_VERSION: u32 = 1;

/// Persistent settings of a local destination, stored in `config.json`.
///
/// The fstype is fixed when the destination is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub version: u32,
    pub fstype: FsType,
    #[serde(with = "time::serde::rfc3339")]
    pub saved: OffsetDateTime,
}

impl DestinationConfig {
    pub fn new(fstype: FsType) -> DestinationConfig {
        DestinationConfig {
            version: CONFIG_VERSION,
            fstype,
            saved: OffsetDateTime::now_utc(),
        }
    }

    pub fn read(path: &Path) -> Result<Option<DestinationConfig>> {
        let config: Option<DestinationConfig> = read_json(path)?;
        if let Some(config) = &config {
            if config.version != CONFIG_VERSION {
                return Err(Error::UnsupportedConfigVersion {
                    path: path.to_owned(),
                    version: config.version,
                });
            }
        }
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Options for connecting to a destination, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
    /// Required store layout; a destination with a different layout is an error.
    /// Also the layout of newly created destinations.
    pub fstype: Option<FsType>,
    /// Trust hash matches without comparing content.
    pub fast: bool,
    /// Namespace manifests under this user id.
    pub userid: Option<String>,
    /// Key used to log in to a remote server.
    pub access_key: Option<String>,
}
