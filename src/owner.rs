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

//! Numeric file ownership, as recorded in manifests.

use std::fs::Metadata;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as imp;

#[cfg(not(unix))]
mod windows;
#[cfg(not(unix))]
use windows as imp;

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Owner {
    pub fn is_none(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }

    /// Set the owner of a file or directory.
    ///
    /// Failures caused by lack of privilege are ignored.
    pub fn set_owner(&self, path: &Path) -> io::Result<()> {
        if self.is_none() {
            return Ok(());
        }
        imp::set_owner(self, path)
    }
}

impl From<&Metadata> for Owner {
    fn from(metadata: &Metadata) -> Self {
        imp::owner_from_metadata(metadata)
    }
}
