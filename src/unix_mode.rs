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

//! Unix mode bits of backed-up files.
//!
//! Manifests record the whole `st_mode`, including the file type bits, as an
//! octal number such as `100644`. Only the permission, setuid, setgid and
//! sticky bits are applied on restore.
//!
//! On Windows only the read-only state is captured, in the owner write bit.

use std::fmt;
use std::fs::{self, Metadata, Permissions};
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnixMode {
    pub mode: u32,
}

impl Default for UnixMode {
    fn default() -> Self {
        // Searching directories requires the execute bit.
        Self { mode: 0o775 }
    }
}

impl PartialEq for UnixMode {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode
    }
}

impl Eq for UnixMode {}

impl UnixMode {
    /// Just the bits that can be set with chmod.
    pub fn permissions(self) -> u32 {
        self.mode & 0o7777
    }

    pub fn readonly(self) -> bool {
        self.mode & 0o200 == 0
    }

    /// The octal text form used in manifests.
    pub fn to_octal(self) -> String {
        format!("{:o}", self.mode)
    }

    #[cfg(unix)]
    pub fn set_permissions(self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, Permissions::from_mode(self.permissions()))
    }

    #[cfg(not(unix))]
    pub fn set_permissions(self, path: &Path) -> io::Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(self.readonly());
        fs::set_permissions(path, permissions)
    }
}

/// Symbolic form, like `rwxr-xr-x`.
impl fmt::Display for UnixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            unix_mode::to_string(self.permissions()).trim_start_matches('?')
        )
    }
}

impl FromStr for UnixMode {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u32::from_str_radix(s, 8).map(UnixMode::from)
    }
}

impl From<u32> for UnixMode {
    fn from(mode: u32) -> Self {
        Self { mode }
    }
}

#[cfg(unix)]
impl From<&Metadata> for UnixMode {
    fn from(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            mode: metadata.mode(),
        }
    }
}

#[cfg(not(unix))]
impl From<&Metadata> for UnixMode {
    fn from(metadata: &Metadata) -> Self {
        let type_bits = if metadata.is_dir() { 0o040000 } else { 0o100000 };
        let permission_bits = if metadata.permissions().readonly() {
            0o555
        } else {
            0o775
        };
        Self {
            mode: type_bits | permission_bits,
        }
    }
}
