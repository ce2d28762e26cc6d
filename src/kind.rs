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

//! Kinds of filesystem entries, as seen in a source tree or a manifest.

use std::fmt::Debug;
use std::fs::FileType;

use serde::{Deserialize, Serialize};

/// Kind of file found while walking a source tree.
///
/// Only files and directories are recorded in manifests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Ord, PartialOrd)]
pub enum Kind {
    File,
    Dir,
    Symlink,
    /// Sockets, devices, fifos: never backed up.
    Unknown,
}

impl Kind {
    pub fn is_file(&self) -> bool {
        matches!(self, Kind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Kind::Dir)
    }

    /// The type letter used in manifest lines, if this kind is recorded.
    pub fn manifest_letter(&self) -> Option<&'static str> {
        match self {
            Kind::File => Some("F"),
            Kind::Dir => Some("D"),
            Kind::Symlink | Kind::Unknown => None,
        }
    }

    pub fn from_manifest_letter(letter: &str) -> Option<Kind> {
        match letter {
            "F" => Some(Kind::File),
            "D" => Some(Kind::Dir),
            _ => None,
        }
    }
}

impl From<FileType> for Kind {
    fn from(ft: FileType) -> Kind {
        if ft.is_file() {
            Kind::File
        } else if ft.is_dir() {
            Kind::Dir
        } else if ft.is_symlink() {
            Kind::Symlink
        } else {
            Kind::Unknown
        }
    }
}
