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

//! Unix implementation of file ownership.

use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::errno::Errno;
use nix::unistd::{self, Gid, Uid};
use tracing::trace;

use super::Owner;

pub(super) fn owner_from_metadata(metadata: &Metadata) -> Owner {
    Owner {
        uid: Some(metadata.uid()),
        gid: Some(metadata.gid()),
    }
}

pub(super) fn set_owner(owner: &Owner, path: &Path) -> io::Result<()> {
    let uid = owner.uid.map(Uid::from_raw);
    let gid = owner.gid.map(Gid::from_raw);
    match unistd::chown(path, uid, gid) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) => {
            // Restores not run as root normally can't give files away.
            trace!(?path, "Not permitted to set owner");
            Ok(())
        }
        Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}
