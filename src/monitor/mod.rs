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

//! Communication from the library to a monitor: a test, a terminal, or an
//! HTTP response stream.

pub mod channel;
pub mod test;
pub mod void;

use crate::counters::Counter;
use crate::Error;

/// A monitor receives events from operations in progress.
pub trait Monitor: Send + Sync + 'static {
    /// Notify that a counter increased by a given amount.
    fn count(&self, counter: Counter, increment: usize);

    /// Notify that a problem occurred that did not stop the operation.
    fn error(&self, error: Error);

    /// Emit one status line, such as the result of verifying one file.
    ///
    /// Lines are the user-visible product of verify, list, fsck and clean,
    /// and may be streamed to a remote client as they're produced.
    fn line(&self, line: String);
}
