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

use tracing::warn;

use super::Monitor;
use crate::counters::Counter;
use crate::Error;

/// A monitor that discards lines and counters, and only logs errors.
#[derive(Debug, Clone)]
pub struct VoidMonitor;

impl Monitor for VoidMonitor {
    fn count(&self, _counter: Counter, _increment: usize) {}

    fn error(&self, error: Error) {
        warn!("{error}");
    }

    fn line(&self, _line: String) {}
}
