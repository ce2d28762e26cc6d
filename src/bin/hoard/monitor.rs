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

//! Monitor that reports to the terminal.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use hoard::counters::{Counter, Counters};
use hoard::{Error, Monitor};
use tracing::{debug, error};

/// Prints status lines on stdout and logs errors, keeping count of them so
/// the exit code can reflect non-fatal problems.
#[derive(Default)]
pub struct TerminalMonitor {
    counters: Counters,
    errors: AtomicUsize,
}

impl TerminalMonitor {
    pub fn new() -> TerminalMonitor {
        TerminalMonitor::default()
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// Log the counters that moved, for debugging.
    pub fn trace_counters(&self) {
        for (counter, value) in self.counters.nonzero() {
            debug!(?counter, value);
        }
    }
}

impl Monitor for TerminalMonitor {
    fn count(&self, counter: Counter, increment: usize) {
        self.counters.count(counter, increment)
    }

    fn error(&self, error: Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!("{error}");
    }

    fn line(&self, line: String) {
        let mut stdout = std::io::stdout().lock();
        // A closed pipe shouldn't abort the operation.
        let _ = writeln!(stdout, "{line}");
    }
}
