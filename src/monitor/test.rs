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

//! Collect monitored information so that it can be inspected by tests.

use std::mem::take;
use std::sync::{Arc, Mutex};

use super::Monitor;
use crate::counters::{Counter, Counters};
use crate::Error;

/// A monitor that collects information for later inspection,
/// particularly from tests.
///
/// Errors and lines are collected in vectors.
///
/// Totals of counters are kept.
#[derive(Default)]
pub struct TestMonitor {
    errors: Mutex<Vec<Error>>,
    lines: Mutex<Vec<String>>,
    counters: Counters,
}

impl TestMonitor {
    pub fn new() -> Self {
        TestMonitor::default()
    }

    /// Construct a new TestMonitor and wrap it in an Arc.
    pub fn arc() -> Arc<TestMonitor> {
        Arc::new(TestMonitor::new())
    }

    pub fn get_counter(&self, counter: Counter) -> usize {
        self.counters.get(counter)
    }

    /// Return the list of errors, and clear it.
    pub fn take_errors(&self) -> Vec<Error> {
        take(self.errors.lock().unwrap().as_mut())
    }

    /// Return the lines emitted so far, and clear them.
    pub fn take_lines(&self) -> Vec<String> {
        take(self.lines.lock().unwrap().as_mut())
    }

    /// Assert that no errors have yet occurred (since the list was cleared.)
    ///
    /// Panic if any errors have been reported.
    pub fn assert_no_errors(&self) {
        let errors = self.errors.lock().unwrap();
        assert!(errors.is_empty(), "Unexpected errors: {errors:#?}");
    }

    /// Assert the expected value of a counter.
    pub fn assert_counter(&self, counter: Counter, expected: usize) {
        let actual = self.counters.get(counter);
        assert_eq!(
            actual, expected,
            "Expected counter {counter:?} to be {expected}, but was {actual}",
        );
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl Monitor for TestMonitor {
    fn count(&self, counter: Counter, increment: usize) {
        self.counters.count(counter, increment)
    }

    fn error(&self, error: Error) {
        self.errors.lock().unwrap().push(error);
    }

    fn line(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}
