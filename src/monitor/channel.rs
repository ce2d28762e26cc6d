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

//! A monitor that forwards status lines into a channel, so that they can be
//! streamed as the body of an HTTP response while the operation runs.

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::Monitor;
use crate::counters::{Counter, Counters};
use crate::Error;

pub struct ChannelMonitor {
    sender: UnboundedSender<String>,
    counters: Counters,
}

impl ChannelMonitor {
    pub fn new(sender: UnboundedSender<String>) -> ChannelMonitor {
        ChannelMonitor {
            sender,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    fn send(&self, mut line: String) {
        line.push('\n');
        // The receiver is gone if the client hung up; the operation still
        // runs to completion.
        let _ = self.sender.send(line);
    }
}

impl Monitor for ChannelMonitor {
    fn count(&self, counter: Counter, increment: usize) {
        self.counters.count(counter, increment)
    }

    fn error(&self, error: Error) {
        warn!("{error}");
        self.send(format!("ERROR {error}"));
    }

    fn line(&self, line: String) {
        self.send(line)
    }
}
