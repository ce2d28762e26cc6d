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

//! Tracing setup for the command line.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::{trace, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::{self, FormatTime};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

/// Chosen style of timestamp prefix on trace lines.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TraceTimeStyle {
    /// No timestamp on trace lines.
    None,
    /// Universal time, in RFC 3339 style.
    Utc,
    /// Local time, in RFC 3339, using the offset when the program starts.
    Local,
    /// Time since the start of the process, in seconds.
    Relative,
}

/// Send traces to stderr and optionally append them as JSON to a file.
///
/// `RUST_LOG` overrides the console level. The returned guard flushes the
/// JSON log when dropped.
#[must_use = "dropping the guard stops the JSON log"]
pub fn enable_tracing(
    time_style: &TraceTimeStyle,
    console_level: Level,
    json_path: Option<&Path>,
) -> Result<Option<WorkerGuard>, String> {
    fn hookup<FT>(
        timer: FT,
        console_level: Level,
        json_path: Option<&Path>,
    ) -> Result<Option<WorkerGuard>, String>
    where
        FT: FormatTime + Send + Sync + 'static,
    {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("hoard={console_level}")));
        let console_layer = tracing_subscriber::fmt::Layer::default()
            .with_ansi(clicolors_control::colors_enabled())
            .with_writer(std::io::stderr)
            .with_timer(timer)
            .with_filter(filter);
        let (json_layer, flush_guard) = match json_path {
            Some(json_path) => {
                let file_writer = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(json_path)
                    .map_err(|err| format!("Failed to open log file {json_path:?}: {err}"))?;
                let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
                let layer = tracing_subscriber::fmt::Layer::default()
                    .json()
                    .with_writer(non_blocking);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };
        Registry::default()
            .with(console_layer)
            .with(json_layer)
            .try_init()
            .map_err(|err| format!("Failed to install tracing: {err}"))?;
        Ok(flush_guard)
    }

    let flush_guard = match time_style {
        TraceTimeStyle::None => hookup((), console_level, json_path),
        TraceTimeStyle::Utc => hookup(time::UtcTime::rfc_3339(), console_level, json_path),
        TraceTimeStyle::Relative => hookup(time::uptime(), console_level, json_path),
        TraceTimeStyle::Local => match time::OffsetTime::local_rfc_3339() {
            Ok(timer) => hookup(timer, console_level, json_path),
            // The local offset can't be found in multithreaded processes on some platforms.
            Err(_) => hookup(time::UtcTime::rfc_3339(), console_level, json_path),
        },
    }?;
    trace!("Tracing enabled");
    Ok(flush_guard)
}
