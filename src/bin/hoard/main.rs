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

//! Command-line entry point for Hoard backups.

use std::error::Error as _;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing::{debug, error, info, warn, Level};

use hoard::server::{serve, ServeOptions, DEFAULT_TOKEN_TTL};
use hoard::*;

mod log;
mod monitor;

use crate::log::TraceTimeStyle;
use crate::monitor::TerminalMonitor;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Show debug trace on stderr.
    #[arg(long, short = 'D', global = true)]
    debug: bool,

    /// Control timestamps prefixes on stderr.
    #[arg(long, value_enum, global = true, default_value_t = TraceTimeStyle::None)]
    trace_time: TraceTimeStyle,

    /// Append a json formatted log to this file.
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,
}

/// How to connect to the destination.
#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// Trust matching hashes without comparing content.
    #[arg(long, global = true)]
    fast: bool,

    /// Store layout of a new destination, or the layout an existing one must have.
    #[arg(long, global = true)]
    fstype: Option<FsType>,

    /// Log in to a remote destination with this key.
    #[arg(long, global = true)]
    access_key: Option<String>,

    /// Keep manifests under this user id in a local destination.
    #[arg(long, global = true)]
    userid: Option<String>,
}

impl TargetArgs {
    fn options(&self) -> TargetOptions {
        TargetOptions {
            fstype: self.fstype,
            fast: self.fast,
            userid: self.userid.clone(),
            access_key: self.access_key.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Back up source directories into a destination, creating it if needed.
    Backup {
        /// Directory or http(s) URL of the destination.
        destination: String,
        #[arg(long = "set-name", short, default_value = "default")]
        set: String,
        /// Source directory. Include and exclude patterns given after a
        /// source apply only to it.
        #[arg(long, required = true)]
        from: Vec<PathBuf>,
        /// Back up paths matching this pattern even if excluded.
        #[arg(long, short)]
        include: Vec<String>,
        /// Skip paths matching this pattern.
        #[arg(long, short)]
        exclude: Vec<String>,
        /// Hash every file, ignoring the previous backup.
        #[arg(long)]
        deep_scan: bool,
        /// Hash files even when they look unchanged, and warn if they changed.
        #[arg(long)]
        check_hash: bool,
        /// Remove unreferenced objects before backing up.
        #[arg(long)]
        clean: bool,
        /// Verify the new backup once it's sealed.
        #[arg(long)]
        verify: bool,
        /// Print backed-up file names.
        #[arg(long, short)]
        verbose: bool,
        #[arg(long)]
        no_stats: bool,
    },

    /// Check a backup against the store, or check the whole store.
    ///
    /// Without a set name, every stored object is checked as by `fsck`.
    Verify {
        destination: String,
        #[arg(long = "set-name", short)]
        set: Option<String>,
        /// Which backup: `current`, `running`, or a time.
        #[arg(long, alias = "instance", default_value = "current")]
        when: When,
        /// Also compare stored content with the source files.
        #[arg(long)]
        compare: bool,
        /// Compare with this directory instead of the recorded source.
        #[arg(long, requires = "compare")]
        compare_with: Option<PathBuf>,
        /// Report files that are OK too.
        #[arg(long, short)]
        verbose: bool,
    },

    /// List backups, or the files in one backup.
    List {
        destination: String,
        #[arg(long = "set-name", short)]
        set: Option<String>,
        /// List the files of this backup rather than the backups.
        #[arg(long, alias = "instance")]
        when: Option<When>,
        /// Hide backups that started before this time.
        #[arg(long, value_parser = parse_since)]
        since: Option<Stamp>,
        /// Show only the source directories.
        #[arg(long)]
        sources: bool,
        #[arg(long, short)]
        include: Vec<String>,
        #[arg(long, short)]
        exclude: Vec<String>,
    },

    /// Restore files from a backup.
    Restore {
        destination: String,
        #[arg(long = "set-name", short)]
        set: String,
        #[arg(long, alias = "instance", default_value = "current")]
        when: When,
        /// Restore into this directory rather than the original location.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Allow restoring over the original source.
        #[arg(long, short)]
        force: bool,
        /// Leave files that already have the right content.
        #[arg(long)]
        skip_unchanged: bool,
        #[arg(long, short)]
        include: Vec<String>,
        #[arg(long, short)]
        exclude: Vec<String>,
        #[arg(long)]
        no_stats: bool,
    },

    /// Write the content of one backed-up file to stdout.
    Cat {
        destination: String,
        #[arg(long = "set-name", short)]
        set: String,
        /// Path of the file within the backup, relative to its source.
        path: String,
        #[arg(long, alias = "instance", default_value = "current")]
        when: When,
    },

    /// Delete objects that no backup refers to.
    ///
    /// Refuses to run while any backup is in progress.
    Clean {
        destination: String,
        /// Only report what would be removed.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_stats: bool,
    },

    /// Check every stored object, and that every referenced object exists.
    Fsck {
        destination: String,
        /// Report objects that are OK too.
        #[arg(long, short)]
        verbose: bool,
    },

    /// Remove files matching patterns from a backup's manifest.
    Rm {
        destination: String,
        #[arg(long = "set-name", short)]
        set: String,
        #[arg(long, alias = "instance", default_value = "current")]
        when: When,
        /// Patterns of paths to remove.
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Serve a local destination over HTTP.
    Serve {
        /// Directory of the destination, created if needed.
        destination: PathBuf,
        #[arg(long, default_value = "127.0.0.1:4444")]
        bind: SocketAddr,
        /// Seconds before an idle session is logged out.
        #[arg(long, default_value_t = DEFAULT_TOKEN_TTL.as_secs())]
        token_ttl: u64,
    },
}

enum ExitCode {
    Success = 0,
    Failure = 1,
    NonFatalErrors = 2,
}

impl std::process::Termination for ExitCode {
    fn report(self) -> std::process::ExitCode {
        (self as u8).into()
    }
}

fn parse_since(s: &str) -> Result<Stamp> {
    match s.parse::<When>()? {
        When::At(stamp) => Ok(stamp),
        _ => Err(Error::InvalidStamp(s.to_owned())),
    }
}

/// Sources in command-line order, each with the patterns that follow it, and
/// the patterns given before any source.
fn sources_with_filters(
    matches: &ArgMatches,
    from: &[PathBuf],
) -> Result<(Vec<BackupSource>, Filter)> {
    let positions = |id: &str| -> Vec<usize> {
        matches
            .indices_of(id)
            .map(|indices| indices.collect())
            .unwrap_or_default()
    };
    let source_positions = positions("from");
    let mut global = Vec::new();
    let mut per_source = vec![Vec::new(); from.len()];
    for (id, sign) in [("exclude", '-'), ("include", '+')] {
        let values = matches
            .get_many::<String>(id)
            .map(|values| values.cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for (value, position) in values.into_iter().zip(positions(id)) {
            let rule = (position, format!("{sign}{value}"));
            match source_positions.iter().rposition(|&p| p < position) {
                Some(i) => per_source[i].push(rule),
                None => global.push(rule),
            }
        }
    }
    let ordered = |mut rules: Vec<(usize, String)>| -> Result<Filter> {
        rules.sort();
        let rules: Vec<String> = rules.into_iter().map(|(_, rule)| rule).collect();
        Filter::new(&rules)
    };
    let sources = from
        .iter()
        .zip(per_source)
        .map(|(root, rules)| {
            Ok(BackupSource {
                root: absolute(root)?,
                filter: ordered(rules)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((sources, ordered(global)?))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })
}

fn problems(found: bool) -> ExitCode {
    if found {
        warn!("Problems were found.");
        ExitCode::NonFatalErrors
    } else {
        ExitCode::Success
    }
}

impl Command {
    fn destination(&self) -> String {
        match self {
            Command::Backup { destination, .. }
            | Command::Verify { destination, .. }
            | Command::List { destination, .. }
            | Command::Restore { destination, .. }
            | Command::Cat { destination, .. }
            | Command::Clean { destination, .. }
            | Command::Fsck { destination, .. }
            | Command::Rm { destination, .. } => destination.clone(),
            Command::Serve { destination, .. } => destination.display().to_string(),
        }
    }

    async fn run(
        &self,
        matches: &ArgMatches,
        target_args: &TargetArgs,
        monitor: Arc<TerminalMonitor>,
    ) -> Result<ExitCode> {
        let options = target_args.options();
        if let Command::Serve {
            destination,
            bind,
            token_ttl,
        } = self
        {
            let mut serve_options = ServeOptions::new(destination.clone(), *bind);
            serve_options.fstype = options.fstype;
            serve_options.fast = options.fast;
            serve_options.token_ttl = Duration::from_secs(*token_ttl);
            serve(serve_options).await?;
            return Ok(ExitCode::Success);
        }
        let create = matches!(self, Command::Backup { .. });
        let target = BackupTarget::connect(&self.destination(), &options, create).await?;
        let result = self.run_on(&target, matches, monitor).await;
        // Log out even if the command failed.
        if let Err(err) = target.disconnect().await {
            warn!("Failed to disconnect: {err}");
        }
        result
    }

    async fn run_on(
        &self,
        target: &BackupTarget,
        matches: &ArgMatches,
        monitor: Arc<TerminalMonitor>,
    ) -> Result<ExitCode> {
        match self {
            Command::Backup {
                set,
                from,
                deep_scan,
                check_hash,
                clean,
                verify,
                verbose,
                no_stats,
                ..
            } => {
                if *clean {
                    let stats = target.clean(false, monitor.as_ref()).await?;
                    debug!(%stats);
                }
                let backup_matches = matches
                    .subcommand_matches("backup")
                    .ok_or_else(|| Error::BadRequest("missing backup arguments".to_owned()))?;
                let (sources, filter) = sources_with_filters(backup_matches, from)?;
                let mut backup_set = BackupSet::new(set, sources);
                backup_set.filter = filter;
                let options = BackupOptions {
                    deep_scan: *deep_scan,
                    check_hash: *check_hash,
                    print_filenames: *verbose,
                };
                let stats = target.backup(&backup_set, &options, monitor.clone()).await?;
                info!("Backup complete");
                if !no_stats {
                    print!("{stats}");
                }
                if *verify {
                    let stats = target
                        .verify(set, &VerifyOptions::default(), monitor.clone())
                        .await?;
                    info!(%stats, "Verified");
                    return Ok(problems(stats.has_problems()));
                }
                Ok(ExitCode::Success)
            }
            Command::Verify {
                set: None, verbose, ..
            }
            | Command::Fsck { verbose, .. } => {
                let stats = target.fsck(*verbose, monitor.as_ref()).await?;
                println!("{stats}");
                Ok(problems(stats.has_problems()))
            }
            Command::Verify {
                set: Some(set),
                when,
                compare,
                compare_with,
                verbose,
                ..
            } => {
                let options = VerifyOptions {
                    when: *when,
                    compare: *compare,
                    compare_with: compare_with.as_deref().map(absolute).transpose()?,
                    verbose: *verbose,
                };
                let stats = target.verify(set, &options, monitor.clone()).await?;
                println!("{stats}");
                Ok(problems(stats.has_problems()))
            }
            Command::List {
                set,
                when,
                since,
                sources,
                include,
                exclude,
                ..
            } => {
                let options = ListOptions {
                    set: set.clone(),
                    when: *when,
                    filter: Filter::from_patterns(include, exclude)?,
                    sources: *sources,
                    since: *since,
                };
                target.list(&options, monitor.as_ref()).await?;
                Ok(ExitCode::Success)
            }
            Command::Restore {
                set,
                when,
                output,
                force,
                skip_unchanged,
                include,
                exclude,
                no_stats,
                ..
            } => {
                let options = RestoreOptions {
                    when: *when,
                    filter: Filter::from_patterns(include, exclude)?,
                    output: output.as_deref().map(absolute).transpose()?,
                    force: *force,
                    skip_unchanged: *skip_unchanged,
                };
                let stats = target.restore(set, &options, monitor.clone()).await?;
                info!("Restore complete");
                if !no_stats {
                    println!("{stats}");
                }
                Ok(problems(stats.errors > 0))
            }
            Command::Cat {
                set, path, when, ..
            } => {
                let mut out = BufWriter::new(std::io::stdout());
                let bytes = target.cat(set, when, path, &mut out).await?;
                out.flush()?;
                debug!(bytes, "Wrote file");
                Ok(ExitCode::Success)
            }
            Command::Clean {
                dry_run, no_stats, ..
            } => {
                let stats = target.clean(*dry_run, monitor.as_ref()).await?;
                if !no_stats {
                    println!("{stats}");
                }
                Ok(ExitCode::Success)
            }
            Command::Rm {
                set,
                when,
                patterns,
                dry_run,
                ..
            } => {
                let filter = Filter::new(patterns)?;
                let stats = target
                    .rm(set, when, &filter, *dry_run, monitor.as_ref())
                    .await?;
                println!("{stats}");
                Ok(ExitCode::Success)
            }
            Command::Serve { .. } => Err(Error::BadRequest(
                "serve runs without a target".to_owned(),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Args::command().get_matches();
    let args = match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let start_time = Instant::now();
    let trace_level = if args.debug {
        Level::TRACE
    } else {
        Level::INFO
    };
    let _flush_guard = match log::enable_tracing(
        &args.trace_time,
        trace_level,
        args.log_json.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::Failure;
        }
    };
    let monitor = Arc::new(TerminalMonitor::new());
    let result = args
        .command
        .run(&matches, &args.target, monitor.clone())
        .await;
    monitor.trace_counters();
    debug!(elapsed = ?start_time.elapsed());
    match result {
        Err(err) => {
            error!("{err}");
            let mut err: &dyn std::error::Error = &err;
            while let Some(source) = err.source() {
                error!("caused by: {source}");
                err = source;
            }
            ExitCode::Failure
        }
        Ok(ExitCode::Success) if monitor.error_count() > 0 => {
            debug!(error_count = monitor.error_count());
            ExitCode::NonFatalErrors
        }
        Ok(exit_code) => exit_code,
    }
}

#[test]
fn verify_clap() {
    Args::command().debug_assert()
}
