// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Process-wide tracing setup for join kernels.
//!
//! Operators and drivers log through the re-exported `tracing` macros. The embedding
//! process calls one of the `init*` functions once; later calls are no-ops.
//!
//! Sink selection:
//! - `$STREAMJOIN_LOG_FILE` names the log file directly.
//! - `$STREAMJOIN_LOG_DIR` places `streamjoin.log` in that directory.
//! - Otherwise, or when the file cannot be opened, lines go to stderr.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use tracing::Level;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use super::app_config::StreamJoinConfig;

pub use tracing::{debug, error, info, warn};

static INIT: OnceLock<()> = OnceLock::new();

const LOG_FILE_ENV: &str = "STREAMJOIN_LOG_FILE";
const LOG_DIR_ENV: &str = "STREAMJOIN_LOG_DIR";
const LOG_FILE_NAME: &str = "streamjoin.log";

/// glog-style line: `Lyyyymmdd hh:mm:ss.uuuuuu thread file:line] message`.
struct GlogFormatter;

fn level_char(level: &Level) -> char {
    match *level {
        Level::ERROR => 'E',
        Level::WARN => 'W',
        Level::INFO => 'I',
        Level::DEBUG => 'D',
        Level::TRACE => 'T',
    }
}

/// Thread name when set (drivers run on named workers), otherwise the numeric id.
fn thread_tag() -> String {
    let current = std::thread::current();
    if let Some(name) = current.name() {
        return name.to_string();
    }
    let id = format!("{:?}", current.id());
    id.trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .to_string()
}

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{}{} {} {}:{}] ",
            level_char(metadata.level()),
            Local::now().format("%Y%m%d %H:%M:%S%.6f"),
            thread_tag(),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn log_file_path() -> Option<PathBuf> {
    env_non_empty(LOG_FILE_ENV)
        .map(PathBuf::from)
        .or_else(|| env_non_empty(LOG_DIR_ENV).map(|dir| PathBuf::from(dir).join(LOG_FILE_NAME)))
}

fn open_log_file() -> Option<File> {
    let path = log_file_path()?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = fs::create_dir_all(parent)
    {
        eprintln!(
            "streamjoin: cannot create log directory {}: {}; logging to stderr",
            parent.display(),
            err
        );
        return None;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| {
            eprintln!(
                "streamjoin: cannot open log file {}: {}; logging to stderr",
                path.display(),
                err
            );
        })
        .ok()
}

/// Install the global subscriber with an `EnvFilter` expression such as `"info"` or
/// `"streamjoin=debug"`.
pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(level);
        let installed = match open_log_file() {
            Some(file) => tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .event_format(GlogFormatter)
                .try_init(),
            None => tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_ansi(atty::is(atty::Stream::Stderr))
                .event_format(GlogFormatter)
                .try_init(),
        };
        // A host that already installed its own subscriber keeps it.
        if installed.is_ok() {
            info!("streamjoin logging initialized: filter={}", level);
        }
    });
}

/// `log_filter` takes precedence over `log_level` when both are set.
pub fn init_from_config(cfg: &StreamJoinConfig) {
    match cfg.log_filter.as_deref().map(str::trim) {
        Some(filter) if !filter.is_empty() => init_with_level(filter),
        _ => init_with_level(&cfg.log_level),
    }
}

pub fn init() {
    init_with_level("info");
}
