// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config::LogConfig;
use crate::error::Error;

/// Minimal stdout/stderr `log::Log` backend.
///
/// A long-lived multi-tenant daemon earns a rolling-file appender; a
/// single-process debug broker does not, so unlike the teacher this
/// writes straight to the console and leaves rotation to the operator's
/// process supervisor.
struct BrokerLogger {
    timestamp: bool,
}

impl Log for BrokerLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        write_line(record.level(), self.timestamp, record.args());
    }

    fn flush(&self) {}
}

fn write_line(level: Level, timestamp: bool, args: &std::fmt::Arguments<'_>) {
    let prefix = if timestamp {
        format!("{} ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    } else {
        String::new()
    };
    if level <= Level::Warn {
        eprintln!("{prefix}{level}: {args}");
    } else {
        println!("{prefix}{level}: {args}");
    }
}

/// Install the process-wide logger. Must be called at most once, before
/// the first `log::info!`/etc. call.
pub fn init(log_conf: &LogConfig) -> Result<(), Error> {
    let level = if log_conf.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    log::set_boxed_logger(Box::new(BrokerLogger {
        timestamp: log_conf.timestamp,
    }))?;
    log::set_max_level(level);
    Ok(())
}
