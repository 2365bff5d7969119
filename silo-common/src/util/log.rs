// Copyright (C) 2026 Silo Storage Systems
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{env, io};

use chrono::prelude::*;
use lazy_static::lazy_static;
use slog::{Drain, Level, Logger};

fn timestamp_utc(io: &mut dyn io::Write) -> io::Result<()> {
    let now: DateTime<Utc> = Utc::now();
    write!(io, "{}", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
}

fn make_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(io::stderr());
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(timestamp_utc)
        .build()
        .fuse();
    Logger::root(drain, o!())
}

fn inner_get_loglevel() -> Level {
    if env::var("SILO_LOG_TRACE") == Ok("1".into()) {
        Level::Trace
    } else if env::var("SILO_LOG_DEBUG") == Ok("1".into()) || cfg!(test) {
        Level::Debug
    } else {
        Level::Info
    }
}

lazy_static! {
    static ref LOGLEVEL: Level = inner_get_loglevel();
    pub static ref LOGGER: Logger = make_logger();
}

pub fn get_loglevel() -> Level {
    *LOGLEVEL
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Trace.is_at_least(cur_level) {
            slog_trace!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Debug.is_at_least(cur_level) {
            slog_debug!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Info.is_at_least(cur_level) {
            slog_info!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Warning.is_at_least(cur_level) {
            slog_warn!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Error.is_at_least(cur_level) {
            slog_error!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

// print debug statements while testing
#[allow(unused_macros)]
#[macro_export]
macro_rules! test_debug {
    ($($arg:tt)*) => ({
        #[cfg(any(test, feature = "testing"))]
        {
            debug!($($arg)*)
        }
    })
}
