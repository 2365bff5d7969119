#![allow(dead_code)]

#[allow(unused_imports)]
#[macro_use(
    o,
    slog_log,
    slog_trace,
    slog_debug,
    slog_info,
    slog_warn,
    slog_error
)]
extern crate slog;

#[macro_use]
extern crate serde_derive;

#[allow(unused_imports)]
#[macro_use]
extern crate silo_common;

#[macro_use]
pub mod util_lib;

pub mod chain;
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
pub mod contracts;
pub mod merkle;
pub mod persist;
pub mod rhp;
pub mod storage;
pub mod wallet;

pub use silo_common::consts::{HASH_SIZE, LEAF_SIZE, LEAVES_PER_SECTOR, SECTOR_SIZE};
