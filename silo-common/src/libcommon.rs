#![allow(unused_macros)]
#![allow(dead_code)]

#[macro_use(o, slog_log, slog_trace, slog_debug, slog_info, slog_warn, slog_error)]
extern crate slog;

#[macro_use]
extern crate serde_derive;

#[macro_use]
pub mod codec;

#[macro_use]
pub mod util;

pub mod types;

pub mod consts {
    /// Size of a sector in bytes.
    pub const SECTOR_SIZE: usize = 1 << 22;
    /// Size of a Merkle leaf in bytes.
    pub const LEAF_SIZE: usize = 64;
    /// Number of Merkle leaves in a sector.
    pub const LEAVES_PER_SECTOR: u64 = (SECTOR_SIZE / LEAF_SIZE) as u64;
    /// Size of an encoded hash in bytes.
    pub const HASH_SIZE: usize = 32;
}
