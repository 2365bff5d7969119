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

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rand::RngCore;
use silo_common::consts::SECTOR_SIZE;

pub const VOLUME_STATUS_READY: &str = "ready";
pub const VOLUME_STATUS_RESIZING: &str = "resizing";
pub const VOLUME_STATUS_REMOVING: &str = "removing";
pub const VOLUME_STATUS_UNAVAILABLE: &str = "unavailable";

/// How many of the most recent errors a volume remembers.
const MAX_VOLUME_ERRORS: usize = 100;

/// Rolling statistics for a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeStats {
    #[serde(rename = "failedReads")]
    pub failed_reads: u64,
    #[serde(rename = "failedWrites")]
    pub failed_writes: u64,
    #[serde(rename = "successfulReads")]
    pub successful_reads: u64,
    #[serde(rename = "successfulWrites")]
    pub successful_writes: u64,
    pub status: String,
    pub errors: Vec<String>,
}

/// A single backing file holding a contiguous array of sector slots.
/// Positional I/O is concurrency-safe; only open/close/resize take the
/// write lock on the file handle.
pub struct Volume {
    data: RwLock<Option<File>>,
    stats: Mutex<VolumeStats>,
}

impl Volume {
    pub fn open<P: AsRef<Path>>(path: P, create: bool) -> Result<Volume, io::Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        Ok(Volume {
            data: RwLock::new(Some(file)),
            stats: Mutex::new(VolumeStats {
                status: VOLUME_STATUS_READY.into(),
                ..VolumeStats::default()
            }),
        })
    }

    /// A placeholder for a volume whose backing file could not be opened.
    pub fn unavailable() -> Volume {
        Volume {
            data: RwLock::new(None),
            stats: Mutex::new(VolumeStats {
                status: VOLUME_STATUS_UNAVAILABLE.into(),
                ..VolumeStats::default()
            }),
        }
    }

    fn append_error(stats: &mut VolumeStats, err: String) {
        stats.errors.push(err);
        if stats.errors.len() > MAX_VOLUME_ERRORS {
            let excess = stats.errors.len() - MAX_VOLUME_ERRORS;
            stats.errors.drain(..excess);
        }
    }

    /// Read the full sector at `index`.
    pub fn read_sector(&self, index: u64) -> Result<Vec<u8>, io::Error> {
        let data = self.data.read().unwrap();
        let Some(file) = data.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "volume not available",
            ));
        };
        let mut sector = vec![0u8; SECTOR_SIZE];
        let res = file.read_exact_at(&mut sector, index * SECTOR_SIZE as u64);
        let mut stats = self.stats.lock().unwrap();
        match res {
            Ok(()) => {
                stats.successful_reads += 1;
                Ok(sector)
            }
            Err(e) => {
                stats.failed_reads += 1;
                Self::append_error(
                    &mut stats,
                    format!("failed to read sector at index {}: {}", index, e),
                );
                Err(e)
            }
        }
    }

    /// Write a full sector at `index`.
    pub fn write_sector(&self, data: &[u8], index: u64) -> Result<(), io::Error> {
        let guard = self.data.read().unwrap();
        let Some(file) = guard.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "volume not available",
            ));
        };
        let res = file.write_all_at(data, index * SECTOR_SIZE as u64);
        let mut stats = self.stats.lock().unwrap();
        match res {
            Ok(()) => {
                stats.successful_writes += 1;
                Ok(())
            }
            Err(e) => {
                stats.failed_writes += 1;
                Self::append_error(
                    &mut stats,
                    format!("failed to write sector to index {}: {}", index, e),
                );
                Err(e)
            }
        }
    }

    pub fn set_status(&self, status: &str) {
        self.stats.lock().unwrap().status = status.into();
    }

    pub fn stats(&self) -> VolumeStats {
        self.stats.lock().unwrap().clone()
    }

    /// Flush buffered sector data to disk.
    pub fn sync(&self) -> Result<(), io::Error> {
        let guard = self.data.read().unwrap();
        let Some(file) = guard.as_ref() else {
            return Ok(());
        };
        if let Err(e) = file.sync_data() {
            let mut stats = self.stats.lock().unwrap();
            Self::append_error(&mut stats, format!("failed to sync volume: {}", e));
            return Err(e);
        }
        Ok(())
    }

    /// Grow or shrink the backing file to `new_sectors` slots. New slots
    /// are filled with cryptographically random bytes so that a storage
    /// proof against an unwritten slot is still computationally binding.
    pub fn resize(&self, old_sectors: u64, new_sectors: u64) -> Result<(), io::Error> {
        let guard = self.data.write().unwrap();
        let Some(file) = guard.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "volume not available",
            ));
        };
        if new_sectors > old_sectors {
            let mut buf = vec![0u8; SECTOR_SIZE];
            let mut rng = rand::thread_rng();
            for i in old_sectors..new_sectors {
                rng.fill_bytes(&mut buf);
                file.write_all_at(&buf, i * SECTOR_SIZE as u64)?;
            }
        } else {
            file.set_len(new_sectors * SECTOR_SIZE as u64)?;
        }
        Ok(())
    }

    /// Sync and close the backing file. Further I/O fails until reopened.
    pub fn close(&self) -> Result<(), io::Error> {
        let mut guard = self.data.write().unwrap();
        if let Some(file) = guard.as_ref() {
            file.sync_data()?;
        }
        *guard = None;
        self.set_status(VOLUME_STATUS_UNAVAILABLE);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::temp_path;

    #[test]
    fn read_write_roundtrip_and_stats() {
        let path = temp_path("volume-rw");
        let vol = Volume::open(&path, true).unwrap();
        vol.resize(0, 2).unwrap();

        let mut sector = vec![0u8; SECTOR_SIZE];
        sector[..8].copy_from_slice(b"sectordt");
        vol.write_sector(&sector, 1).unwrap();
        assert_eq!(vol.read_sector(1).unwrap(), sector);

        let stats = vol.stats();
        assert_eq!(stats.successful_reads, 1);
        assert_eq!(stats.successful_writes, 1);
        assert_eq!(stats.failed_reads, 0);

        vol.close().unwrap();
        assert!(vol.read_sector(0).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn resize_randomizes_new_sectors() {
        let path = temp_path("volume-resize");
        let vol = Volume::open(&path, true).unwrap();
        vol.resize(0, 1).unwrap();

        // a freshly grown sector must not be all zeros
        let sector = vol.read_sector(0).unwrap();
        assert!(sector.iter().any(|&b| b != 0));

        vol.resize(1, 0).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        vol.close().unwrap();
        std::fs::remove_file(&path).unwrap();
    }
}
