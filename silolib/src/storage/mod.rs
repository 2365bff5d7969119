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

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::{error, fmt, io};

use silo_common::consts::SECTOR_SIZE;
use silo_common::types::SectorRoot;

use crate::util_lib::db::Error as db_error;

pub mod volume;

pub use volume::{Volume, VolumeStats, VOLUME_STATUS_READY, VOLUME_STATUS_REMOVING,
    VOLUME_STATUS_RESIZING, VOLUME_STATUS_UNAVAILABLE};

#[derive(Debug)]
pub enum Error {
    /// The sector is not in the location index
    NotFound,
    /// No writable volume has a free slot
    NoCapacity,
    /// The requested volume does not exist
    VolumeNotFound(u64),
    /// The volume's backing file is absent or closed
    VolumeUnavailable(u64),
    /// Another operation holds the volume (or its path) busy
    Busy,
    /// Resize would drop below the volume's used sector count
    ResizeBelowUsed { used: u64, new_sectors: u64 },
    /// Sector payloads must be exactly SECTOR_SIZE bytes
    InvalidSectorLength(usize),
    /// Underlying I/O failure
    IOError(io::Error),
    /// Location index or volume metadata store failure
    StoreError(db_error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "sector not found"),
            Error::NoCapacity => write!(f, "no writable volume has free slots"),
            Error::VolumeNotFound(id) => write!(f, "volume {} not found", id),
            Error::VolumeUnavailable(id) => write!(f, "volume {} not available", id),
            Error::Busy => write!(f, "volume is busy"),
            Error::ResizeBelowUsed { used, new_sectors } => write!(
                f,
                "cannot resize to {} sectors: {} sectors are in use",
                new_sectors, used
            ),
            Error::InvalidSectorLength(n) => {
                write!(f, "sector must be {} bytes, got {}", SECTOR_SIZE, n)
            }
            Error::IOError(ref e) => fmt::Display::fmt(e, f),
            Error::StoreError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IOError(ref e) => Some(e),
            Error::StoreError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IOError(e)
    }
}

impl From<db_error> for Error {
    fn from(e: db_error) -> Error {
        Error::StoreError(e)
    }
}

/// Where a sector physically lives, and how many references keep it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLocation {
    pub root: SectorRoot,
    pub volume_id: u64,
    pub slot: u64,
    pub refcount: u64,
}

/// Admin-facing volume metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMeta {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "localPath")]
    pub local_path: String,
    #[serde(rename = "usedSectors")]
    pub used_sectors: u64,
    #[serde(rename = "totalSectors")]
    pub total_sectors: u64,
    #[serde(rename = "readOnly")]
    pub read_only: bool,
    pub available: bool,
}

/// Persistence seam for volume metadata and the sector location index;
/// implemented by the SQLite store and an in-memory double.
pub trait VolumeStore: Send + Sync {
    /// Register a volume and return its stable numeric ID.
    fn add_volume(&self, path: &str, total_sectors: u64) -> Result<u64, db_error>;
    fn update_volume_total(&self, id: u64, total_sectors: u64) -> Result<(), db_error>;
    fn set_volume_available(&self, id: u64, available: bool) -> Result<(), db_error>;
    fn set_volume_read_only(&self, id: u64, read_only: bool) -> Result<(), db_error>;
    /// Delete a volume and any remaining location rows that point at it.
    fn remove_volume(&self, id: u64) -> Result<(), db_error>;
    fn volumes(&self) -> Result<Vec<VolumeMeta>, db_error>;
    fn sector_locations(&self) -> Result<Vec<SectorLocation>, db_error>;
    fn insert_location(&self, loc: &SectorLocation) -> Result<(), db_error>;
    fn update_refcount(&self, root: &SectorRoot, refcount: u64) -> Result<(), db_error>;
    fn move_location(&self, root: &SectorRoot, volume_id: u64, slot: u64) -> Result<(), db_error>;
    fn delete_location(&self, root: &SectorRoot) -> Result<(), db_error>;
    /// Reset every refcount to the number of contract references; the
    /// startup reclamation scan.
    fn reset_refcounts(&self) -> Result<(), db_error>;
}

/// The capability set the contract manager and session handler need from
/// sector storage. The volume manager is the production implementation; an
/// in-memory double backs unit tests.
pub trait SectorStore: Send + Sync {
    /// Store a sector, or add a reference if it is already stored. Every
    /// successful call must be balanced by `release_sector`.
    fn write_sector(&self, root: &SectorRoot, data: &[u8]) -> Result<(), Error>;
    /// Read a full sector by its root.
    fn read_sector(&self, root: &SectorRoot) -> Result<Vec<u8>, Error>;
    /// Add a reference to a stored sector (a contract taking ownership).
    fn add_sector_ref(&self, root: &SectorRoot) -> Result<(), Error>;
    /// Drop a reference; the slot is freed when the count hits zero.
    fn release_sector(&self, root: &SectorRoot) -> Result<(), Error>;
    /// Flush all buffered sector writes to disk. Must return before any
    /// contract revision referencing the written sectors commits.
    fn sync(&self) -> Result<(), Error>;
}

/// Releases a batch of sector references on drop. RPC handlers hold one of
/// these across a write so that an abort rolls the refcounts back.
pub struct SectorReleaseGuard {
    store: Arc<dyn SectorStore>,
    roots: Vec<SectorRoot>,
}

impl SectorReleaseGuard {
    pub fn new(store: Arc<dyn SectorStore>) -> SectorReleaseGuard {
        SectorReleaseGuard {
            store,
            roots: vec![],
        }
    }

    pub fn add(&mut self, root: SectorRoot) {
        self.roots.push(root);
    }
}

impl Drop for SectorReleaseGuard {
    fn drop(&mut self) {
        for root in self.roots.drain(..) {
            if let Err(e) = self.store.release_sector(&root) {
                warn!("failed to release sector {}: {}", root, e);
            }
        }
    }
}

/// In-memory per-volume free-slot bitmap. The authoritative free list at
/// runtime; rebuilt from the location index at startup.
#[derive(Debug, Clone, Default)]
struct SlotBitmap {
    words: Vec<u64>,
    total: u64,
    used: u64,
}

impl SlotBitmap {
    fn new(total: u64) -> SlotBitmap {
        SlotBitmap {
            words: vec![0u64; total.div_ceil(64) as usize],
            total,
            used: 0,
        }
    }

    fn free_slots(&self) -> u64 {
        self.total - self.used
    }

    fn is_set(&self, slot: u64) -> bool {
        self.words[(slot / 64) as usize] & (1 << (slot % 64)) != 0
    }

    fn set(&mut self, slot: u64) {
        debug_assert!(!self.is_set(slot));
        self.words[(slot / 64) as usize] |= 1 << (slot % 64);
        self.used += 1;
    }

    fn clear(&mut self, slot: u64) {
        debug_assert!(self.is_set(slot));
        self.words[(slot / 64) as usize] &= !(1 << (slot % 64));
        self.used -= 1;
    }

    /// Claim the lowest-indexed free slot.
    fn allocate_lowest(&mut self) -> Option<u64> {
        for (w, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as u64;
                let slot = (w as u64) * 64 + bit;
                if slot >= self.total {
                    return None;
                }
                self.set(slot);
                return Some(slot);
            }
        }
        None
    }

    fn resize(&mut self, new_total: u64) {
        self.words.resize(new_total.div_ceil(64) as usize, 0u64);
        self.total = new_total;
    }
}

struct VolumeEntry {
    meta: VolumeMeta,
    bitmap: SlotBitmap,
    /// set while a resize or removal is in flight; blocks other mutations
    busy: bool,
    /// refcount-zero leftovers found by the startup scan, reclaimed when
    /// their slot is reallocated
    stale: HashMap<u64, SectorRoot>,
    volume: Arc<Volume>,
}

impl VolumeEntry {
    fn writable(&self) -> bool {
        self.meta.available && !self.meta.read_only && !self.busy && self.bitmap.free_slots() > 0
    }
}

struct ManagerState {
    volumes: BTreeMap<u64, VolumeEntry>,
    index: HashMap<SectorRoot, SectorLocation>,
    /// paths with an AddVolume in flight
    adding: HashSet<String>,
    /// round-robin cursor over equally-free volumes
    cursor: u64,
}

/// The sector store: a set of volumes plus the content-addressed location
/// index mapping sector roots to physical slots.
pub struct VolumeManager {
    state: Mutex<ManagerState>,
    store: Arc<dyn VolumeStore>,
}

impl VolumeManager {
    /// Load volumes and the location index from the store. Refcounts are
    /// first reset to the number of contract references so that sectors
    /// orphaned by a crash between write and commit become reclaimable.
    pub fn load(store: Arc<dyn VolumeStore>) -> Result<VolumeManager, Error> {
        store.reset_refcounts()?;

        let mut volumes = BTreeMap::new();
        for meta in store.volumes()? {
            let (volume, available) = match Volume::open(&meta.local_path, false) {
                Ok(v) => (Arc::new(v), meta.available),
                Err(e) => {
                    warn!(
                        "volume {} at {} is unavailable: {}",
                        meta.id, &meta.local_path, e
                    );
                    let v = Arc::new(Volume::unavailable());
                    (v, false)
                }
            };
            let bitmap = SlotBitmap::new(meta.total_sectors);
            volumes.insert(
                meta.id,
                VolumeEntry {
                    meta: VolumeMeta {
                        available,
                        used_sectors: 0,
                        ..meta
                    },
                    bitmap,
                    busy: false,
                    stale: HashMap::new(),
                    volume,
                },
            );
        }

        let mut index = HashMap::new();
        for loc in store.sector_locations()? {
            let Some(entry) = volumes.get_mut(&loc.volume_id) else {
                error!("sector location references unknown volume {}", loc.volume_id);
                return Err(Error::StoreError(db_error::Corruption));
            };
            if loc.slot >= entry.meta.total_sectors {
                error!(
                    "sector location slot {} is out of bounds for volume {}",
                    loc.slot, loc.volume_id
                );
                return Err(Error::StoreError(db_error::Corruption));
            }
            if loc.refcount > 0 {
                if entry.bitmap.is_set(loc.slot) {
                    error!("two sectors share volume {} slot {}", loc.volume_id, loc.slot);
                    return Err(Error::StoreError(db_error::Corruption));
                }
                entry.bitmap.set(loc.slot);
                entry.meta.used_sectors += 1;
            } else {
                entry.stale.insert(loc.slot, loc.root);
            }
            index.insert(loc.root, loc);
        }

        Ok(VolumeManager {
            state: Mutex::new(ManagerState {
                volumes,
                index,
                adding: HashSet::new(),
                cursor: 0,
            }),
            store,
        })
    }

    /// Pick a target volume for a new sector: among writable volumes with
    /// the most free slots, rotate round-robin; then claim the volume's
    /// lowest free slot.
    fn allocate_slot(&self, state: &mut ManagerState, exclude: Option<u64>) -> Result<(u64, u64, Arc<Volume>), Error> {
        let max_free = state
            .volumes
            .values()
            .filter(|v| v.writable() && Some(v.meta.id) != exclude)
            .map(|v| v.bitmap.free_slots())
            .max()
            .ok_or(Error::NoCapacity)?;
        let candidates: Vec<u64> = state
            .volumes
            .values()
            .filter(|v| {
                v.writable() && Some(v.meta.id) != exclude && v.bitmap.free_slots() == max_free
            })
            .map(|v| v.meta.id)
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoCapacity);
        }
        let chosen = candidates[(state.cursor as usize) % candidates.len()];
        state.cursor = state.cursor.wrapping_add(1);

        let entry = state.volumes.get_mut(&chosen).expect("chosen volume exists");
        let slot = entry.bitmap.allocate_lowest().ok_or(Error::NoCapacity)?;
        entry.meta.used_sectors += 1;

        // reclaim any refcount-zero leftover occupying the slot
        if let Some(old_root) = entry.stale.remove(&slot) {
            state.index.remove(&old_root);
            self.store.delete_location(&old_root)?;
        }
        Ok((chosen, slot, state.volumes[&chosen].volume.clone()))
    }

    fn free_slot(&self, state: &mut ManagerState, volume_id: u64, slot: u64) {
        if let Some(entry) = state.volumes.get_mut(&volume_id) {
            entry.bitmap.clear(slot);
            entry.meta.used_sectors -= 1;
        }
    }

    /// Mark a volume failed after an I/O error; subsequent reads and
    /// writes route to other volumes.
    fn fail_volume(&self, state: &mut ManagerState, volume_id: u64) {
        if let Some(entry) = state.volumes.get_mut(&volume_id) {
            if entry.meta.available {
                error!("marking volume {} unavailable after I/O error", volume_id);
                entry.meta.available = false;
                entry.volume.set_status(VOLUME_STATUS_UNAVAILABLE);
                if let Err(e) = self.store.set_volume_available(volume_id, false) {
                    error!("failed to persist volume {} availability: {}", volume_id, e);
                }
            }
        }
    }

    /// Create a volume at `path` with `total_sectors` slots, filling every
    /// slot with random bytes. A concurrent add on the same path fails
    /// with `Busy`.
    pub fn add_volume(&self, path: &str, total_sectors: u64) -> Result<VolumeMeta, Error> {
        {
            let mut state = self.state.lock().unwrap();
            if state.adding.contains(path)
                || state.volumes.values().any(|v| v.meta.local_path == path)
            {
                return Err(Error::Busy);
            }
            state.adding.insert(path.to_string());
        }

        let res = (|| {
            let volume = Volume::open(path, true)?;
            volume.resize(0, total_sectors)?;
            volume.sync()?;
            let id = self.store.add_volume(path, total_sectors)?;
            Ok((id, volume))
        })();

        let mut state = self.state.lock().unwrap();
        state.adding.remove(path);
        let (id, volume) = match res {
            Ok(x) => x,
            Err(e) => {
                let _ = std::fs::remove_file(path);
                return Err(e);
            }
        };

        let meta = VolumeMeta {
            id,
            local_path: path.to_string(),
            used_sectors: 0,
            total_sectors,
            read_only: false,
            available: true,
        };
        info!("added volume {} at {} ({} sectors)", id, path, total_sectors);
        state.volumes.insert(
            id,
            VolumeEntry {
                meta: meta.clone(),
                bitmap: SlotBitmap::new(total_sectors),
                busy: false,
                stale: HashMap::new(),
                volume: Arc::new(volume),
            },
        );
        Ok(meta)
    }

    /// Grow or shrink a volume. Shrinking first migrates sectors out of
    /// the truncated region to other volumes.
    pub fn resize_volume(&self, id: u64, new_sectors: u64) -> Result<(), Error> {
        // claim the volume
        let (volume, old_sectors) = {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .volumes
                .get_mut(&id)
                .ok_or(Error::VolumeNotFound(id))?;
            if !entry.meta.available {
                return Err(Error::VolumeUnavailable(id));
            }
            if entry.busy {
                return Err(Error::Busy);
            }
            if entry.meta.used_sectors > new_sectors {
                return Err(Error::ResizeBelowUsed {
                    used: entry.meta.used_sectors,
                    new_sectors,
                });
            }
            entry.busy = true;
            entry.volume.set_status(VOLUME_STATUS_RESIZING);
            (entry.volume.clone(), entry.meta.total_sectors)
        };

        let result = if new_sectors >= old_sectors {
            volume.resize(old_sectors, new_sectors).map_err(Error::from)
        } else {
            self.migrate_region(id, new_sectors)
                .and_then(|_| volume.resize(old_sectors, new_sectors).map_err(Error::from))
        };

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let entry = state.volumes.get_mut(&id).ok_or(Error::VolumeNotFound(id))?;
        entry.busy = false;
        entry.volume.set_status(VOLUME_STATUS_READY);
        result?;
        entry.meta.total_sectors = new_sectors;
        entry.bitmap.resize(new_sectors);
        // drop refcount-zero leftovers in the truncated region
        let truncated: Vec<SectorRoot> = entry
            .stale
            .iter()
            .filter(|(&slot, _)| slot >= new_sectors)
            .map(|(_, root)| *root)
            .collect();
        entry.stale.retain(|&slot, _| slot < new_sectors);
        for root in truncated {
            self.store.delete_location(&root)?;
            state.index.remove(&root);
        }
        self.store.update_volume_total(id, new_sectors)?;
        info!("resized volume {} from {} to {} sectors", id, old_sectors, new_sectors);
        Ok(())
    }

    /// Move every referenced sector in slots >= `from_slot` of volume `id`
    /// to other volumes.
    fn migrate_region(&self, id: u64, from_slot: u64) -> Result<(), Error> {
        loop {
            // find the next sector to migrate
            let loc = {
                let state = self.state.lock().unwrap();
                state
                    .index
                    .values()
                    .find(|loc| loc.volume_id == id && loc.slot >= from_slot && loc.refcount > 0)
                    .copied()
            };
            let Some(loc) = loc else {
                return Ok(());
            };
            self.migrate_sector(&loc)?;
        }
    }

    /// Move one sector to a freshly allocated slot on another volume,
    /// preserving its refcount.
    fn migrate_sector(&self, loc: &SectorLocation) -> Result<(), Error> {
        let data = self.read_sector(&loc.root)?;

        let (target_id, target_slot, target_volume) = {
            let mut state = self.state.lock().unwrap();
            self.allocate_slot(&mut state, Some(loc.volume_id))?
        };
        if let Err(e) = target_volume.write_sector(&data, target_slot) {
            let mut state = self.state.lock().unwrap();
            self.free_slot(&mut state, target_id, target_slot);
            self.fail_volume(&mut state, target_id);
            return Err(Error::IOError(e));
        }
        target_volume.sync()?;

        let mut state = self.state.lock().unwrap();
        self.store.move_location(&loc.root, target_id, target_slot)?;
        if let Some(entry) = state.index.get_mut(&loc.root) {
            entry.volume_id = target_id;
            entry.slot = target_slot;
        }
        self.free_slot(&mut state, loc.volume_id, loc.slot);
        debug!(
            "migrated sector {} from volume {} slot {} to volume {} slot {}",
            loc.root, loc.volume_id, loc.slot, target_id, target_slot
        );
        Ok(())
    }

    /// Remove a volume after migrating its sectors out. With `force`,
    /// sectors that cannot be migrated are dropped from the index, leaving
    /// any contracts that reference them unprovable.
    pub fn remove_volume(&self, id: u64, force: bool) -> Result<(), Error> {
        let path = {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .volumes
                .get_mut(&id)
                .ok_or(Error::VolumeNotFound(id))?;
            if entry.busy {
                return Err(Error::Busy);
            }
            entry.busy = true;
            entry.volume.set_status(VOLUME_STATUS_REMOVING);
            entry.meta.local_path.clone()
        };

        let migrate_result = (|| -> Result<(), Error> {
            loop {
                let loc = {
                    let state = self.state.lock().unwrap();
                    state
                        .index
                        .values()
                        .find(|loc| loc.volume_id == id && loc.refcount > 0)
                        .copied()
                };
                let Some(loc) = loc else {
                    return Ok(());
                };
                if let Err(e) = self.migrate_sector(&loc) {
                    if !force {
                        return Err(e);
                    }
                    // drop the sector; contracts referencing it are no
                    // longer provable
                    warn!(
                        "dropping unmigratable sector {} from volume {}: {}",
                        loc.root, id, e
                    );
                    let mut state = self.state.lock().unwrap();
                    self.store.delete_location(&loc.root)?;
                    state.index.remove(&loc.root);
                    self.free_slot(&mut state, id, loc.slot);
                }
            }
        })();

        let mut state = self.state.lock().unwrap();
        let entry = state.volumes.get_mut(&id).ok_or(Error::VolumeNotFound(id))?;
        if let Err(e) = migrate_result {
            entry.busy = false;
            entry.volume.set_status(VOLUME_STATUS_READY);
            return Err(e);
        }
        if let Err(e) = entry.volume.close() {
            warn!("failed to close volume {}: {}", id, e);
        }
        self.store.remove_volume(id)?;
        state.volumes.remove(&id);
        state.index.retain(|_, loc| loc.volume_id != id);
        let _ = std::fs::remove_file(&path);
        info!("removed volume {} at {}", id, path);
        Ok(())
    }

    /// Stop (or resume) placing new sectors on a volume. Existing sectors
    /// stay readable either way.
    pub fn set_read_only(&self, id: u64, read_only: bool) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .volumes
            .get_mut(&id)
            .ok_or(Error::VolumeNotFound(id))?;
        self.store.set_volume_read_only(id, read_only)?;
        entry.meta.read_only = read_only;
        Ok(())
    }

    pub fn volume(&self, id: u64) -> Result<(VolumeMeta, VolumeStats), Error> {
        let state = self.state.lock().unwrap();
        let entry = state.volumes.get(&id).ok_or(Error::VolumeNotFound(id))?;
        Ok((entry.meta.clone(), entry.volume.stats()))
    }

    pub fn volumes(&self) -> Vec<VolumeMeta> {
        let state = self.state.lock().unwrap();
        state.volumes.values().map(|v| v.meta.clone()).collect()
    }

    /// Total and used sector counts across all available volumes.
    pub fn usage(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        let mut total = 0;
        let mut used = 0;
        for entry in state.volumes.values() {
            if entry.meta.available {
                total += entry.meta.total_sectors;
                used += entry.meta.used_sectors;
            }
        }
        (total, used)
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn location(&self, root: &SectorRoot) -> Option<SectorLocation> {
        self.state.lock().unwrap().index.get(root).copied()
    }
}

impl SectorStore for VolumeManager {
    fn write_sector(&self, root: &SectorRoot, data: &[u8]) -> Result<(), Error> {
        if data.len() != SECTOR_SIZE {
            return Err(Error::InvalidSectorLength(data.len()));
        }

        // fast path: the sector is already stored
        {
            let mut state = self.state.lock().unwrap();
            if let Some(loc) = state.index.get_mut(root) {
                let refcount = loc.refcount + 1;
                self.store.update_refcount(root, refcount)?;
                loc.refcount = refcount;
                return Ok(());
            }
        }

        let (volume_id, slot, volume) = {
            let mut state = self.state.lock().unwrap();
            self.allocate_slot(&mut state, None)?
        };

        if let Err(e) = volume.write_sector(data, slot) {
            let mut state = self.state.lock().unwrap();
            self.free_slot(&mut state, volume_id, slot);
            self.fail_volume(&mut state, volume_id);
            return Err(Error::IOError(e));
        }

        let mut state = self.state.lock().unwrap();
        if let Some(loc) = state.index.get_mut(root) {
            // lost a race with a concurrent write of the same sector:
            // reference theirs and give our slot back
            let refcount = loc.refcount + 1;
            self.store.update_refcount(root, refcount)?;
            loc.refcount = refcount;
            self.free_slot(&mut state, volume_id, slot);
            return Ok(());
        }
        let loc = SectorLocation {
            root: *root,
            volume_id,
            slot,
            refcount: 1,
        };
        if let Err(e) = self.store.insert_location(&loc) {
            self.free_slot(&mut state, volume_id, slot);
            return Err(e.into());
        }
        state.index.insert(*root, loc);
        Ok(())
    }

    fn read_sector(&self, root: &SectorRoot) -> Result<Vec<u8>, Error> {
        let (volume_id, slot, volume) = {
            let state = self.state.lock().unwrap();
            let loc = state.index.get(root).ok_or(Error::NotFound)?;
            let entry = state
                .volumes
                .get(&loc.volume_id)
                .ok_or(Error::VolumeNotFound(loc.volume_id))?;
            if !entry.meta.available {
                return Err(Error::VolumeUnavailable(loc.volume_id));
            }
            (loc.volume_id, loc.slot, entry.volume.clone())
        };
        volume.read_sector(slot).map_err(|e| {
            let mut state = self.state.lock().unwrap();
            self.fail_volume(&mut state, volume_id);
            let _ = slot;
            Error::IOError(e)
        })
    }

    fn add_sector_ref(&self, root: &SectorRoot) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let loc = state.index.get_mut(root).ok_or(Error::NotFound)?;
        let refcount = loc.refcount + 1;
        self.store.update_refcount(root, refcount)?;
        loc.refcount = refcount;
        Ok(())
    }

    fn release_sector(&self, root: &SectorRoot) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let loc = *state.index.get(root).ok_or(Error::NotFound)?;
        if loc.refcount <= 1 {
            self.store.delete_location(root)?;
            state.index.remove(root);
            self.free_slot(&mut state, loc.volume_id, loc.slot);
        } else {
            let refcount = loc.refcount - 1;
            self.store.update_refcount(root, refcount)?;
            state.index.get_mut(root).expect("checked above").refcount = refcount;
        }
        Ok(())
    }

    fn sync(&self) -> Result<(), Error> {
        let volumes: Vec<(u64, Arc<Volume>)> = {
            let state = self.state.lock().unwrap();
            state
                .volumes
                .values()
                .filter(|v| v.meta.available)
                .map(|v| (v.meta.id, v.volume.clone()))
                .collect()
        };
        for (id, volume) in volumes {
            if let Err(e) = volume.sync() {
                let mut state = self.state.lock().unwrap();
                self.fail_volume(&mut state, id);
                return Err(Error::IOError(e));
            }
        }
        Ok(())
    }
}

/// In-memory SectorStore double for unit tests that don't need volumes.
#[cfg(any(test, feature = "testing"))]
pub struct MemSectorStore {
    sectors: Mutex<HashMap<SectorRoot, (Vec<u8>, u64)>>,
}

#[cfg(any(test, feature = "testing"))]
impl MemSectorStore {
    pub fn new() -> MemSectorStore {
        MemSectorStore {
            sectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn refcount(&self, root: &SectorRoot) -> u64 {
        self.sectors
            .lock()
            .unwrap()
            .get(root)
            .map(|(_, rc)| *rc)
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for MemSectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl SectorStore for MemSectorStore {
    fn write_sector(&self, root: &SectorRoot, data: &[u8]) -> Result<(), Error> {
        if data.len() != SECTOR_SIZE {
            return Err(Error::InvalidSectorLength(data.len()));
        }
        let mut sectors = self.sectors.lock().unwrap();
        let entry = sectors.entry(*root).or_insert_with(|| (data.to_vec(), 0));
        entry.1 += 1;
        Ok(())
    }

    fn read_sector(&self, root: &SectorRoot) -> Result<Vec<u8>, Error> {
        self.sectors
            .lock()
            .unwrap()
            .get(root)
            .map(|(data, _)| data.clone())
            .ok_or(Error::NotFound)
    }

    fn add_sector_ref(&self, root: &SectorRoot) -> Result<(), Error> {
        let mut sectors = self.sectors.lock().unwrap();
        let entry = sectors.get_mut(root).ok_or(Error::NotFound)?;
        entry.1 += 1;
        Ok(())
    }

    fn release_sector(&self, root: &SectorRoot) -> Result<(), Error> {
        let mut sectors = self.sectors.lock().unwrap();
        let entry = sectors.get_mut(root).ok_or(Error::NotFound)?;
        entry.1 -= 1;
        if entry.1 == 0 {
            sectors.remove(root);
        }
        Ok(())
    }

    fn sync(&self) -> Result<(), Error> {
        Ok(())
    }
}
