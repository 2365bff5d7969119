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

//! In-memory store double mirroring the SQLite implementation's
//! semantics, for unit tests that don't need durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use silo_common::types::{BlockId, ContractId, OutputId, SectorRoot};

use crate::chain::CoinOutput;
use crate::contracts::{ContractRecord, ContractState, ContractStore, SignedRevision};
use crate::storage::{SectorLocation, VolumeMeta, VolumeStore};
use crate::util_lib::db::Error as db_error;
use crate::wallet::{WalletStore, WalletTransaction, WalletUpdate};

#[derive(Default)]
struct MemInner {
    volumes: BTreeMap<u64, VolumeMeta>,
    next_volume_id: u64,
    locations: HashMap<SectorRoot, SectorLocation>,
    contracts: HashMap<ContractId, ContractRecord>,
    utxos: BTreeMap<OutputId, CoinOutput>,
    transactions: Vec<WalletTransaction>,
    last_change: Option<BlockId>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Seed the wallet with an output, bypassing block processing.
    pub fn fund(&self, id: OutputId, output: CoinOutput) {
        self.inner.lock().unwrap().utxos.insert(id, output);
    }
}

impl VolumeStore for MemStore {
    fn add_volume(&self, path: &str, total_sectors: u64) -> Result<u64, db_error> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_volume_id += 1;
        let id = inner.next_volume_id;
        inner.volumes.insert(
            id,
            VolumeMeta {
                id,
                local_path: path.to_string(),
                used_sectors: 0,
                total_sectors,
                read_only: false,
                available: true,
            },
        );
        Ok(id)
    }

    fn update_volume_total(&self, id: u64, total_sectors: u64) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let meta = inner.volumes.get_mut(&id).ok_or(db_error::NotFoundError)?;
        meta.total_sectors = total_sectors;
        Ok(())
    }

    fn set_volume_available(&self, id: u64, available: bool) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let meta = inner.volumes.get_mut(&id).ok_or(db_error::NotFoundError)?;
        meta.available = available;
        Ok(())
    }

    fn set_volume_read_only(&self, id: u64, read_only: bool) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let meta = inner.volumes.get_mut(&id).ok_or(db_error::NotFoundError)?;
        meta.read_only = read_only;
        Ok(())
    }

    fn remove_volume(&self, id: u64) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        inner.locations.retain(|_, loc| loc.volume_id != id);
        inner.volumes.remove(&id);
        Ok(())
    }

    fn volumes(&self) -> Result<Vec<VolumeMeta>, db_error> {
        Ok(self.inner.lock().unwrap().volumes.values().cloned().collect())
    }

    fn sector_locations(&self) -> Result<Vec<SectorLocation>, db_error> {
        Ok(self.inner.lock().unwrap().locations.values().copied().collect())
    }

    fn insert_location(&self, loc: &SectorLocation) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locations.contains_key(&loc.root) {
            return Err(db_error::ExistsError);
        }
        inner.locations.insert(loc.root, *loc);
        Ok(())
    }

    fn update_refcount(&self, root: &SectorRoot, refcount: u64) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let loc = inner.locations.get_mut(root).ok_or(db_error::NotFoundError)?;
        loc.refcount = refcount;
        Ok(())
    }

    fn move_location(&self, root: &SectorRoot, volume_id: u64, slot: u64) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let loc = inner.locations.get_mut(root).ok_or(db_error::NotFoundError)?;
        loc.volume_id = volume_id;
        loc.slot = slot;
        Ok(())
    }

    fn delete_location(&self, root: &SectorRoot) -> Result<(), db_error> {
        self.inner.lock().unwrap().locations.remove(root);
        Ok(())
    }

    fn reset_refcounts(&self) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let mut counts: HashMap<SectorRoot, u64> = HashMap::new();
        for record in inner.contracts.values() {
            for root in record.sector_roots.iter() {
                *counts.entry(*root).or_insert(0) += 1;
            }
        }
        for (root, loc) in inner.locations.iter_mut() {
            loc.refcount = counts.get(root).copied().unwrap_or(0);
        }
        Ok(())
    }
}

impl ContractStore for MemStore {
    fn add_contract(&self, record: &ContractRecord) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contracts.contains_key(&record.id()) {
            return Err(db_error::ExistsError);
        }
        inner.contracts.insert(record.id(), record.clone());
        Ok(())
    }

    fn commit_revision(
        &self,
        revision: &SignedRevision,
        sector_roots: &[SectorRoot],
    ) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .contracts
            .get_mut(&revision.revision.parent_id)
            .ok_or(db_error::NotFoundError)?;
        record.revision = revision.clone();
        record.sector_roots = sector_roots.to_vec();
        Ok(())
    }

    fn update_contract_state(
        &self,
        id: &ContractId,
        state: ContractState,
        confirmation_height: Option<u64>,
        resolution_height: Option<u64>,
    ) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.contracts.get_mut(id).ok_or(db_error::NotFoundError)?;
        record.state = state;
        record.confirmation_height = confirmation_height;
        record.resolution_height = resolution_height;
        Ok(())
    }

    fn contracts(&self) -> Result<Vec<ContractRecord>, db_error> {
        Ok(self.inner.lock().unwrap().contracts.values().cloned().collect())
    }
}

impl WalletStore for MemStore {
    fn last_processed_change(&self) -> Result<Option<BlockId>, db_error> {
        Ok(self.inner.lock().unwrap().last_change)
    }

    fn unspent_outputs(&self) -> Result<Vec<(OutputId, CoinOutput)>, db_error> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .utxos
            .iter()
            .map(|(id, o)| (*id, *o))
            .collect())
    }

    fn wallet_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<WalletTransaction>, db_error> {
        let inner = self.inner.lock().unwrap();
        let mut txns = inner.transactions.clone();
        txns.sort_by(|a, b| b.index.height.cmp(&a.index.height));
        Ok(txns
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn wallet_transaction_count(&self) -> Result<u64, db_error> {
        Ok(self.inner.lock().unwrap().transactions.len() as u64)
    }

    fn update_wallet(&self, update: &WalletUpdate) -> Result<(), db_error> {
        let mut inner = self.inner.lock().unwrap();
        for block_id in update.reverted_blocks.iter() {
            inner.transactions.retain(|t| t.index.id != *block_id);
        }
        for id in update.removed_outputs.iter() {
            inner.utxos.remove(id);
        }
        for (id, output) in update.added_outputs.iter() {
            inner.utxos.insert(*id, *output);
        }
        inner.transactions.extend(update.transactions.iter().cloned());
        inner.last_change = Some(update.change_id);
        Ok(())
    }
}
