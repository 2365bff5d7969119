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

use std::sync::Arc;

use silo_common::consts::SECTOR_SIZE;
use silo_common::types::{ContractId, Hash256, SectorRoot};

use crate::contracts::{validate_revision_rules, ContractManager, Error, SignedRevision};
use crate::merkle::CachedMerkleTree;

/// A staging handle for one revision of one contract. Sector-root
/// mutations run against a cached Merkle tree in O(log n) rehashes; no
/// state is visible to anyone else until `commit` succeeds. Dropping the
/// updater without committing abandons the staged changes.
pub struct ContractUpdater {
    manager: Arc<ContractManager>,
    id: ContractId,
    tree: CachedMerkleTree,
    /// roots gaining a contract reference on commit
    appended: Vec<SectorRoot>,
    /// roots losing their contract reference on commit
    removed: Vec<SectorRoot>,
}

impl ContractUpdater {
    pub(crate) fn new(
        manager: Arc<ContractManager>,
        id: ContractId,
        roots: &[SectorRoot],
    ) -> ContractUpdater {
        ContractUpdater {
            manager,
            id,
            tree: CachedMerkleTree::new(roots),
            appended: vec![],
            removed: vec![],
        }
    }

    pub fn contract_id(&self) -> ContractId {
        self.id
    }

    pub fn append_sector(&mut self, root: &SectorRoot) {
        self.tree.append(root);
        self.appended.push(*root);
    }

    pub fn trim_sectors(&mut self, n: u64) -> Result<(), Error> {
        let len = self.tree.len() as u64;
        if n > len {
            return Err(Error::InvalidRevision(format!(
                "cannot trim {} of {} sectors",
                n, len
            )));
        }
        for i in (len - n)..len {
            let root = self.tree.leaf(i as usize).expect("leaf in bounds");
            self.removed.push(root);
        }
        self.tree.trim(n as usize);
        Ok(())
    }

    pub fn swap_sectors(&mut self, a: u64, b: u64) -> Result<(), Error> {
        if !self.tree.swap(a as usize, b as usize) {
            return Err(Error::InvalidRevision(format!(
                "swap indices {} and {} out of bounds ({} sectors)",
                a,
                b,
                self.tree.len()
            )));
        }
        Ok(())
    }

    pub fn update_sector(&mut self, root: &SectorRoot, i: u64) -> Result<(), Error> {
        let old = self
            .tree
            .leaf(i as usize)
            .ok_or_else(|| {
                Error::InvalidRevision(format!(
                    "update index {} out of bounds ({} sectors)",
                    i,
                    self.tree.len()
                ))
            })?;
        self.tree.update(i as usize, root);
        self.removed.push(old);
        self.appended.push(*root);
        Ok(())
    }

    pub fn sector_root(&self, i: u64) -> Result<SectorRoot, Error> {
        self.tree.leaf(i as usize).ok_or_else(|| {
            Error::InvalidRevision(format!(
                "sector index {} out of bounds ({} sectors)",
                i,
                self.tree.len()
            ))
        })
    }

    pub fn sector_roots(&self) -> Vec<SectorRoot> {
        self.tree.leaves()
    }

    pub fn merkle_root(&self) -> Hash256 {
        self.tree.root()
    }

    pub fn sector_length(&self) -> u64 {
        self.tree.len() as u64
    }

    /// Atomically commit the staged revision: verify both signatures and
    /// the revision rules, check that the revision matches the staged
    /// sector state, persist, install in the record map, and shift sector
    /// references from the old root list to the new one.
    pub fn commit(self, signed: SignedRevision) -> Result<(), Error> {
        if signed.revision.parent_id != self.id {
            return Err(Error::InvalidRevision("revision is for another contract".into()));
        }
        let record = self.manager.contract(&self.id)?;

        let sig_hash = signed.revision.sig_hash();
        if !record.renter_key.verify(&sig_hash, &signed.renter_signature) {
            return Err(Error::InvalidSignature);
        }
        if !self
            .manager
            .host_key()
            .verify(&sig_hash, &signed.host_signature)
        {
            return Err(Error::InvalidSignature);
        }

        validate_revision_rules(&record.revision.revision, &signed.revision)?;

        let expected_size = self.sector_length() * SECTOR_SIZE as u64;
        if signed.revision.file_size != expected_size {
            return Err(Error::InvalidRevision(format!(
                "revision file size {} does not match staged size {}",
                signed.revision.file_size, expected_size
            )));
        }
        if signed.revision.file_merkle_root != self.merkle_root() {
            return Err(Error::InvalidRevision(
                "revision merkle root does not match staged roots".into(),
            ));
        }

        let revision_number = signed.revision.revision_number;
        let roots = self.tree.leaves();
        self.manager.store().commit_revision(&signed, &roots)?;
        self.manager.install_revision(signed, roots)?;

        // shift sector references; a crash in here is healed by the
        // startup refcount scan
        let sectors = self.manager.sector_store();
        for root in self.appended.iter() {
            sectors.add_sector_ref(root)?;
        }
        for root in self.removed.iter() {
            sectors.release_sector(root)?;
        }
        debug!("committed revision {} of contract {}", revision_number, self.id);
        Ok(())
    }
}

impl Drop for ContractUpdater {
    fn drop(&mut self) {
        self.manager.finish_staging(&self.id);
    }
}
