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

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use std::{error, fmt};

use silo_common::types::{ContractId, Currency, OutputId, SectorRoot};
use silo_common::util::ed25519::{PublicKey, Signature};

use crate::chain::{BlockDiff, FileContractRevision, Transaction};
use crate::storage::{Error as storage_error, SectorStore};
use crate::util_lib::db::Error as db_error;

pub mod updater;

pub use updater::ContractUpdater;

#[derive(Debug)]
pub enum Error {
    /// No contract with the given ID
    NotFound,
    /// The lease is held by another session and the timeout lapsed
    Busy,
    /// A contract with the same parent ID already exists
    Exists,
    /// A revision of this contract is already being staged
    AlreadyStaging,
    /// A renter or host signature does not verify
    InvalidSignature,
    /// The revision violates protocol rules
    InvalidRevision(String),
    /// The renter's payout delta does not cover the computed cost
    InsufficientPayment,
    /// Sector store failure
    SectorError(storage_error),
    /// Persistent store failure
    StoreError(db_error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "contract not found"),
            Error::Busy => write!(f, "contract is locked by another session"),
            Error::Exists => write!(f, "contract already exists"),
            Error::AlreadyStaging => write!(f, "contract revision already staged"),
            Error::InvalidSignature => write!(f, "invalid signature"),
            Error::InvalidRevision(ref s) => write!(f, "invalid revision: {}", s),
            Error::InsufficientPayment => write!(f, "insufficient payment"),
            Error::SectorError(ref e) => fmt::Display::fmt(e, f),
            Error::StoreError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::SectorError(ref e) => Some(e),
            Error::StoreError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<storage_error> for Error {
    fn from(e: storage_error) -> Error {
        Error::SectorError(e)
    }
}

impl From<db_error> for Error {
    fn from(e: db_error) -> Error {
        Error::StoreError(e)
    }
}

/// The observed on-chain lifecycle state of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractState {
    /// Formation transaction broadcast but not yet in a block
    Unconfirmed,
    /// Formation transaction confirmed
    Confirmed,
    /// Formation transaction reverted by a reorg
    Reverted,
    /// Storage proof accepted; valid payouts will mature
    ResolvedValid,
    /// Proof window lapsed without a proof; collateral is burned
    ResolvedMissed,
}

impl ContractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::Unconfirmed => "unconfirmed",
            ContractState::Confirmed => "confirmed",
            ContractState::Reverted => "reverted",
            ContractState::ResolvedValid => "resolved_valid",
            ContractState::ResolvedMissed => "resolved_missed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<ContractState> {
        Some(match s {
            "unconfirmed" => ContractState::Unconfirmed,
            "confirmed" => ContractState::Confirmed,
            "reverted" => ContractState::Reverted,
            "resolved_valid" => ContractState::ResolvedValid,
            "resolved_missed" => ContractState::ResolvedMissed,
            _ => return None,
        })
    }
}

/// A revision plus both parties' signatures over its canonical hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignedRevision {
    pub revision: FileContractRevision,
    pub renter_signature: Signature,
    pub host_signature: Signature,
}

impl SignedRevision {
    /// The renter's key is the first key of the revision's unlock
    /// conditions; the host's is the second.
    pub fn renter_key(&self) -> Option<PublicKey> {
        self.revision
            .unlock_conditions
            .public_keys
            .first()
            .map(|k| k.key)
    }
}

impl silo_common::codec::SiloMessageCodec for SignedRevision {
    fn consensus_serialize<W: std::io::Write>(
        &self,
        fd: &mut W,
    ) -> Result<(), silo_common::codec::Error> {
        use silo_common::codec::write_next;
        write_next(fd, &self.revision)?;
        write_next(fd, &self.renter_signature)?;
        write_next(fd, &self.host_signature)
    }

    fn consensus_deserialize<R: std::io::Read>(
        fd: &mut R,
    ) -> Result<SignedRevision, silo_common::codec::Error> {
        use silo_common::codec::read_next;
        let revision: FileContractRevision = read_next(fd)?;
        let renter_signature: Signature = read_next(fd)?;
        let host_signature: Signature = read_next(fd)?;
        Ok(SignedRevision {
            revision,
            renter_signature,
            host_signature,
        })
    }
}

/// Everything the host tracks about one contract.
#[derive(Debug, Clone)]
pub struct ContractRecord {
    pub revision: SignedRevision,
    pub renter_key: PublicKey,
    pub formation_txn_set: Vec<Transaction>,
    pub host_collateral: Currency,
    /// wallet outputs locked while the formation transaction is unconfirmed
    pub locked_outputs: Vec<OutputId>,
    pub state: ContractState,
    /// height the host learned of the contract
    pub negotiation_height: u64,
    /// block height that confirmed the formation transaction
    pub confirmation_height: Option<u64>,
    /// block height that resolved the contract
    pub resolution_height: Option<u64>,
    pub sector_roots: Vec<SectorRoot>,
}

impl ContractRecord {
    pub fn id(&self) -> ContractId {
        self.revision.revision.parent_id
    }
}

/// Structural rules every committed revision must satisfy, independent of
/// RPC pricing: strictly increasing revision numbers, immutable windows
/// and unlock conditions, payout conservation, and monotonic transfers
/// (renter to host in valid outputs, host to void in missed outputs).
pub fn validate_revision_rules(
    current: &FileContractRevision,
    revision: &FileContractRevision,
) -> Result<(), Error> {
    if revision.revision_number <= current.revision_number {
        return Err(Error::InvalidRevision(format!(
            "revision number must increase ({} <= {})",
            revision.revision_number, current.revision_number
        )));
    }
    if revision.parent_id != current.parent_id {
        return Err(Error::InvalidRevision("parent ID must not change".into()));
    }
    if revision.unlock_conditions != current.unlock_conditions
        || revision.unlock_hash != current.unlock_hash
    {
        return Err(Error::InvalidRevision(
            "unlock conditions must not change".into(),
        ));
    }
    if revision.window_start != current.window_start
        || revision.window_end != current.window_end
    {
        return Err(Error::InvalidRevision("proof window must not change".into()));
    }
    if revision.valid_proof_outputs.len() != 2 || revision.missed_proof_outputs.len() != 3 {
        return Err(Error::InvalidRevision("wrong payout output count".into()));
    }
    for (new, old) in revision
        .valid_proof_outputs
        .iter()
        .zip(current.valid_proof_outputs.iter())
        .chain(
            revision
                .missed_proof_outputs
                .iter()
                .zip(current.missed_proof_outputs.iter()),
        )
    {
        if new.address != old.address {
            return Err(Error::InvalidRevision("payout address must not change".into()));
        }
    }

    // payout conservation
    let sum = |outputs: &[crate::chain::CoinOutput]| -> Option<Currency> {
        outputs
            .iter()
            .try_fold(Currency::ZERO, |acc, o| acc.checked_add(o.value))
    };
    let old_valid = sum(&current.valid_proof_outputs)
        .ok_or_else(|| Error::InvalidRevision("valid payout overflow".into()))?;
    let new_valid = sum(&revision.valid_proof_outputs)
        .ok_or_else(|| Error::InvalidRevision("valid payout overflow".into()))?;
    let old_missed = sum(&current.missed_proof_outputs)
        .ok_or_else(|| Error::InvalidRevision("missed payout overflow".into()))?;
    let new_missed = sum(&revision.missed_proof_outputs)
        .ok_or_else(|| Error::InvalidRevision("missed payout overflow".into()))?;
    if old_valid != new_valid {
        return Err(Error::InvalidRevision("valid payout sum must not change".into()));
    }
    if old_missed != new_missed {
        return Err(Error::InvalidRevision("missed payout sum must not change".into()));
    }

    // monotonic transfers: renter -> host in valid outputs
    if revision.valid_renter_payout() > current.valid_renter_payout() {
        return Err(Error::InvalidRevision(
            "renter valid payout must not increase".into(),
        ));
    }
    // host -> void in missed outputs; the renter's missed payout is fixed
    if revision.missed_renter_payout() != current.missed_renter_payout() {
        return Err(Error::InvalidRevision(
            "renter missed payout must not change".into(),
        ));
    }
    if revision.missed_host_payout() > current.missed_host_payout() {
        return Err(Error::InvalidRevision(
            "host missed payout must not increase".into(),
        ));
    }
    Ok(())
}

/// Validate a payment revision: structural rules plus the renter covering
/// `cost` and the host risking at least `collateral`.
pub fn validate_payment_revision(
    current: &FileContractRevision,
    revision: &FileContractRevision,
    cost: Currency,
    collateral: Currency,
) -> Result<(), Error> {
    validate_revision_rules(current, revision)?;

    let transfer = current
        .valid_renter_payout()
        .checked_sub(revision.valid_renter_payout())
        .ok_or(Error::InsufficientPayment)?;
    if transfer < cost {
        return Err(Error::InsufficientPayment);
    }
    // conservation plus the renter check above force the host's valid
    // payout to grow by exactly `transfer`; verify anyway
    let host_gain = revision
        .valid_host_payout()
        .checked_sub(current.valid_host_payout())
        .ok_or_else(|| Error::InvalidRevision("host valid payout must not decrease".into()))?;
    if host_gain != transfer {
        return Err(Error::InvalidRevision(
            "renter transfer must go to the host".into(),
        ));
    }

    let burn = current
        .missed_host_payout()
        .checked_sub(revision.missed_host_payout())
        .ok_or_else(|| Error::InvalidRevision("host missed payout must not increase".into()))?;
    if burn < collateral {
        return Err(Error::InvalidRevision(format!(
            "revision must risk at least {} collateral, got {}",
            collateral, burn
        )));
    }
    let void_gain = revision
        .missed_void_payout()
        .checked_sub(current.missed_void_payout())
        .ok_or_else(|| Error::InvalidRevision("void payout must not decrease".into()))?;
    if void_gain != burn {
        return Err(Error::InvalidRevision(
            "burned collateral must go to the void".into(),
        ));
    }
    Ok(())
}

struct LeaseInner {
    locked: Mutex<bool>,
    cond: Condvar,
}

/// Persistence seam for contract records; implemented by the SQLite store
/// and an in-memory double.
pub trait ContractStore: Send + Sync {
    fn add_contract(&self, record: &ContractRecord) -> Result<(), db_error>;
    /// Atomically replace a contract's revision and sector-root list.
    fn commit_revision(
        &self,
        revision: &SignedRevision,
        sector_roots: &[SectorRoot],
    ) -> Result<(), db_error>;
    fn update_contract_state(
        &self,
        id: &ContractId,
        state: ContractState,
        confirmation_height: Option<u64>,
        resolution_height: Option<u64>,
    ) -> Result<(), db_error>;
    fn contracts(&self) -> Result<Vec<ContractRecord>, db_error>;
}

/// The contract manager: a lock-protected record map plus per-contract
/// lease locks, backed by the persistent store and holding a shared
/// (non-owning) handle to the sector store for root-list changes.
pub struct ContractManager {
    store: Arc<dyn ContractStore>,
    sectors: Arc<dyn SectorStore>,
    host_key: PublicKey,
    contracts: Mutex<HashMap<ContractId, ContractRecord>>,
    leases: Mutex<HashMap<ContractId, Arc<LeaseInner>>>,
    staging: Mutex<HashSet<ContractId>>,
}

impl ContractManager {
    pub fn new(
        store: Arc<dyn ContractStore>,
        sectors: Arc<dyn SectorStore>,
        host_key: PublicKey,
    ) -> Result<ContractManager, Error> {
        let mut contracts = HashMap::new();
        for record in store.contracts()? {
            contracts.insert(record.id(), record);
        }
        Ok(ContractManager {
            store,
            sectors,
            host_key,
            contracts: Mutex::new(contracts),
            leases: Mutex::new(HashMap::new()),
            staging: Mutex::new(HashSet::new()),
        })
    }

    fn lease(&self, id: &ContractId) -> Arc<LeaseInner> {
        let mut leases = self.leases.lock().unwrap();
        leases
            .entry(*id)
            .or_insert_with(|| {
                Arc::new(LeaseInner {
                    locked: Mutex::new(false),
                    cond: Condvar::new(),
                })
            })
            .clone()
    }

    /// Acquire an exclusive lease on a contract, waiting at most
    /// `timeout`, and return its current signed revision.
    pub fn lock(&self, id: &ContractId, timeout: Duration) -> Result<SignedRevision, Error> {
        if !self.contracts.lock().unwrap().contains_key(id) {
            return Err(Error::NotFound);
        }
        let lease = self.lease(id);
        let deadline = Instant::now() + timeout;
        let mut locked = lease.locked.lock().unwrap();
        while *locked {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Busy);
            }
            let (guard, wait) = lease.cond.wait_timeout(locked, remaining).unwrap();
            locked = guard;
            if wait.timed_out() && *locked {
                return Err(Error::Busy);
            }
        }
        *locked = true;
        drop(locked);

        // the contract may have been removed while we waited
        match self.contracts.lock().unwrap().get(id) {
            Some(record) => Ok(record.revision.clone()),
            None => {
                self.unlock(id);
                Err(Error::NotFound)
            }
        }
    }

    /// Release a lease. Idempotent.
    pub fn unlock(&self, id: &ContractId) {
        let lease = self.lease(id);
        let mut locked = lease.locked.lock().unwrap();
        *locked = false;
        lease.cond.notify_one();
    }

    /// Register a freshly formed contract in state `unconfirmed`.
    pub fn add_contract(
        &self,
        revision: SignedRevision,
        formation_txn_set: Vec<Transaction>,
        host_collateral: Currency,
        locked_outputs: Vec<OutputId>,
        current_height: u64,
    ) -> Result<(), Error> {
        let renter_key = revision.renter_key().ok_or_else(|| {
            Error::InvalidRevision("revision has no renter key".into())
        })?;
        let record = ContractRecord {
            renter_key,
            formation_txn_set,
            host_collateral,
            locked_outputs,
            state: ContractState::Unconfirmed,
            negotiation_height: current_height,
            confirmation_height: None,
            resolution_height: None,
            sector_roots: vec![],
            revision,
        };
        let id = record.id();

        let mut contracts = self.contracts.lock().unwrap();
        if contracts.contains_key(&id) {
            return Err(Error::Exists);
        }
        self.store.add_contract(&record)?;
        contracts.insert(id, record);
        info!("registered contract {} at height {}", id, current_height);
        Ok(())
    }

    /// Stage a revision of a contract. Only one updater per contract may
    /// exist at a time; the handle must be committed or dropped before
    /// another can be created.
    pub fn revise_contract(
        self: &Arc<Self>,
        id: &ContractId,
    ) -> Result<ContractUpdater, Error> {
        let roots = {
            let contracts = self.contracts.lock().unwrap();
            let record = contracts.get(id).ok_or(Error::NotFound)?;
            record.sector_roots.clone()
        };
        {
            let mut staging = self.staging.lock().unwrap();
            if !staging.insert(*id) {
                return Err(Error::AlreadyStaging);
            }
        }
        Ok(ContractUpdater::new(self.clone(), *id, &roots))
    }

    /// The requested slice of a contract's ordered sector-root list.
    pub fn sector_roots(
        &self,
        id: &ContractId,
        count: u64,
        offset: u64,
    ) -> Result<Vec<SectorRoot>, Error> {
        let contracts = self.contracts.lock().unwrap();
        let record = contracts.get(id).ok_or(Error::NotFound)?;
        let n = record.sector_roots.len() as u64;
        if offset > n || offset + count > n {
            return Err(Error::InvalidRevision(format!(
                "root range [{}, {}) out of bounds ({} roots)",
                offset,
                offset + count,
                n
            )));
        }
        Ok(record.sector_roots[offset as usize..(offset + count) as usize].to_vec())
    }

    pub fn contract(&self, id: &ContractId) -> Result<ContractRecord, Error> {
        let contracts = self.contracts.lock().unwrap();
        contracts.get(id).cloned().ok_or(Error::NotFound)
    }

    pub fn host_key(&self) -> PublicKey {
        self.host_key
    }

    pub(crate) fn sector_store(&self) -> &Arc<dyn SectorStore> {
        &self.sectors
    }

    pub(crate) fn store(&self) -> &Arc<dyn ContractStore> {
        &self.store
    }

    pub(crate) fn finish_staging(&self, id: &ContractId) {
        self.staging.lock().unwrap().remove(id);
    }

    /// Install a committed revision into the record map. Called by the
    /// updater after the store commit succeeds.
    pub(crate) fn install_revision(
        &self,
        revision: SignedRevision,
        sector_roots: Vec<SectorRoot>,
    ) -> Result<(), Error> {
        let mut contracts = self.contracts.lock().unwrap();
        let record = contracts
            .get_mut(&revision.revision.parent_id)
            .ok_or(Error::NotFound)?;
        record.revision = revision;
        record.sector_roots = sector_roots;
        Ok(())
    }

    /// Apply a block: confirm formations, observe storage proofs, and
    /// mark contracts whose window lapsed without a proof as missed.
    pub fn process_chain_apply(&self, diff: &BlockDiff) -> Result<(), Error> {
        let mut contracts = self.contracts.lock().unwrap();
        let height = diff.index.height;

        for txn in diff.block.transactions.iter() {
            for i in 0..txn.file_contracts.len() {
                let id = txn.file_contract_id(i as u64);
                if let Some(record) = contracts.get_mut(&id) {
                    if record.state == ContractState::Unconfirmed
                        || record.state == ContractState::Reverted
                    {
                        record.state = ContractState::Confirmed;
                        record.confirmation_height = Some(height);
                        self.store.update_contract_state(
                            &id,
                            record.state,
                            record.confirmation_height,
                            record.resolution_height,
                        )?;
                        info!("contract {} confirmed at height {}", id, height);
                    }
                }
            }
            for proof in txn.storage_proofs.iter() {
                if let Some(record) = contracts.get_mut(&proof.parent_id) {
                    if record.state == ContractState::Confirmed {
                        record.state = ContractState::ResolvedValid;
                        record.resolution_height = Some(height);
                        self.store.update_contract_state(
                            &proof.parent_id,
                            record.state,
                            record.confirmation_height,
                            record.resolution_height,
                        )?;
                        info!(
                            "contract {} resolved valid at height {}",
                            proof.parent_id, height
                        );
                    }
                }
            }
        }

        for (id, record) in contracts.iter_mut() {
            if record.state == ContractState::Confirmed
                && height >= record.revision.revision.window_end
            {
                record.state = ContractState::ResolvedMissed;
                record.resolution_height = Some(height);
                self.store.update_contract_state(
                    id,
                    record.state,
                    record.confirmation_height,
                    record.resolution_height,
                )?;
                warn!("contract {} missed its proof window at height {}", id, height);
            }
        }
        Ok(())
    }

    /// Revert a block: roll back any state transition whose trigger block
    /// is the reverted one.
    pub fn process_chain_revert(&self, diff: &BlockDiff) -> Result<(), Error> {
        let mut contracts = self.contracts.lock().unwrap();
        let height = diff.index.height;
        for (id, record) in contracts.iter_mut() {
            if record.resolution_height == Some(height) {
                record.state = ContractState::Confirmed;
                record.resolution_height = None;
                self.store.update_contract_state(
                    id,
                    record.state,
                    record.confirmation_height,
                    record.resolution_height,
                )?;
                info!("contract {} resolution reverted at height {}", id, height);
            } else if record.confirmation_height == Some(height) {
                record.state = ContractState::Reverted;
                record.confirmation_height = None;
                self.store.update_contract_state(
                    id,
                    record.state,
                    record.confirmation_height,
                    record.resolution_height,
                )?;
                warn!("contract {} formation reverted at height {}", id, height);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test;
