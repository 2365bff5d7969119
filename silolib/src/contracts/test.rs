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
use std::time::Duration;

use rand::RngCore;
use silo_common::consts::SECTOR_SIZE;
use silo_common::types::{Address, BlockId, ChainIndex, Currency, Hash256, SectorRoot};
use silo_common::util::ed25519::PrivateKey;

use super::*;
use crate::chain::{
    Block, BlockDiff, CoinOutput, FileContract, FileContractRevision, StorageProof, Transaction,
    UnlockConditions, UnlockKey,
};
use crate::merkle;
use crate::persist::mem::MemStore;
use crate::storage::MemSectorStore;

struct Harness {
    manager: Arc<ContractManager>,
    sectors: Arc<MemSectorStore>,
    host: PrivateKey,
    renter: PrivateKey,
}

fn harness() -> Harness {
    let host = PrivateKey::from_seed(&[1u8; 32]);
    let renter = PrivateKey::from_seed(&[2u8; 32]);
    let store = Arc::new(MemStore::new());
    let sectors = Arc::new(MemSectorStore::new());
    let manager = Arc::new(
        ContractManager::new(store, sectors.clone(), host.public_key()).unwrap(),
    );
    Harness {
        manager,
        sectors,
        host,
        renter,
    }
}

/// A formation transaction plus the initial revision derived from it,
/// so the contract ID is consistent with the transaction.
fn formation(h: &Harness) -> (Transaction, FileContractRevision) {
    let uc = UnlockConditions {
        timelock: 0,
        public_keys: vec![
            UnlockKey::ed25519(h.renter.public_key()),
            UnlockKey::ed25519(h.host.public_key()),
        ],
        signatures_required: 2,
    };
    let fc = FileContract {
        file_size: 0,
        file_merkle_root: Hash256::default(),
        window_start: 100,
        window_end: 200,
        payout: Currency::new(1000),
        valid_proof_outputs: vec![
            CoinOutput {
                value: Currency::new(800),
                address: Address([1; 32]),
            },
            CoinOutput {
                value: Currency::new(200),
                address: Address([2; 32]),
            },
        ],
        missed_proof_outputs: vec![
            CoinOutput {
                value: Currency::new(800),
                address: Address([1; 32]),
            },
            CoinOutput {
                value: Currency::new(150),
                address: Address([2; 32]),
            },
            CoinOutput {
                value: Currency::new(50),
                address: Address::default(),
            },
        ],
        unlock_hash: uc.unlock_hash(),
        revision_number: 0,
    };
    let txn = Transaction {
        file_contracts: vec![fc.clone()],
        ..Transaction::default()
    };
    let revision = FileContractRevision {
        parent_id: txn.file_contract_id(0),
        unlock_conditions: uc,
        revision_number: 1,
        file_size: 0,
        file_merkle_root: Hash256::default(),
        window_start: fc.window_start,
        window_end: fc.window_end,
        valid_proof_outputs: fc.valid_proof_outputs.clone(),
        missed_proof_outputs: fc.missed_proof_outputs.clone(),
        unlock_hash: fc.unlock_hash,
    };
    (txn, revision)
}

fn sign(h: &Harness, revision: FileContractRevision) -> SignedRevision {
    let sig_hash = revision.sig_hash();
    SignedRevision {
        renter_signature: h.renter.sign(&sig_hash),
        host_signature: h.host.sign(&sig_hash),
        revision,
    }
}

fn add_test_contract(h: &Harness) -> ContractId {
    let (txn, revision) = formation(h);
    let id = revision.parent_id;
    h.manager
        .add_contract(
            sign(h, revision),
            vec![txn],
            Currency::new(50),
            vec![],
            10,
        )
        .unwrap();
    id
}

fn random_sector_root(h: &Harness) -> SectorRoot {
    let mut sector = vec![0u8; SECTOR_SIZE];
    rand::thread_rng().fill_bytes(&mut sector[..256]);
    let root = merkle::sector_root(&sector);
    h.sectors.write_sector(&root, &sector).unwrap();
    root
}

/// A payment revision moving `cost` from renter to host in the valid
/// outputs and `burn` from host to void in the missed outputs.
fn pay(current: &FileContractRevision, cost: u128, burn: u128) -> FileContractRevision {
    let mut revision = current.clone();
    revision.revision_number += 1;
    revision.valid_proof_outputs[0].value =
        Currency::new(current.valid_proof_outputs[0].value.0 - cost);
    revision.valid_proof_outputs[1].value =
        Currency::new(current.valid_proof_outputs[1].value.0 + cost);
    revision.missed_proof_outputs[1].value =
        Currency::new(current.missed_proof_outputs[1].value.0 - burn);
    revision.missed_proof_outputs[2].value =
        Currency::new(current.missed_proof_outputs[2].value.0 + burn);
    revision
}

#[test]
fn add_lock_unlock() {
    let h = harness();
    let id = add_test_contract(&h);

    // duplicate registration is rejected
    let (txn, revision) = formation(&h);
    assert!(matches!(
        h.manager
            .add_contract(sign(&h, revision), vec![txn], Currency::ZERO, vec![], 10),
        Err(Error::Exists)
    ));

    let locked = h.manager.lock(&id, Duration::from_millis(10)).unwrap();
    assert_eq!(locked.revision.parent_id, id);

    // a second lock times out while the first is held
    assert!(matches!(
        h.manager.lock(&id, Duration::from_millis(50)),
        Err(Error::Busy)
    ));

    h.manager.unlock(&id);
    h.manager.lock(&id, Duration::from_millis(10)).unwrap();
    h.manager.unlock(&id);
    // unlock is idempotent
    h.manager.unlock(&id);

    assert!(matches!(
        h.manager.lock(&ContractId([0xee; 32]), Duration::from_millis(10)),
        Err(Error::NotFound)
    ));
}

#[test]
fn lock_contends_across_threads() {
    let h = harness();
    let id = add_test_contract(&h);

    h.manager.lock(&id, Duration::from_millis(10)).unwrap();
    let manager = h.manager.clone();
    let waiter = std::thread::spawn(move || manager.lock(&id, Duration::from_secs(5)));
    std::thread::sleep(Duration::from_millis(50));
    h.manager.unlock(&id);
    // the waiter acquires the lease once it is released
    waiter.join().unwrap().unwrap();
}

#[test]
fn commit_append_and_trim() {
    let h = harness();
    let id = add_test_contract(&h);

    let root = random_sector_root(&h);
    assert_eq!(h.sectors.refcount(&root), 1);

    // stage and commit an append
    let mut updater = h.manager.revise_contract(&id).unwrap();
    updater.append_sector(&root);
    assert_eq!(updater.sector_length(), 1);
    assert_eq!(updater.sector_root(0).unwrap(), root);

    let current = h.manager.contract(&id).unwrap().revision.revision;
    let mut revision = pay(&current, 10, 5);
    revision.file_size = SECTOR_SIZE as u64;
    revision.file_merkle_root = updater.merkle_root();
    updater.commit(sign(&h, revision)).unwrap();

    let record = h.manager.contract(&id).unwrap();
    assert_eq!(record.sector_roots, vec![root]);
    assert_eq!(record.revision.revision.revision_number, 2);
    assert_eq!(
        record.revision.revision.file_merkle_root,
        merkle::meta_root(&[root])
    );
    // the contract took its own reference
    assert_eq!(h.sectors.refcount(&root), 2);
    // the session's write reference is released after commit
    h.sectors.release_sector(&root).unwrap();
    assert_eq!(h.sectors.refcount(&root), 1);

    // trim it back off
    let mut updater = h.manager.revise_contract(&id).unwrap();
    updater.trim_sectors(1).unwrap();
    let current = h.manager.contract(&id).unwrap().revision.revision;
    let mut revision = pay(&current, 0, 0);
    revision.file_size = 0;
    revision.file_merkle_root = merkle::meta_root(&[]);
    updater.commit(sign(&h, revision)).unwrap();

    assert!(h.manager.contract(&id).unwrap().sector_roots.is_empty());
    assert_eq!(h.sectors.refcount(&root), 0);
}

#[test]
fn commit_rejects_bad_revisions() {
    let h = harness();
    let id = add_test_contract(&h);
    let root = random_sector_root(&h);
    let current = h.manager.contract(&id).unwrap().revision.revision;

    // revision number must increase
    let updater = h.manager.revise_contract(&id).unwrap();
    let mut stale = pay(&current, 10, 0);
    stale.revision_number = current.revision_number;
    assert!(matches!(
        updater.commit(sign(&h, stale)),
        Err(Error::InvalidRevision(_))
    ));

    // file size must match the staged sector state
    let mut updater = h.manager.revise_contract(&id).unwrap();
    updater.append_sector(&root);
    let wrong_size = pay(&current, 10, 0);
    assert!(matches!(
        updater.commit(sign(&h, wrong_size)),
        Err(Error::InvalidRevision(_))
    ));

    // payouts must be conserved
    let updater = h.manager.revise_contract(&id).unwrap();
    let mut inflated = pay(&current, 0, 0);
    inflated.valid_proof_outputs[1].value = Currency::new(10_000);
    assert!(matches!(
        updater.commit(sign(&h, inflated)),
        Err(Error::InvalidRevision(_))
    ));

    // a renter signature by the wrong key is rejected
    let updater = h.manager.revise_contract(&id).unwrap();
    let revision = pay(&current, 10, 0);
    let sig_hash = revision.sig_hash();
    let wrong = PrivateKey::from_seed(&[9u8; 32]);
    let bad = SignedRevision {
        renter_signature: wrong.sign(&sig_hash),
        host_signature: h.host.sign(&sig_hash),
        revision,
    };
    assert!(matches!(updater.commit(bad), Err(Error::InvalidSignature)));

    // nothing committed
    let record = h.manager.contract(&id).unwrap();
    assert_eq!(record.revision.revision.revision_number, 1);
    assert!(record.sector_roots.is_empty());
}

#[test]
fn only_one_staged_revision_at_a_time() {
    let h = harness();
    let id = add_test_contract(&h);

    let updater = h.manager.revise_contract(&id).unwrap();
    assert!(matches!(
        h.manager.revise_contract(&id),
        Err(Error::AlreadyStaging)
    ));
    drop(updater);
    h.manager.revise_contract(&id).unwrap();
}

#[test]
fn sector_roots_slice() {
    let h = harness();
    let id = add_test_contract(&h);

    let roots: Vec<SectorRoot> = (0..4).map(|_| random_sector_root(&h)).collect();
    let mut updater = h.manager.revise_contract(&id).unwrap();
    for root in roots.iter() {
        updater.append_sector(root);
    }
    let current = h.manager.contract(&id).unwrap().revision.revision;
    let mut revision = pay(&current, 10, 5);
    revision.file_size = 4 * SECTOR_SIZE as u64;
    revision.file_merkle_root = updater.merkle_root();
    updater.commit(sign(&h, revision)).unwrap();

    assert_eq!(h.manager.sector_roots(&id, 4, 0).unwrap(), roots);
    assert_eq!(h.manager.sector_roots(&id, 2, 1).unwrap(), roots[1..3].to_vec());
    assert!(h.manager.sector_roots(&id, 4, 1).is_err());
}

#[test]
fn payment_revision_rules() {
    let h = harness();
    let (_, current) = formation(&h);

    // covering the cost exactly is fine
    let revision = pay(&current, 10, 5);
    validate_payment_revision(&current, &revision, Currency::new(10), Currency::new(5)).unwrap();

    // overpaying is fine too
    validate_payment_revision(&current, &revision, Currency::new(5), Currency::ZERO).unwrap();

    // not covering the cost is not
    assert!(matches!(
        validate_payment_revision(&current, &revision, Currency::new(11), Currency::ZERO),
        Err(Error::InsufficientPayment)
    ));

    // not risking the collateral is not
    assert!(matches!(
        validate_payment_revision(&current, &revision, Currency::new(10), Currency::new(6)),
        Err(Error::InvalidRevision(_))
    ));

    // the renter's missed payout is invariant
    let mut bad = pay(&current, 10, 0);
    bad.missed_proof_outputs[0].value = Currency::new(700);
    bad.missed_proof_outputs[1].value = Currency::new(250);
    assert!(matches!(
        validate_payment_revision(&current, &bad, Currency::new(10), Currency::ZERO),
        Err(Error::InvalidRevision(_))
    ));

    // currency may never move from host to renter
    let mut refund = current.clone();
    refund.revision_number += 1;
    refund.valid_proof_outputs[0].value = Currency::new(900);
    refund.valid_proof_outputs[1].value = Currency::new(100);
    assert!(matches!(
        validate_payment_revision(&current, &refund, Currency::ZERO, Currency::ZERO),
        Err(Error::InvalidRevision(_))
    ));
}

fn diff_with(txns: Vec<Transaction>, height: u64) -> BlockDiff {
    let block = Block {
        parent_id: BlockId([height as u8; 32]),
        timestamp: 1000 + height,
        miner_payouts: vec![],
        transactions: txns,
    };
    BlockDiff {
        index: ChainIndex {
            height,
            id: block.id(),
        },
        block,
        created: vec![],
        spent: vec![],
        matured: vec![],
    }
}

#[test]
fn chain_lifecycle_transitions() {
    let h = harness();
    let (txn, revision) = formation(&h);
    let id = revision.parent_id;
    h.manager
        .add_contract(sign(&h, revision), vec![txn.clone()], Currency::new(50), vec![], 10)
        .unwrap();
    assert_eq!(h.manager.contract(&id).unwrap().state, ContractState::Unconfirmed);

    // the formation transaction confirms
    h.manager.process_chain_apply(&diff_with(vec![txn.clone()], 11)).unwrap();
    let record = h.manager.contract(&id).unwrap();
    assert_eq!(record.state, ContractState::Confirmed);
    assert_eq!(record.confirmation_height, Some(11));

    // a reorg reverts the confirmation
    h.manager.process_chain_revert(&diff_with(vec![txn.clone()], 11)).unwrap();
    assert_eq!(h.manager.contract(&id).unwrap().state, ContractState::Reverted);

    // it confirms again in a later block
    h.manager.process_chain_apply(&diff_with(vec![txn.clone()], 12)).unwrap();
    assert_eq!(h.manager.contract(&id).unwrap().state, ContractState::Confirmed);

    // a storage proof resolves it
    let proof_txn = Transaction {
        storage_proofs: vec![StorageProof {
            parent_id: id,
            leaf: vec![0u8; 64],
            proof: vec![],
        }],
        ..Transaction::default()
    };
    h.manager.process_chain_apply(&diff_with(vec![proof_txn.clone()], 150)).unwrap();
    let record = h.manager.contract(&id).unwrap();
    assert_eq!(record.state, ContractState::ResolvedValid);
    assert_eq!(record.resolution_height, Some(150));

    // reverting the proof block reopens the contract
    h.manager.process_chain_revert(&diff_with(vec![proof_txn], 150)).unwrap();
    assert_eq!(h.manager.contract(&id).unwrap().state, ContractState::Confirmed);

    // the window lapses with no proof
    h.manager.process_chain_apply(&diff_with(vec![], 200)).unwrap();
    assert_eq!(h.manager.contract(&id).unwrap().state, ContractState::ResolvedMissed);
}
