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

//! End-to-end session tests: a minimal in-test renter drives the full
//! protocol against a real host over localhost TCP.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use silo_common::consts::{HASH_SIZE, LEAF_SIZE, LEAVES_PER_SECTOR, SECTOR_SIZE};
use silo_common::types::{ContractId, Currency, Hash256, OutputId, SectorRoot, Specifier};
use silo_common::util::ed25519::{PrivateKey, PublicKey};

use crate::chain::{CoinOutput, FileContract, FileContractRevision, Transaction, UnlockKey};
use crate::contracts::ContractManager;
use crate::merkle;
use crate::persist::sqlite::HostStore;
use crate::rhp::rpc::{challenge_hash, formation_unlock_conditions, initial_revision, revise};
use crate::rhp::transport::Transport;
use crate::rhp::wire::{
    RpcChallengeRequest, RpcFormContractAdditions, RpcFormContractRequest,
    RpcFormContractSignatures, RpcLockRequest, RpcLockResponse, RpcReadRequest,
    RpcReadRequestSection, RpcReadResponse, RpcSectorRootsRequest, RpcSectorRootsResponse,
    RpcSettingsResponse, RpcWriteAction, RpcWriteMerkleProof, RpcWriteRequest, RpcWriteResponse,
    ERR_CONTRACT_LOCKED, ERR_CONTRACT_NOT_FOUND, ERR_INVALID_REQUEST,
};
use crate::rhp::{
    Error, HostConfig, HostSettings, SessionHandler, LOOP_EXIT, MIN_MESSAGE_SIZE,
    RPC_FORM_CONTRACT_ID, RPC_LOCK_ID, RPC_READ_ID, RPC_READ_STOP, RPC_SECTOR_ROOTS_ID,
    RPC_SETTINGS_ID, RPC_UNLOCK_ID, RPC_WRITE_ID, WRITE_ACTION_APPEND,
};
use crate::storage::VolumeManager;
use crate::test_utils::{random_sector, temp_dir, TestChain, TestTPool};
use crate::wallet::SingleAddressWallet;

const T: Duration = Duration::from_secs(10);
const TIP_HEIGHT: u64 = 10;
/// One unit of the test chain's headline denomination.
const COIN: u128 = 1_000_000_000_000_000_000_000_000;

struct TestHost {
    addr: SocketAddr,
    dir: PathBuf,
    handler: Arc<SessionHandler>,
    contracts: Arc<ContractManager>,
    storage: Arc<VolumeManager>,
    chain: Arc<TestChain>,
    tpool: Arc<TestTPool>,
}

impl Drop for TestHost {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn start_host(dir: &Path, volume_sectors: u64) -> TestHost {
    let store = Arc::new(HostStore::open(dir.join("host.db")).unwrap());
    let storage = Arc::new(VolumeManager::load(store.clone()).unwrap());
    storage
        .add_volume(dir.join("volume.dat").to_str().unwrap(), volume_sectors)
        .unwrap();

    let chain = Arc::new(TestChain::new());
    chain.set_tip(TIP_HEIGHT);
    let tpool = Arc::new(TestTPool::new());

    let host_key = PrivateKey::generate();
    let wallet = Arc::new(SingleAddressWallet::new(
        host_key.clone(),
        chain.clone(),
        store.clone(),
    ));
    // seed the wallet with several outputs so concurrent formations can
    // each lock their own
    use crate::wallet::WalletStore;
    for i in 0..8u8 {
        let seeded = crate::wallet::WalletUpdate {
            change_id: silo_common::types::BlockId([i; 32]),
            added_outputs: vec![(
                OutputId([0xf0 | i; 32]),
                CoinOutput {
                    value: Currency::new(20 * COIN),
                    address: wallet.address(),
                },
            )],
            ..crate::wallet::WalletUpdate::default()
        };
        store.update_wallet(&seeded).unwrap();
    }

    let contracts = Arc::new(
        ContractManager::new(store.clone(), storage.clone(), host_key.public_key()).unwrap(),
    );

    let config = HostConfig {
        net_address: "127.0.0.1".into(),
        max_duration: 1000,
        max_collateral: Currency::new(100 * COIN),
        window_size: 10,
        ..HostConfig::default()
    };
    let handler = Arc::new(SessionHandler::new(
        host_key,
        config,
        contracts.clone(),
        storage.clone(),
        wallet,
        chain.clone(),
        tpool.clone(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_handler = handler.clone();
    std::thread::spawn(move || serve_handler.serve(listener));

    TestHost {
        addr,
        dir: dir.to_path_buf(),
        handler,
        contracts,
        storage,
        chain,
        tpool,
    }
}

/// A minimal renter: just enough protocol to drive the host end to end.
struct TestRenter {
    transport: Transport,
    key: PrivateKey,
    host_key: PublicKey,
    challenge: [u8; 16],
    revision: Option<FileContractRevision>,
    roots: Vec<SectorRoot>,
}

/// Payment values moving `cost` from renter to host in the valid outputs.
fn payment_values(current: &FileContractRevision, cost: Currency) -> (Vec<Currency>, Vec<Currency>) {
    let valid = vec![
        current.valid_proof_outputs[0].value.checked_sub(cost).unwrap(),
        current.valid_proof_outputs[1].value.checked_add(cost).unwrap(),
    ];
    let missed = vec![
        current.missed_proof_outputs[0].value,
        current.missed_proof_outputs[1].value,
        current.missed_proof_outputs[2].value,
    ];
    (valid, missed)
}

impl TestRenter {
    fn connect(addr: SocketAddr) -> TestRenter {
        let stream = TcpStream::connect(addr).unwrap();
        let (transport, host_key) = Transport::dial(stream).unwrap();
        let challenge: RpcChallengeRequest = transport.read_object(MIN_MESSAGE_SIZE, T).unwrap();
        TestRenter {
            transport,
            key: PrivateKey::generate(),
            host_key,
            challenge: challenge.challenge,
            revision: None,
            roots: vec![],
        }
    }

    fn settings(&self) -> HostSettings {
        self.transport.write_object(&RPC_SETTINGS_ID, T).unwrap();
        let resp: RpcSettingsResponse = self.transport.read_response(MIN_MESSAGE_SIZE, T).unwrap();
        serde_json::from_slice(&resp.settings).unwrap()
    }

    /// Form a contract funding the renter side with `renter_funds` and the
    /// host side with `collateral` above the contract price.
    fn form_contract(
        &mut self,
        settings: &HostSettings,
        renter_funds: Currency,
        collateral: Currency,
        duration: u64,
    ) -> ContractId {
        let uc = formation_unlock_conditions(self.key.public_key(), self.host_key);
        let window_start = TIP_HEIGHT + duration;
        let valid_host = settings.contract_price.checked_add(collateral).unwrap();
        let payout = renter_funds.checked_add(valid_host).unwrap();
        let fc = FileContract {
            file_size: 0,
            file_merkle_root: Hash256::default(),
            window_start,
            window_end: window_start + settings.window_size,
            payout,
            valid_proof_outputs: vec![
                CoinOutput {
                    value: renter_funds,
                    address: silo_common::types::Address([0x11; 32]),
                },
                CoinOutput {
                    value: valid_host,
                    address: silo_common::types::Address([0x22; 32]),
                },
            ],
            missed_proof_outputs: vec![
                CoinOutput {
                    value: renter_funds,
                    address: silo_common::types::Address([0x11; 32]),
                },
                CoinOutput {
                    value: settings.contract_price,
                    address: silo_common::types::Address([0x22; 32]),
                },
                CoinOutput {
                    value: collateral,
                    address: silo_common::types::Address::default(),
                },
            ],
            unlock_hash: uc.unlock_hash(),
            revision_number: 0,
        };
        let mut txn = Transaction {
            file_contracts: vec![fc],
            ..Transaction::default()
        };

        self.transport.write_object(&RPC_FORM_CONTRACT_ID, T).unwrap();
        self.transport
            .write_object(
                &RpcFormContractRequest {
                    transactions: vec![txn.clone()],
                    renter_key: UnlockKey::ed25519(self.key.public_key()),
                },
                T,
            )
            .unwrap();

        let additions: RpcFormContractAdditions =
            self.transport.read_response(MIN_MESSAGE_SIZE, T).unwrap();
        txn.coin_inputs.extend(additions.inputs);
        txn.coin_outputs.extend(additions.outputs);

        let revision = initial_revision(&txn, self.host_key, self.key.public_key());
        let contract_id = revision.parent_id;
        let sig_hash = revision.sig_hash();
        let renter_sig = self.key.sign(&sig_hash);
        self.transport
            .write_object(
                &RpcFormContractSignatures {
                    contract_signatures: vec![],
                    revision_signature: crate::chain::TransactionSignature {
                        parent_id: Hash256(contract_id.0),
                        signature: renter_sig,
                        ..crate::chain::TransactionSignature::default()
                    },
                },
                T,
            )
            .unwrap();

        let host_sigs: RpcFormContractSignatures =
            self.transport.read_response(MIN_MESSAGE_SIZE, T).unwrap();
        assert!(self
            .host_key
            .verify(&sig_hash, &host_sigs.revision_signature.signature));

        self.revision = Some(revision);
        self.roots.clear();
        contract_id
    }

    fn lock(&mut self, id: ContractId) -> Result<(), Error> {
        let signature = self.key.sign(&challenge_hash(&self.challenge));
        self.transport.write_object(&RPC_LOCK_ID, T)?;
        self.transport.write_object(
            &RpcLockRequest {
                contract_id: id,
                signature,
                timeout_millis: 5000,
            },
            T,
        )?;
        let resp: RpcLockResponse = self.transport.read_response(MIN_MESSAGE_SIZE, T)?;
        assert!(resp.acquired);
        self.challenge = resp.new_challenge;
        self.revision = Some(resp.revision);
        Ok(())
    }

    fn unlock(&mut self) {
        self.transport.write_object(&RPC_UNLOCK_ID, T).unwrap();
    }

    /// Append one sector and verify the host's Merkle diff proof.
    fn append(
        &mut self,
        settings: &HostSettings,
        sector: &[u8],
        remaining_duration: u64,
    ) -> SectorRoot {
        let root = merkle::sector_root(sector);
        let current = self.revision.clone().unwrap();

        let stored = settings
            .storage_price
            .checked_mul_u64(SECTOR_SIZE as u64)
            .and_then(|c| c.checked_mul_u64(remaining_duration))
            .unwrap();
        let upload = settings
            .upload_bandwidth_price
            .checked_mul_u64(SECTOR_SIZE as u64)
            .unwrap();
        let cost = stored.checked_add(upload).unwrap();
        let (valid, missed) = payment_values(&current, cost);

        self.transport.write_object(&RPC_WRITE_ID, T).unwrap();
        self.transport
            .write_object(
                &RpcWriteRequest {
                    actions: vec![RpcWriteAction {
                        action_type: WRITE_ACTION_APPEND,
                        a: 0,
                        b: 0,
                        data: sector.to_vec(),
                    }],
                    merkle_proof: true,
                    new_revision_number: current.revision_number + 1,
                    new_valid_proof_values: valid.clone(),
                    new_missed_proof_values: missed.clone(),
                },
                Duration::from_secs(60),
            )
            .unwrap();

        let proof: RpcWriteMerkleProof = self
            .transport
            .read_response(MIN_MESSAGE_SIZE, Duration::from_secs(60))
            .unwrap();
        // the old tree must be consistent with what we signed before
        assert!(merkle::verify_diff_proof(
            &current.file_merkle_root,
            self.roots.len() as u64,
            &[],
            &proof.old_subtree_hashes,
            &proof.old_leaf_hashes,
        ));
        // and the new root must commit to exactly our roots plus this one
        let mut new_roots = self.roots.clone();
        new_roots.push(root);
        assert_eq!(proof.new_merkle_root, merkle::meta_root(&new_roots));

        let mut revision = revise(&current, current.revision_number + 1, &valid, &missed).unwrap();
        revision.file_merkle_root = proof.new_merkle_root;
        revision.file_size = new_roots.len() as u64 * SECTOR_SIZE as u64;
        let sig_hash = revision.sig_hash();
        self.transport
            .write_object(
                &RpcWriteResponse {
                    signature: self.key.sign(&sig_hash),
                },
                T,
            )
            .unwrap();
        let host_resp: RpcWriteResponse =
            self.transport.read_response(MIN_MESSAGE_SIZE, T).unwrap();
        assert!(self.host_key.verify(&sig_hash, &host_resp.signature));

        self.revision = Some(revision);
        self.roots = new_roots;
        root
    }

    /// Fetch a slice of the contract's sector roots with its range proof.
    fn sector_roots(
        &mut self,
        settings: &HostSettings,
        offset: u64,
        count: u64,
    ) -> Vec<SectorRoot> {
        let current = self.revision.clone().unwrap();
        let total = self.roots.len() as u64;
        let proof_size = merkle::range_proof_size(total, offset, offset + count);
        let cost = settings
            .download_bandwidth_price
            .checked_mul_u64((count + proof_size) * HASH_SIZE as u64)
            .unwrap();
        let (valid, missed) = payment_values(&current, cost);
        let revision = revise(&current, current.revision_number + 1, &valid, &missed).unwrap();
        let sig_hash = revision.sig_hash();

        self.transport.write_object(&RPC_SECTOR_ROOTS_ID, T).unwrap();
        self.transport
            .write_object(
                &RpcSectorRootsRequest {
                    root_offset: offset,
                    num_roots: count,
                    new_revision_number: revision.revision_number,
                    new_valid_proof_values: valid,
                    new_missed_proof_values: missed,
                    signature: self.key.sign(&sig_hash),
                },
                T,
            )
            .unwrap();
        let resp: RpcSectorRootsResponse = self
            .transport
            .read_response(1 << 20, Duration::from_secs(120))
            .unwrap();
        assert!(self.host_key.verify(&sig_hash, &resp.signature));
        assert!(merkle::verify_meta_range_proof(
            &current.file_merkle_root,
            total,
            &resp.sector_roots,
            offset,
            offset + count,
            &resp.merkle_proof,
        ));
        self.revision = Some(revision);
        resp.sector_roots
    }

    /// Read a section of a sector, verifying the range proof.
    fn read_section(
        &mut self,
        settings: &HostSettings,
        root: SectorRoot,
        offset: u64,
        length: u64,
    ) -> Vec<u8> {
        let current = self.revision.clone().unwrap();
        let start = offset / LEAF_SIZE as u64;
        let end = (offset + length) / LEAF_SIZE as u64;
        let bandwidth =
            length + merkle::range_proof_size(LEAVES_PER_SECTOR, start, end) * HASH_SIZE as u64;
        let cost = settings
            .download_bandwidth_price
            .checked_mul_u64(bandwidth)
            .and_then(|c| c.checked_add(settings.sector_access_price))
            .unwrap();
        let (valid, missed) = payment_values(&current, cost);
        let revision = revise(&current, current.revision_number + 1, &valid, &missed).unwrap();
        let sig_hash = revision.sig_hash();

        self.transport.write_object(&RPC_READ_ID, T).unwrap();
        self.transport
            .write_object(
                &RpcReadRequest {
                    sections: vec![RpcReadRequestSection {
                        merkle_root: root,
                        offset,
                        length,
                    }],
                    merkle_proof: true,
                    new_revision_number: revision.revision_number,
                    new_valid_proof_values: valid,
                    new_missed_proof_values: missed,
                    signature: self.key.sign(&sig_hash),
                },
                T,
            )
            .unwrap();

        let resp: RpcReadResponse = self
            .transport
            .read_response(SECTOR_SIZE as u64 + MIN_MESSAGE_SIZE, Duration::from_secs(60))
            .unwrap();
        assert!(self.host_key.verify(&sig_hash, &resp.signature));
        assert!(merkle::verify_sector_range_proof(
            &root,
            &resp.data,
            start,
            end,
            &resp.merkle_proof,
        ));
        // let the host's stop watcher finish
        self.transport.write_object(&RPC_READ_STOP, T).unwrap();

        self.revision = Some(revision);
        resp.data
    }

    fn exit(&self) {
        let _ = self.transport.write_object(&LOOP_EXIT, T);
    }
}

#[test]
fn settings_echo() {
    let host = start_host(&temp_dir("rhp-settings"), 4);
    let renter = TestRenter::connect(host.addr);

    let renter_settings = renter.settings();
    let host_settings = host.handler.settings();
    assert_eq!(renter_settings, host_settings);
    assert_eq!(renter_settings.total_storage, 4 * SECTOR_SIZE as u64);
    assert!(renter_settings.accepting_contracts);

    // the payload round-trips through JSON unchanged
    let js = serde_json::to_vec(&renter_settings).unwrap();
    let again: HostSettings = serde_json::from_slice(&js).unwrap();
    assert_eq!(again, renter_settings);
    renter.exit();
}

#[test]
fn unknown_rpc_is_rejected() {
    let host = start_host(&temp_dir("rhp-unknown"), 2);
    let renter = TestRenter::connect(host.addr);

    renter
        .transport
        .write_object(&Specifier::new("Unknown"), T)
        .unwrap();
    match renter.transport.read_response::<RpcSettingsResponse>(MIN_MESSAGE_SIZE, T) {
        Err(Error::RpcError(e)) => assert_eq!(e.error_type, ERR_INVALID_REQUEST),
        other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn lock_errors() {
    let host = start_host(&temp_dir("rhp-lock"), 2);
    let mut renter = TestRenter::connect(host.addr);

    // locking a contract that doesn't exist
    let bogus = ContractId([0x99; 32]);
    let signature = renter.key.sign(&challenge_hash(&renter.challenge));
    renter.transport.write_object(&RPC_LOCK_ID, T).unwrap();
    renter
        .transport
        .write_object(
            &RpcLockRequest {
                contract_id: bogus,
                signature,
                timeout_millis: 100,
            },
            T,
        )
        .unwrap();
    match renter.transport.read_response::<RpcLockResponse>(MIN_MESSAGE_SIZE, T) {
        Err(Error::RpcError(e)) => assert_eq!(e.error_type, ERR_CONTRACT_NOT_FOUND),
        other => panic!("expected ContractNotFound, got {:?}", other.map(|_| ())),
    }

    // a session that already holds a contract can't lock another
    let settings = renter.settings();
    let id = renter.form_contract(
        &settings,
        Currency::new(10 * COIN),
        Currency::new(5 * COIN),
        200,
    );
    renter.lock(id).unwrap();
    let signature = renter.key.sign(&challenge_hash(&renter.challenge));
    renter.transport.write_object(&RPC_LOCK_ID, T).unwrap();
    renter
        .transport
        .write_object(
            &RpcLockRequest {
                contract_id: id,
                signature,
                timeout_millis: 100,
            },
            T,
        )
        .unwrap();
    match renter.transport.read_response::<RpcLockResponse>(MIN_MESSAGE_SIZE, T) {
        Err(Error::RpcError(e)) => assert_eq!(e.error_type, ERR_CONTRACT_LOCKED),
        other => panic!("expected ContractLocked, got {:?}", other.map(|_| ())),
    }
    renter.unlock();
    renter.exit();
}

#[test]
fn form_upload_roots_read() {
    let host = start_host(&temp_dir("rhp-e2e"), 4);
    let mut renter = TestRenter::connect(host.addr);
    let settings = renter.settings();

    // form a contract: 10 coins of renter funds, 5 of host collateral,
    // proof window opening 200 blocks out
    let id = renter.form_contract(
        &settings,
        Currency::new(10 * COIN),
        Currency::new(5 * COIN),
        200,
    );
    // the host broadcast the formation set and registered the contract
    assert_eq!(host.tpool.accepted.lock().unwrap().len(), 1);
    let record = host.contracts.contract(&id).unwrap();
    assert_eq!(record.revision.revision.revision_number, 1);

    renter.lock(id).unwrap();

    // upload a sector whose first 256 bytes are a known pattern
    let sector = random_sector(256);
    let pattern = sector[..256].to_vec();
    let remaining = 200; // window_start - tip
    let root = renter.append(&settings, &sector, remaining);
    assert_eq!(root, merkle::sector_root(&sector));

    // the committed revision reflects the upload
    let record = host.contracts.contract(&id).unwrap();
    assert_eq!(record.revision.revision.file_size, SECTOR_SIZE as u64);
    assert_eq!(
        record.revision.revision.file_merkle_root,
        merkle::meta_root(&[root])
    );
    assert_eq!(record.sector_roots, vec![root]);

    // SectorRoots returns the same root under a valid range proof
    let roots = renter.sector_roots(&settings, 0, 1);
    assert_eq!(roots, vec![root]);

    // read the pattern back under a sector range proof
    let data = renter.read_section(&settings, root, 0, 256);
    assert_eq!(data, pattern);

    // renter spending equals the drop in its valid payout
    let record = host.contracts.contract(&id).unwrap();
    let spent = Currency::new(10 * COIN)
        .checked_sub(record.revision.revision.valid_proof_outputs[0].value)
        .unwrap();
    assert!(!spent.is_zero());

    renter.unlock();
    renter.exit();

    // the chain pump confirms the formation once it lands in a block
    let formation_set = host.tpool.accepted.lock().unwrap()[0].clone();
    let block = crate::chain::Block {
        parent_id: silo_common::types::BlockId([0xaa; 32]),
        timestamp: 5000,
        miner_payouts: vec![],
        transactions: formation_set,
    };
    let diff = crate::chain::BlockDiff {
        index: silo_common::types::ChainIndex {
            height: TIP_HEIGHT + 1,
            id: block.id(),
        },
        block,
        created: vec![],
        spent: vec![],
        matured: vec![],
    };
    host.contracts.process_chain_apply(&diff).unwrap();
    assert_eq!(
        host.contracts.contract(&id).unwrap().state,
        crate::contracts::ContractState::Confirmed
    );
}

#[test]
fn concurrent_sessions_write_distinct_contracts() {
    let host = start_host(&temp_dir("rhp-concurrent"), 16);
    let addr = host.addr;

    let mut handles = vec![];
    for _ in 0..3 {
        handles.push(std::thread::spawn(move || {
            let mut renter = TestRenter::connect(addr);
            let settings = renter.settings();
            let id = renter.form_contract(
                &settings,
                Currency::new(10 * COIN),
                Currency::new(5 * COIN),
                200,
            );
            renter.lock(id).unwrap();
            let sector = random_sector(1024);
            let root = renter.append(&settings, &sector, 200);
            renter.unlock();
            renter.exit();
            (id, root)
        }));
    }

    let results: Vec<(ContractId, SectorRoot)> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    let (_, used) = host.storage.usage();
    assert_eq!(used, results.len() as u64);
    for (id, root) in results {
        let record = host.contracts.contract(&id).unwrap();
        assert_eq!(record.sector_roots, vec![root]);
        assert_eq!(record.revision.revision.file_size, SECTOR_SIZE as u64);
        // every indexed sector reads back with a matching root
        use crate::storage::SectorStore;
        let data = host.storage.read_sector(&root).unwrap();
        assert_eq!(merkle::sector_root(&data), root);
    }
}

#[test]
fn handshake_rejects_missing_cipher() {
    let host = start_host(&temp_dir("rhp-cipher"), 2);
    // a handshake offering no supported cipher gets dropped
    let stream = TcpStream::connect(host.addr).unwrap();
    use silo_common::codec::write_next;
    let mut w = &stream;
    write_next(&mut w, &crate::rhp::LOOP_ENTER).unwrap();
    write_next(
        &mut w,
        &crate::rhp::wire::HandshakeRequest {
            ephemeral_key: [1u8; 32],
            ciphers: vec![crate::rhp::CIPHER_NO_OVERLAP],
        },
    )
    .unwrap();
    // the host closes without a handshake response
    use std::io::Read;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 1];
    let n = (&stream).read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}
