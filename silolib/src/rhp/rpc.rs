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

//! RPC dispatch and handlers. Every RPC is an atomic unit: contract
//! state changes only through a committed updater, and sector writes
//! roll back through their release guard if the RPC aborts.

use std::collections::BTreeSet;
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::RngCore;
use silo_common::consts::{HASH_SIZE, LEAF_SIZE, LEAVES_PER_SECTOR, SECTOR_SIZE};
use silo_common::types::{Currency, Hash256};
use silo_common::util::ed25519::{PrivateKey, PublicKey};
use silo_common::util::hash::blake2b_256;

use crate::chain::{
    CoinOutput, FileContract, FileContractRevision, Transaction, TransactionSignature,
    UnlockConditions, UnlockKey, ALGORITHM_ED25519,
};
use crate::contracts::{validate_payment_revision, Error as contract_error, SignedRevision};
use crate::merkle;
use crate::rhp::transport::Transport;
use crate::rhp::wire::{
    RpcError, RpcFormContractAdditions, RpcFormContractRequest, RpcFormContractSignatures,
    RpcLockRequest, RpcLockResponse, RpcReadRequest, RpcReadResponse, RpcSectorRootsRequest,
    RpcSectorRootsResponse, RpcSettingsResponse, RpcWriteMerkleProof, RpcWriteRequest,
    RpcWriteResponse, ERR_CONTRACT_EXPIRED, ERR_CONTRACT_LOCKED, ERR_CONTRACT_NOT_FOUND,
    ERR_PAYMENT_TOO_LOW,
};
use crate::rhp::{
    Error, HostSettings, SessionHandler, LOOP_EXIT, MIN_MESSAGE_SIZE, RPC_FORM_CONTRACT_ID,
    RPC_LOCK_ID, RPC_READ_ID, RPC_READ_STOP, RPC_RENEW_CLEAR_ID, RPC_SECTOR_ROOTS_ID,
    RPC_SETTINGS_ID, RPC_UNLOCK_ID, RPC_WRITE_ID, WRITE_ACTION_APPEND, WRITE_ACTION_SWAP,
    WRITE_ACTION_TRIM, WRITE_ACTION_UPDATE,
};
use crate::storage::{SectorReleaseGuard, SectorStore};

/// Default per-message deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Form-contract requests carry whole transaction sets.
const FORM_CONTRACT_TIMEOUT: Duration = Duration::from_secs(60);
/// Write requests carry sector payloads.
const WRITE_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Sector-root responses can be large for old contracts.
const SECTOR_ROOTS_TIMEOUT: Duration = Duration::from_secs(120);
/// The renter may be slow to send the read stop signal.
const READ_STOP_TIMEOUT: Duration = Duration::from_secs(300);
/// How long a session may idle between RPCs.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
/// Upper bound on the renter-supplied contract lock timeout.
const MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

const CHALLENGE_PREFIX: &[u8] = b"silo/sig/challenge|";

/// The hash a renter signs to prove control of a contract's renter key.
pub fn challenge_hash(challenge: &[u8; 16]) -> Hash256 {
    blake2b_256(CHALLENGE_PREFIX, challenge)
}

/// Per-connection session state: the encrypted channel, the current
/// challenge, the locked contract, and the running spend counter.
pub struct Session {
    transport: Arc<Transport>,
    challenge: [u8; 16],
    contract: Option<SignedRevision>,
    spent: Currency,
}

impl Session {
    pub fn accept(stream: TcpStream, host_key: &PrivateKey) -> Result<Session, Error> {
        let transport = Transport::accept(stream, host_key)?;
        let mut challenge = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut challenge);
        // the renter needs the initial challenge before its first Lock
        transport.write_object(
            &crate::rhp::wire::RpcChallengeRequest { challenge },
            DEFAULT_TIMEOUT,
        )?;
        Ok(Session {
            transport: Arc::new(transport),
            challenge,
            contract: None,
            spent: Currency::ZERO,
        })
    }

    /// Dispatch RPCs until the renter exits or the channel fails.
    pub fn run(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        loop {
            let id = self.transport.read_id(IDLE_TIMEOUT)?;
            debug!("session rpc {}", id);
            match id {
                LOOP_EXIT => return Ok(()),
                RPC_SETTINGS_ID => self.rpc_settings(handler)?,
                RPC_LOCK_ID => self.rpc_lock(handler)?,
                RPC_UNLOCK_ID => self.rpc_unlock(handler),
                RPC_FORM_CONTRACT_ID => self.rpc_form_contract(handler)?,
                RPC_SECTOR_ROOTS_ID => self.rpc_sector_roots(handler)?,
                RPC_WRITE_ID => self.rpc_write(handler)?,
                RPC_READ_ID => self.rpc_read(handler)?,
                RPC_RENEW_CLEAR_ID => {
                    // present in the protocol, not supported by this host
                    self.transport.write_error(
                        &RpcError::invalid_request("renew-and-clear is not supported"),
                        DEFAULT_TIMEOUT,
                    )?;
                }
                unknown => {
                    self.transport.write_error(
                        &RpcError::invalid_request(format!("unknown RPC \"{}\"", unknown)),
                        DEFAULT_TIMEOUT,
                    )?;
                    return Err(Error::RpcError(RpcError::invalid_request(format!(
                        "renter sent unknown RPC \"{}\"",
                        unknown
                    ))));
                }
            }
        }
    }

    /// Release any held contract lease. Idempotent.
    pub fn close(&mut self, handler: &Arc<SessionHandler>) {
        if let Some(contract) = self.contract.take() {
            handler.contracts().unlock(&contract.revision.parent_id);
        }
    }

    fn spend(&mut self, amount: Currency) {
        self.spent = self.spent.checked_add(amount).unwrap_or(self.spent);
    }

    /// Total charged to the renter over this session.
    pub fn spent(&self) -> Currency {
        self.spent
    }

    /// The locked contract, if it can still be revised at `height`.
    fn contract_revisable(&self, height: u64) -> Result<SignedRevision, RpcError> {
        let Some(contract) = self.contract.as_ref() else {
            return Err(RpcError::new(ERR_CONTRACT_NOT_FOUND, "no contract locked"));
        };
        if height >= contract.revision.window_start {
            return Err(RpcError::new(
                ERR_CONTRACT_EXPIRED,
                "contract proof window has opened",
            ));
        }
        if contract.revision.revision_number == u64::MAX {
            return Err(RpcError::contract_invalid("contract cannot be revised further"));
        }
        Ok(contract.clone())
    }

    fn rpc_settings(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        let settings = handler.settings();
        let js = match serde_json::to_vec(&settings) {
            Ok(js) => js,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to marshal settings: {}", e);
                return Ok(());
            }
        };
        self.transport
            .write_response(&RpcSettingsResponse { settings: js }, DEFAULT_TIMEOUT)
    }

    fn rpc_lock(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        let req: RpcLockRequest = self
            .transport
            .read_object(MIN_MESSAGE_SIZE, DEFAULT_TIMEOUT)?;

        if self.contract.is_some() {
            return self.transport.write_error(
                &RpcError::new(ERR_CONTRACT_LOCKED, "contract already locked"),
                DEFAULT_TIMEOUT,
            );
        }

        let timeout = Duration::from_millis(req.timeout_millis).min(MAX_LOCK_TIMEOUT);
        let contract = match handler.contracts().lock(&req.contract_id, timeout) {
            Ok(contract) => contract,
            Err(e) => {
                return self
                    .transport
                    .write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
            }
        };

        // verify the renter's signature over the session challenge
        let renter_key = contract.renter_key().unwrap_or_default();
        if !renter_key.verify(&challenge_hash(&self.challenge), &req.signature) {
            handler.contracts().unlock(&req.contract_id);
            return self.transport.write_error(
                &RpcError::invalid_signature("challenge signature failed"),
                DEFAULT_TIMEOUT,
            );
        }

        rand::thread_rng().fill_bytes(&mut self.challenge);
        let resp = RpcLockResponse {
            acquired: true,
            new_challenge: self.challenge,
            revision: contract.revision.clone(),
            renter_signature: contract.renter_signature,
            host_signature: contract.host_signature,
        };
        if let Err(e) = self.transport.write_response(&resp, DEFAULT_TIMEOUT) {
            handler.contracts().unlock(&req.contract_id);
            return Err(e);
        }
        self.contract = Some(contract);
        Ok(())
    }

    fn rpc_unlock(&mut self, handler: &Arc<SessionHandler>) {
        if let Some(contract) = self.contract.take() {
            handler.contracts().unlock(&contract.revision.parent_id);
        }
    }

    fn rpc_form_contract(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        let req: RpcFormContractRequest = self
            .transport
            .read_object(10 * MIN_MESSAGE_SIZE, FORM_CONTRACT_TIMEOUT)?;

        let mut formation_txn_set = req.transactions;
        let contract_count = formation_txn_set
            .last()
            .map(|txn| txn.file_contracts.len())
            .unwrap_or(0);
        if contract_count != 1 {
            return self.transport.write_error(
                &RpcError::contract_invalid(
                    "transaction set does not contain a file contract",
                ),
                DEFAULT_TIMEOUT,
            );
        }
        if req.renter_key.algorithm != ALGORITHM_ED25519 {
            return self.transport.write_error(
                &RpcError::contract_invalid("unsupported renter key algorithm"),
                DEFAULT_TIMEOUT,
            );
        }

        let settings = handler.settings();
        if !settings.accepting_contracts {
            return self.transport.write_error(
                &RpcError::contract_invalid("host is not accepting contracts"),
                DEFAULT_TIMEOUT,
            );
        }
        let current_height = handler.cm().tip().height;
        let host_key = handler.host_key().public_key();

        let host_collateral = {
            let formation_txn = formation_txn_set.last().expect("checked above");
            match validate_contract_formation(
                &formation_txn.file_contracts[0],
                req.renter_key.key,
                host_key,
                current_height,
                &settings,
            ) {
                Ok(collateral) => collateral,
                Err(e) => {
                    return self.transport.write_error(&e, DEFAULT_TIMEOUT);
                }
            }
        };

        // fund the host's side of the payout
        let formation_txn = formation_txn_set.last_mut().expect("checked above");
        let renter_inputs = formation_txn.coin_inputs.len();
        let renter_outputs = formation_txn.coin_outputs.len();
        let (to_sign, _release) = match handler
            .wallet()
            .fund_transaction(formation_txn, host_collateral)
        {
            Ok(x) => x,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to fund formation transaction: {}", e);
                return Ok(());
            }
        };

        let initial_revision =
            initial_revision(formation_txn, host_key, req.renter_key.key);
        let sig_hash = initial_revision.sig_hash();
        let host_sig = handler.host_key().sign(&sig_hash);
        let contract_id = formation_txn.file_contract_id(0);

        let additions = RpcFormContractAdditions {
            inputs: formation_txn.coin_inputs[renter_inputs..].to_vec(),
            outputs: formation_txn.coin_outputs[renter_outputs..].to_vec(),
        };
        self.transport.write_response(&additions, DEFAULT_TIMEOUT)?;

        let renter_sigs: RpcFormContractSignatures = self
            .transport
            .read_object(MIN_MESSAGE_SIZE, DEFAULT_TIMEOUT)?;
        let renter_sig = renter_sigs.revision_signature.signature;
        if !req.renter_key.key.verify(&sig_hash, &renter_sig) {
            return self.transport.write_error(
                &RpcError::invalid_signature("invalid renter revision signature"),
                DEFAULT_TIMEOUT,
            );
        }

        // append renter signatures, then the host's own
        let renter_txn_sigs = renter_sigs.contract_signatures.len();
        formation_txn.signatures = renter_sigs.contract_signatures;
        if let Err(e) = handler.wallet().sign_transaction(
            formation_txn,
            &to_sign,
            crate::chain::CoveredFields::whole_transaction(),
        ) {
            self.transport
                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
            error!("failed to sign formation transaction: {}", e);
            return Ok(());
        }
        let host_txn_sigs = formation_txn.signatures[renter_txn_sigs..].to_vec();

        if let Err(e) = handler.tpool().accept_transaction_set(&formation_txn_set) {
            return self.transport.write_error(
                &RpcError::contract_invalid(format!(
                    "failed to broadcast formation transaction: {}",
                    e
                )),
                DEFAULT_TIMEOUT,
            );
        }

        let signed_revision = SignedRevision {
            revision: initial_revision,
            renter_signature: renter_sig,
            host_signature: host_sig,
        };
        if let Err(e) = handler.contracts().add_contract(
            signed_revision,
            formation_txn_set.clone(),
            host_collateral,
            to_sign.clone(),
            current_height,
        ) {
            self.transport
                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
            error!("failed to add contract to store: {}", e);
            return Ok(());
        }

        self.spend(settings.contract_price);
        info!(
            "formed contract {} with collateral {}",
            contract_id, host_collateral
        );

        let host_sigs = RpcFormContractSignatures {
            contract_signatures: host_txn_sigs,
            revision_signature: TransactionSignature {
                parent_id: Hash256(contract_id.0),
                public_key_index: 0,
                covered_fields: crate::chain::CoveredFields {
                    file_contract_revisions: vec![0],
                    ..crate::chain::CoveredFields::default()
                },
                signature: host_sig,
            },
        };
        self.transport.write_response(&host_sigs, DEFAULT_TIMEOUT)
    }

    fn rpc_sector_roots(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        let current_height = handler.cm().tip().height;
        let contract = match self.contract_revisable(current_height) {
            Ok(c) => c,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };

        let req: RpcSectorRootsRequest = self
            .transport
            .read_object(MIN_MESSAGE_SIZE, DEFAULT_TIMEOUT)?;
        let settings = handler.settings();
        let contract_id = contract.revision.parent_id;

        let total_roots = contract.revision.file_size / SECTOR_SIZE as u64;
        let end = match req.root_offset.checked_add(req.num_roots) {
            Some(end) if end <= total_roots => end,
            _ => {
                return self.transport.write_error(
                    &RpcError::invalid_request(format!(
                        "root range [{}, {}+{}) out of bounds ({} roots)",
                        req.root_offset, req.root_offset, req.num_roots, total_roots
                    )),
                    DEFAULT_TIMEOUT,
                );
            }
        };

        let revision = match revise(
            &contract.revision,
            req.new_revision_number,
            &req.new_valid_proof_values,
            &req.new_missed_proof_values,
        ) {
            Ok(r) => r,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };
        let sig_hash = revision.sig_hash();
        let renter_key = contract.renter_key().unwrap_or_default();
        if !renter_key.verify(&sig_hash, &req.signature) {
            return self.transport.write_error(
                &RpcError::invalid_signature("invalid renter revision signature"),
                DEFAULT_TIMEOUT,
            );
        }

        let proof_size = merkle::range_proof_size(total_roots, req.root_offset, end);
        let cost = settings
            .download_bandwidth_price
            .checked_mul_u64((req.num_roots + proof_size) * HASH_SIZE as u64)
            .unwrap_or(Currency::new(u128::MAX));
        if let Err(e) =
            validate_payment_revision(&contract.revision, &revision, cost, Currency::ZERO)
        {
            return self.transport.write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
        }

        let roots = match handler
            .contracts()
            .sector_roots(&contract_id, req.num_roots, req.root_offset)
        {
            Ok(r) => r,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to get sector roots: {}", e);
                return Ok(());
            }
        };
        let all_roots = match handler
            .contracts()
            .sector_roots(&contract_id, total_roots, 0)
        {
            Ok(r) => r,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to get sector roots: {}", e);
                return Ok(());
            }
        };

        let host_sig = handler.host_key().sign(&sig_hash);
        let signed = SignedRevision {
            revision,
            renter_signature: req.signature,
            host_signature: host_sig,
        };
        let updater = match handler.contracts().revise_contract(&contract_id) {
            Ok(u) => u,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to revise contract: {}", e);
                return Ok(());
            }
        };
        if let Err(e) = updater.commit(signed.clone()) {
            self.transport
                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
            error!("failed to commit contract revision: {}", e);
            return Ok(());
        }
        self.contract = Some(signed);
        self.spend(cost);

        let resp = RpcSectorRootsResponse {
            merkle_proof: merkle::build_meta_range_proof(&all_roots, req.root_offset, end),
            sector_roots: roots,
            signature: host_sig,
        };
        self.transport.write_response(&resp, SECTOR_ROOTS_TIMEOUT)
    }

    fn rpc_write(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        let current_height = handler.cm().tip().height;
        let contract = match self.contract_revisable(current_height) {
            Ok(c) => c,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };
        let settings = handler.settings();

        let req: RpcWriteRequest = self
            .transport
            .read_object(5 * SECTOR_SIZE as u64, WRITE_REQUEST_TIMEOUT)?;

        let remaining_duration = contract.revision.window_start - current_height;
        let old_sectors = contract.revision.file_size / SECTOR_SIZE as u64;
        let (cost, collateral) = match validate_write_actions(
            &req.actions,
            old_sectors,
            req.merkle_proof,
            remaining_duration,
            &settings,
        ) {
            Ok(x) => x,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };

        let mut revision = match revise(
            &contract.revision,
            req.new_revision_number,
            &req.new_valid_proof_values,
            &req.new_missed_proof_values,
        ) {
            Ok(r) => r,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };
        if let Err(e) =
            validate_payment_revision(&contract.revision, &revision, cost, Currency::ZERO)
        {
            return self.transport.write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
        }
        // the collateral for appended sectors comes out of the escrow the
        // formation already moved to the void output
        if revision.missed_void_payout() < collateral {
            return self.transport.write_error(
                &RpcError::contract_invalid(format!(
                    "escrowed collateral {} does not cover required {}",
                    revision.missed_void_payout(),
                    collateral
                )),
                DEFAULT_TIMEOUT,
            );
        }

        let mut updater = match handler
            .contracts()
            .revise_contract(&contract.revision.parent_id)
        {
            Ok(u) => u,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to revise contract: {}", e);
                return Ok(());
            }
        };
        let old_roots = updater.sector_roots();
        let storage: Arc<dyn SectorStore> = handler.storage().clone();
        let mut release_guard = SectorReleaseGuard::new(storage.clone());
        // old-tree leaf indices touched by the actions, for the diff proof
        let mut touched: BTreeSet<u64> = BTreeSet::new();
        let mut sim_len = old_roots.len() as u64;

        for action in req.actions.iter() {
            match action.action_type {
                WRITE_ACTION_APPEND => {
                    let root = merkle::sector_root(&action.data);
                    if let Err(e) = storage.write_sector(&root, &action.data) {
                        self.transport
                            .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                        error!("append action: failed to write sector: {}", e);
                        return Ok(());
                    }
                    release_guard.add(root);
                    updater.append_sector(&root);
                    sim_len += 1;
                }
                WRITE_ACTION_TRIM => {
                    if let Err(e) = updater.trim_sectors(action.a) {
                        return self
                            .transport
                            .write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
                    }
                    for i in (sim_len - action.a)..sim_len {
                        if i < old_roots.len() as u64 {
                            touched.insert(i);
                        }
                    }
                    sim_len -= action.a;
                }
                WRITE_ACTION_SWAP => {
                    if let Err(e) = updater.swap_sectors(action.a, action.b) {
                        return self
                            .transport
                            .write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
                    }
                    for i in [action.a, action.b] {
                        if i < old_roots.len() as u64 {
                            touched.insert(i);
                        }
                    }
                }
                WRITE_ACTION_UPDATE => {
                    let (index, offset) = (action.a, action.b);
                    let old_root = match updater.sector_root(index) {
                        Ok(r) => r,
                        Err(e) => {
                            return self
                                .transport
                                .write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
                        }
                    };
                    let mut sector = match storage.read_sector(&old_root) {
                        Ok(s) => s,
                        Err(e) => {
                            self.transport
                                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                            error!("failed to read sector {}: {}", old_root, e);
                            return Ok(());
                        }
                    };
                    sector[offset as usize..offset as usize + action.data.len()]
                        .copy_from_slice(&action.data);
                    let new_root = merkle::sector_root(&sector);
                    if let Err(e) = storage.write_sector(&new_root, &sector) {
                        self.transport
                            .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                        error!("update action: failed to write sector: {}", e);
                        return Ok(());
                    }
                    release_guard.add(new_root);
                    if let Err(e) = updater.update_sector(&new_root, index) {
                        return self
                            .transport
                            .write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
                    }
                    if index < old_roots.len() as u64 {
                        touched.insert(index);
                    }
                }
                _ => unreachable!("validated above"),
            }
        }

        // send the proof of the transition before asking for a signature
        let mut proof_resp = RpcWriteMerkleProof {
            new_merkle_root: updater.merkle_root(),
            ..RpcWriteMerkleProof::default()
        };
        if req.merkle_proof {
            let touched: Vec<u64> = touched.into_iter().collect();
            let (subtrees, leaves) = merkle::build_diff_proof(&touched, &old_roots);
            proof_resp.old_subtree_hashes = subtrees;
            proof_resp.old_leaf_hashes = leaves;
        }
        self.transport
            .write_response(&proof_resp, Duration::from_secs(60))?;

        // the revision now covers the new file size and merkle root
        revision.file_merkle_root = proof_resp.new_merkle_root;
        revision.file_size = updater.sector_length() * SECTOR_SIZE as u64;

        let renter_resp: RpcWriteResponse = self
            .transport
            .read_object(MIN_MESSAGE_SIZE, DEFAULT_TIMEOUT)?;
        let sig_hash = revision.sig_hash();
        let renter_key = contract.renter_key().unwrap_or_default();
        if !renter_key.verify(&sig_hash, &renter_resp.signature) {
            return self.transport.write_error(
                &RpcError::invalid_signature("invalid renter revision signature"),
                DEFAULT_TIMEOUT,
            );
        }
        let host_sig = handler.host_key().sign(&sig_hash);
        let signed = SignedRevision {
            revision,
            renter_signature: renter_resp.signature,
            host_signature: host_sig,
        };

        // a revision referencing new sectors only commits after the
        // volumes are durable
        if let Err(e) = storage.sync() {
            self.transport
                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
            error!("failed to sync storage: {}", e);
            return Ok(());
        }
        if let Err(e) = updater.commit(signed.clone()) {
            self.transport
                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
            error!("failed to commit contract revision: {}", e);
            return Ok(());
        }
        self.contract = Some(signed);
        self.spend(cost);

        self.transport
            .write_response(&RpcWriteResponse { signature: host_sig }, DEFAULT_TIMEOUT)
    }

    fn rpc_read(&mut self, handler: &Arc<SessionHandler>) -> Result<(), Error> {
        let current_height = handler.cm().tip().height;
        let contract = match self.contract_revisable(current_height) {
            Ok(c) => c,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };
        let settings = handler.settings();

        let req: RpcReadRequest = self
            .transport
            .read_object(4 * MIN_MESSAGE_SIZE, Duration::from_secs(60))?;

        // validate the sections and calculate the bandwidth cost
        let mut bandwidth: u64 = 0;
        for section in req.sections.iter() {
            if section.offset + section.length > SECTOR_SIZE as u64 {
                return self.transport.write_error(
                    &RpcError::invalid_request("request is out-of-bounds"),
                    DEFAULT_TIMEOUT,
                );
            }
            if section.length == 0 {
                return self.transport.write_error(
                    &RpcError::invalid_request("length cannot be zero"),
                    DEFAULT_TIMEOUT,
                );
            }
            if req.merkle_proof
                && (section.offset % LEAF_SIZE as u64 != 0
                    || section.length % LEAF_SIZE as u64 != 0)
            {
                return self.transport.write_error(
                    &RpcError::invalid_request(
                        "offset and length must be multiples of the leaf size when requesting a merkle proof",
                    ),
                    DEFAULT_TIMEOUT,
                );
            }
            bandwidth += section.length;
            if req.merkle_proof {
                let start = section.offset / LEAF_SIZE as u64;
                let end = (section.offset + section.length) / LEAF_SIZE as u64;
                bandwidth +=
                    merkle::range_proof_size(LEAVES_PER_SECTOR, start, end) * HASH_SIZE as u64;
            }
        }
        let cost = settings
            .download_bandwidth_price
            .checked_mul_u64(bandwidth)
            .and_then(|c| {
                settings
                    .sector_access_price
                    .checked_mul_u64(req.sections.len() as u64)
                    .and_then(|a| c.checked_add(a))
            })
            .unwrap_or(Currency::new(u128::MAX));

        let revision = match revise(
            &contract.revision,
            req.new_revision_number,
            &req.new_valid_proof_values,
            &req.new_missed_proof_values,
        ) {
            Ok(r) => r,
            Err(e) => return self.transport.write_error(&e, DEFAULT_TIMEOUT),
        };
        let sig_hash = revision.sig_hash();
        let renter_key = contract.renter_key().unwrap_or_default();
        if !renter_key.verify(&sig_hash, &req.signature) {
            return self.transport.write_error(
                &RpcError::invalid_signature("invalid renter revision signature"),
                DEFAULT_TIMEOUT,
            );
        }
        if let Err(e) =
            validate_payment_revision(&contract.revision, &revision, cost, Currency::ZERO)
        {
            return self.transport.write_error(&rpc_error_for(&e), DEFAULT_TIMEOUT);
        }

        // commit the payment revision before streaming any data
        let host_sig = handler.host_key().sign(&sig_hash);
        let signed = SignedRevision {
            revision,
            renter_signature: req.signature,
            host_signature: host_sig,
        };
        let updater = match handler
            .contracts()
            .revise_contract(&contract.revision.parent_id)
        {
            Ok(u) => u,
            Err(e) => {
                self.transport
                    .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
                error!("failed to revise contract: {}", e);
                return Ok(());
            }
        };
        if let Err(e) = updater.commit(signed.clone()) {
            self.transport
                .write_error(&RpcError::host_internal(), DEFAULT_TIMEOUT)?;
            error!("failed to commit contract revision: {}", e);
            return Ok(());
        }
        self.contract = Some(signed);
        self.spend(cost);

        // watch for the renter's stop signal on the inbound stream while
        // responses stream out
        let (stop_tx, stop_rx) = mpsc::channel::<Result<(), Error>>();
        let watcher_transport = self.transport.clone();
        let watcher = thread::Builder::new()
            .name("read-stop-watcher".into())
            .spawn(move || {
                let result = match watcher_transport.read_id(READ_STOP_TIMEOUT) {
                    Ok(id) if id == RPC_READ_STOP => Ok(()),
                    Ok(id) => Err(Error::RpcError(RpcError::invalid_request(format!(
                        "expected read stop signal, got \"{}\"",
                        id
                    )))),
                    Err(e) => Err(e),
                };
                let _ = stop_tx.send(result);
            })
            .map_err(|e| Error::IOError(e))?;

        let result = (|| -> Result<(), Error> {
            let storage: Arc<dyn SectorStore> = handler.storage().clone();
            let total = req.sections.len();
            for (i, section) in req.sections.iter().enumerate() {
                let sector = match storage.read_sector(&section.merkle_root) {
                    Ok(s) => s,
                    Err(e) => {
                        self.transport.write_error(
                            &RpcError::host_internal(),
                            DEFAULT_TIMEOUT,
                        )?;
                        error!("failed to read sector {}: {}", section.merkle_root, e);
                        return Ok(());
                    }
                };
                let mut resp = RpcReadResponse {
                    data: sector
                        [section.offset as usize..(section.offset + section.length) as usize]
                        .to_vec(),
                    ..RpcReadResponse::default()
                };
                if req.merkle_proof {
                    let start = section.offset / LEAF_SIZE as u64;
                    let end = (section.offset + section.length) / LEAF_SIZE as u64;
                    resp.merkle_proof = merkle::build_sector_range_proof(&sector, start, end);
                }

                // stop early if the renter asked us to
                if let Ok(stopped) = stop_rx.try_recv() {
                    stopped?;
                    resp.signature = host_sig;
                    return self.transport.write_response(&resp, DEFAULT_TIMEOUT);
                }

                if i == total - 1 {
                    resp.signature = host_sig;
                }
                self.transport.write_response(&resp, DEFAULT_TIMEOUT)?;
            }
            // wait for the renter's stop signal
            match stop_rx.recv() {
                Ok(result) => result,
                Err(_) => Err(Error::PeerClosed),
            }
        })();

        // the watcher is always joined before returning
        let _ = watcher.join();
        result
    }
}

/// Map a contract-manager error to its renter-visible form.
fn rpc_error_for(e: &contract_error) -> RpcError {
    match e {
        contract_error::NotFound => RpcError::new(ERR_CONTRACT_NOT_FOUND, "contract not found"),
        contract_error::Busy => RpcError::new(ERR_CONTRACT_LOCKED, "contract is locked"),
        contract_error::InvalidSignature => RpcError::invalid_signature("signature does not verify"),
        contract_error::InsufficientPayment => {
            RpcError::new(ERR_PAYMENT_TOO_LOW, "payout delta does not cover cost")
        }
        contract_error::InvalidRevision(s) => RpcError::contract_invalid(s.clone()),
        _ => RpcError::host_internal(),
    }
}

/// Contract formation rules. Returns the host collateral implied by the
/// payout split.
pub fn validate_contract_formation(
    fc: &FileContract,
    renter_key: PublicKey,
    host_key: PublicKey,
    current_height: u64,
    settings: &HostSettings,
) -> Result<Currency, RpcError> {
    let uc = formation_unlock_conditions(renter_key, host_key);
    if fc.file_size != 0 || fc.file_merkle_root != Hash256::default() || fc.revision_number != 0 {
        return Err(RpcError::contract_invalid("contract must start empty"));
    }
    if fc.window_start < current_height + 1 {
        return Err(RpcError::contract_invalid(
            "proof window must start in the future",
        ));
    }
    if fc.window_end <= fc.window_start
        || fc.window_end - fc.window_start < settings.window_size
    {
        return Err(RpcError::contract_invalid("proof window is too small"));
    }
    if fc.window_end - current_height > settings.max_duration {
        return Err(RpcError::contract_invalid("contract duration is too long"));
    }
    if fc.valid_proof_outputs.len() != 2 || fc.missed_proof_outputs.len() != 3 {
        return Err(RpcError::contract_invalid("wrong payout output count"));
    }
    let sum = |outputs: &[CoinOutput]| -> Option<Currency> {
        outputs
            .iter()
            .try_fold(Currency::ZERO, |acc, o| acc.checked_add(o.value))
    };
    let valid_sum =
        sum(&fc.valid_proof_outputs).ok_or(RpcError::contract_invalid("payout overflow"))?;
    let missed_sum =
        sum(&fc.missed_proof_outputs).ok_or(RpcError::contract_invalid("payout overflow"))?;
    if valid_sum != missed_sum {
        return Err(RpcError::contract_invalid(
            "valid and missed payouts must be equal",
        ));
    }
    if fc.payout != valid_sum {
        return Err(RpcError::contract_invalid("payout does not match outputs"));
    }

    let valid_renter = fc.valid_proof_outputs[0].value;
    let valid_host = fc.valid_proof_outputs[1].value;
    let missed_renter = fc.missed_proof_outputs[0].value;
    let missed_host = fc.missed_proof_outputs[1].value;
    let missed_void = fc.missed_proof_outputs[2].value;

    if missed_renter != valid_renter {
        return Err(RpcError::contract_invalid(
            "renter missed payout must equal valid payout",
        ));
    }
    let collateral = valid_host
        .checked_sub(settings.contract_price)
        .ok_or_else(|| {
            RpcError::contract_invalid("host payout does not cover the contract price")
        })?;
    if collateral > settings.max_collateral {
        return Err(RpcError::contract_invalid("collateral exceeds maximum"));
    }
    if missed_host != valid_host.saturating_sub(collateral) {
        return Err(RpcError::contract_invalid(
            "host missed payout must equal valid payout minus collateral",
        ));
    }
    if missed_void != collateral {
        return Err(RpcError::contract_invalid(
            "void payout must equal the host collateral",
        ));
    }
    if fc.unlock_hash != uc.unlock_hash() {
        return Err(RpcError::contract_invalid("wrong unlock hash"));
    }
    Ok(collateral)
}

/// The two-key unlock conditions shared by every contract: renter first,
/// host second, both required.
pub fn formation_unlock_conditions(
    renter_key: PublicKey,
    host_key: PublicKey,
) -> UnlockConditions {
    UnlockConditions {
        timelock: 0,
        public_keys: vec![UnlockKey::ed25519(renter_key), UnlockKey::ed25519(host_key)],
        signatures_required: 2,
    }
}

/// The first revision of a freshly formed contract: revision 1, same
/// payouts, empty file.
pub fn initial_revision(
    formation_txn: &Transaction,
    host_key: PublicKey,
    renter_key: PublicKey,
) -> FileContractRevision {
    let fc = &formation_txn.file_contracts[0];
    FileContractRevision {
        parent_id: formation_txn.file_contract_id(0),
        unlock_conditions: formation_unlock_conditions(renter_key, host_key),
        revision_number: 1,
        file_size: fc.file_size,
        file_merkle_root: fc.file_merkle_root,
        window_start: fc.window_start,
        window_end: fc.window_end,
        valid_proof_outputs: fc.valid_proof_outputs.clone(),
        missed_proof_outputs: fc.missed_proof_outputs.clone(),
        unlock_hash: fc.unlock_hash,
    }
}

/// Build the revision the renter proposed from its numeric fields.
pub fn revise(
    current: &FileContractRevision,
    revision_number: u64,
    valid_values: &[Currency],
    missed_values: &[Currency],
) -> Result<FileContractRevision, RpcError> {
    if valid_values.len() != current.valid_proof_outputs.len()
        || missed_values.len() != current.missed_proof_outputs.len()
    {
        return Err(RpcError::invalid_request("wrong number of proof values"));
    }
    let mut revision = current.clone();
    revision.revision_number = revision_number;
    for (output, value) in revision
        .valid_proof_outputs
        .iter_mut()
        .zip(valid_values.iter())
    {
        output.value = *value;
    }
    for (output, value) in revision
        .missed_proof_outputs
        .iter_mut()
        .zip(missed_values.iter())
    {
        output.value = *value;
    }
    Ok(revision)
}

/// Validate write actions and price them: returns (cost, collateral).
pub fn validate_write_actions(
    actions: &[crate::rhp::wire::RpcWriteAction],
    old_sectors: u64,
    merkle_proof: bool,
    remaining_duration: u64,
    settings: &HostSettings,
) -> Result<(Currency, Currency), RpcError> {
    let mut cost = Currency::ZERO;
    let mut collateral = Currency::ZERO;
    let mut sectors = old_sectors;
    let overflow = || RpcError::contract_invalid("cost overflow");

    for action in actions {
        match action.action_type {
            WRITE_ACTION_APPEND => {
                if action.data.len() != SECTOR_SIZE {
                    return Err(RpcError::invalid_request(format!(
                        "append action: invalid sector size {}",
                        action.data.len()
                    )));
                }
                let stored = settings
                    .storage_price
                    .checked_mul_u64(SECTOR_SIZE as u64)
                    .and_then(|c| c.checked_mul_u64(remaining_duration))
                    .ok_or_else(overflow)?;
                let upload = settings
                    .upload_bandwidth_price
                    .checked_mul_u64(SECTOR_SIZE as u64)
                    .ok_or_else(overflow)?;
                cost = cost
                    .checked_add(stored)
                    .and_then(|c| c.checked_add(upload))
                    .ok_or_else(overflow)?;
                collateral = collateral
                    .checked_add(
                        settings
                            .collateral
                            .checked_mul_u64(SECTOR_SIZE as u64)
                            .and_then(|c| c.checked_mul_u64(remaining_duration))
                            .ok_or_else(overflow)?,
                    )
                    .ok_or_else(overflow)?;
                sectors += 1;
            }
            WRITE_ACTION_TRIM => {
                if action.a > sectors {
                    return Err(RpcError::invalid_request(format!(
                        "trim action: cannot trim {} of {} sectors",
                        action.a, sectors
                    )));
                }
                sectors -= action.a;
            }
            WRITE_ACTION_SWAP => {
                if action.a >= sectors || action.b >= sectors {
                    return Err(RpcError::invalid_request(
                        "swap action: index out of bounds",
                    ));
                }
                // two leaves change position in the proof
                cost = cost
                    .checked_add(
                        settings
                            .download_bandwidth_price
                            .checked_mul_u64(2 * HASH_SIZE as u64)
                            .ok_or_else(overflow)?,
                    )
                    .ok_or_else(overflow)?;
            }
            WRITE_ACTION_UPDATE => {
                if action.a >= sectors {
                    return Err(RpcError::invalid_request(
                        "update action: index out of bounds",
                    ));
                }
                if action.b + action.data.len() as u64 > SECTOR_SIZE as u64 {
                    return Err(RpcError::invalid_request(
                        "update action: offset + data exceeds sector size",
                    ));
                }
                if merkle_proof
                    && (action.b % LEAF_SIZE as u64 != 0
                        || action.data.len() % LEAF_SIZE != 0)
                {
                    return Err(RpcError::invalid_request(
                        "update action: offset and length must be multiples of the leaf size when requesting a merkle proof",
                    ));
                }
                cost = cost
                    .checked_add(
                        settings
                            .upload_bandwidth_price
                            .checked_mul_u64(SECTOR_SIZE as u64)
                            .ok_or_else(overflow)?,
                    )
                    .ok_or_else(overflow)?;
            }
            unknown => {
                return Err(RpcError::invalid_request(format!(
                    "unknown write action \"{}\"",
                    unknown
                )));
            }
        }
    }
    Ok((cost, collateral))
}
