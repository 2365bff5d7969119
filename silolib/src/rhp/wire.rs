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

//! Typed RPC objects and their wire encodings. Everything here travels
//! inside an encrypted transport frame.

use std::io::{Read, Write};
use std::{error, fmt};

use silo_common::codec::{
    read_next, read_next_bytes, write_next, write_next_bytes, Error as codec_error,
    SiloMessageCodec, MAX_MESSAGE_LEN,
};
use silo_common::consts::SECTOR_SIZE;
use silo_common::types::{ContractId, Currency, Hash256, SectorRoot, Specifier};
use silo_common::util::ed25519::{PublicKey, Signature};

use crate::chain::{
    CoinInput, CoinOutput, FileContractRevision, Transaction, TransactionSignature, UnlockKey,
};

/// An rpcError may be sent instead of a response object to any RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub error_type: Specifier,
    pub data: Vec<u8>,
    pub description: String,
}

/// Error-type specifiers of the RPC error taxonomy.
pub const ERR_INVALID_REQUEST: Specifier = Specifier::new("InvalidRequest");
pub const ERR_INVALID_SIGNATURE: Specifier = Specifier::new("InvalidSignature");
pub const ERR_CONTRACT_INVALID: Specifier = Specifier::new("ContractInvalid");
pub const ERR_CONTRACT_NOT_FOUND: Specifier = Specifier::new("ContractNotFound");
pub const ERR_CONTRACT_LOCKED: Specifier = Specifier::new("ContractLocked");
pub const ERR_CONTRACT_EXPIRED: Specifier = Specifier::new("ContractExpired");
pub const ERR_PAYMENT_TOO_LOW: Specifier = Specifier::new("PaymentTooLow");
pub const ERR_HOST_INTERNAL: Specifier = Specifier::new("HostInternal");

impl RpcError {
    pub fn new(error_type: Specifier, description: impl Into<String>) -> RpcError {
        RpcError {
            error_type,
            data: vec![],
            description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> RpcError {
        RpcError::new(ERR_INVALID_REQUEST, description)
    }

    pub fn invalid_signature(description: impl Into<String>) -> RpcError {
        RpcError::new(ERR_INVALID_SIGNATURE, description)
    }

    pub fn contract_invalid(description: impl Into<String>) -> RpcError {
        RpcError::new(ERR_CONTRACT_INVALID, description)
    }

    /// Anything the host must not disclose surfaces as this error.
    pub fn host_internal() -> RpcError {
        RpcError::new(ERR_HOST_INTERNAL, "host internal error")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.description)
    }
}

impl error::Error for RpcError {}

impl SiloMessageCodec for RpcError {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.error_type)?;
        write_next_bytes(fd, &self.data)?;
        write_next(fd, &self.description)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcError, codec_error> {
        let error_type: Specifier = read_next(fd)?;
        let data = read_next_bytes(fd, MAX_MESSAGE_LEN)?;
        let description: String = read_next(fd)?;
        Ok(RpcError {
            error_type,
            data,
            description,
        })
    }
}

/// First message of the session handshake, sent by the renter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// X25519 ephemeral public key
    pub ephemeral_key: [u8; 32],
    pub ciphers: Vec<Specifier>,
}

impl SiloMessageCodec for HandshakeRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        fd.write_all(&self.ephemeral_key)
            .map_err(codec_error::WriteError)?;
        write_next(fd, &self.ciphers)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<HandshakeRequest, codec_error> {
        let mut ephemeral_key = [0u8; 32];
        fd.read_exact(&mut ephemeral_key)
            .map_err(codec_error::ReadError)?;
        let ciphers: Vec<Specifier> = read_next(fd)?;
        if ciphers.len() > 16 {
            return Err(codec_error::DeserializeError(
                "too many cipher suites".to_string(),
            ));
        }
        Ok(HandshakeRequest {
            ephemeral_key,
            ciphers,
        })
    }
}

/// The host's half of the handshake: its ephemeral key, long-term
/// identity, a signature over the transcript, and the selected cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub ephemeral_key: [u8; 32],
    pub host_key: PublicKey,
    pub signature: Signature,
    pub cipher: Specifier,
}

impl SiloMessageCodec for HandshakeResponse {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        fd.write_all(&self.ephemeral_key)
            .map_err(codec_error::WriteError)?;
        write_next(fd, &self.host_key)?;
        write_next(fd, &self.signature)?;
        write_next(fd, &self.cipher)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<HandshakeResponse, codec_error> {
        let mut ephemeral_key = [0u8; 32];
        fd.read_exact(&mut ephemeral_key)
            .map_err(codec_error::ReadError)?;
        let host_key: PublicKey = read_next(fd)?;
        let signature: Signature = read_next(fd)?;
        let cipher: Specifier = read_next(fd)?;
        Ok(HandshakeResponse {
            ephemeral_key,
            host_key,
            signature,
            cipher,
        })
    }
}

/// Sent by the host immediately after the handshake, and regenerated on
/// every Lock: the nonce a renter must sign to lock a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcChallengeRequest {
    pub challenge: [u8; 16],
}

impl SiloMessageCodec for RpcChallengeRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        fd.write_all(&self.challenge).map_err(codec_error::WriteError)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcChallengeRequest, codec_error> {
        let mut challenge = [0u8; 16];
        fd.read_exact(&mut challenge)
            .map_err(codec_error::ReadError)?;
        Ok(RpcChallengeRequest { challenge })
    }
}

/// Settings are served as a JSON blob so fields can evolve without wire
/// changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSettingsResponse {
    pub settings: Vec<u8>,
}

impl SiloMessageCodec for RpcSettingsResponse {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next_bytes(fd, &self.settings)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcSettingsResponse, codec_error> {
        let settings = read_next_bytes(fd, MAX_MESSAGE_LEN)?;
        Ok(RpcSettingsResponse { settings })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcLockRequest {
    pub contract_id: ContractId,
    /// renter's signature over the session's current challenge
    pub signature: Signature,
    pub timeout_millis: u64,
}

impl SiloMessageCodec for RpcLockRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.contract_id)?;
        write_next(fd, &self.signature)?;
        write_next(fd, &self.timeout_millis)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcLockRequest, codec_error> {
        let contract_id: ContractId = read_next(fd)?;
        let signature: Signature = read_next(fd)?;
        let timeout_millis: u64 = read_next(fd)?;
        Ok(RpcLockRequest {
            contract_id,
            signature,
            timeout_millis,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcLockResponse {
    pub acquired: bool,
    pub new_challenge: [u8; 16],
    pub revision: FileContractRevision,
    pub renter_signature: Signature,
    pub host_signature: Signature,
}

impl SiloMessageCodec for RpcLockResponse {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.acquired)?;
        fd.write_all(&self.new_challenge)
            .map_err(codec_error::WriteError)?;
        write_next(fd, &self.revision)?;
        write_next(fd, &self.renter_signature)?;
        write_next(fd, &self.host_signature)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcLockResponse, codec_error> {
        let acquired: bool = read_next(fd)?;
        let mut new_challenge = [0u8; 16];
        fd.read_exact(&mut new_challenge)
            .map_err(codec_error::ReadError)?;
        let revision: FileContractRevision = read_next(fd)?;
        let renter_signature: Signature = read_next(fd)?;
        let host_signature: Signature = read_next(fd)?;
        Ok(RpcLockResponse {
            acquired,
            new_challenge,
            revision,
            renter_signature,
            host_signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFormContractRequest {
    pub transactions: Vec<Transaction>,
    pub renter_key: UnlockKey,
}

impl SiloMessageCodec for RpcFormContractRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.transactions)?;
        write_next(fd, &self.renter_key)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcFormContractRequest, codec_error> {
        let transactions: Vec<Transaction> = read_next(fd)?;
        let renter_key: UnlockKey = read_next(fd)?;
        Ok(RpcFormContractRequest {
            transactions,
            renter_key,
        })
    }
}

/// The host's funding additions to a formation transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcFormContractAdditions {
    pub inputs: Vec<CoinInput>,
    pub outputs: Vec<CoinOutput>,
}

impl SiloMessageCodec for RpcFormContractAdditions {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.inputs)?;
        write_next(fd, &self.outputs)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcFormContractAdditions, codec_error> {
        let inputs: Vec<CoinInput> = read_next(fd)?;
        let outputs: Vec<CoinOutput> = read_next(fd)?;
        Ok(RpcFormContractAdditions { inputs, outputs })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcFormContractSignatures {
    pub contract_signatures: Vec<TransactionSignature>,
    pub revision_signature: TransactionSignature,
}

impl SiloMessageCodec for RpcFormContractSignatures {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.contract_signatures)?;
        write_next(fd, &self.revision_signature)
    }

    fn consensus_deserialize<R: Read>(
        fd: &mut R,
    ) -> Result<RpcFormContractSignatures, codec_error> {
        let contract_signatures: Vec<TransactionSignature> = read_next(fd)?;
        let revision_signature: TransactionSignature = read_next(fd)?;
        Ok(RpcFormContractSignatures {
            contract_signatures,
            revision_signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSectorRootsRequest {
    pub root_offset: u64,
    pub num_roots: u64,
    pub new_revision_number: u64,
    pub new_valid_proof_values: Vec<Currency>,
    pub new_missed_proof_values: Vec<Currency>,
    pub signature: Signature,
}

impl SiloMessageCodec for RpcSectorRootsRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.root_offset)?;
        write_next(fd, &self.num_roots)?;
        write_next(fd, &self.new_revision_number)?;
        write_next(fd, &self.new_valid_proof_values)?;
        write_next(fd, &self.new_missed_proof_values)?;
        write_next(fd, &self.signature)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcSectorRootsRequest, codec_error> {
        let root_offset: u64 = read_next(fd)?;
        let num_roots: u64 = read_next(fd)?;
        let new_revision_number: u64 = read_next(fd)?;
        let new_valid_proof_values: Vec<Currency> = read_next(fd)?;
        let new_missed_proof_values: Vec<Currency> = read_next(fd)?;
        let signature: Signature = read_next(fd)?;
        Ok(RpcSectorRootsRequest {
            root_offset,
            num_roots,
            new_revision_number,
            new_valid_proof_values,
            new_missed_proof_values,
            signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSectorRootsResponse {
    pub sector_roots: Vec<SectorRoot>,
    pub merkle_proof: Vec<Hash256>,
    pub signature: Signature,
}

impl SiloMessageCodec for RpcSectorRootsResponse {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.sector_roots)?;
        write_next(fd, &self.merkle_proof)?;
        write_next(fd, &self.signature)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcSectorRootsResponse, codec_error> {
        let sector_roots: Vec<SectorRoot> = read_next(fd)?;
        let merkle_proof: Vec<Hash256> = read_next(fd)?;
        let signature: Signature = read_next(fd)?;
        Ok(RpcSectorRootsResponse {
            sector_roots,
            merkle_proof,
            signature,
        })
    }
}

/// One Write RPC action. `a`, `b`, and `data` are interpreted per action
/// type: Append(data), Trim(a = count), Swap(a, b), Update(a = index,
/// b = byte offset, data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcWriteAction {
    pub action_type: Specifier,
    pub a: u64,
    pub b: u64,
    pub data: Vec<u8>,
}

impl SiloMessageCodec for RpcWriteAction {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.action_type)?;
        write_next(fd, &self.a)?;
        write_next(fd, &self.b)?;
        write_next_bytes(fd, &self.data)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcWriteAction, codec_error> {
        let action_type: Specifier = read_next(fd)?;
        let a: u64 = read_next(fd)?;
        let b: u64 = read_next(fd)?;
        let data = read_next_bytes(fd, SECTOR_SIZE as u64)?;
        Ok(RpcWriteAction {
            action_type,
            a,
            b,
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcWriteRequest {
    pub actions: Vec<RpcWriteAction>,
    pub merkle_proof: bool,
    pub new_revision_number: u64,
    pub new_valid_proof_values: Vec<Currency>,
    pub new_missed_proof_values: Vec<Currency>,
}

impl SiloMessageCodec for RpcWriteRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.actions)?;
        write_next(fd, &self.merkle_proof)?;
        write_next(fd, &self.new_revision_number)?;
        write_next(fd, &self.new_valid_proof_values)?;
        write_next(fd, &self.new_missed_proof_values)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcWriteRequest, codec_error> {
        let actions: Vec<RpcWriteAction> = read_next(fd)?;
        let merkle_proof: bool = read_next(fd)?;
        let new_revision_number: u64 = read_next(fd)?;
        let new_valid_proof_values: Vec<Currency> = read_next(fd)?;
        let new_missed_proof_values: Vec<Currency> = read_next(fd)?;
        Ok(RpcWriteRequest {
            actions,
            merkle_proof,
            new_revision_number,
            new_valid_proof_values,
            new_missed_proof_values,
        })
    }
}

/// Proof that the host applied the write actions to the previous root
/// list, sent before the renter signs the updated revision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcWriteMerkleProof {
    pub old_subtree_hashes: Vec<Hash256>,
    pub old_leaf_hashes: Vec<Hash256>,
    pub new_merkle_root: Hash256,
}

impl SiloMessageCodec for RpcWriteMerkleProof {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.old_subtree_hashes)?;
        write_next(fd, &self.old_leaf_hashes)?;
        write_next(fd, &self.new_merkle_root)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcWriteMerkleProof, codec_error> {
        let old_subtree_hashes: Vec<Hash256> = read_next(fd)?;
        let old_leaf_hashes: Vec<Hash256> = read_next(fd)?;
        let new_merkle_root: Hash256 = read_next(fd)?;
        Ok(RpcWriteMerkleProof {
            old_subtree_hashes,
            old_leaf_hashes,
            new_merkle_root,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcWriteResponse {
    pub signature: Signature,
}

impl SiloMessageCodec for RpcWriteResponse {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.signature)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcWriteResponse, codec_error> {
        let signature: Signature = read_next(fd)?;
        Ok(RpcWriteResponse { signature })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcReadRequestSection {
    pub merkle_root: SectorRoot,
    pub offset: u64,
    pub length: u64,
}

impl SiloMessageCodec for RpcReadRequestSection {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.merkle_root)?;
        write_next(fd, &self.offset)?;
        write_next(fd, &self.length)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcReadRequestSection, codec_error> {
        let merkle_root: SectorRoot = read_next(fd)?;
        let offset: u64 = read_next(fd)?;
        let length: u64 = read_next(fd)?;
        Ok(RpcReadRequestSection {
            merkle_root,
            offset,
            length,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReadRequest {
    pub sections: Vec<RpcReadRequestSection>,
    pub merkle_proof: bool,
    pub new_revision_number: u64,
    pub new_valid_proof_values: Vec<Currency>,
    pub new_missed_proof_values: Vec<Currency>,
    pub signature: Signature,
}

impl SiloMessageCodec for RpcReadRequest {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.sections)?;
        write_next(fd, &self.merkle_proof)?;
        write_next(fd, &self.new_revision_number)?;
        write_next(fd, &self.new_valid_proof_values)?;
        write_next(fd, &self.new_missed_proof_values)?;
        write_next(fd, &self.signature)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcReadRequest, codec_error> {
        let sections: Vec<RpcReadRequestSection> = read_next(fd)?;
        let merkle_proof: bool = read_next(fd)?;
        let new_revision_number: u64 = read_next(fd)?;
        let new_valid_proof_values: Vec<Currency> = read_next(fd)?;
        let new_missed_proof_values: Vec<Currency> = read_next(fd)?;
        let signature: Signature = read_next(fd)?;
        Ok(RpcReadRequest {
            sections,
            merkle_proof,
            new_revision_number,
            new_valid_proof_values,
            new_missed_proof_values,
            signature,
        })
    }
}

/// One Read RPC response, streamed per requested section. The host
/// signature rides on the final (or stopped) response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcReadResponse {
    pub signature: Signature,
    pub data: Vec<u8>,
    pub merkle_proof: Vec<Hash256>,
}

impl SiloMessageCodec for RpcReadResponse {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.signature)?;
        write_next_bytes(fd, &self.data)?;
        write_next(fd, &self.merkle_proof)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<RpcReadResponse, codec_error> {
        let signature: Signature = read_next(fd)?;
        let data = read_next_bytes(fd, SECTOR_SIZE as u64)?;
        let merkle_proof: Vec<Hash256> = read_next(fd)?;
        Ok(RpcReadResponse {
            signature,
            data,
            merkle_proof,
        })
    }
}
