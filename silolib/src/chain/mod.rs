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

use std::io::{Read, Write};
use std::{error, fmt};

use silo_common::codec::{
    read_next, read_next_bytes, write_next, write_next_bytes, Error as codec_error,
    SiloMessageCodec,
};
use silo_common::types::{
    Address, BlockId, ChainIndex, ContractId, Currency, Hash256, OutputId, Specifier,
    TransactionId,
};
use silo_common::util::ed25519::{PublicKey, Signature};
use silo_common::util::hash::Blake2bSum;

pub mod pump;

/// Domain-separation prefixes for canonical object hashes. Two objects of
/// different kinds can never hash to the same identifier.
const UNLOCK_HASH_PREFIX: &[u8] = b"silo/id/unlockconditions|";
const TRANSACTION_ID_PREFIX: &[u8] = b"silo/id/transaction|";
const FILE_CONTRACT_ID_PREFIX: &[u8] = b"silo/id/filecontract|";
const COIN_OUTPUT_ID_PREFIX: &[u8] = b"silo/id/coinoutput|";
const MINER_OUTPUT_ID_PREFIX: &[u8] = b"silo/id/minerpayout|";
const BLOCK_ID_PREFIX: &[u8] = b"silo/id/block|";
const REVISION_SIG_PREFIX: &[u8] = b"silo/sig/revision|";
const TRANSACTION_SIG_PREFIX: &[u8] = b"silo/sig/transaction|";

/// The only supported signature algorithm.
pub const ALGORITHM_ED25519: Specifier = Specifier::new("ed25519");

/// Blocks before a delayed payout (miner reward, contract payout) matures.
pub const MATURITY_DELAY: u64 = 144;

/// Well-known output indices within a file contract's payout lists.
pub const PROOF_OUTPUT_RENTER: usize = 0;
pub const PROOF_OUTPUT_HOST: usize = 1;
pub const PROOF_OUTPUT_VOID: usize = 2;

#[derive(Debug)]
pub enum Error {
    /// Malformed chain object
    InvalidTransaction(String),
    /// Broadcast was rejected by the transaction pool
    RejectedTransaction(String),
    /// Codec failure
    CodecError(codec_error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidTransaction(ref s) => write!(f, "invalid transaction: {}", s),
            Error::RejectedTransaction(ref s) => write!(f, "rejected transaction: {}", s),
            Error::CodecError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::CodecError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<codec_error> for Error {
    fn from(e: codec_error) -> Error {
        Error::CodecError(e)
    }
}

/// A public key tagged with its signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockKey {
    pub algorithm: Specifier,
    pub key: PublicKey,
}

impl UnlockKey {
    pub fn ed25519(key: PublicKey) -> UnlockKey {
        UnlockKey {
            algorithm: ALGORITHM_ED25519,
            key,
        }
    }
}

impl SiloMessageCodec for UnlockKey {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.algorithm)?;
        write_next_bytes(fd, self.key.as_bytes())
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<UnlockKey, codec_error> {
        let algorithm: Specifier = read_next(fd)?;
        let key_bytes = read_next_bytes(fd, 32)?;
        let key = PublicKey::from_bytes(&key_bytes).ok_or_else(|| {
            codec_error::DeserializeError("Invalid public key length".to_string())
        })?;
        Ok(UnlockKey { algorithm, key })
    }
}

/// The spending conditions for an output: m-of-n keys after a timelock.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnlockConditions {
    pub timelock: u64,
    pub public_keys: Vec<UnlockKey>,
    pub signatures_required: u64,
}

impl UnlockConditions {
    /// The standard single-key conditions used by both wallet addresses
    /// and file contracts.
    pub fn standard(key: PublicKey) -> UnlockConditions {
        UnlockConditions {
            timelock: 0,
            public_keys: vec![UnlockKey::ed25519(key)],
            signatures_required: 1,
        }
    }

    pub fn unlock_hash(&self) -> Address {
        let mut h = Blake2bSum::prefixed(UNLOCK_HASH_PREFIX);
        self.consensus_serialize(&mut h)
            .expect("BUG: serialization to hasher failed");
        Address(h.finalize().0)
    }
}

impl SiloMessageCodec for UnlockConditions {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.timelock)?;
        write_next(fd, &self.public_keys)?;
        write_next(fd, &self.signatures_required)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<UnlockConditions, codec_error> {
        let timelock: u64 = read_next(fd)?;
        let public_keys: Vec<UnlockKey> = read_next(fd)?;
        let signatures_required: u64 = read_next(fd)?;
        Ok(UnlockConditions {
            timelock,
            public_keys,
            signatures_required,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoinOutput {
    pub value: Currency,
    pub address: Address,
}

impl SiloMessageCodec for CoinOutput {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.value)?;
        write_next(fd, &self.address)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<CoinOutput, codec_error> {
        let value: Currency = read_next(fd)?;
        let address: Address = read_next(fd)?;
        Ok(CoinOutput { value, address })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoinInput {
    pub parent_id: OutputId,
    pub unlock_conditions: UnlockConditions,
}

impl SiloMessageCodec for CoinInput {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.parent_id)?;
        write_next(fd, &self.unlock_conditions)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<CoinInput, codec_error> {
        let parent_id: OutputId = read_next(fd)?;
        let unlock_conditions: UnlockConditions = read_next(fd)?;
        Ok(CoinInput {
            parent_id,
            unlock_conditions,
        })
    }
}

/// A storage agreement between a renter and a host, as it appears in a
/// formation transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash256,
    pub window_start: u64,
    pub window_end: u64,
    pub payout: Currency,
    /// [renter, host]
    pub valid_proof_outputs: Vec<CoinOutput>,
    /// [renter, host, void]
    pub missed_proof_outputs: Vec<CoinOutput>,
    pub unlock_hash: Address,
    pub revision_number: u64,
}

impl SiloMessageCodec for FileContract {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.file_size)?;
        write_next(fd, &self.file_merkle_root)?;
        write_next(fd, &self.window_start)?;
        write_next(fd, &self.window_end)?;
        write_next(fd, &self.payout)?;
        write_next(fd, &self.valid_proof_outputs)?;
        write_next(fd, &self.missed_proof_outputs)?;
        write_next(fd, &self.unlock_hash)?;
        write_next(fd, &self.revision_number)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<FileContract, codec_error> {
        let file_size: u64 = read_next(fd)?;
        let file_merkle_root: Hash256 = read_next(fd)?;
        let window_start: u64 = read_next(fd)?;
        let window_end: u64 = read_next(fd)?;
        let payout: Currency = read_next(fd)?;
        let valid_proof_outputs: Vec<CoinOutput> = read_next(fd)?;
        let missed_proof_outputs: Vec<CoinOutput> = read_next(fd)?;
        let unlock_hash: Address = read_next(fd)?;
        let revision_number: u64 = read_next(fd)?;
        Ok(FileContract {
            file_size,
            file_merkle_root,
            window_start,
            window_end,
            payout,
            valid_proof_outputs,
            missed_proof_outputs,
            unlock_hash,
            revision_number,
        })
    }
}

/// A signed replacement of a file contract's mutable fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileContractRevision {
    pub parent_id: ContractId,
    pub unlock_conditions: UnlockConditions,
    pub revision_number: u64,
    pub file_size: u64,
    pub file_merkle_root: Hash256,
    pub window_start: u64,
    pub window_end: u64,
    /// [renter, host]
    pub valid_proof_outputs: Vec<CoinOutput>,
    /// [renter, host, void]
    pub missed_proof_outputs: Vec<CoinOutput>,
    pub unlock_hash: Address,
}

impl FileContractRevision {
    /// The canonical hash both parties sign. Fields are hashed in wire
    /// order under a revision-specific domain prefix.
    pub fn sig_hash(&self) -> Hash256 {
        let mut h = Blake2bSum::prefixed(REVISION_SIG_PREFIX);
        self.consensus_serialize(&mut h)
            .expect("BUG: serialization to hasher failed");
        h.finalize()
    }

    pub fn valid_renter_payout(&self) -> Currency {
        self.valid_proof_outputs
            .get(PROOF_OUTPUT_RENTER)
            .map(|o| o.value)
            .unwrap_or(Currency::ZERO)
    }

    pub fn valid_host_payout(&self) -> Currency {
        self.valid_proof_outputs
            .get(PROOF_OUTPUT_HOST)
            .map(|o| o.value)
            .unwrap_or(Currency::ZERO)
    }

    pub fn missed_renter_payout(&self) -> Currency {
        self.missed_proof_outputs
            .get(PROOF_OUTPUT_RENTER)
            .map(|o| o.value)
            .unwrap_or(Currency::ZERO)
    }

    pub fn missed_host_payout(&self) -> Currency {
        self.missed_proof_outputs
            .get(PROOF_OUTPUT_HOST)
            .map(|o| o.value)
            .unwrap_or(Currency::ZERO)
    }

    pub fn missed_void_payout(&self) -> Currency {
        self.missed_proof_outputs
            .get(PROOF_OUTPUT_VOID)
            .map(|o| o.value)
            .unwrap_or(Currency::ZERO)
    }
}

impl SiloMessageCodec for FileContractRevision {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.parent_id)?;
        write_next(fd, &self.unlock_conditions)?;
        write_next(fd, &self.revision_number)?;
        write_next(fd, &self.file_size)?;
        write_next(fd, &self.file_merkle_root)?;
        write_next(fd, &self.window_start)?;
        write_next(fd, &self.window_end)?;
        write_next(fd, &self.valid_proof_outputs)?;
        write_next(fd, &self.missed_proof_outputs)?;
        write_next(fd, &self.unlock_hash)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<FileContractRevision, codec_error> {
        let parent_id: ContractId = read_next(fd)?;
        let unlock_conditions: UnlockConditions = read_next(fd)?;
        let revision_number: u64 = read_next(fd)?;
        let file_size: u64 = read_next(fd)?;
        let file_merkle_root: Hash256 = read_next(fd)?;
        let window_start: u64 = read_next(fd)?;
        let window_end: u64 = read_next(fd)?;
        let valid_proof_outputs: Vec<CoinOutput> = read_next(fd)?;
        let missed_proof_outputs: Vec<CoinOutput> = read_next(fd)?;
        let unlock_hash: Address = read_next(fd)?;
        Ok(FileContractRevision {
            parent_id,
            unlock_conditions,
            revision_number,
            file_size,
            file_merkle_root,
            window_start,
            window_end,
            valid_proof_outputs,
            missed_proof_outputs,
            unlock_hash,
        })
    }
}

/// A host's proof of possession of a sampled contract segment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageProof {
    pub parent_id: ContractId,
    pub leaf: Vec<u8>,
    pub proof: Vec<Hash256>,
}

impl SiloMessageCodec for StorageProof {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.parent_id)?;
        write_next_bytes(fd, &self.leaf)?;
        write_next(fd, &self.proof)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<StorageProof, codec_error> {
        let parent_id: ContractId = read_next(fd)?;
        let leaf = read_next_bytes(fd, silo_common::consts::LEAF_SIZE as u64)?;
        let proof: Vec<Hash256> = read_next(fd)?;
        Ok(StorageProof {
            parent_id,
            leaf,
            proof,
        })
    }
}

/// Which parts of a transaction a signature covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoveredFields {
    pub whole_transaction: bool,
    pub coin_inputs: Vec<u64>,
    pub coin_outputs: Vec<u64>,
    pub file_contracts: Vec<u64>,
    pub file_contract_revisions: Vec<u64>,
    pub storage_proofs: Vec<u64>,
    pub signatures: Vec<u64>,
}

impl CoveredFields {
    pub fn whole_transaction() -> CoveredFields {
        CoveredFields {
            whole_transaction: true,
            ..CoveredFields::default()
        }
    }
}

impl SiloMessageCodec for CoveredFields {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.whole_transaction)?;
        write_next(fd, &self.coin_inputs)?;
        write_next(fd, &self.coin_outputs)?;
        write_next(fd, &self.file_contracts)?;
        write_next(fd, &self.file_contract_revisions)?;
        write_next(fd, &self.storage_proofs)?;
        write_next(fd, &self.signatures)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<CoveredFields, codec_error> {
        let whole_transaction: bool = read_next(fd)?;
        let coin_inputs: Vec<u64> = read_next(fd)?;
        let coin_outputs: Vec<u64> = read_next(fd)?;
        let file_contracts: Vec<u64> = read_next(fd)?;
        let file_contract_revisions: Vec<u64> = read_next(fd)?;
        let storage_proofs: Vec<u64> = read_next(fd)?;
        let signatures: Vec<u64> = read_next(fd)?;
        Ok(CoveredFields {
            whole_transaction,
            coin_inputs,
            coin_outputs,
            file_contracts,
            file_contract_revisions,
            storage_proofs,
            signatures,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSignature {
    pub parent_id: Hash256,
    pub public_key_index: u64,
    pub covered_fields: CoveredFields,
    pub signature: Signature,
}

impl Default for TransactionSignature {
    fn default() -> TransactionSignature {
        TransactionSignature {
            parent_id: Hash256::default(),
            public_key_index: 0,
            covered_fields: CoveredFields::default(),
            signature: Signature::default(),
        }
    }
}

impl SiloMessageCodec for TransactionSignature {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.parent_id)?;
        write_next(fd, &self.public_key_index)?;
        write_next(fd, &self.covered_fields)?;
        write_next(fd, &self.signature)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<TransactionSignature, codec_error> {
        let parent_id: Hash256 = read_next(fd)?;
        let public_key_index: u64 = read_next(fd)?;
        let covered_fields: CoveredFields = read_next(fd)?;
        let signature: Signature = read_next(fd)?;
        Ok(TransactionSignature {
            parent_id,
            public_key_index,
            covered_fields,
            signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub coin_inputs: Vec<CoinInput>,
    pub coin_outputs: Vec<CoinOutput>,
    pub file_contracts: Vec<FileContract>,
    pub file_contract_revisions: Vec<FileContractRevision>,
    pub storage_proofs: Vec<StorageProof>,
    pub miner_fee: Currency,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    /// Serialize everything a signature must cover: all fields except the
    /// signatures themselves.
    fn serialize_no_signatures<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.coin_inputs)?;
        write_next(fd, &self.coin_outputs)?;
        write_next(fd, &self.file_contracts)?;
        write_next(fd, &self.file_contract_revisions)?;
        write_next(fd, &self.storage_proofs)?;
        write_next(fd, &self.miner_fee)
    }

    pub fn id(&self) -> TransactionId {
        let mut h = Blake2bSum::prefixed(TRANSACTION_ID_PREFIX);
        self.serialize_no_signatures(&mut h)
            .expect("BUG: serialization to hasher failed");
        TransactionId(h.finalize().0)
    }

    /// The ID of the i'th file contract created by this transaction. The
    /// first file contract of a formation transaction is the contract's
    /// identity for its whole life.
    pub fn file_contract_id(&self, i: u64) -> ContractId {
        let mut h = Blake2bSum::prefixed(FILE_CONTRACT_ID_PREFIX);
        self.serialize_no_signatures(&mut h)
            .expect("BUG: serialization to hasher failed");
        h.update(&i.to_le_bytes());
        ContractId(h.finalize().0)
    }

    pub fn coin_output_id(&self, i: u64) -> OutputId {
        let mut h = Blake2bSum::prefixed(COIN_OUTPUT_ID_PREFIX);
        self.serialize_no_signatures(&mut h)
            .expect("BUG: serialization to hasher failed");
        h.update(&i.to_le_bytes());
        OutputId(h.finalize().0)
    }

    /// Signature hash covering the whole transaction.
    pub fn whole_sig_hash(&self, parent_id: &Hash256, public_key_index: u64) -> Hash256 {
        let mut h = Blake2bSum::prefixed(TRANSACTION_SIG_PREFIX);
        self.serialize_no_signatures(&mut h)
            .expect("BUG: serialization to hasher failed");
        h.update(parent_id.as_bytes());
        h.update(&public_key_index.to_le_bytes());
        h.finalize()
    }

    /// Signature hash covering an explicit field subset.
    pub fn partial_sig_hash(&self, covered: &CoveredFields) -> Result<Hash256, Error> {
        let mut h = Blake2bSum::prefixed(TRANSACTION_SIG_PREFIX);
        for &i in covered.coin_inputs.iter() {
            let input = self.coin_inputs.get(i as usize).ok_or_else(|| {
                Error::InvalidTransaction(format!("covered coin input {} out of bounds", i))
            })?;
            input.consensus_serialize(&mut h)?;
        }
        for &i in covered.coin_outputs.iter() {
            let output = self.coin_outputs.get(i as usize).ok_or_else(|| {
                Error::InvalidTransaction(format!("covered coin output {} out of bounds", i))
            })?;
            output.consensus_serialize(&mut h)?;
        }
        for &i in covered.file_contracts.iter() {
            let fc = self.file_contracts.get(i as usize).ok_or_else(|| {
                Error::InvalidTransaction(format!("covered file contract {} out of bounds", i))
            })?;
            fc.consensus_serialize(&mut h)?;
        }
        for &i in covered.file_contract_revisions.iter() {
            let fcr = self.file_contract_revisions.get(i as usize).ok_or_else(|| {
                Error::InvalidTransaction(format!("covered revision {} out of bounds", i))
            })?;
            fcr.consensus_serialize(&mut h)?;
        }
        for &i in covered.storage_proofs.iter() {
            let sp = self.storage_proofs.get(i as usize).ok_or_else(|| {
                Error::InvalidTransaction(format!("covered storage proof {} out of bounds", i))
            })?;
            sp.consensus_serialize(&mut h)?;
        }
        Ok(h.finalize())
    }
}

impl SiloMessageCodec for Transaction {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        self.serialize_no_signatures(fd)?;
        write_next(fd, &self.signatures)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<Transaction, codec_error> {
        let coin_inputs: Vec<CoinInput> = read_next(fd)?;
        let coin_outputs: Vec<CoinOutput> = read_next(fd)?;
        let file_contracts: Vec<FileContract> = read_next(fd)?;
        let file_contract_revisions: Vec<FileContractRevision> = read_next(fd)?;
        let storage_proofs: Vec<StorageProof> = read_next(fd)?;
        let miner_fee: Currency = read_next(fd)?;
        let signatures: Vec<TransactionSignature> = read_next(fd)?;
        Ok(Transaction {
            coin_inputs,
            coin_outputs,
            file_contracts,
            file_contract_revisions,
            storage_proofs,
            miner_fee,
            signatures,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub parent_id: BlockId,
    pub timestamp: u64,
    pub miner_payouts: Vec<CoinOutput>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn id(&self) -> BlockId {
        let mut h = Blake2bSum::prefixed(BLOCK_ID_PREFIX);
        self.consensus_serialize(&mut h)
            .expect("BUG: serialization to hasher failed");
        BlockId(h.finalize().0)
    }

    /// The ID of the delayed output created for the i'th miner payout.
    pub fn miner_output_id(&self, i: u64) -> OutputId {
        let mut h = Blake2bSum::prefixed(MINER_OUTPUT_ID_PREFIX);
        h.update(self.id().as_bytes());
        h.update(&i.to_le_bytes());
        OutputId(h.finalize().0)
    }
}

impl SiloMessageCodec for Block {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.parent_id)?;
        write_next(fd, &self.timestamp)?;
        write_next(fd, &self.miner_payouts)?;
        write_next(fd, &self.transactions)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<Block, codec_error> {
        let parent_id: BlockId = read_next(fd)?;
        let timestamp: u64 = read_next(fd)?;
        let miner_payouts: Vec<CoinOutput> = read_next(fd)?;
        let transactions: Vec<Transaction> = read_next(fd)?;
        Ok(Block {
            parent_id,
            timestamp,
            miner_payouts,
            transactions,
        })
    }
}

/// Read-only view of the consensus chain. Implemented by the node's chain
/// manager; the host core only needs the tip and historic block lookups.
pub trait ChainManager: Send + Sync {
    fn tip(&self) -> ChainIndex;
    fn block_at_height(&self, height: u64) -> Option<Block>;
}

/// Broadcast interface to the transaction pool.
pub trait TransactionPool: Send + Sync {
    fn accept_transaction_set(&self, txns: &[Transaction]) -> Result<(), Error>;
}

/// The per-block state delta the consensus subscription delivers. Spent
/// outputs carry IDs only; owners look up values in their own stores.
#[derive(Debug, Clone, Default)]
pub struct BlockDiff {
    pub index: ChainIndex,
    pub block: Block,
    /// confirmed outputs created by this block's transactions
    pub created: Vec<(OutputId, CoinOutput)>,
    /// outputs consumed by this block's transactions, with their values so
    /// that reverts can recreate them
    pub spent: Vec<(OutputId, CoinOutput)>,
    /// delayed outputs (miner payouts, contract payouts) that matured as
    /// of this block
    pub matured: Vec<(OutputId, CoinOutput)>,
}

/// A consensus change handed to the event pump.
#[derive(Debug, Clone)]
pub enum ChainUpdate {
    Apply(BlockDiff),
    Revert(BlockDiff),
}
