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

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::{error, fmt};

use silo_common::types::{Address, BlockId, ChainIndex, Currency, Hash256, OutputId, TransactionId};
use silo_common::util::ed25519::{PrivateKey, PublicKey};

use crate::chain::{
    BlockDiff, ChainManager, CoinInput, CoinOutput, CoveredFields, Transaction,
    TransactionSignature, UnlockConditions, MATURITY_DELAY,
};
use crate::util_lib::db::Error as db_error;

#[derive(Debug)]
pub enum Error {
    /// Unlocked outputs don't cover the requested amount
    InsufficientBalance,
    /// Persistent store failure
    StoreError(db_error),
    /// Chain object failure
    ChainError(crate::chain::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InsufficientBalance => write!(f, "insufficient balance"),
            Error::StoreError(ref e) => fmt::Display::fmt(e, f),
            Error::ChainError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::StoreError(ref e) => Some(e),
            Error::ChainError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<db_error> for Error {
    fn from(e: db_error) -> Error {
        Error::StoreError(e)
    }
}

impl From<crate::chain::Error> for Error {
    fn from(e: crate::chain::Error) -> Error {
        Error::ChainError(e)
    }
}

/// The source of a wallet-relevant transaction. Transactions are either
/// real on-chain transactions or pseudo-transactions derived from matured
/// payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSource {
    Transaction,
    MinerPayout,
    Contract,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Transaction => "transaction",
            TransactionSource::MinerPayout => "minerPayout",
            TransactionSource::Contract => "contract",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<TransactionSource> {
        Some(match s {
            "transaction" => TransactionSource::Transaction,
            "minerPayout" => TransactionSource::MinerPayout,
            "contract" => TransactionSource::Contract,
            _ => return None,
        })
    }
}

/// An on-chain transaction relevant to the wallet, with flow metadata.
#[derive(Debug, Clone)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub index: ChainIndex,
    pub transaction: Transaction,
    pub inflow: Currency,
    pub outflow: Currency,
    pub source: TransactionSource,
    pub timestamp: u64,
}

/// One atomic batch of wallet store changes derived from a chain update.
#[derive(Debug, Clone, Default)]
pub struct WalletUpdate {
    pub change_id: BlockId,
    pub added_outputs: Vec<(OutputId, CoinOutput)>,
    pub removed_outputs: Vec<OutputId>,
    pub transactions: Vec<WalletTransaction>,
    pub reverted_blocks: Vec<BlockId>,
}

/// Persistence seam for the wallet; implemented by the SQLite store and an
/// in-memory double. Implementations are assumed to be thread safe.
pub trait WalletStore: Send + Sync {
    fn last_processed_change(&self) -> Result<Option<BlockId>, db_error>;
    fn unspent_outputs(&self) -> Result<Vec<(OutputId, CoinOutput)>, db_error>;
    /// Paginated transactions ordered by block height, descending.
    fn wallet_transactions(&self, limit: u64, offset: u64)
        -> Result<Vec<WalletTransaction>, db_error>;
    fn wallet_transaction_count(&self) -> Result<u64, db_error>;
    /// Apply one update batch atomically.
    fn update_wallet(&self, update: &WalletUpdate) -> Result<(), db_error>;
}

#[derive(Default)]
struct WalletInner {
    /// outputs reserved by fund_transaction
    locked: HashSet<OutputId>,
    /// outputs observed spent in the unconfirmed transaction pool
    tpool: HashSet<OutputId>,
}

/// Releases the outputs a fund_transaction call locked. Dropping without
/// an explicit release also unlocks them, so an abandoned formation can't
/// leak reserved outputs.
pub struct FundReleaser {
    inner: Arc<Mutex<WalletInner>>,
    ids: Vec<OutputId>,
}

impl FundReleaser {
    pub fn release(self) {
        // Drop does the work
    }
}

impl Drop for FundReleaser {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        for id in self.ids.drain(..) {
            inner.locked.remove(&id);
        }
    }
}

/// A hot wallet managing the outputs controlled by a single Ed25519 key.
pub struct SingleAddressWallet {
    key: PrivateKey,
    address: Address,
    cm: Arc<dyn ChainManager>,
    store: Arc<dyn WalletStore>,
    inner: Arc<Mutex<WalletInner>>,
}

impl SingleAddressWallet {
    pub fn new(
        key: PrivateKey,
        cm: Arc<dyn ChainManager>,
        store: Arc<dyn WalletStore>,
    ) -> SingleAddressWallet {
        let address = UnlockConditions::standard(key.public_key()).unlock_hash();
        SingleAddressWallet {
            key,
            address,
            cm,
            store,
            inner: Arc::new(Mutex::new(WalletInner::default())),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    /// (spendable, confirmed). Spendable excludes outputs locked by
    /// fund_transaction and outputs already spent in the unconfirmed pool.
    pub fn balance(&self) -> Result<(Currency, Currency), Error> {
        let outputs = self.store.unspent_outputs()?;
        let inner = self.inner.lock().unwrap();
        let mut spendable = Currency::ZERO;
        let mut confirmed = Currency::ZERO;
        for (id, output) in outputs {
            confirmed = confirmed.checked_add(output.value).unwrap_or(confirmed);
            if !inner.locked.contains(&id) && !inner.tpool.contains(&id) {
                spendable = spendable.checked_add(output.value).unwrap_or(spendable);
            }
        }
        Ok((spendable, confirmed))
    }

    /// Add inputs worth at least `amount` to `txn`, plus a change output
    /// if the inputs overshoot. The consumed outputs stay locked until the
    /// releaser fires or a block confirms the spend.
    pub fn fund_transaction(
        &self,
        txn: &mut Transaction,
        amount: Currency,
    ) -> Result<(Vec<OutputId>, FundReleaser), Error> {
        if amount.is_zero() {
            return Ok((
                vec![],
                FundReleaser {
                    inner: self.inner.clone(),
                    ids: vec![],
                },
            ));
        }
        let utxos = self.store.unspent_outputs()?;
        let mut inner = self.inner.lock().unwrap();

        let mut input_sum = Currency::ZERO;
        let mut funding: Vec<(OutputId, CoinOutput)> = vec![];
        for (id, output) in utxos {
            if inner.locked.contains(&id) || inner.tpool.contains(&id) {
                continue;
            }
            input_sum = input_sum
                .checked_add(output.value)
                .ok_or(Error::InsufficientBalance)?;
            funding.push((id, output));
            if input_sum >= amount {
                break;
            }
        }
        if input_sum < amount {
            return Err(Error::InsufficientBalance);
        }
        if input_sum > amount {
            txn.coin_outputs.push(CoinOutput {
                value: input_sum.saturating_sub(amount),
                address: self.address,
            });
        }

        let conditions = UnlockConditions::standard(self.key.public_key());
        let mut to_sign = Vec::with_capacity(funding.len());
        for (id, _) in funding.iter() {
            txn.coin_inputs.push(CoinInput {
                parent_id: *id,
                unlock_conditions: conditions.clone(),
            });
            to_sign.push(*id);
            inner.locked.insert(*id);
        }

        Ok((
            to_sign.clone(),
            FundReleaser {
                inner: self.inner.clone(),
                ids: to_sign,
            },
        ))
    }

    /// Append one signature per entry of `to_sign`, covering either the
    /// whole transaction or the given partial field set.
    pub fn sign_transaction(
        &self,
        txn: &mut Transaction,
        to_sign: &[OutputId],
        covered_fields: CoveredFields,
    ) -> Result<(), Error> {
        for id in to_sign {
            let parent_id = Hash256(id.0);
            let sig_hash = if covered_fields.whole_transaction {
                txn.whole_sig_hash(&parent_id, 0)
            } else {
                txn.partial_sig_hash(&covered_fields)?
            };
            let signature = self.key.sign(&sig_hash);
            txn.signatures.push(TransactionSignature {
                parent_id,
                public_key_index: 0,
                covered_fields: covered_fields.clone(),
                signature,
            });
        }
        Ok(())
    }

    pub fn transactions(&self, limit: u64, offset: u64) -> Result<Vec<WalletTransaction>, Error> {
        Ok(self.store.wallet_transactions(limit, offset)?)
    }

    pub fn transaction_count(&self) -> Result<u64, Error> {
        Ok(self.store.wallet_transaction_count()?)
    }

    pub fn last_processed_change(&self) -> Result<Option<BlockId>, Error> {
        Ok(self.store.last_processed_change()?)
    }

    fn transaction_is_relevant(&self, txn: &Transaction) -> bool {
        txn.coin_inputs
            .iter()
            .any(|i| i.unlock_conditions.unlock_hash() == self.address)
            || txn.coin_outputs.iter().any(|o| o.address == self.address)
            || txn.file_contracts.iter().any(|fc| {
                fc.valid_proof_outputs
                    .iter()
                    .chain(fc.missed_proof_outputs.iter())
                    .any(|o| o.address == self.address)
            })
            || txn.file_contract_revisions.iter().any(|fcr| {
                fcr.valid_proof_outputs
                    .iter()
                    .chain(fcr.missed_proof_outputs.iter())
                    .any(|o| o.address == self.address)
            })
    }

    /// Apply a block to the wallet: track created and spent outputs,
    /// record relevant transactions with real flow values, and wrap
    /// matured payouts in pseudo-transactions. Unknown matured outputs are
    /// classified as contract payouts.
    pub fn process_chain_apply(&self, diff: &BlockDiff) -> Result<(), Error> {
        let mut update = WalletUpdate {
            change_id: diff.index.id,
            ..WalletUpdate::default()
        };

        // the set of outputs we currently own, for outflow computation
        let owned: std::collections::HashMap<OutputId, Currency> = self
            .store
            .unspent_outputs()?
            .into_iter()
            .map(|(id, o)| (id, o.value))
            .collect();

        // classify matured payouts: anything minted by the block that
        // matured at this height is a miner payout; the rest are assumed
        // to be contract payouts
        let mut miner_ids = HashSet::new();
        if diff.index.height >= MATURITY_DELAY {
            if let Some(block) = self.cm.block_at_height(diff.index.height - MATURITY_DELAY) {
                for i in 0..block.miner_payouts.len() {
                    miner_ids.insert(block.miner_output_id(i as u64));
                }
            }
        }
        for (id, output) in diff.matured.iter() {
            if output.address != self.address {
                continue;
            }
            let source = if miner_ids.contains(id) {
                TransactionSource::MinerPayout
            } else {
                TransactionSource::Contract
            };
            update.added_outputs.push((*id, *output));
            update.transactions.push(WalletTransaction {
                id: TransactionId(id.0),
                index: diff.index,
                transaction: Transaction {
                    coin_outputs: vec![*output],
                    ..Transaction::default()
                },
                inflow: output.value,
                outflow: Currency::ZERO,
                source,
                timestamp: diff.block.timestamp,
            });
        }

        for (id, output) in diff.created.iter() {
            if output.address == self.address {
                update.added_outputs.push((*id, *output));
            }
        }
        {
            let mut inner = self.inner.lock().unwrap();
            for (id, _) in diff.spent.iter() {
                if owned.contains_key(id) {
                    update.removed_outputs.push(*id);
                    inner.locked.remove(id);
                    inner.tpool.remove(id);
                }
            }
        }

        for txn in diff.block.transactions.iter() {
            if !self.transaction_is_relevant(txn) {
                continue;
            }
            let mut inflow = Currency::ZERO;
            let mut outflow = Currency::ZERO;
            for output in txn.coin_outputs.iter() {
                if output.address == self.address {
                    inflow = inflow.checked_add(output.value).unwrap_or(inflow);
                }
            }
            for input in txn.coin_inputs.iter() {
                if input.unlock_conditions.unlock_hash() == self.address {
                    // value of the spent output, from our own UTXO set
                    if let Some(value) = owned.get(&input.parent_id) {
                        outflow = outflow.checked_add(*value).unwrap_or(outflow);
                    }
                }
            }
            update.transactions.push(WalletTransaction {
                id: txn.id(),
                index: diff.index,
                transaction: txn.clone(),
                inflow,
                outflow,
                source: TransactionSource::Transaction,
                timestamp: diff.block.timestamp,
            });
        }

        self.store.update_wallet(&update)?;
        Ok(())
    }

    /// Revert a block: drop its outputs and transactions, restore the
    /// outputs it spent.
    pub fn process_chain_revert(&self, diff: &BlockDiff) -> Result<(), Error> {
        let mut update = WalletUpdate {
            change_id: diff.block.parent_id,
            reverted_blocks: vec![diff.index.id],
            ..WalletUpdate::default()
        };
        for (id, output) in diff.created.iter().chain(diff.matured.iter()) {
            if output.address == self.address {
                update.removed_outputs.push(*id);
            }
        }
        for (id, output) in diff.spent.iter() {
            if output.address == self.address {
                update.added_outputs.push((*id, *output));
            }
        }
        self.store.update_wallet(&update)?;
        Ok(())
    }

    /// Track the unconfirmed pool: outputs spent by applied transaction
    /// sets are unspendable until the sets land in a block or are
    /// reverted from the pool.
    pub fn process_pool_update(&self, applied: &[Transaction], reverted: &[Transaction]) {
        let mut inner = self.inner.lock().unwrap();
        for txn in reverted {
            for input in txn.coin_inputs.iter() {
                if input.unlock_conditions.unlock_hash() == self.address {
                    inner.tpool.remove(&input.parent_id);
                }
            }
        }
        for txn in applied {
            for input in txn.coin_inputs.iter() {
                if input.unlock_conditions.unlock_hash() == self.address {
                    inner.tpool.insert(input.parent_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod test;
