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

use silo_common::types::{Address, BlockId, ChainIndex, Currency, Hash256, OutputId};
use silo_common::util::ed25519::PrivateKey;

use super::*;
use crate::chain::{Block, BlockDiff, CoinOutput};
use crate::persist::mem::MemStore;
use crate::test_utils::TestChain;

struct Harness {
    wallet: SingleAddressWallet,
    store: Arc<MemStore>,
    chain: Arc<TestChain>,
}

fn harness() -> Harness {
    let key = PrivateKey::from_seed(&[3u8; 32]);
    let store = Arc::new(MemStore::new());
    let chain = Arc::new(TestChain::new());
    let wallet = SingleAddressWallet::new(key, chain.clone(), store.clone());
    Harness {
        wallet,
        store,
        chain,
    }
}

fn fund(h: &Harness, seed: u8, value: u128) -> OutputId {
    let id = OutputId([seed; 32]);
    h.store.fund(
        id,
        CoinOutput {
            value: Currency::new(value),
            address: h.wallet.address(),
        },
    );
    id
}

#[test]
fn fund_sign_and_release() {
    let h = harness();
    fund(&h, 1, 100);
    fund(&h, 2, 250);

    let mut txn = Transaction::default();
    let (to_sign, release) = h.wallet.fund_transaction(&mut txn, Currency::new(300)).unwrap();
    assert_eq!(txn.coin_inputs.len(), 2);
    assert_eq!(to_sign.len(), 2);
    // the overshoot comes back as change
    assert_eq!(txn.coin_outputs.len(), 1);
    assert_eq!(txn.coin_outputs[0].value, Currency::new(50));
    assert_eq!(txn.coin_outputs[0].address, h.wallet.address());

    // both outputs are locked now
    let (spendable, confirmed) = h.wallet.balance().unwrap();
    assert_eq!(confirmed, Currency::new(350));
    assert_eq!(spendable, Currency::ZERO);
    let mut txn2 = Transaction::default();
    assert!(matches!(
        h.wallet.fund_transaction(&mut txn2, Currency::new(1)),
        Err(Error::InsufficientBalance)
    ));

    // signatures verify against the whole-transaction hash
    h.wallet
        .sign_transaction(&mut txn, &to_sign, CoveredFields::whole_transaction())
        .unwrap();
    assert_eq!(txn.signatures.len(), 2);
    for (sig, id) in txn.signatures.iter().zip(to_sign.iter()) {
        let sig_hash = txn.whole_sig_hash(&Hash256(id.0), 0);
        assert!(h.wallet.public_key().verify(&sig_hash, &sig.signature));
    }

    // releasing unlocks the outputs again
    release.release();
    let (spendable, _) = h.wallet.balance().unwrap();
    assert_eq!(spendable, Currency::new(350));
}

#[test]
fn fund_requires_balance() {
    let h = harness();
    fund(&h, 1, 100);
    let mut txn = Transaction::default();
    assert!(matches!(
        h.wallet.fund_transaction(&mut txn, Currency::new(101)),
        Err(Error::InsufficientBalance)
    ));
    // exact amounts add no change output
    let (to_sign, _release) = h.wallet.fund_transaction(&mut txn, Currency::new(100)).unwrap();
    assert_eq!(to_sign.len(), 1);
    assert!(txn.coin_outputs.is_empty());
}

#[test]
fn tpool_outputs_are_unspendable() {
    let h = harness();
    let id = fund(&h, 1, 100);

    let spender = Transaction {
        coin_inputs: vec![crate::chain::CoinInput {
            parent_id: id,
            unlock_conditions: UnlockConditions::standard(h.wallet.public_key()),
        }],
        ..Transaction::default()
    };
    h.wallet.process_pool_update(&[spender.clone()], &[]);
    let (spendable, confirmed) = h.wallet.balance().unwrap();
    assert_eq!(confirmed, Currency::new(100));
    assert_eq!(spendable, Currency::ZERO);

    // the pool reverts the set; the output is spendable again
    h.wallet.process_pool_update(&[], &[spender]);
    let (spendable, _) = h.wallet.balance().unwrap();
    assert_eq!(spendable, Currency::new(100));
}

fn apply_diff(h: &Harness, diff: &BlockDiff) {
    h.wallet.process_chain_apply(diff).unwrap();
}

#[test]
fn apply_block_tracks_flows_with_real_values() {
    let h = harness();
    let spent_id = fund(&h, 1, 400);

    // a transaction spending our 400 and paying 150 back to us
    let txn = Transaction {
        coin_inputs: vec![crate::chain::CoinInput {
            parent_id: spent_id,
            unlock_conditions: UnlockConditions::standard(h.wallet.public_key()),
        }],
        coin_outputs: vec![
            CoinOutput {
                value: Currency::new(150),
                address: h.wallet.address(),
            },
            CoinOutput {
                value: Currency::new(250),
                address: Address([0x44; 32]),
            },
        ],
        ..Transaction::default()
    };
    let change_id = txn.coin_output_id(0);
    let block = Block {
        parent_id: BlockId([0; 32]),
        timestamp: 12345,
        miner_payouts: vec![],
        transactions: vec![txn.clone()],
    };
    let diff = BlockDiff {
        index: ChainIndex {
            height: 5,
            id: block.id(),
        },
        created: vec![
            (change_id, txn.coin_outputs[0]),
            (txn.coin_output_id(1), txn.coin_outputs[1]),
        ],
        spent: vec![(
            spent_id,
            CoinOutput {
                value: Currency::new(400),
                address: h.wallet.address(),
            },
        )],
        matured: vec![],
        block,
    };
    apply_diff(&h, &diff);

    let utxos = h.store.unspent_outputs().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].0, change_id);

    let txns = h.wallet.transactions(10, 0).unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].inflow, Currency::new(150));
    // outflow is the real value of the spent output, not zero
    assert_eq!(txns[0].outflow, Currency::new(400));
    assert_eq!(txns[0].timestamp, 12345);
    assert_eq!(h.wallet.last_processed_change().unwrap(), Some(diff.index.id));

    // reverting the block restores the spent output and drops the log
    h.wallet.process_chain_revert(&diff).unwrap();
    let utxos = h.store.unspent_outputs().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].0, spent_id);
    assert_eq!(h.wallet.transaction_count().unwrap(), 0);
}

#[test]
fn matured_payouts_are_classified() {
    let h = harness();

    // the block that minted the payouts, MATURITY_DELAY blocks back
    let mint_height = 10;
    let mint_block = Block {
        parent_id: BlockId([1; 32]),
        timestamp: 500,
        miner_payouts: vec![CoinOutput {
            value: Currency::new(77),
            address: h.wallet.address(),
        }],
        transactions: vec![],
    };
    let miner_output_id = mint_block.miner_output_id(0);
    h.chain.add_block(mint_height, mint_block);

    let contract_output_id = OutputId([0x55; 32]);
    let block = Block {
        parent_id: BlockId([2; 32]),
        timestamp: 900,
        miner_payouts: vec![],
        transactions: vec![],
    };
    let diff = BlockDiff {
        index: ChainIndex {
            height: mint_height + MATURITY_DELAY,
            id: block.id(),
        },
        created: vec![],
        spent: vec![],
        matured: vec![
            (
                miner_output_id,
                CoinOutput {
                    value: Currency::new(77),
                    address: h.wallet.address(),
                },
            ),
            (
                contract_output_id,
                CoinOutput {
                    value: Currency::new(33),
                    address: h.wallet.address(),
                },
            ),
        ],
        block,
    };
    apply_diff(&h, &diff);

    let (_, confirmed) = h.wallet.balance().unwrap();
    assert_eq!(confirmed, Currency::new(110));

    let txns = h.wallet.transactions(10, 0).unwrap();
    assert_eq!(txns.len(), 2);
    let miner = txns
        .iter()
        .find(|t| t.id == silo_common::types::TransactionId(miner_output_id.0))
        .unwrap();
    assert_eq!(miner.source, TransactionSource::MinerPayout);
    // unknown matured outputs are assumed to be contract payouts
    let contract = txns
        .iter()
        .find(|t| t.id == silo_common::types::TransactionId(contract_output_id.0))
        .unwrap();
    assert_eq!(contract.source, TransactionSource::Contract);
}
