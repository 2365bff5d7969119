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

use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::chain::ChainUpdate;
use crate::contracts::ContractManager;
use crate::wallet::SingleAddressWallet;

/// Applies consensus updates to the contract manager and wallet on one
/// dedicated thread, in arrival order. Dropping the sender shuts the pump
/// down after it drains its queue.
pub struct ChainEventPump {
    handle: JoinHandle<()>,
}

impl ChainEventPump {
    pub fn spawn(
        contracts: Arc<ContractManager>,
        wallet: Arc<SingleAddressWallet>,
    ) -> (SyncSender<ChainUpdate>, ChainEventPump) {
        let (tx, rx) = sync_channel::<ChainUpdate>(64);
        let handle = thread::Builder::new()
            .name("chain-pump".into())
            .spawn(move || {
                while let Ok(update) = rx.recv() {
                    match update {
                        ChainUpdate::Apply(diff) => {
                            debug!("applying block {}", diff.index);
                            if let Err(e) = contracts.process_chain_apply(&diff) {
                                error!("failed to apply block {} to contracts: {}", diff.index, e);
                            }
                            if let Err(e) = wallet.process_chain_apply(&diff) {
                                error!("failed to apply block {} to wallet: {}", diff.index, e);
                            }
                        }
                        ChainUpdate::Revert(diff) => {
                            debug!("reverting block {}", diff.index);
                            if let Err(e) = wallet.process_chain_revert(&diff) {
                                error!("failed to revert block {} from wallet: {}", diff.index, e);
                            }
                            if let Err(e) = contracts.process_chain_revert(&diff) {
                                error!(
                                    "failed to revert block {} from contracts: {}",
                                    diff.index, e
                                );
                            }
                        }
                    }
                }
                debug!("chain pump shutting down");
            })
            .expect("failed to spawn chain pump thread");
        (tx, ChainEventPump { handle })
    }

    /// Block until the pump drains and exits. Call after dropping every
    /// sender clone.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use silo_common::types::{BlockId, ChainIndex, Currency, OutputId};
    use silo_common::util::ed25519::PrivateKey;

    use super::*;
    use crate::chain::{Block, BlockDiff, ChainUpdate, CoinOutput};
    use crate::persist::mem::MemStore;
    use crate::storage::MemSectorStore;
    use crate::test_utils::TestChain;

    #[test]
    fn pump_applies_updates_in_order_and_drains() {
        let store = Arc::new(MemStore::new());
        let chain = Arc::new(TestChain::new());
        let host_key = PrivateKey::from_seed(&[5u8; 32]);
        let wallet = Arc::new(SingleAddressWallet::new(
            host_key.clone(),
            chain.clone(),
            store.clone(),
        ));
        let contracts = Arc::new(
            ContractManager::new(
                store.clone(),
                Arc::new(MemSectorStore::new()),
                host_key.public_key(),
            )
            .unwrap(),
        );

        let (tx, pump) = ChainEventPump::spawn(contracts, wallet.clone());

        let output_id = OutputId([0x77; 32]);
        let block = Block::default();
        let diff = BlockDiff {
            index: ChainIndex {
                height: 1,
                id: BlockId([1; 32]),
            },
            created: vec![(
                output_id,
                CoinOutput {
                    value: Currency::new(500),
                    address: wallet.address(),
                },
            )],
            spent: vec![],
            matured: vec![],
            block,
        };
        tx.send(ChainUpdate::Apply(diff.clone())).unwrap();
        tx.send(ChainUpdate::Revert(diff)).unwrap();
        drop(tx);
        pump.join();

        // applied then reverted: the output is gone again
        let (_, confirmed) = wallet.balance().unwrap();
        assert_eq!(confirmed, Currency::ZERO);
        assert_eq!(wallet.last_processed_change().unwrap(), Some(BlockId::default()));
    }
}
