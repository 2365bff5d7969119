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

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use rand::Rng;
use silo_common::types::{BlockId, ChainIndex};

use crate::chain::{Block, ChainManager, Error as chain_error, Transaction, TransactionPool};

/// A unique path under the system temp dir. Nothing is created.
pub fn temp_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "silo-test-{}-{:016x}",
        prefix,
        rand::thread_rng().gen::<u64>()
    ))
}

/// A unique, created directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = temp_path(prefix);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A 4 MiB sector with `prefix_len` random bytes up front and zeros after,
/// mirroring how upload tests seed data.
pub fn random_sector(prefix_len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut sector = vec![0u8; silo_common::consts::SECTOR_SIZE];
    rand::thread_rng().fill_bytes(&mut sector[..prefix_len]);
    sector
}

#[derive(Default)]
struct TestChainInner {
    tip: ChainIndex,
    blocks: HashMap<u64, Block>,
}

/// A scriptable chain manager double: tests set the tip and store blocks.
#[derive(Default)]
pub struct TestChain {
    inner: Mutex<TestChainInner>,
}

impl TestChain {
    pub fn new() -> TestChain {
        TestChain::default()
    }

    pub fn set_tip(&self, height: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.tip = ChainIndex {
            height,
            id: BlockId([height as u8; 32]),
        };
    }

    pub fn add_block(&self, height: u64, block: Block) {
        self.inner.lock().unwrap().blocks.insert(height, block);
    }
}

impl ChainManager for TestChain {
    fn tip(&self) -> ChainIndex {
        self.inner.lock().unwrap().tip
    }

    fn block_at_height(&self, height: u64) -> Option<Block> {
        self.inner.lock().unwrap().blocks.get(&height).cloned()
    }
}

/// A transaction pool double that records every broadcast set.
#[derive(Default)]
pub struct TestTPool {
    pub accepted: Mutex<Vec<Vec<Transaction>>>,
}

impl TestTPool {
    pub fn new() -> TestTPool {
        TestTPool::default()
    }
}

impl TransactionPool for TestTPool {
    fn accept_transaction_set(&self, txns: &[Transaction]) -> Result<(), chain_error> {
        if txns.is_empty() {
            return Err(chain_error::RejectedTransaction("empty set".into()));
        }
        self.accepted.lock().unwrap().push(txns.to_vec());
        Ok(())
    }
}
