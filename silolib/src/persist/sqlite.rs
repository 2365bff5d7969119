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

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ToSql;
use rusqlite::{OpenFlags, Row};
use silo_common::codec::SiloMessageCodec;
use silo_common::types::{
    BlockId, ChainIndex, ContractId, Currency, OutputId, SectorRoot, TransactionId,
};
use silo_common::util::ed25519::PublicKey;

use crate::chain::{CoinOutput, Transaction};
use crate::contracts::{ContractRecord, ContractState, ContractStore, SignedRevision};
use crate::storage::{SectorLocation, VolumeMeta, VolumeStore};
use crate::util_lib::db::{
    query_count, query_row, query_rows, sqlite_open, tx_begin_immediate, u64_to_sql,
    Error as db_error, FromColumn, FromRow, NO_PARAMS,
};
use crate::wallet::{TransactionSource, WalletStore, WalletTransaction, WalletUpdate};

const SCHEMA_VERSION: u64 = 1;

const HOST_DB_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE db_config(
        id INTEGER PRIMARY KEY CHECK (id = 0),
        db_version INTEGER NOT NULL
    );
    "#,
    r#"
    CREATE TABLE wallet_utxos(
        id TEXT PRIMARY KEY,
        amount TEXT NOT NULL,
        unlock_hash TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE wallet_transactions(
        id TEXT NOT NULL,
        block_id TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        -- position within the update batch, to keep intra-block order
        block_index INTEGER NOT NULL,
        source TEXT NOT NULL,
        inflow TEXT NOT NULL,
        outflow TEXT NOT NULL,
        raw_data BLOB NOT NULL,
        date_created INTEGER NOT NULL,
        PRIMARY KEY(id, block_id)
    );
    "#,
    r#"
    CREATE INDEX wallet_transactions_height ON wallet_transactions(block_height DESC, block_index ASC);
    "#,
    r#"
    CREATE TABLE wallet_settings(
        id INTEGER PRIMARY KEY CHECK (id = 0),
        last_processed_change TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE contracts(
        contract_id TEXT PRIMARY KEY,
        renter_key TEXT NOT NULL,
        revision_number INTEGER NOT NULL,
        raw_revision BLOB NOT NULL,
        formation_txn_set BLOB NOT NULL,
        host_collateral TEXT NOT NULL,
        locked_outputs BLOB NOT NULL,
        contract_state TEXT NOT NULL,
        negotiation_height INTEGER NOT NULL,
        confirmation_height INTEGER,
        resolution_height INTEGER
    );
    "#,
    r#"
    CREATE TABLE contract_sectors(
        contract_id TEXT NOT NULL,
        sector_index INTEGER NOT NULL,
        root TEXT NOT NULL,
        PRIMARY KEY(contract_id, sector_index),
        FOREIGN KEY(contract_id) REFERENCES contracts(contract_id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE INDEX contract_sectors_root ON contract_sectors(root);
    "#,
    r#"
    CREATE TABLE sector_locations(
        root TEXT PRIMARY KEY,
        volume_id INTEGER NOT NULL,
        slot INTEGER NOT NULL,
        refcount INTEGER NOT NULL,
        UNIQUE(volume_id, slot),
        FOREIGN KEY(volume_id) REFERENCES volumes(volume_id)
    );
    "#,
    r#"
    CREATE TABLE volumes(
        volume_id INTEGER PRIMARY KEY AUTOINCREMENT,
        local_path TEXT UNIQUE NOT NULL,
        total_sectors INTEGER NOT NULL,
        read_only INTEGER NOT NULL,
        available INTEGER NOT NULL
    );
    "#,
];

/// The host's one SQLite database, shared by the wallet, contract, and
/// sector-location state so coupled changes commit in one transaction.
pub struct HostStore {
    conn: Mutex<rusqlite::Connection>,
}

impl HostStore {
    /// Open or create the database at `path`. A database that fails the
    /// integrity check is a fatal startup error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<HostStore, db_error> {
        let mut conn = sqlite_open(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            true,
        )?;

        let check: Option<String> =
            query_row(&conn, "PRAGMA quick_check", NO_PARAMS)?;
        if check.as_deref() != Some("ok") {
            error!("database integrity check failed: {:?}", check);
            return Err(db_error::Corruption);
        }

        let tx = tx_begin_immediate(&mut conn)?;
        let version: Option<u64> = if crate::util_lib::db::table_exists(&tx, "db_config")? {
            query_row(&tx, "SELECT db_version FROM db_config WHERE id = 0", NO_PARAMS)?
        } else {
            None
        };
        match version {
            None => {
                for cmd in HOST_DB_SCHEMA {
                    tx.execute_batch(cmd)?;
                }
                tx.execute(
                    "INSERT INTO db_config (id, db_version) VALUES (0, ?1)",
                    [u64_to_sql(SCHEMA_VERSION)?],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                error!("unsupported database version {}", v);
                return Err(db_error::Corruption);
            }
        }
        tx.commit()?;

        Ok(HostStore {
            conn: Mutex::new(conn),
        })
    }
}

fn currency_from_text(text: &str) -> Result<Currency, db_error> {
    text.parse::<u128>()
        .map(Currency)
        .map_err(|_| db_error::ParseError)
}

fn blob_decode<T: SiloMessageCodec>(blob: &[u8]) -> Result<T, db_error> {
    let mut fd = blob;
    T::consensus_deserialize(&mut fd).map_err(|_| db_error::ParseError)
}

impl_byte_array_from_column!(SectorRoot);
impl_byte_array_from_column!(ContractId);
impl_byte_array_from_column!(PublicKey);
impl_byte_array_from_column!(BlockId);
impl_byte_array_from_column!(TransactionId);

impl FromRow<SectorLocation> for SectorLocation {
    fn from_row(row: &Row) -> Result<SectorLocation, db_error> {
        let root = SectorRoot::from_column(row, "root")?;
        let volume_id = u64::from_column(row, "volume_id")?;
        let slot = u64::from_column(row, "slot")?;
        let refcount = u64::from_column(row, "refcount")?;
        Ok(SectorLocation {
            root,
            volume_id,
            slot,
            refcount,
        })
    }
}

impl FromRow<VolumeMeta> for VolumeMeta {
    fn from_row(row: &Row) -> Result<VolumeMeta, db_error> {
        Ok(VolumeMeta {
            id: u64::from_column(row, "volume_id")?,
            local_path: row.get("local_path").map_err(db_error::SqliteError)?,
            used_sectors: 0,
            total_sectors: u64::from_column(row, "total_sectors")?,
            read_only: row.get("read_only").map_err(db_error::SqliteError)?,
            available: row.get("available").map_err(db_error::SqliteError)?,
        })
    }
}

impl FromRow<ContractRecord> for ContractRecord {
    fn from_row(row: &Row) -> Result<ContractRecord, db_error> {
        let renter_key = PublicKey::from_column(row, "renter_key")?;
        let raw_revision: Vec<u8> = row.get("raw_revision").map_err(db_error::SqliteError)?;
        let revision: SignedRevision = blob_decode(&raw_revision)?;
        let raw_txn_set: Vec<u8> = row.get("formation_txn_set").map_err(db_error::SqliteError)?;
        let formation_txn_set: Vec<Transaction> = blob_decode(&raw_txn_set)?;
        let collateral_str: String = row.get("host_collateral").map_err(db_error::SqliteError)?;
        let raw_locked: Vec<u8> = row.get("locked_outputs").map_err(db_error::SqliteError)?;
        let locked_outputs: Vec<OutputId> = blob_decode(&raw_locked)?;
        let state_str: String = row.get("contract_state").map_err(db_error::SqliteError)?;
        let state = ContractState::from_str_opt(&state_str).ok_or(db_error::ParseError)?;
        let confirmation_height: Option<i64> = row
            .get("confirmation_height")
            .map_err(db_error::SqliteError)?;
        let resolution_height: Option<i64> = row
            .get("resolution_height")
            .map_err(db_error::SqliteError)?;
        Ok(ContractRecord {
            revision,
            renter_key,
            formation_txn_set,
            host_collateral: currency_from_text(&collateral_str)?,
            locked_outputs,
            state,
            negotiation_height: u64::from_column(row, "negotiation_height")?,
            confirmation_height: confirmation_height
                .map(crate::util_lib::db::u64_from_sql)
                .transpose()?,
            resolution_height: resolution_height
                .map(crate::util_lib::db::u64_from_sql)
                .transpose()?,
            sector_roots: vec![],
        })
    }
}

impl FromRow<WalletTransaction> for WalletTransaction {
    fn from_row(row: &Row) -> Result<WalletTransaction, db_error> {
        let source_str: String = row.get("source").map_err(db_error::SqliteError)?;
        let inflow_str: String = row.get("inflow").map_err(db_error::SqliteError)?;
        let outflow_str: String = row.get("outflow").map_err(db_error::SqliteError)?;
        let raw_data: Vec<u8> = row.get("raw_data").map_err(db_error::SqliteError)?;
        Ok(WalletTransaction {
            id: TransactionId::from_column(row, "id")?,
            index: ChainIndex {
                height: u64::from_column(row, "block_height")?,
                id: BlockId::from_column(row, "block_id")?,
            },
            transaction: blob_decode(&raw_data)?,
            inflow: currency_from_text(&inflow_str)?,
            outflow: currency_from_text(&outflow_str)?,
            source: TransactionSource::from_str_opt(&source_str).ok_or(db_error::ParseError)?,
            timestamp: u64::from_column(row, "date_created")?,
        })
    }
}

impl VolumeStore for HostStore {
    fn add_volume(&self, path: &str, total_sectors: u64) -> Result<u64, db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&path, &u64_to_sql(total_sectors)?];
        conn.execute(
            "INSERT INTO volumes (local_path, total_sectors, read_only, available) VALUES (?1, ?2, 0, 1)",
            args,
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn update_volume_total(&self, id: u64, total_sectors: u64) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&u64_to_sql(total_sectors)?, &u64_to_sql(id)?];
        conn.execute(
            "UPDATE volumes SET total_sectors = ?1 WHERE volume_id = ?2",
            args,
        )?;
        Ok(())
    }

    fn set_volume_available(&self, id: u64, available: bool) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&available, &u64_to_sql(id)?];
        conn.execute(
            "UPDATE volumes SET available = ?1 WHERE volume_id = ?2",
            args,
        )?;
        Ok(())
    }

    fn set_volume_read_only(&self, id: u64, read_only: bool) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&read_only, &u64_to_sql(id)?];
        conn.execute(
            "UPDATE volumes SET read_only = ?1 WHERE volume_id = ?2",
            args,
        )?;
        Ok(())
    }

    fn remove_volume(&self, id: u64) -> Result<(), db_error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = tx_begin_immediate(&mut conn)?;
        tx.execute(
            "DELETE FROM sector_locations WHERE volume_id = ?1",
            [u64_to_sql(id)?],
        )?;
        tx.execute("DELETE FROM volumes WHERE volume_id = ?1", [u64_to_sql(id)?])?;
        tx.commit()?;
        Ok(())
    }

    fn volumes(&self) -> Result<Vec<VolumeMeta>, db_error> {
        let conn = self.conn.lock().unwrap();
        query_rows(
            &conn,
            "SELECT volume_id, local_path, total_sectors, read_only, available FROM volumes ORDER BY volume_id",
            NO_PARAMS,
        )
    }

    fn sector_locations(&self) -> Result<Vec<SectorLocation>, db_error> {
        let conn = self.conn.lock().unwrap();
        query_rows(
            &conn,
            "SELECT root, volume_id, slot, refcount FROM sector_locations",
            NO_PARAMS,
        )
    }

    fn insert_location(&self, loc: &SectorLocation) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[
            &loc.root.to_hex(),
            &u64_to_sql(loc.volume_id)?,
            &u64_to_sql(loc.slot)?,
            &u64_to_sql(loc.refcount)?,
        ];
        conn.execute(
            "INSERT INTO sector_locations (root, volume_id, slot, refcount) VALUES (?1, ?2, ?3, ?4)",
            args,
        )?;
        Ok(())
    }

    fn update_refcount(&self, root: &SectorRoot, refcount: u64) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&u64_to_sql(refcount)?, &root.to_hex()];
        let n = conn.execute(
            "UPDATE sector_locations SET refcount = ?1 WHERE root = ?2",
            args,
        )?;
        if n == 0 {
            return Err(db_error::NotFoundError);
        }
        Ok(())
    }

    fn move_location(&self, root: &SectorRoot, volume_id: u64, slot: u64) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&u64_to_sql(volume_id)?, &u64_to_sql(slot)?, &root.to_hex()];
        let n = conn.execute(
            "UPDATE sector_locations SET volume_id = ?1, slot = ?2 WHERE root = ?3",
            args,
        )?;
        if n == 0 {
            return Err(db_error::NotFoundError);
        }
        Ok(())
    }

    fn delete_location(&self, root: &SectorRoot) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sector_locations WHERE root = ?1",
            [root.to_hex()],
        )?;
        Ok(())
    }

    fn reset_refcounts(&self) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sector_locations SET refcount = (SELECT COUNT(*) FROM contract_sectors WHERE contract_sectors.root = sector_locations.root)",
            NO_PARAMS,
        )?;
        Ok(())
    }
}

impl ContractStore for HostStore {
    fn add_contract(&self, record: &ContractRecord) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[
            &record.id().to_hex(),
            &record.renter_key.to_hex(),
            &u64_to_sql(record.revision.revision.revision_number)?,
            &record.revision.serialize_to_vec(),
            &record.formation_txn_set.serialize_to_vec(),
            &record.host_collateral.0.to_string(),
            &record.locked_outputs.serialize_to_vec(),
            &record.state.as_str(),
            &u64_to_sql(record.negotiation_height)?,
        ];
        let n = conn.execute(
            "INSERT OR IGNORE INTO contracts (contract_id, renter_key, revision_number, raw_revision, formation_txn_set, host_collateral, locked_outputs, contract_state, negotiation_height) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            args,
        )?;
        if n == 0 {
            return Err(db_error::ExistsError);
        }
        Ok(())
    }

    fn commit_revision(
        &self,
        revision: &SignedRevision,
        sector_roots: &[SectorRoot],
    ) -> Result<(), db_error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = tx_begin_immediate(&mut conn)?;
        let id = revision.revision.parent_id.to_hex();
        let args: &[&dyn ToSql] = &[
            &u64_to_sql(revision.revision.revision_number)?,
            &revision.serialize_to_vec(),
            &id,
        ];
        let n = tx.execute(
            "UPDATE contracts SET revision_number = ?1, raw_revision = ?2 WHERE contract_id = ?3",
            args,
        )?;
        if n == 0 {
            return Err(db_error::NotFoundError);
        }
        tx.execute("DELETE FROM contract_sectors WHERE contract_id = ?1", [&id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO contract_sectors (contract_id, sector_index, root) VALUES (?1, ?2, ?3)",
            )?;
            for (i, root) in sector_roots.iter().enumerate() {
                let args: &[&dyn ToSql] = &[&id, &u64_to_sql(i as u64)?, &root.to_hex()];
                stmt.execute(args)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_contract_state(
        &self,
        id: &ContractId,
        state: ContractState,
        confirmation_height: Option<u64>,
        resolution_height: Option<u64>,
    ) -> Result<(), db_error> {
        let conn = self.conn.lock().unwrap();
        let confirmation = confirmation_height.map(u64_to_sql).transpose()?;
        let resolution = resolution_height.map(u64_to_sql).transpose()?;
        let args: &[&dyn ToSql] = &[&state.as_str(), &confirmation, &resolution, &id.to_hex()];
        let n = conn.execute(
            "UPDATE contracts SET contract_state = ?1, confirmation_height = ?2, resolution_height = ?3 WHERE contract_id = ?4",
            args,
        )?;
        if n == 0 {
            return Err(db_error::NotFoundError);
        }
        Ok(())
    }

    fn contracts(&self) -> Result<Vec<ContractRecord>, db_error> {
        let conn = self.conn.lock().unwrap();
        let mut records: Vec<ContractRecord> = query_rows(
            &conn,
            "SELECT contract_id, renter_key, revision_number, raw_revision, formation_txn_set, host_collateral, locked_outputs, contract_state, negotiation_height, confirmation_height, resolution_height FROM contracts",
            NO_PARAMS,
        )?;
        for record in records.iter_mut() {
            let mut stmt = conn.prepare(
                "SELECT root FROM contract_sectors WHERE contract_id = ?1 ORDER BY sector_index ASC",
            )?;
            let mut rows = stmt.query([record.id().to_hex()])?;
            while let Some(row) = rows.next()? {
                let root_str: String = row.get(0)?;
                let root = SectorRoot::from_hex(&root_str).ok_or(db_error::ParseError)?;
                record.sector_roots.push(root);
            }
        }
        Ok(records)
    }
}

impl WalletStore for HostStore {
    fn last_processed_change(&self) -> Result<Option<BlockId>, db_error> {
        let conn = self.conn.lock().unwrap();
        let change: Option<String> = query_row(
            &conn,
            "SELECT last_processed_change FROM wallet_settings WHERE id = 0",
            NO_PARAMS,
        )?;
        match change {
            None => Ok(None),
            Some(s) => Ok(Some(BlockId::from_hex(&s).ok_or(db_error::ParseError)?)),
        }
    }

    fn unspent_outputs(&self) -> Result<Vec<(OutputId, CoinOutput)>, db_error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, amount, unlock_hash FROM wallet_utxos")?;
        let mut rows = stmt.query(NO_PARAMS)?;
        let mut utxos = vec![];
        while let Some(row) = rows.next()? {
            let id_str: String = row.get(0)?;
            let amount_str: String = row.get(1)?;
            let hash_str: String = row.get(2)?;
            utxos.push((
                OutputId::from_hex(&id_str).ok_or(db_error::ParseError)?,
                CoinOutput {
                    value: currency_from_text(&amount_str)?,
                    address: silo_common::types::Address::from_hex(&hash_str)
                        .ok_or(db_error::ParseError)?,
                },
            ));
        }
        Ok(utxos)
    }

    fn wallet_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<WalletTransaction>, db_error> {
        let conn = self.conn.lock().unwrap();
        let args: &[&dyn ToSql] = &[&u64_to_sql(limit)?, &u64_to_sql(offset)?];
        query_rows(
            &conn,
            "SELECT id, block_id, block_height, source, inflow, outflow, raw_data, date_created FROM wallet_transactions ORDER BY block_height DESC, block_index ASC LIMIT ?1 OFFSET ?2",
            args,
        )
    }

    fn wallet_transaction_count(&self) -> Result<u64, db_error> {
        let conn = self.conn.lock().unwrap();
        query_count(&conn, "SELECT COUNT(*) FROM wallet_transactions", NO_PARAMS)
    }

    fn update_wallet(&self, update: &WalletUpdate) -> Result<(), db_error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = tx_begin_immediate(&mut conn)?;

        for block_id in update.reverted_blocks.iter() {
            tx.execute(
                "DELETE FROM wallet_transactions WHERE block_id = ?1",
                [block_id.to_hex()],
            )?;
        }
        for id in update.removed_outputs.iter() {
            tx.execute("DELETE FROM wallet_utxos WHERE id = ?1", [id.to_hex()])?;
        }
        for (id, output) in update.added_outputs.iter() {
            let args: &[&dyn ToSql] = &[
                &id.to_hex(),
                &output.value.0.to_string(),
                &output.address.to_hex(),
            ];
            tx.execute(
                "INSERT OR REPLACE INTO wallet_utxos (id, amount, unlock_hash) VALUES (?1, ?2, ?3)",
                args,
            )?;
        }
        for (i, txn) in update.transactions.iter().enumerate() {
            let args: &[&dyn ToSql] = &[
                &txn.id.to_hex(),
                &txn.index.id.to_hex(),
                &u64_to_sql(txn.index.height)?,
                &u64_to_sql(i as u64)?,
                &txn.source.as_str(),
                &txn.inflow.0.to_string(),
                &txn.outflow.0.to_string(),
                &txn.transaction.serialize_to_vec(),
                &u64_to_sql(txn.timestamp)?,
            ];
            tx.execute(
                "INSERT OR REPLACE INTO wallet_transactions (id, block_id, block_height, block_index, source, inflow, outflow, raw_data, date_created) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                args,
            )?;
        }
        tx.execute(
            "INSERT INTO wallet_settings (id, last_processed_change) VALUES (0, ?1) ON CONFLICT (id) DO UPDATE SET last_processed_change = excluded.last_processed_change",
            [update.change_id.to_hex()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use silo_common::types::{Address, Hash256};
    use silo_common::util::ed25519::PrivateKey;

    use super::*;
    use crate::chain::{FileContractRevision, UnlockConditions};
    use crate::test_utils::temp_dir;

    fn test_record(seed: u8) -> ContractRecord {
        let renter = PrivateKey::from_seed(&[seed; 32]);
        let revision = FileContractRevision {
            parent_id: ContractId([seed; 32]),
            unlock_conditions: UnlockConditions {
                timelock: 0,
                public_keys: vec![
                    crate::chain::UnlockKey::ed25519(renter.public_key()),
                    crate::chain::UnlockKey::ed25519(
                        PrivateKey::from_seed(&[seed ^ 0xff; 32]).public_key(),
                    ),
                ],
                signatures_required: 2,
            },
            revision_number: 1,
            file_size: 0,
            file_merkle_root: Hash256::default(),
            window_start: 100,
            window_end: 200,
            valid_proof_outputs: vec![
                CoinOutput {
                    value: Currency::new(900),
                    address: Address([1; 32]),
                },
                CoinOutput {
                    value: Currency::new(100),
                    address: Address([2; 32]),
                },
            ],
            missed_proof_outputs: vec![
                CoinOutput {
                    value: Currency::new(900),
                    address: Address([1; 32]),
                },
                CoinOutput {
                    value: Currency::new(50),
                    address: Address([2; 32]),
                },
                CoinOutput {
                    value: Currency::new(50),
                    address: Address::default(),
                },
            ],
            unlock_hash: Address([3; 32]),
        };
        ContractRecord {
            revision: SignedRevision {
                revision,
                ..SignedRevision::default()
            },
            renter_key: renter.public_key(),
            formation_txn_set: vec![Transaction::default()],
            host_collateral: Currency::new(50),
            locked_outputs: vec![OutputId([9; 32])],
            state: crate::contracts::ContractState::Unconfirmed,
            negotiation_height: 42,
            confirmation_height: None,
            resolution_height: None,
            sector_roots: vec![],
        }
    }

    #[test]
    fn contract_roundtrip() {
        let dir = temp_dir("sqlite-contracts");
        let store = Arc::new(HostStore::open(dir.join("host.db")).unwrap());

        let record = test_record(7);
        store.add_contract(&record).unwrap();
        assert!(matches!(
            store.add_contract(&record),
            Err(db_error::ExistsError)
        ));

        let loaded = store.contracts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].revision, record.revision);
        assert_eq!(loaded[0].renter_key, record.renter_key);
        assert_eq!(loaded[0].host_collateral, record.host_collateral);
        assert_eq!(loaded[0].locked_outputs, record.locked_outputs);
        assert_eq!(loaded[0].negotiation_height, 42);

        // commit a revision with sector roots
        let mut signed = record.revision.clone();
        signed.revision.revision_number = 2;
        let roots = vec![SectorRoot([0xaa; 32]), SectorRoot([0xbb; 32])];
        store.commit_revision(&signed, &roots).unwrap();
        let loaded = store.contracts().unwrap();
        assert_eq!(loaded[0].revision.revision.revision_number, 2);
        assert_eq!(loaded[0].sector_roots, roots);

        store
            .update_contract_state(
                &record.id(),
                crate::contracts::ContractState::Confirmed,
                Some(101),
                None,
            )
            .unwrap();
        let loaded = store.contracts().unwrap();
        assert_eq!(loaded[0].state, crate::contracts::ContractState::Confirmed);
        assert_eq!(loaded[0].confirmation_height, Some(101));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn refcount_reset_counts_contract_references() {
        let dir = temp_dir("sqlite-refcounts");
        let store = Arc::new(HostStore::open(dir.join("host.db")).unwrap());

        let vol = store.add_volume("/dev/null-test", 4).unwrap();
        let root = SectorRoot([0xcc; 32]);
        store
            .insert_location(&SectorLocation {
                root,
                volume_id: vol,
                slot: 0,
                refcount: 1,
            })
            .unwrap();

        // no contract references the sector: the scan zeroes the count
        store.reset_refcounts().unwrap();
        let locs = store.sector_locations().unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].refcount, 0);

        // two contracts referencing the root bring it to 2
        let a = test_record(1);
        let b = test_record(2);
        store.add_contract(&a).unwrap();
        store.add_contract(&b).unwrap();
        let mut rev_a = a.revision.clone();
        rev_a.revision.revision_number = 2;
        store.commit_revision(&rev_a, &[root]).unwrap();
        let mut rev_b = b.revision.clone();
        rev_b.revision.revision_number = 2;
        store.commit_revision(&rev_b, &[root]).unwrap();

        store.reset_refcounts().unwrap();
        let locs = store.sector_locations().unwrap();
        assert_eq!(locs[0].refcount, 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn wallet_store_roundtrip() {
        let dir = temp_dir("sqlite-wallet");
        let store = Arc::new(HostStore::open(dir.join("host.db")).unwrap());
        assert_eq!(store.last_processed_change().unwrap(), None);

        let id = OutputId([5; 32]);
        let output = CoinOutput {
            value: Currency::new(12345),
            address: Address([6; 32]),
        };
        let block_id = silo_common::types::BlockId([7; 32]);
        store
            .update_wallet(&WalletUpdate {
                change_id: block_id,
                added_outputs: vec![(id, output)],
                transactions: vec![WalletTransaction {
                    id: TransactionId([8; 32]),
                    index: ChainIndex {
                        height: 10,
                        id: block_id,
                    },
                    transaction: Transaction::default(),
                    inflow: Currency::new(12345),
                    outflow: Currency::ZERO,
                    source: TransactionSource::Transaction,
                    timestamp: 1000,
                }],
                ..WalletUpdate::default()
            })
            .unwrap();

        assert_eq!(store.last_processed_change().unwrap(), Some(block_id));
        assert_eq!(store.unspent_outputs().unwrap(), vec![(id, output)]);
        assert_eq!(store.wallet_transaction_count().unwrap(), 1);
        let txns = store.wallet_transactions(10, 0).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].inflow, Currency::new(12345));

        // revert drops the block's transactions and the output
        store
            .update_wallet(&WalletUpdate {
                change_id: silo_common::types::BlockId([0; 32]),
                removed_outputs: vec![id],
                reverted_blocks: vec![block_id],
                ..WalletUpdate::default()
            })
            .unwrap();
        assert_eq!(store.wallet_transaction_count().unwrap(), 0);
        assert!(store.unspent_outputs().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
