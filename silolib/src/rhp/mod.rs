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

//! The storage-protocol session layer: a framed, encrypted RPC loop over
//! TCP through which renters form and revise storage contracts.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::{error, fmt, io};

use silo_common::consts::SECTOR_SIZE;
use silo_common::types::{Currency, Specifier};
use silo_common::util::ed25519::{PrivateKey, PublicKey};

use crate::chain::{ChainManager, TransactionPool};
use crate::contracts::ContractManager;
use crate::storage::VolumeManager;
use crate::wallet::SingleAddressWallet;

pub mod rpc;
pub mod transport;
pub mod wire;

pub use wire::RpcError;

// Handshake specifiers
pub const LOOP_ENTER: Specifier = Specifier::new("LoopEnter");
pub const LOOP_EXIT: Specifier = Specifier::new("LoopExit");

// RPC ciphers
pub const CIPHER_CHACHA20_POLY1305: Specifier = Specifier::new("ChaCha20Poly1305");
pub const CIPHER_NO_OVERLAP: Specifier = Specifier::new("NoOverlap");

// RPC IDs
pub const RPC_SETTINGS_ID: Specifier = Specifier::new("LoopSettings");
pub const RPC_LOCK_ID: Specifier = Specifier::new("LoopLock");
pub const RPC_UNLOCK_ID: Specifier = Specifier::new("LoopUnlock");
pub const RPC_FORM_CONTRACT_ID: Specifier = Specifier::new("LoopFormContract");
pub const RPC_RENEW_CLEAR_ID: Specifier = Specifier::new("LoopRenewClear");
pub const RPC_SECTOR_ROOTS_ID: Specifier = Specifier::new("LoopSectorRoots");
pub const RPC_READ_ID: Specifier = Specifier::new("LoopRead");
pub const RPC_WRITE_ID: Specifier = Specifier::new("LoopWrite");

// Read/Write action specifiers
pub const WRITE_ACTION_APPEND: Specifier = Specifier::new("Append");
pub const WRITE_ACTION_TRIM: Specifier = Specifier::new("Trim");
pub const WRITE_ACTION_SWAP: Specifier = Specifier::new("Swap");
pub const WRITE_ACTION_UPDATE: Specifier = Specifier::new("Update");
pub const RPC_READ_STOP: Specifier = Specifier::new("ReadStop");

/// Floor for per-message size limits; most requests are tiny.
pub const MIN_MESSAGE_SIZE: u64 = 4096;

#[derive(Debug)]
pub enum Error {
    /// Socket failure or timeout
    IOError(io::Error),
    /// Frame or object decoding failure
    CodecError(silo_common::codec::Error),
    /// Handshake could not complete
    HandshakeError(String),
    /// The peer sent an rpcError frame
    RpcError(wire::RpcError),
    /// AEAD seal/open failure; the channel is no longer trustworthy
    CryptoError(String),
    /// The peer terminated the session
    PeerClosed,
    ContractError(crate::contracts::Error),
    StorageError(crate::storage::Error),
    WalletError(crate::wallet::Error),
    ChainError(crate::chain::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IOError(ref e) => fmt::Display::fmt(e, f),
            Error::CodecError(ref e) => fmt::Display::fmt(e, f),
            Error::HandshakeError(ref s) => write!(f, "handshake failed: {}", s),
            Error::RpcError(ref e) => fmt::Display::fmt(e, f),
            Error::CryptoError(ref s) => write!(f, "crypto failure: {}", s),
            Error::PeerClosed => write!(f, "peer terminated the session"),
            Error::ContractError(ref e) => fmt::Display::fmt(e, f),
            Error::StorageError(ref e) => fmt::Display::fmt(e, f),
            Error::WalletError(ref e) => fmt::Display::fmt(e, f),
            Error::ChainError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IOError(ref e) => Some(e),
            Error::CodecError(ref e) => Some(e),
            Error::RpcError(ref e) => Some(e),
            Error::ContractError(ref e) => Some(e),
            Error::StorageError(ref e) => Some(e),
            Error::WalletError(ref e) => Some(e),
            Error::ChainError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IOError(e)
    }
}

impl From<silo_common::codec::Error> for Error {
    fn from(e: silo_common::codec::Error) -> Error {
        Error::CodecError(e)
    }
}

impl From<wire::RpcError> for Error {
    fn from(e: wire::RpcError) -> Error {
        Error::RpcError(e)
    }
}

impl From<crate::contracts::Error> for Error {
    fn from(e: crate::contracts::Error) -> Error {
        Error::ContractError(e)
    }
}

impl From<crate::storage::Error> for Error {
    fn from(e: crate::storage::Error) -> Error {
        Error::StorageError(e)
    }
}

impl From<crate::wallet::Error> for Error {
    fn from(e: crate::wallet::Error) -> Error {
        Error::WalletError(e)
    }
}

impl From<crate::chain::Error> for Error {
    fn from(e: crate::chain::Error) -> Error {
        Error::ChainError(e)
    }
}

/// The host's advertised settings, served by the Settings RPC as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettings {
    pub version: String,
    pub net_address: String,
    pub accepting_contracts: bool,
    pub max_duration: u64,
    pub max_collateral: Currency,
    pub contract_price: Currency,
    pub storage_price: Currency,
    pub upload_bandwidth_price: Currency,
    pub download_bandwidth_price: Currency,
    pub sector_access_price: Currency,
    pub collateral: Currency,
    pub max_revision_batch_size: u64,
    pub remaining_storage: u64,
    pub total_storage: u64,
    pub window_size: u64,
    pub revision_number: u64,
    pub siamux_port: String,
}

/// The operator-configured half of the settings; storage totals and the
/// revision number are filled in when settings are served.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub net_address: String,
    pub accepting_contracts: bool,
    pub max_duration: u64,
    pub max_collateral: Currency,
    pub contract_price: Currency,
    pub storage_price: Currency,
    pub upload_bandwidth_price: Currency,
    pub download_bandwidth_price: Currency,
    pub sector_access_price: Currency,
    pub collateral: Currency,
    pub max_revision_batch_size: u64,
    pub window_size: u64,
    pub siamux_port: String,
}

impl Default for HostConfig {
    fn default() -> HostConfig {
        HostConfig {
            net_address: "".into(),
            accepting_contracts: true,
            max_duration: 4320,
            max_collateral: Currency::new(u64::MAX as u128),
            contract_price: Currency::new(1),
            storage_price: Currency::new(1),
            upload_bandwidth_price: Currency::new(1),
            download_bandwidth_price: Currency::new(1),
            sector_access_price: Currency::new(1),
            collateral: Currency::new(1),
            max_revision_batch_size: 1 << 17,
            window_size: 72,
            siamux_port: "9983".into(),
        }
    }
}

/// Serves renter sessions: accepts TCP connections, runs the handshake,
/// and dispatches the RPC loop for each.
pub struct SessionHandler {
    key: PrivateKey,
    config: Mutex<HostConfig>,
    settings_revision: AtomicU64,
    contracts: Arc<ContractManager>,
    storage: Arc<VolumeManager>,
    wallet: Arc<SingleAddressWallet>,
    cm: Arc<dyn ChainManager>,
    tpool: Arc<dyn TransactionPool>,
}

impl SessionHandler {
    pub fn new(
        key: PrivateKey,
        config: HostConfig,
        contracts: Arc<ContractManager>,
        storage: Arc<VolumeManager>,
        wallet: Arc<SingleAddressWallet>,
        cm: Arc<dyn ChainManager>,
        tpool: Arc<dyn TransactionPool>,
    ) -> SessionHandler {
        SessionHandler {
            key,
            config: Mutex::new(config),
            settings_revision: AtomicU64::new(0),
            contracts,
            storage,
            wallet,
            cm,
            tpool,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub fn config(&self) -> HostConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn update_config(&self, config: HostConfig) {
        *self.config.lock().unwrap() = config;
        self.settings_revision.fetch_add(1, Ordering::SeqCst);
    }

    /// The current settings payload: configured prices plus live storage
    /// totals.
    pub fn settings(&self) -> HostSettings {
        let config = self.config.lock().unwrap().clone();
        let (total, used) = self.storage.usage();
        HostSettings {
            version: env!("CARGO_PKG_VERSION").to_string(),
            net_address: config.net_address,
            accepting_contracts: config.accepting_contracts,
            max_duration: config.max_duration,
            max_collateral: config.max_collateral,
            contract_price: config.contract_price,
            storage_price: config.storage_price,
            upload_bandwidth_price: config.upload_bandwidth_price,
            download_bandwidth_price: config.download_bandwidth_price,
            sector_access_price: config.sector_access_price,
            collateral: config.collateral,
            max_revision_batch_size: config.max_revision_batch_size,
            remaining_storage: (total - used) * SECTOR_SIZE as u64,
            total_storage: total * SECTOR_SIZE as u64,
            window_size: config.window_size,
            revision_number: self.settings_revision.load(Ordering::SeqCst),
            siamux_port: config.siamux_port,
        }
    }

    /// Accept sessions until the listener fails. Each session runs on its
    /// own thread and progresses sequentially through its RPC loop.
    pub fn serve(self: Arc<Self>, listener: TcpListener) {
        info!(
            "listening for renter sessions on {:?}",
            listener.local_addr()
        );
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("failed to accept session: {}", e);
                    continue;
                }
            };
            let handler = self.clone();
            if let Err(e) = thread::Builder::new()
                .name("rhp-session".into())
                .spawn(move || handler.run_session(stream))
            {
                error!("failed to spawn session thread: {}", e);
            }
        }
    }

    fn run_session(self: Arc<Self>, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        debug!("session started with {}", peer);
        match rpc::Session::accept(stream, &self.key) {
            Ok(mut session) => {
                if let Err(e) = session.run(&self) {
                    debug!("session with {} ended: {}", peer, e);
                }
                session.close(&self);
            }
            Err(e) => {
                debug!("handshake with {} failed: {}", peer, e);
            }
        }
    }

    pub(crate) fn contracts(&self) -> &Arc<ContractManager> {
        &self.contracts
    }

    pub(crate) fn storage(&self) -> &Arc<VolumeManager> {
        &self.storage
    }

    pub(crate) fn wallet(&self) -> &Arc<SingleAddressWallet> {
        &self.wallet
    }

    pub(crate) fn cm(&self) -> &Arc<dyn ChainManager> {
        &self.cm
    }

    pub(crate) fn tpool(&self) -> &Arc<dyn TransactionPool> {
        &self.tpool
    }

    pub(crate) fn host_key(&self) -> &PrivateKey {
        &self.key
    }
}

#[cfg(test)]
mod tests;
