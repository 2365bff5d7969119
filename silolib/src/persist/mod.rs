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

//! Persistent state for the host. Consumers define narrow store traits
//! ([`crate::contracts::ContractStore`], [`crate::storage::VolumeStore`],
//! [`crate::wallet::WalletStore`]); the SQLite [`sqlite::HostStore`]
//! implements all of them over one database, and [`mem::MemStore`] is the
//! in-memory double for tests.

#[cfg(any(test, feature = "testing"))]
pub mod mem;
pub mod sqlite;
