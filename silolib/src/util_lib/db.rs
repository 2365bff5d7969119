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

use std::io::Error as IOError;
use std::path::Path;
use std::time::Duration;
use std::{error, fmt};

use rand::{thread_rng, Rng};
use rusqlite::types::ToSql;
use rusqlite::{Connection, Error as sqlite_error, OpenFlags, Row, TransactionBehavior};
use silo_common::util::sleep_ms;

pub type DBConn = rusqlite::Connection;
pub type DBTx<'a> = rusqlite::Transaction<'a>;

/// rusqlite dropped its all-params-are-empty constant; keep the old name
/// so queries without arguments read the same everywhere.
pub const NO_PARAMS: &[&dyn ToSql] = &[];

#[derive(Debug)]
pub enum Error {
    /// Database doesn't exist
    NoDBError,
    /// Read-only and tried to write
    ReadOnly,
    /// Database is corrupt -- we got data that shouldn't be there, or
    /// didn't get data when we should have
    Corruption,
    /// Serialization error -- can't serialize data
    SerializationError(serde_json::Error),
    /// Parse error -- failed to load data we stored directly
    ParseError,
    /// Operation would overflow
    Overflow,
    /// Data not found
    NotFoundError,
    /// Data already exists
    ExistsError,
    /// Sqlite3 error
    SqliteError(sqlite_error),
    /// I/O error
    IOError(IOError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoDBError => write!(f, "Database does not exist"),
            Error::ReadOnly => write!(f, "Database is opened read-only"),
            Error::Corruption => write!(f, "Database is corrupt"),
            Error::SerializationError(ref e) => fmt::Display::fmt(e, f),
            Error::ParseError => write!(f, "Parse error"),
            Error::Overflow => write!(f, "Numeric overflow"),
            Error::NotFoundError => write!(f, "Not found"),
            Error::ExistsError => write!(f, "Already exists"),
            Error::SqliteError(ref e) => fmt::Display::fmt(e, f),
            Error::IOError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::SerializationError(ref e) => Some(e),
            Error::SqliteError(ref e) => Some(e),
            Error::IOError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlite_error> for Error {
    fn from(e: sqlite_error) -> Error {
        Error::SqliteError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::SerializationError(e)
    }
}

impl From<IOError> for Error {
    fn from(e: IOError) -> Error {
        Error::IOError(e)
    }
}

/// Load an object from exactly one row
pub trait FromRow<T> {
    fn from_row(row: &Row) -> Result<T, Error>;
}

/// Load an object from a named column
pub trait FromColumn<T> {
    fn from_column(row: &Row, column_name: &str) -> Result<T, Error>;
}

impl FromRow<u64> for u64 {
    fn from_row(row: &Row) -> Result<u64, Error> {
        let x: i64 = row.get(0).map_err(Error::SqliteError)?;
        if x < 0 {
            return Err(Error::ParseError);
        }
        Ok(x as u64)
    }
}

impl FromRow<i64> for i64 {
    fn from_row(row: &Row) -> Result<i64, Error> {
        row.get(0).map_err(Error::SqliteError)
    }
}

impl FromRow<String> for String {
    fn from_row(row: &Row) -> Result<String, Error> {
        row.get(0).map_err(Error::SqliteError)
    }
}

impl FromColumn<u64> for u64 {
    fn from_column(row: &Row, column_name: &str) -> Result<u64, Error> {
        let x: i64 = row.get(column_name).map_err(Error::SqliteError)?;
        if x < 0 {
            return Err(Error::ParseError);
        }
        Ok(x as u64)
    }
}

/// Make a byte-array newtype loadable from a hex TEXT column.
#[macro_export]
macro_rules! impl_byte_array_from_column {
    ($thing:ident) => {
        impl $crate::util_lib::db::FromColumn<$thing> for $thing {
            fn from_column(
                row: &rusqlite::Row,
                column_name: &str,
            ) -> Result<$thing, $crate::util_lib::db::Error> {
                let hex_str: String = row
                    .get(column_name)
                    .map_err($crate::util_lib::db::Error::SqliteError)?;
                $thing::from_hex(&hex_str).ok_or($crate::util_lib::db::Error::ParseError)
            }
        }
    };
}

/// SQLite only stores i64s, so u64s beyond i64::MAX can't be represented
pub fn u64_to_sql(x: u64) -> Result<i64, Error> {
    if x > (i64::MAX as u64) {
        return Err(Error::Overflow);
    }
    Ok(x as i64)
}

pub fn u64_from_sql(x: i64) -> Result<u64, Error> {
    if x < 0 {
        return Err(Error::ParseError);
    }
    Ok(x as u64)
}

/// Called by `rusqlite` if we are waiting too long on a database lock.
pub fn tx_busy_handler(run_count: i32) -> bool {
    const TIMEOUT: Duration = Duration::from_secs(60);
    const AVG_SLEEP_TIME_MS: u64 = 100;

    let run_count = run_count.unsigned_abs();
    let approx_time_elapsed =
        Duration::from_millis(AVG_SLEEP_TIME_MS.saturating_mul(u64::from(run_count)));
    if approx_time_elapsed > TIMEOUT {
        error!(
            "Probable deadlock detected. Waited {} seconds (estimated) for database lock. Giving up",
            approx_time_elapsed.as_secs()
        );
        return false;
    }

    let mut sleep_time_ms = 2u64.saturating_pow(run_count);
    sleep_time_ms = sleep_time_ms.saturating_add(thread_rng().gen_range(0..sleep_time_ms.max(1)));
    if sleep_time_ms > AVG_SLEEP_TIME_MS {
        let jitter = 10;
        sleep_time_ms =
            thread_rng().gen_range((AVG_SLEEP_TIME_MS - jitter)..(AVG_SLEEP_TIME_MS + jitter));
    }

    debug!("Database is locked; sleeping {}ms and trying again", sleep_time_ms);
    sleep_ms(sleep_time_ms);
    true
}

/// Begin an immediate-mode transaction: takes the write lock up front so
/// that concurrent writers queue on the busy handler instead of failing
/// mid-transaction.
pub fn tx_begin_immediate(conn: &mut Connection) -> Result<DBTx<'_>, Error> {
    conn.busy_handler(Some(tx_busy_handler))?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    Ok(tx)
}

/// Run one or more PRAGMA statements
pub fn sql_pragma(conn: &Connection, pragma_name: &str, pragma_value: &dyn ToSql) -> Result<(), Error> {
    conn.pragma_update(None, pragma_name, pragma_value)
        .map_err(Error::SqliteError)
}

/// Open a database connection and set some defaults
pub fn sqlite_open<P: AsRef<Path>>(
    path: P,
    flags: OpenFlags,
    foreign_keys: bool,
) -> Result<Connection, Error> {
    let db = Connection::open_with_flags(path, flags)?;
    db.busy_handler(Some(tx_busy_handler))?;
    if foreign_keys {
        sql_pragma(&db, "foreign_keys", &true)?;
    }
    sql_pragma(&db, "journal_mode", &"WAL")?;
    Ok(db)
}

/// Boilerplate for querying a single row. Not to be used for more than
/// one query result.
pub fn query_row<T, P>(conn: &Connection, sql: &str, args: P) -> Result<Option<T>, Error>
where
    P: rusqlite::Params,
    T: FromRow<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

/// Boilerplate for querying a list of rows.
pub fn query_rows<T, P>(conn: &Connection, sql: &str, args: P) -> Result<Vec<T>, Error>
where
    P: rusqlite::Params,
    T: FromRow<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut ret = vec![];
    while let Some(row) = rows.next()? {
        ret.push(T::from_row(row)?);
    }
    Ok(ret)
}

/// Boilerplate for a counting query.
pub fn query_count<P>(conn: &Connection, sql: &str, args: P) -> Result<u64, Error>
where
    P: rusqlite::Params,
{
    query_row::<u64, P>(conn, sql, args)?.ok_or(Error::Corruption)
}

pub fn table_exists(conn: &Connection, table_name: &str) -> Result<bool, Error> {
    let qry = "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1";
    Ok(query_row::<String, _>(conn, qry, [table_name])?.is_some())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn u64_sql_bounds() {
        assert_eq!(u64_to_sql(0).unwrap(), 0);
        assert_eq!(u64_to_sql(i64::MAX as u64).unwrap(), i64::MAX);
        assert!(u64_to_sql(u64::MAX).is_err());
        assert!(u64_from_sql(-1).is_err());
    }

    #[test]
    fn query_helpers() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(x INTEGER NOT NULL);").unwrap();
        conn.execute("INSERT INTO t VALUES (1), (2), (3)", NO_PARAMS).unwrap();

        let rows: Vec<u64> = query_rows(&conn, "SELECT x FROM t ORDER BY x", NO_PARAMS).unwrap();
        assert_eq!(rows, vec![1, 2, 3]);
        let one: Option<u64> = query_row(&conn, "SELECT x FROM t WHERE x = ?1", [2i64]).unwrap();
        assert_eq!(one, Some(2));
        let none: Option<u64> = query_row(&conn, "SELECT x FROM t WHERE x = ?1", [9i64]).unwrap();
        assert_eq!(none, None);
        assert_eq!(query_count(&conn, "SELECT COUNT(*) FROM t", NO_PARAMS).unwrap(), 3);
        assert!(table_exists(&conn, "t").unwrap());
        assert!(!table_exists(&conn, "nope").unwrap());
    }
}
