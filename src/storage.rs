//! Transactional storage layer using RocksDB
//!
//! Every record is a JSON document under a prefixed key. Writes happen inside
//! pessimistic `TransactionDB` transactions: `get_for_update` takes an
//! exclusive lock on the key until commit, and dropping an uncommitted
//! transaction rolls it back.

use crate::config::StorageConfig;
use crate::errors::LedgerResult;
use rocksdb::{
    Direction, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions,
    TransactionOptions, WriteOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

const USER_PREFIX: &str = "user:";
const MATCH_PREFIX: &str = "match:";
const TICKET_PREFIX: &str = "ticket:";
const MATCH_TICKET_INDEX: &str = "idx:match-ticket:";
const USER_TICKET_INDEX: &str = "idx:user-ticket:";

/// Open transaction against the ledger database
pub type LedgerTxn<'a> = Transaction<'a, TransactionDB>;

pub fn user_key(user_id: &str) -> Vec<u8> {
    format!("{}{}", USER_PREFIX, user_id).into_bytes()
}

pub fn match_key(match_id: &str) -> Vec<u8> {
    format!("{}{}", MATCH_PREFIX, match_id).into_bytes()
}

pub fn ticket_key(ticket_id: &str) -> Vec<u8> {
    format!("{}{}", TICKET_PREFIX, ticket_id).into_bytes()
}

/// Index prefix listing every ticket with a leg on `match_id`
pub fn match_ticket_prefix(match_id: &str) -> Vec<u8> {
    format!("{}{}:", MATCH_TICKET_INDEX, match_id).into_bytes()
}

pub fn match_ticket_key(match_id: &str, ticket_id: &str) -> Vec<u8> {
    let mut key = match_ticket_prefix(match_id);
    key.extend_from_slice(ticket_id.as_bytes());
    key
}

pub fn user_ticket_prefix(user_id: &str) -> Vec<u8> {
    format!("{}{}:", USER_TICKET_INDEX, user_id).into_bytes()
}

pub fn user_ticket_key(user_id: &str, ticket_id: &str) -> Vec<u8> {
    let mut key = user_ticket_prefix(user_id);
    key.extend_from_slice(ticket_id.as_bytes());
    key
}

pub fn user_prefix() -> &'static [u8] {
    USER_PREFIX.as_bytes()
}

pub fn match_prefix() -> &'static [u8] {
    MATCH_PREFIX.as_bytes()
}

pub fn ticket_prefix() -> &'static [u8] {
    TICKET_PREFIX.as_bytes()
}

pub struct LedgerStorage {
    db: TransactionDB,
    lock_timeout_ms: i64,
}

impl LedgerStorage {
    pub fn open(config: &StorageConfig) -> LedgerResult<Self> {
        let path = Path::new(&config.data_directory);
        if config.clear_on_start && path.exists() {
            tracing::warn!(path = %config.data_directory, "Clearing ledger database on start");
            std::fs::remove_dir_all(path)?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let db: TransactionDB = TransactionDB::open(&opts, &txn_db_opts, path)?;
        tracing::info!(path = %config.data_directory, "Ledger database opened");

        Ok(Self {
            db,
            lock_timeout_ms: config.lock_timeout_ms,
        })
    }

    /// Start a pessimistic transaction with deadlock detection enabled
    pub fn begin(&self) -> LedgerTxn<'_> {
        let write_opts = WriteOptions::default();
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        txn_opts.set_deadlock_detect(true);
        self.db.transaction_opt(&write_opts, &txn_opts)
    }

    /// Committed read, no lock taken
    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> LedgerResult<Option<T>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All committed rows whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    /// Key suffixes (after `prefix`) of an index scan, decoded as UTF-8 ids
    pub fn scan_index_ids(&self, prefix: &[u8]) -> LedgerResult<Vec<String>> {
        let rows = self.scan_prefix(prefix)?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, _)| String::from_utf8(key[prefix.len()..].to_vec()).ok())
            .collect())
    }

    /// Decode every JSON record under `prefix`
    pub fn scan_json<T: DeserializeOwned>(&self, prefix: &[u8]) -> LedgerResult<Vec<T>> {
        self.scan_prefix(prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(Into::into))
            .collect()
    }
}

/// Read and exclusively lock a record until the transaction ends
pub fn lock_json<T: DeserializeOwned>(txn: &LedgerTxn<'_>, key: &[u8]) -> LedgerResult<Option<T>> {
    match txn.get_for_update(key, true)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(txn: &LedgerTxn<'_>, key: &[u8], value: &T) -> LedgerResult<()> {
    let bytes = serde_json::to_vec(value)?;
    txn.put(key, bytes)?;
    Ok(())
}

pub fn delete_key(txn: &LedgerTxn<'_>, key: &[u8]) -> LedgerResult<()> {
    txn.delete(key)?;
    Ok(())
}

/// Empty-valued marker row, used for secondary indexes
pub fn put_marker(txn: &LedgerTxn<'_>, key: &[u8]) -> LedgerResult<()> {
    txn.put(key, b"")?;
    Ok(())
}
