//! Wagerbook - Wagering Ledger and Settlement Engine
//!
//! Coin balances, multi-leg wager tickets with pari-mutuel odds, and
//! outcome-driven settlement on top of a transactional RocksDB store.
//! Monetary consistency under concurrent placement and repeated settlement
//! triggers comes from row locks inside pessimistic transactions.

pub mod api;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod storage;

pub use config::{ConfigLoader, WagerConfig};
pub use errors::{LedgerError, LedgerResult};
pub use ledger::Ledger;
