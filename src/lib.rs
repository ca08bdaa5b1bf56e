pub mod constants;
pub mod config;
mod db;
pub mod error;
mod backend;
mod cache;
mod processor;
mod updater;
mod watchlist;
mod walker;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bitcoin;

pub use backend::*;
pub use cache::TxCache;
pub use db::FileWriter;
pub use error::{Error, Result, RpcError};
pub use processor::{BalanceDeltas, TransactionProcessor};
pub use updater::{AddressLedger, CheckpointStore, FileStore, MemoryStore, Updater};
pub use walker::{Backoff, BlockWalker, StartPolicy, StopHandle, WalkerConfig, WalkerState};
pub use watchlist::{LedgerMode, Watchlist};
