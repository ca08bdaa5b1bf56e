mod backend;
#[cfg(feature = "bitcoind-backend")]
mod bitcoind;
mod structs;

pub use backend::ChainBackend;
pub use structs::*;

#[cfg(feature = "bitcoind-backend")]
pub use bitcoind::{BitcoindBackend, BitcoindClient};
