use bitcoin::{BlockHash, Txid};
use thiserror::Error;

/// Bitcoin Core code for "Loading block index" and friends.
const RPC_IN_WARMUP: i64 = -28;
/// Bitcoin Core code returned for unknown blocks and transactions.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// Failure of a single call to the node.
///
/// Only [`RpcError::Transient`] (and a node that is still warming up) is worth
/// retrying. Everything else reproduces on retry and has to be surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Node { code, .. } => *code == RPC_IN_WARMUP,
            Self::Protocol(_) => false,
        }
    }

    /// The node does not know the requested block or transaction.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Node { code, .. } if *code == RPC_INVALID_ADDRESS_OR_KEY)
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::Node {
            code: RPC_INVALID_ADDRESS_OR_KEY,
            message: format!("{what} not found"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("malformed transaction {txid}: {reason}")]
    MalformedTransaction { txid: Txid, reason: String },

    #[error("checkpoint {0} is not on the node's active chain")]
    CheckpointCorruption(BlockHash),

    #[error("block {0} is no longer on the active chain")]
    ChainReorganized(BlockHash),

    #[error("balance of {0} overflows")]
    BalanceOverflow(String),

    #[error("walker interrupted")]
    Interrupted,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
