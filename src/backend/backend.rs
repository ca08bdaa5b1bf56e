use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::error::RpcError;

use super::structs::{BlockData, TransactionData};

/// Read-only view of a full node's chain.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    async fn best_block_hash(&self) -> Result<BlockHash, RpcError>;

    /// Block with every transaction fully decoded.
    async fn block(&self, blkhash: &BlockHash) -> Result<BlockData, RpcError>;

    async fn block_hash(&self, height: u64) -> Result<BlockHash, RpcError>;

    async fn transaction(&self, txid: &Txid) -> Result<TransactionData, RpcError>;

    async fn block_count(&self) -> Result<u64, RpcError>;
}
