use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use url::Url;

use anyhow::Result;

use crate::{
    backend::{bitcoind::BitcoindClient, ChainBackend},
    error::RpcError,
    BlockData, TransactionData,
};

#[derive(Debug)]
pub struct BitcoindBackend {
    client: BitcoindClient,
}

impl BitcoindBackend {
    pub fn new(url: Url, username: String, password: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: BitcoindClient::new(url, username, password, timeout)?,
        })
    }
}

#[async_trait]
impl ChainBackend for BitcoindBackend {
    async fn best_block_hash(&self) -> Result<BlockHash, RpcError> {
        self.client.get_best_block_hash().await
    }

    async fn block(&self, blkhash: &BlockHash) -> Result<BlockData, RpcError> {
        self.client.get_block(blkhash).await.map(Into::into)
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.client.get_block_hash(height).await
    }

    /// Requires the node to run with `-txindex` for transactions outside the mempool.
    async fn transaction(&self, txid: &Txid) -> Result<TransactionData, RpcError> {
        self.client.get_raw_transaction(txid).await.map(Into::into)
    }

    async fn block_count(&self) -> Result<u64, RpcError> {
        self.client.get_block_count().await
    }
}
