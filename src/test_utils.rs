//! Scripted in-memory chain for exercising the walker without a node.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use bitcoin::{hashes::Hash, Amount, BlockHash, Txid};
use parking_lot::Mutex;

use crate::{
    backend::ChainBackend, error::RpcError, BlockData, InputData, OutputData, TransactionData,
};

pub fn txid(n: u64) -> Txid {
    let mut bytes = [0x77; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    Txid::from_byte_array(bytes)
}

pub fn block_hash_at(height: u64) -> BlockHash {
    let mut bytes = [0xbb; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

pub fn coinbase(txid: Txid, address: Option<&str>, value: Amount) -> TransactionData {
    TransactionData {
        txid,
        inputs: vec![InputData {
            txid: None,
            vout: None,
        }],
        outputs: vec![OutputData {
            value,
            address: address.map(str::to_string),
        }],
    }
}

pub fn spend(txid: Txid, inputs: &[(Txid, u32)], outputs: &[(Option<&str>, Amount)]) -> TransactionData {
    TransactionData {
        txid,
        inputs: inputs
            .iter()
            .map(|(prev, vout)| InputData {
                txid: Some(*prev),
                vout: Some(*vout),
            })
            .collect(),
        outputs: outputs
            .iter()
            .map(|(address, value)| OutputData {
                value: *value,
                address: address.map(str::to_string),
            })
            .collect(),
    }
}

#[derive(Default)]
struct MockState {
    chain: Vec<BlockHash>,
    blocks: HashMap<BlockHash, BlockData>,
    txs: HashMap<Txid, TransactionData>,
    forgotten: HashSet<BlockHash>,
    stale: HashSet<BlockHash>,
    failures: VecDeque<RpcError>,
    tx_calls: HashMap<Txid, usize>,
    block_calls: HashMap<BlockHash, usize>,
    tx_delay: Option<Duration>,
}

impl MockState {
    fn take_failure(&mut self) -> Result<(), RpcError> {
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// [`ChainBackend`] over blocks pushed by the test.
///
/// Block `n` gets the hash [`block_hash_at`]`(n)`. Errors queued with
/// [`MockChain::fail_next`] are returned by the next calls of any method.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block on top of the current tip and returns its hash.
    pub fn push_block(&self, txs: Vec<TransactionData>) -> BlockHash {
        let mut state = self.state.lock();
        let height = state.chain.len() as u64;
        let blkhash = block_hash_at(height);

        if let Some(prev) = state.chain.last().copied() {
            if let Some(prev) = state.blocks.get_mut(&prev) {
                prev.next_blkhash = Some(blkhash);
            }
        }
        for tx in &txs {
            state.txs.insert(tx.txid, tx.clone());
        }
        state.blocks.insert(
            blkhash,
            BlockData {
                blkhash,
                height,
                confirmations: 1,
                next_blkhash: None,
                txs,
            },
        );
        state.chain.push(blkhash);

        blkhash
    }

    pub fn tip(&self) -> Option<BlockHash> {
        self.state.lock().chain.last().copied()
    }

    /// Block as the node would currently report it.
    pub fn block_data(&self, blkhash: &BlockHash) -> Option<BlockData> {
        let state = self.state.lock();
        let mut block = state.blocks.get(blkhash)?.clone();
        block.confirmations = if state.stale.contains(blkhash) {
            -1
        } else {
            state.chain.len() as i64 - block.height as i64
        };
        Some(block)
    }

    pub fn fail_next(&self, err: RpcError) {
        self.state.lock().failures.push_back(err);
    }

    pub fn set_transaction_delay(&self, delay: Duration) {
        self.state.lock().tx_delay = Some(delay);
    }

    /// The node no longer returns this block at all.
    pub fn forget_block(&self, blkhash: &BlockHash) {
        self.state.lock().forgotten.insert(*blkhash);
    }

    /// The block is still known but was reorganized off the active chain.
    pub fn mark_stale(&self, blkhash: &BlockHash) {
        self.state.lock().stale.insert(*blkhash);
    }

    pub fn transaction_calls(&self, txid: &Txid) -> usize {
        self.state.lock().tx_calls.get(txid).copied().unwrap_or(0)
    }

    pub fn block_calls(&self, blkhash: &BlockHash) -> usize {
        self.state.lock().block_calls.get(blkhash).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainBackend for MockChain {
    async fn best_block_hash(&self) -> Result<BlockHash, RpcError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.chain.last().copied().ok_or_else(|| RpcError::not_found("tip"))
    }

    async fn block(&self, blkhash: &BlockHash) -> Result<BlockData, RpcError> {
        {
            let mut state = self.state.lock();
            *state.block_calls.entry(*blkhash).or_default() += 1;
            state.take_failure()?;
            if state.forgotten.contains(blkhash) {
                return Err(RpcError::not_found(format!("block {blkhash}")));
            }
        }
        self.block_data(blkhash)
            .ok_or_else(|| RpcError::not_found(format!("block {blkhash}")))
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state
            .chain
            .get(height as usize)
            .copied()
            .ok_or_else(|| RpcError::Node {
                code: -8,
                message: "Block height out of range".to_string(),
            })
    }

    async fn transaction(&self, txid: &Txid) -> Result<TransactionData, RpcError> {
        let delay = {
            let mut state = self.state.lock();
            *state.tx_calls.entry(*txid).or_default() += 1;
            state.tx_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.take_failure()?;
        state
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("transaction {txid}")))
    }

    async fn block_count(&self) -> Result<u64, RpcError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        Ok(state.chain.len().saturating_sub(1) as u64)
    }
}
