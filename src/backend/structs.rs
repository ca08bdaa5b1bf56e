use bitcoin::{Amount, BlockHash, Txid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub blkhash: BlockHash,
    pub height: u64,
    /// Negative when the block is no longer part of the active chain.
    pub confirmations: i64,
    pub next_blkhash: Option<BlockHash>,
    pub txs: Vec<TransactionData>,
}

impl BlockData {
    pub fn is_stale(&self) -> bool {
        self.confirmations < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionData {
    pub txid: Txid,
    pub inputs: Vec<InputData>,
    pub outputs: Vec<OutputData>,
}

/// Reference to a previous output. Both fields are absent on a coinbase input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputData {
    pub txid: Option<Txid>,
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputData {
    pub value: Amount,
    pub address: Option<String>,
}
