//! Turns transactions into balance deltas.
//!
//! Nothing here touches the ledger: a block's deltas are computed completely
//! and merged before the walker commits them together with the checkpoint.

mod deltas;

use bitcoin::Amount;
use futures::{stream, StreamExt, TryStreamExt};
use log::{info, warn};

use crate::{
    backend::ChainBackend,
    cache::TxCache,
    error::{Error, Result},
    watchlist::LedgerMode,
    BlockData, InputData, TransactionData,
};

pub use deltas::BalanceDeltas;
pub(crate) use deltas::to_signed;

pub struct TransactionProcessor<'a, B> {
    cache: &'a TxCache<B>,
    mode: &'a LedgerMode,
}

impl<'a, B: ChainBackend> TransactionProcessor<'a, B> {
    pub fn new(cache: &'a TxCache<B>, mode: &'a LedgerMode) -> Self {
        Self { cache, mode }
    }

    /// Deltas of every transaction in `block`, coinbase first.
    ///
    /// Input lookups of up to `concurrency` transactions are in flight at once.
    pub async fn process_block(&self, block: &BlockData, concurrency: usize) -> Result<BalanceDeltas> {
        stream::iter(block.txs.iter().enumerate())
            .map(|(position, tx)| self.process_transaction(tx, position))
            .buffered(concurrency.max(1))
            .try_fold(BalanceDeltas::default(), |mut total, deltas| async move {
                total.merge(deltas)?;
                Ok(total)
            })
            .await
    }

    pub async fn process_transaction(&self, tx: &TransactionData, position: usize) -> Result<BalanceDeltas> {
        let mut deltas = BalanceDeltas::default();

        if position == 0 {
            self.process_coinbase(tx, &mut deltas)?;
            return Ok(deltas);
        }

        for input in &tx.inputs {
            self.process_input(tx, input, &mut deltas).await?;
        }
        self.process_outputs(tx, &mut deltas)?;

        Ok(deltas)
    }

    /// Only output 0 of the coinbase is credited.
    fn process_coinbase(&self, tx: &TransactionData, deltas: &mut BalanceDeltas) -> Result<()> {
        let Some(output) = tx.outputs.first() else {
            warn!("coinbase {} has no outputs", tx.txid);
            return Ok(());
        };
        match output.address.as_deref() {
            Some(address) => self.credit(tx, address, output.value, deltas),
            None => {
                warn!("coinbase {} pays to a script without an address, skipping", tx.txid);
                Ok(())
            }
        }
    }

    async fn process_input(&self, tx: &TransactionData, input: &InputData, deltas: &mut BalanceDeltas) -> Result<()> {
        let (Some(prev_txid), Some(vout)) = (input.txid, input.vout) else {
            let err = Error::MalformedTransaction {
                txid: tx.txid,
                reason: "input without a previous output".to_string(),
            };
            warn!("{}, skipping input", err);
            return Ok(());
        };

        let prev = self.cache.resolve(&prev_txid).await?;
        let Some(spent) = prev.outputs.get(vout as usize) else {
            let err = Error::MalformedTransaction {
                txid: tx.txid,
                reason: format!("spends {}:{} which does not exist", prev_txid, vout),
            };
            warn!("{}, skipping input", err);
            return Ok(());
        };

        match spent.address.as_deref() {
            Some(address) if self.mode.tracks(address) => deltas.debit(address, spent.value),
            _ => Ok(()),
        }
    }

    fn process_outputs(&self, tx: &TransactionData, deltas: &mut BalanceDeltas) -> Result<()> {
        for output in &tx.outputs {
            if let Some(address) = output.address.as_deref() {
                self.credit(tx, address, output.value, deltas)?;
            }
        }
        Ok(())
    }

    fn credit(&self, tx: &TransactionData, address: &str, value: Amount, deltas: &mut BalanceDeltas) -> Result<()> {
        if !self.mode.tracks(address) {
            return Ok(());
        }
        if self.mode.is_watchlist() {
            info!("found deposit of {} to {} in {}", value, address, tx.txid);
        }
        deltas.credit(address, value)
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, sync::Arc};

    use bitcoin::{Amount, SignedAmount};

    use super::*;
    use crate::{
        error::RpcError,
        test_utils::{coinbase, spend, txid, MockChain},
    };

    const FIFTY_BTC: Amount = Amount::from_sat(5_000_000_000);

    fn setup() -> (Arc<MockChain>, TxCache<MockChain>) {
        let chain = Arc::new(MockChain::new());
        let cache = TxCache::new(chain.clone(), NonZeroUsize::new(1024).unwrap());
        (chain, cache)
    }

    #[tokio::test]
    async fn genesis_coinbase_credits_output_zero() {
        let (chain, cache) = setup();
        let genesis = chain.push_block(vec![coinbase(txid(0), Some("A"), FIFTY_BTC)]);
        let block = chain.block_data(&genesis).unwrap();

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_block(&block, 4).await.unwrap();

        assert_eq!(deltas.get("A").to_sat(), 5_000_000_000);
        assert_eq!(deltas.len(), 1);
    }

    #[tokio::test]
    async fn coinbase_without_address_contributes_nothing() {
        let (chain, cache) = setup();
        let hash = chain.push_block(vec![coinbase(txid(0), None, FIFTY_BTC)]);
        let block = chain.block_data(&hash).unwrap();

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_block(&block, 4).await.unwrap();
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn coinbase_ignores_outputs_after_the_first() {
        let (_chain, cache) = setup();
        let mut tx = coinbase(txid(0), Some("A"), FIFTY_BTC);
        tx.outputs.push(crate::OutputData {
            value: Amount::from_sat(1),
            address: Some("B".to_string()),
        });

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_transaction(&tx, 0).await.unwrap();
        assert_eq!(deltas.get("B"), SignedAmount::ZERO);
        assert_eq!(deltas.get("A"), SignedAmount::from_sat(5_000_000_000));
    }

    #[tokio::test]
    async fn spend_moves_value_between_addresses() {
        let (chain, cache) = setup();
        chain.push_block(vec![coinbase(txid(0), Some("A"), FIFTY_BTC)]);
        let hash = chain.push_block(vec![
            coinbase(txid(1), Some("miner"), FIFTY_BTC),
            spend(txid(2), &[(txid(0), 0)], &[(Some("B"), FIFTY_BTC)]),
        ]);
        let block = chain.block_data(&hash).unwrap();

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_block(&block, 4).await.unwrap();

        assert_eq!(deltas.get("A").to_sat(), -5_000_000_000);
        assert_eq!(deltas.get("B").to_sat(), 5_000_000_000);
        assert_eq!(deltas.get("miner").to_sat(), 5_000_000_000);
    }

    #[tokio::test]
    async fn fee_is_not_credited_anywhere() {
        let (chain, cache) = setup();
        chain.push_block(vec![coinbase(txid(0), Some("A"), FIFTY_BTC)]);
        let tx = spend(
            txid(2),
            &[(txid(0), 0)],
            &[(Some("B"), Amount::from_sat(4_000_000_000)), (Some("A"), Amount::from_sat(999_990_000))],
        );

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_transaction(&tx, 1).await.unwrap();

        let net: i64 = deltas.iter().map(|(_, d)| d.to_sat()).sum();
        assert_eq!(net, -10_000);
    }

    #[tokio::test]
    async fn addressless_outputs_are_skipped() {
        let (chain, cache) = setup();
        // the spent output pays to a bare script
        chain.push_block(vec![coinbase(txid(0), None, FIFTY_BTC)]);
        let tx = spend(txid(2), &[(txid(0), 0)], &[(None, Amount::from_sat(10)), (Some("B"), Amount::from_sat(20))]);

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_transaction(&tx, 1).await.unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas.get("B").to_sat(), 20);
    }

    #[tokio::test]
    async fn malformed_inputs_are_skipped() {
        let (chain, cache) = setup();
        chain.push_block(vec![coinbase(txid(0), Some("A"), FIFTY_BTC)]);
        let mut tx = spend(txid(2), &[(txid(0), 7)], &[(Some("B"), Amount::from_sat(20))]);
        tx.inputs.push(InputData { txid: None, vout: None });

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_transaction(&tx, 1).await.unwrap();
        assert_eq!(deltas.get("A"), SignedAmount::ZERO);
        assert_eq!(deltas.get("B").to_sat(), 20);
    }

    #[tokio::test]
    async fn watchlist_ignores_other_addresses() {
        let (chain, cache) = setup();
        chain.push_block(vec![coinbase(txid(0), Some("A"), FIFTY_BTC)]);
        let hash = chain.push_block(vec![
            coinbase(txid(1), Some("miner"), FIFTY_BTC),
            spend(txid(2), &[(txid(0), 0)], &[(Some("B"), FIFTY_BTC)]),
        ]);
        let block = chain.block_data(&hash).unwrap();

        let mode = LedgerMode::Watchlist(["A"].into_iter().collect());
        let deltas = TransactionProcessor::new(&cache, &mode).process_block(&block, 1).await.unwrap();

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas.get("A").to_sat(), -5_000_000_000);
    }

    #[tokio::test]
    async fn inputs_resolve_through_the_cache() {
        let (chain, cache) = setup();
        let many = TransactionData {
            txid: txid(10),
            inputs: vec![],
            outputs: (0..5)
                .map(|_| crate::OutputData {
                    value: Amount::from_sat(100),
                    address: Some("A".to_string()),
                })
                .collect(),
        };
        chain.push_block(vec![coinbase(txid(11), None, FIFTY_BTC), many]);

        let hash = chain.push_block(vec![
            coinbase(txid(12), None, FIFTY_BTC),
            spend(txid(13), &[(txid(10), 0), (txid(10), 1)], &[(Some("B"), Amount::from_sat(200))]),
            spend(txid(14), &[(txid(10), 2), (txid(10), 3)], &[(Some("B"), Amount::from_sat(200))]),
        ]);
        let block = chain.block_data(&hash).unwrap();

        let mode = LedgerMode::Full;
        let deltas = TransactionProcessor::new(&cache, &mode).process_block(&block, 8).await.unwrap();

        assert_eq!(deltas.get("A").to_sat(), -400);
        assert_eq!(deltas.get("B").to_sat(), 400);
        assert_eq!(chain.transaction_calls(&txid(10)), 1);
    }

    #[tokio::test]
    async fn lookup_failures_fail_the_block() {
        let (chain, cache) = setup();
        chain.push_block(vec![coinbase(txid(0), Some("A"), FIFTY_BTC)]);
        let hash = chain.push_block(vec![
            coinbase(txid(1), None, FIFTY_BTC),
            spend(txid(2), &[(txid(0), 0)], &[(Some("B"), FIFTY_BTC)]),
        ]);
        let block = chain.block_data(&hash).unwrap();
        chain.fail_next(RpcError::Transient("timed out".to_string()));

        let mode = LedgerMode::Full;
        let err = TransactionProcessor::new(&cache, &mode).process_block(&block, 4).await.unwrap_err();
        assert!(matches!(err, Error::Rpc(ref e) if e.is_transient()));
    }
}
