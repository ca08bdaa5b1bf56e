//! Sequential block walker.
//!
//! Drives resume, fetch, process, commit, wait. Blocks are handled strictly
//! one at a time in chain order and every block is committed together with
//! its checkpoint, so a restart resumes exactly after the last committed
//! block.

mod backoff;

use std::{future::Future, sync::Arc, time::Duration};

use bitcoin::{BlockHash, SignedAmount};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    backend::ChainBackend,
    cache::TxCache,
    constants::{DEFAULT_LOOKUP_CONCURRENCY, DEFAULT_POLL_INTERVAL, DEFAULT_PROGRESS_INTERVAL},
    error::{Error, Result},
    processor::{BalanceDeltas, TransactionProcessor},
    updater::Updater,
    watchlist::LedgerMode,
};

pub use backoff::Backoff;

/// Where to begin when there is no checkpoint yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPolicy {
    /// Backfill from the genesis block.
    #[default]
    Genesis,
    /// Only follow blocks from the current best block onwards.
    Tip,
}

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub start_policy: StartPolicy,
    pub ledger_mode: LedgerMode,
    pub poll_interval: Duration,
    pub backoff: Backoff,
    pub lookup_concurrency: usize,
    pub progress_interval: u64,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            start_policy: StartPolicy::default(),
            ledger_mode: LedgerMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: Backoff::default(),
            lookup_concurrency: DEFAULT_LOOKUP_CONCURRENCY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkerState {
    Resuming,
    /// `tip` is fully processed and has no successor yet.
    CaughtUpWait { tip: BlockHash },
    Processing { cursor: BlockHash },
    /// Deltas of `blkhash` are computed but not committed.
    Advancing {
        blkhash: BlockHash,
        height: u64,
        next: Option<BlockHash>,
        deltas: BalanceDeltas,
    },
    Terminated,
}

/// Requests a cooperative stop of a [`BlockWalker`].
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

pub struct BlockWalker<B, S> {
    backend: Arc<B>,
    cache: TxCache<B>,
    store: Arc<RwLock<S>>,
    config: WalkerConfig,
    state: WalkerState,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    processed: u64,
}

impl<B: ChainBackend, S: Updater + 'static> BlockWalker<B, S> {
    pub fn new(backend: Arc<B>, cache: TxCache<B>, store: Arc<RwLock<S>>, config: WalkerConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            backend,
            cache,
            store,
            config,
            state: WalkerState::Resuming,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            processed: 0,
        }
    }

    pub fn state(&self) -> &WalkerState {
        &self.state
    }

    /// Shared handle on the ledger, usable while the walker runs.
    pub fn store(&self) -> Arc<RwLock<S>> {
        self.store.clone()
    }

    pub fn cache(&self) -> &TxCache<B> {
        &self.cache
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_tx.clone())
    }

    pub fn balance(&self, address: &str) -> SignedAmount {
        self.store.read().balance(address)
    }

    /// Blocks committed since this walker was created.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Walks until stopped or a fatal error.
    ///
    /// A stop request is not an error.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if self.state == WalkerState::Terminated {
                return Ok(());
            }
            match self.step().await {
                Ok(()) => {}
                Err(Error::Interrupted) => {
                    info!("walker stopped after {} blocks", self.processed);
                    return Ok(());
                }
                Err(err) => {
                    error!("walker terminated: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Performs one state transition. Any error leaves the walker terminated.
    pub async fn step(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, WalkerState::Terminated);
        self.state = match state {
            WalkerState::Resuming => self.resume().await?,
            WalkerState::Processing { cursor } => self.process(cursor).await?,
            WalkerState::Advancing {
                blkhash,
                height,
                next,
                deltas,
            } => self.advance(blkhash, height, next, deltas).await?,
            WalkerState::CaughtUpWait { tip } => self.wait_for_block(tip).await?,
            WalkerState::Terminated => WalkerState::Terminated,
        };
        Ok(())
    }

    async fn resume(&self) -> Result<WalkerState> {
        let checkpoint = self.store.read().load()?;
        let Some(checkpoint) = checkpoint else {
            info!("no checkpoint, starting from {:?}", self.config.start_policy);
            return self.start_point().await;
        };

        match self.retry("getblock", || self.backend.block(&checkpoint)).await {
            Ok(block) if block.is_stale() => self.recover(checkpoint).await,
            Ok(block) => Ok(match block.next_blkhash {
                Some(next) => {
                    info!("resuming after block {} at height {}", checkpoint, block.height);
                    WalkerState::Processing { cursor: next }
                }
                None => {
                    info!("checkpoint {} is the chain tip", checkpoint);
                    WalkerState::CaughtUpWait { tip: checkpoint }
                }
            }),
            Err(Error::Rpc(e)) if e.is_not_found() => self.recover(checkpoint).await,
            Err(e) => Err(e),
        }
    }

    /// The ledger only means something relative to its checkpoint, so both
    /// are dropped before walking again from the start policy.
    async fn recover(&self, checkpoint: BlockHash) -> Result<WalkerState> {
        let err = Error::CheckpointCorruption(checkpoint);
        error!(
            "{}, discarding the ledger and restarting from {:?}",
            err, self.config.start_policy
        );
        self.with_store(|store| store.reset()).await?;
        self.start_point().await
    }

    async fn start_point(&self) -> Result<WalkerState> {
        let cursor = match self.config.start_policy {
            StartPolicy::Genesis => self.retry("getblockhash", || self.backend.block_hash(0)).await?,
            StartPolicy::Tip => {
                self.retry("getbestblockhash", || self.backend.best_block_hash())
                    .await?
            }
        };
        Ok(WalkerState::Processing { cursor })
    }

    async fn process(&self, cursor: BlockHash) -> Result<WalkerState> {
        self.check_stop()?;

        let block = self.retry("getblock", || self.backend.block(&cursor)).await?;
        let processor = TransactionProcessor::new(&self.cache, &self.config.ledger_mode);
        let concurrency = self.config.lookup_concurrency;
        let deltas = self
            .retry("input lookup", || processor.process_block(&block, concurrency))
            .await?;

        debug!(
            "block {} at height {}: {} txs, {} balance changes",
            block.blkhash,
            block.height,
            block.txs.len(),
            deltas.len()
        );

        Ok(WalkerState::Advancing {
            blkhash: block.blkhash,
            height: block.height,
            next: block.next_blkhash,
            deltas,
        })
    }

    async fn advance(
        &mut self,
        blkhash: BlockHash,
        height: u64,
        next: Option<BlockHash>,
        deltas: BalanceDeltas,
    ) -> Result<WalkerState> {
        let committed = self
            .with_store(move |store| {
                if store.load()? == Some(blkhash) {
                    return Ok(false);
                }
                store.commit_block(blkhash, &deltas)?;
                Ok(true)
            })
            .await?;
        if !committed {
            warn!("block {} is already checkpointed, not applying it again", blkhash);
        }

        self.processed += 1;
        if self.config.progress_interval > 0 && self.processed % self.config.progress_interval == 0 {
            self.log_progress(blkhash, height).await;
        }

        Ok(match next {
            Some(cursor) => WalkerState::Processing { cursor },
            None => {
                info!("caught up at block {} (height {})", blkhash, height);
                WalkerState::CaughtUpWait { tip: blkhash }
            }
        })
    }

    async fn wait_for_block(&self, tip: BlockHash) -> Result<WalkerState> {
        loop {
            self.check_stop()?;
            let best = self
                .retry("getbestblockhash", || self.backend.best_block_hash())
                .await?;
            if best != tip {
                debug!("best block moved from {} to {}", tip, best);
                break;
            }
            self.pause(self.config.poll_interval).await?;
        }

        let block = self.retry("getblock", || self.backend.block(&tip)).await?;
        if block.is_stale() {
            return Err(Error::ChainReorganized(tip));
        }
        match block.next_blkhash {
            Some(next) => {
                info!("new block {} at height {}", next, block.height + 1);
                Ok(WalkerState::Processing { cursor: next })
            }
            None => {
                self.pause(self.config.poll_interval).await?;
                Ok(WalkerState::CaughtUpWait { tip })
            }
        }
    }

    async fn log_progress(&self, blkhash: BlockHash, height: u64) {
        match self.backend.block_count().await {
            Ok(count) => info!(
                "finished block {} at height {}/{} ({} blocks this run)",
                blkhash, height, count, self.processed
            ),
            Err(_) => info!(
                "finished block {} at height {} ({} blocks this run)",
                blkhash, height, self.processed
            ),
        }
    }

    /// Runs a store mutation on the blocking pool, since committing syncs
    /// the state file.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&mut store.write()))
            .await
            .map_err(|e| Error::Store(anyhow::anyhow!("store task failed: {e}")))?
    }

    /// Retries `op` on transient failures, sleeping with backoff in between.
    async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        let mut failures = 0;
        loop {
            match op().await.map_err(Into::into) {
                Ok(value) => return Ok(value),
                Err(Error::Rpc(e)) if e.is_transient() => {
                    failures += 1;
                    if self.config.backoff.exhausted(failures) {
                        error!("{} failed {} times, giving up: {}", what, failures, e);
                        return Err(Error::Rpc(e));
                    }
                    let delay = self.config.backoff.delay(failures);
                    warn!("{} failed: {}, retrying in {:?}", what, e, delay);
                    self.pause(delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_stop(&self) -> Result<()> {
        if *self.stop_rx.borrow() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Sleeps for `delay` unless a stop is requested first.
    async fn pause(&self, delay: Duration) -> Result<()> {
        self.check_stop()?;
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = stop_requested(self.stop_rx.clone()) => Err(Error::Interrupted),
        }
    }
}

async fn stop_requested(mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return futures::future::pending().await;
        }
    }
}
