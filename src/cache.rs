//! Bounded memoization of `getrawtransaction`.
//!
//! Inputs mostly point at recent outputs, so a large LRU over fetched
//! transactions saves the bulk of the lookups while walking the chain. The
//! cache holds no authoritative state: dropping any entry only costs a refetch.

use std::{num::NonZeroUsize, sync::Arc};

use bitcoin::Txid;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::{backend::ChainBackend, constants::DEFAULT_TX_CACHE_CAPACITY, error::RpcError, TransactionData};

/// A slot is inserted before the fetch starts so that concurrent lookups of
/// the same txid wait on one upstream request.
type Slot = Arc<OnceCell<Arc<TransactionData>>>;

pub struct TxCache<B> {
    backend: Arc<B>,
    entries: Mutex<LruCache<Txid, Slot>>,
}

impl<B: ChainBackend> TxCache<B> {
    pub fn new(backend: Arc<B>, capacity: NonZeroUsize) -> Self {
        Self {
            backend,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_default_capacity(backend: Arc<B>) -> Self {
        Self::new(backend, DEFAULT_TX_CACHE_CAPACITY)
    }

    pub async fn resolve(&self, txid: &Txid) -> Result<Arc<TransactionData>, RpcError> {
        let slot = {
            let mut entries = self.entries.lock();
            match entries.get(txid) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Slot::default();
                    entries.put(*txid, slot.clone());
                    slot
                }
            }
        };

        let backend = &self.backend;
        let fetched = slot
            .get_or_try_init(|| async move {
                debug!("tx cache miss for {}", txid);
                backend.transaction(txid).await.map(Arc::new)
            })
            .await;

        match fetched {
            Ok(tx) => Ok(tx.clone()),
            Err(e) => {
                // don't leave an empty slot behind for a failed fetch
                let mut entries = self.entries.lock();
                if entries.peek(txid).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    entries.pop(txid);
                }
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.entries.lock().cap()
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.lock().contains(txid)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
