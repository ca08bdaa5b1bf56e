use std::collections::BTreeMap;

use bitcoin::{Amount, BlockHash, SignedAmount};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    processor::to_signed,
};

use super::{AddressLedger, CheckpointStore, Updater};

/// Checkpoint and balances held in memory.
///
/// Also the on-disk document of [`super::FileStore`], hence the plain
/// satoshi integers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    checkpoint: Option<BlockHash>,
    balances: BTreeMap<String, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, address: &str, delta: i64) -> Result<()> {
        let balance = self.balances.entry(address.to_string()).or_insert(0);
        *balance = balance
            .checked_add(delta)
            .ok_or_else(|| Error::BalanceOverflow(address.to_string()))?;
        Ok(())
    }
}

impl CheckpointStore for MemoryStore {
    fn load(&self) -> Result<Option<BlockHash>> {
        Ok(self.checkpoint)
    }

    fn save(&mut self, blkhash: BlockHash) -> Result<()> {
        self.checkpoint = Some(blkhash);
        Ok(())
    }
}

impl AddressLedger for MemoryStore {
    fn credit(&mut self, address: &str, amount: Amount) -> Result<()> {
        let delta = to_signed(address, amount)?.to_sat();
        self.add(address, delta)
    }

    fn debit(&mut self, address: &str, amount: Amount) -> Result<()> {
        let delta = to_signed(address, amount)?.to_sat();
        self.add(address, -delta)
    }

    fn balance(&self, address: &str) -> SignedAmount {
        SignedAmount::from_sat(self.balances.get(address).copied().unwrap_or(0))
    }

    fn balances(&self) -> Vec<(String, SignedAmount)> {
        self.balances
            .iter()
            .map(|(address, sats)| (address.clone(), SignedAmount::from_sat(*sats)))
            .collect()
    }
}

impl Updater for MemoryStore {
    fn reset(&mut self) -> Result<()> {
        *self = Self::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;

    use super::*;
    use crate::processor::BalanceDeltas;

    #[test]
    fn balances_start_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.balance("nobody"), SignedAmount::ZERO);
        assert!(store.balances().is_empty());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn credit_then_debit() {
        let mut store = MemoryStore::new();
        store.credit("A", Amount::from_sat(5_000_000_000)).unwrap();
        store.debit("A", Amount::from_sat(5_000_000_000)).unwrap();
        store.debit("B", Amount::from_sat(1)).unwrap();

        assert_eq!(store.balance("A"), SignedAmount::ZERO);
        assert_eq!(store.balance("B"), SignedAmount::from_sat(-1));
        assert_eq!(store.balances().len(), 2);
    }

    #[test]
    fn commit_applies_deltas_and_checkpoint() {
        let mut store = MemoryStore::new();
        let blkhash = BlockHash::from_byte_array([7; 32]);

        let mut deltas = BalanceDeltas::default();
        deltas.credit("A", Amount::from_sat(300)).unwrap();
        deltas.debit("B", Amount::from_sat(100)).unwrap();
        store.commit_block(blkhash, &deltas).unwrap();

        assert_eq!(store.balance("A").to_sat(), 300);
        assert_eq!(store.balance("B").to_sat(), -100);
        assert_eq!(store.load().unwrap(), Some(blkhash));
    }

    #[test]
    fn overflowing_commit_changes_nothing() {
        let mut store = MemoryStore::new();
        store.credit("A", Amount::from_sat(i64::MAX as u64)).unwrap();

        let mut deltas = BalanceDeltas::default();
        deltas.credit("B", Amount::from_sat(10)).unwrap();
        deltas.credit("A", Amount::from_sat(1)).unwrap();

        let err = store.commit_block(BlockHash::from_byte_array([1; 32]), &deltas).unwrap_err();
        assert!(matches!(err, Error::BalanceOverflow(_)));
        assert_eq!(store.balance("B"), SignedAmount::ZERO);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn unrepresentable_debit_changes_nothing() {
        let mut store = MemoryStore::new();

        let mut deltas = BalanceDeltas::default();
        deltas.credit("A", Amount::from_sat(10)).unwrap();
        deltas.debit("B", Amount::from_sat(i64::MAX as u64)).unwrap();
        deltas.debit("B", Amount::from_sat(1)).unwrap();
        assert_eq!(deltas.get("B").to_sat(), i64::MIN);

        let err = store.commit_block(BlockHash::from_byte_array([1; 32]), &deltas).unwrap_err();
        assert!(matches!(err, Error::BalanceOverflow(_)));
        assert_eq!(store.balance("A"), SignedAmount::ZERO);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn reset_clears_ledger_and_checkpoint() {
        let mut store = MemoryStore::new();
        let mut deltas = BalanceDeltas::default();
        deltas.credit("A", Amount::from_sat(300)).unwrap();
        store.commit_block(BlockHash::from_byte_array([7; 32]), &deltas).unwrap();

        store.reset().unwrap();

        assert_eq!(store, MemoryStore::new());
    }
}
