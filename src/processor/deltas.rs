use std::collections::{btree_map, BTreeMap};

use bitcoin::{Amount, SignedAmount};

use crate::error::{Error, Result};

/// Net signed balance change per address, in satoshis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceDeltas {
    deltas: BTreeMap<String, SignedAmount>,
}

impl BalanceDeltas {
    pub fn credit(&mut self, address: &str, amount: Amount) -> Result<()> {
        self.add(address, to_signed(address, amount)?)
    }

    pub fn debit(&mut self, address: &str, amount: Amount) -> Result<()> {
        let delta = to_signed(address, amount)?.to_sat();
        self.add(address, SignedAmount::from_sat(-delta))
    }

    pub fn merge(&mut self, other: BalanceDeltas) -> Result<()> {
        for (address, delta) in other.deltas {
            self.add(&address, delta)?;
        }
        Ok(())
    }

    pub fn get(&self, address: &str) -> SignedAmount {
        self.deltas.get(address).copied().unwrap_or(SignedAmount::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SignedAmount)> {
        self.deltas.iter().map(|(address, delta)| (address.as_str(), *delta))
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    fn add(&mut self, address: &str, delta: SignedAmount) -> Result<()> {
        match self.deltas.entry(address.to_string()) {
            btree_map::Entry::Occupied(mut entry) => {
                let sum = entry
                    .get()
                    .checked_add(delta)
                    .ok_or_else(|| Error::BalanceOverflow(address.to_string()))?;
                entry.insert(sum);
            }
            btree_map::Entry::Vacant(entry) => {
                entry.insert(delta);
            }
        }
        Ok(())
    }
}

pub(crate) fn to_signed(address: &str, amount: Amount) -> Result<SignedAmount> {
    i64::try_from(amount.to_sat())
        .map(SignedAmount::from_sat)
        .map_err(|_| Error::BalanceOverflow(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nets_credits_and_debits() {
        let mut deltas = BalanceDeltas::default();
        deltas.credit("a", Amount::from_sat(700)).unwrap();
        deltas.debit("a", Amount::from_sat(200)).unwrap();
        deltas.debit("b", Amount::from_sat(50)).unwrap();

        assert_eq!(deltas.get("a"), SignedAmount::from_sat(500));
        assert_eq!(deltas.get("b"), SignedAmount::from_sat(-50));
        assert_eq!(deltas.get("c"), SignedAmount::ZERO);
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut x = BalanceDeltas::default();
        x.credit("a", Amount::from_sat(10)).unwrap();
        let mut y = BalanceDeltas::default();
        y.debit("a", Amount::from_sat(3)).unwrap();
        y.credit("b", Amount::from_sat(1)).unwrap();

        let mut xy = x.clone();
        xy.merge(y.clone()).unwrap();
        let mut yx = y;
        yx.merge(x).unwrap();
        assert_eq!(xy, yx);
        assert_eq!(xy.get("a"), SignedAmount::from_sat(7));
    }

    #[test]
    fn overflow_is_reported() {
        let mut deltas = BalanceDeltas::default();
        deltas.credit("a", Amount::from_sat(i64::MAX as u64)).unwrap();
        assert!(matches!(
            deltas.credit("a", Amount::from_sat(1)),
            Err(Error::BalanceOverflow(_))
        ));
        assert!(deltas.credit("b", Amount::from_sat(u64::MAX)).is_err());
    }
}
