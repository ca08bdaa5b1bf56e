use bitcoin::{Amount, BlockHash, SignedAmount};

use crate::{
    error::{Error, Result},
    processor::BalanceDeltas,
};

/// The single "last fully processed block" record.
pub trait CheckpointStore {
    /// `None` means nothing has been processed yet.
    fn load(&self) -> Result<Option<BlockHash>>;

    /// Overwrites the stored checkpoint.
    fn save(&mut self, blkhash: BlockHash) -> Result<()>;
}

pub trait AddressLedger {
    fn credit(&mut self, address: &str, amount: Amount) -> Result<()>;

    fn debit(&mut self, address: &str, amount: Amount) -> Result<()>;

    /// Zero for addresses never seen.
    fn balance(&self, address: &str) -> SignedAmount;

    fn balances(&self) -> Vec<(String, SignedAmount)>;
}

/// Storage the walker commits processed blocks to.
pub trait Updater: CheckpointStore + AddressLedger + Send + Sync {
    /// Applies one block's deltas and advances the checkpoint to `blkhash`.
    ///
    /// Implementations persist both in one step; the default applies the
    /// deltas to the ledger and then saves, which is only durable if `save`
    /// is what persists the ledger too. Overflows are detected before
    /// anything is applied.
    fn commit_block(&mut self, blkhash: BlockHash, deltas: &BalanceDeltas) -> Result<()> {
        for (address, delta) in deltas.iter() {
            let overflow = || Error::BalanceOverflow(address.to_string());
            // the magnitude is applied as an unsigned amount below
            i64::try_from(delta.to_sat().unsigned_abs()).map_err(|_| overflow())?;
            self.balance(address).checked_add(delta).ok_or_else(overflow)?;
        }

        for (address, delta) in deltas.iter() {
            let amount = Amount::from_sat(delta.to_sat().unsigned_abs());
            if delta.to_sat() < 0 {
                self.debit(address, amount)?;
            } else {
                self.credit(address, amount)?;
            }
        }

        self.save(blkhash)
    }

    /// Drops every balance and the checkpoint in one step.
    fn reset(&mut self) -> Result<()>;
}
