use std::path::PathBuf;

use bitcoin::{Amount, BlockHash, SignedAmount};
use log::{debug, info};

use crate::{db::FileWriter, error::Result, processor::BalanceDeltas};

use super::{AddressLedger, CheckpointStore, MemoryStore, Updater};

/// Checkpoint and balances kept in one JSON file.
///
/// Ledger changes only reach the disk together with a checkpoint, and the
/// file is swapped atomically, so after a crash the file reflects exactly the
/// blocks up to its checkpoint.
#[derive(Debug)]
pub struct FileStore {
    writer: FileWriter,
    state: MemoryStore,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let writer = FileWriter::new(path);
        let state = if writer.exists() {
            let state: MemoryStore = writer.read_from_file()?;
            info!(
                "loaded state from {}: checkpoint {:?}, {} addresses",
                writer.path().display(),
                state.load()?,
                state.balances().len()
            );
            state
        } else {
            info!("no state at {}, starting empty", writer.path().display());
            MemoryStore::new()
        };

        Ok(Self { writer, state })
    }

    fn persist(&self) -> Result<()> {
        self.writer.write_to_file(&self.state)?;
        debug!("state written to {}", self.writer.path().display());
        Ok(())
    }
}

impl CheckpointStore for FileStore {
    fn load(&self) -> Result<Option<BlockHash>> {
        self.state.load()
    }

    fn save(&mut self, blkhash: BlockHash) -> Result<()> {
        self.state.save(blkhash)?;
        self.persist()
    }
}

impl AddressLedger for FileStore {
    fn credit(&mut self, address: &str, amount: Amount) -> Result<()> {
        self.state.credit(address, amount)
    }

    fn debit(&mut self, address: &str, amount: Amount) -> Result<()> {
        self.state.debit(address, amount)
    }

    fn balance(&self, address: &str) -> SignedAmount {
        self.state.balance(address)
    }

    fn balances(&self) -> Vec<(String, SignedAmount)> {
        self.state.balances()
    }
}

impl Updater for FileStore {
    fn commit_block(&mut self, blkhash: BlockHash, deltas: &BalanceDeltas) -> Result<()> {
        // stage on a copy so a failed write leaves memory matching the disk
        let mut staged = self.state.clone();
        staged.commit_block(blkhash, deltas)?;
        self.writer.write_to_file(&staged)?;
        self.state = staged;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let empty = MemoryStore::new();
        self.writer.write_to_file(&empty)?;
        self.state = empty;
        info!("state at {} reset", self.writer.path().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let blkhash = BlockHash::from_byte_array([3; 32]);

        {
            let mut store = FileStore::open(&path).unwrap();
            assert_eq!(store.load().unwrap(), None);

            let mut deltas = BalanceDeltas::default();
            deltas.credit("A", Amount::from_sat(5_000_000_000)).unwrap();
            store.commit_block(blkhash, &deltas).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), Some(blkhash));
        assert_eq!(store.balance("A").to_sat(), 5_000_000_000);
    }

    #[test]
    fn unsaved_ledger_changes_are_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let mut store = FileStore::open(&path).unwrap();
            store.save(BlockHash::from_byte_array([1; 32])).unwrap();
            // crash before the next checkpoint
            store.credit("A", Amount::from_sat(10)).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.balance("A"), SignedAmount::ZERO);
        assert_eq!(store.load().unwrap(), Some(BlockHash::from_byte_array([1; 32])));
    }

    #[test]
    fn reset_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let mut store = FileStore::open(&path).unwrap();
            let mut deltas = BalanceDeltas::default();
            deltas.credit("A", Amount::from_sat(5_000_000_000)).unwrap();
            store.commit_block(BlockHash::from_byte_array([3; 32]), &deltas).unwrap();
            store.reset().unwrap();
            assert_eq!(store.balance("A"), SignedAmount::ZERO);
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert!(store.balances().is_empty());
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"checkpoint\": 12").unwrap();

        assert!(FileStore::open(&path).is_err());
    }
}
