mod file;
mod memory;
mod updater;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use updater::{AddressLedger, CheckpointStore, Updater};
