mod backend;

pub use backend::BitcoindBackend;
