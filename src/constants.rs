use std::{num::NonZeroUsize, time::Duration};

pub const DEFAULT_TX_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1 << 20) {
    Some(n) => n,
    None => panic!("cache capacity must be non-zero"),
};

/// Transactions of one block whose inputs are resolved concurrently.
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 64;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Log a progress line every this many processed blocks.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:18332";
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STATE_FILE: &str = "monitor_state.json";
