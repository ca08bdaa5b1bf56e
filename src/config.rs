//! Configuration for the balance monitor.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    constants::{
        DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MAX, DEFAULT_LOOKUP_CONCURRENCY, DEFAULT_POLL_INTERVAL,
        DEFAULT_PROGRESS_INTERVAL, DEFAULT_RPC_TIMEOUT, DEFAULT_RPC_URL, DEFAULT_STATE_FILE,
        DEFAULT_TX_CACHE_CAPACITY,
    },
    walker::{Backoff, StartPolicy, WalkerConfig},
    watchlist::{LedgerMode, Watchlist},
};

/// Connection to the node's JSON-RPC interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

/// Which addresses are kept in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LedgerConfig {
    #[default]
    Full,
    Watchlist {
        /// JSON file of the form `{"addresses": [...]}`
        #[serde(default)]
        watchlist_file: Option<PathBuf>,
    },
}

/// Retry schedule for transient RPC failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Consecutive failures before giving up; unbounded when absent
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
            max_attempts: None,
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Where to begin when no checkpoint exists
    #[serde(default)]
    pub start_policy: StartPolicy,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// State file holding the checkpoint and balances
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Number of transactions kept in the lookup cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Transactions of a block whose inputs are looked up concurrently
    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,

    /// Polling interval in seconds once caught up
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Log progress every this many blocks
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT.as_secs()
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_cache_capacity() -> usize {
    DEFAULT_TX_CACHE_CAPACITY.get()
}

fn default_lookup_concurrency() -> usize {
    DEFAULT_LOOKUP_CONCURRENCY
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_backoff_initial() -> u64 {
    DEFAULT_BACKOFF_INITIAL.as_millis() as u64
}

fn default_backoff_max() -> u64 {
    DEFAULT_BACKOFF_MAX.as_millis() as u64
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            start_policy: StartPolicy::default(),
            ledger: LedgerConfig::default(),
            state_file: default_state_file(),
            cache_capacity: default_cache_capacity(),
            lookup_concurrency: default_lookup_concurrency(),
            poll_interval_secs: default_poll_interval(),
            progress_interval: default_progress_interval(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: MonitorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.rpc.url)
            .map_err(|e| anyhow::anyhow!("rpc.url {:?} is not a valid URL: {}", self.rpc.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("rpc.url must use http or https, got {}", url.scheme());
        }
        if self.rpc.timeout_secs == 0 {
            bail!("rpc.timeout_secs must be greater than zero");
        }

        if self.cache_capacity == 0 {
            bail!("cache_capacity must be greater than zero");
        }
        if self.lookup_concurrency == 0 {
            bail!("lookup_concurrency must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.progress_interval == 0 {
            bail!("progress_interval must be greater than zero");
        }

        if self.backoff.initial_ms == 0 {
            bail!("backoff.initial_ms must be greater than zero");
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            bail!("backoff.max_ms must be >= backoff.initial_ms");
        }
        if self.backoff.max_attempts == Some(0) {
            bail!("backoff.max_attempts must be greater than zero when set");
        }

        if let LedgerConfig::Watchlist { watchlist_file: None } = self.ledger {
            bail!("ledger.watchlist_file is required when ledger mode = watchlist");
        }

        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache_capacity).unwrap_or(DEFAULT_TX_CACHE_CAPACITY)
    }

    /// Resolves the ledger mode, reading the watchlist file if there is one.
    pub fn ledger_mode(&self) -> Result<LedgerMode> {
        match &self.ledger {
            LedgerConfig::Full => Ok(LedgerMode::Full),
            LedgerConfig::Watchlist {
                watchlist_file: Some(path),
            } => Ok(LedgerMode::Watchlist(Watchlist::load(path)?)),
            LedgerConfig::Watchlist { watchlist_file: None } => {
                bail!("ledger.watchlist_file is required when ledger mode = watchlist")
            }
        }
    }

    pub fn walker_config(&self) -> Result<WalkerConfig> {
        Ok(WalkerConfig {
            start_policy: self.start_policy,
            ledger_mode: self.ledger_mode()?,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            backoff: Backoff {
                initial: Duration::from_millis(self.backoff.initial_ms),
                max: Duration::from_millis(self.backoff.max_ms),
                max_attempts: self.backoff.max_attempts,
            },
            lookup_concurrency: self.lookup_concurrency,
            progress_interval: self.progress_interval,
        })
    }
}
