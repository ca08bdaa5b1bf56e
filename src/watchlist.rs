use std::{collections::HashSet, path::Path};

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};

use crate::db::FileWriter;

/// Addresses whose balances are tracked in [`LedgerMode::Watchlist`].
///
/// On disk this is `{"addresses": ["addr1", "addr2", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    addresses: HashSet<String>,
}

impl Watchlist {
    pub fn load(path: &Path) -> Result<Self> {
        let watchlist: Self = FileWriter::new(path).read_from_file()?;
        info!("watching {} addresses from {}", watchlist.len(), path.display());
        Ok(watchlist)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Watchlist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Which addresses get a ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LedgerMode {
    /// Every address seen on chain.
    #[default]
    Full,
    /// Only watched addresses; everything else is ignored to bound memory.
    Watchlist(Watchlist),
}

impl LedgerMode {
    pub fn tracks(&self, address: &str) -> bool {
        match self {
            Self::Full => true,
            Self::Watchlist(watchlist) => watchlist.contains(address),
        }
    }

    pub fn is_watchlist(&self) -> bool {
        matches!(self, Self::Watchlist(_))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn loads_watchlist_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        fs::write(&path, r#"{"addresses": ["addrA", "addrB", "addrA"]}"#).unwrap();

        let watchlist = Watchlist::load(&path).unwrap();
        assert_eq!(watchlist.len(), 2);
        assert!(watchlist.contains("addrA"));
        assert!(!watchlist.contains("addrC"));
    }

    #[test]
    fn missing_addresses_key_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        fs::write(&path, "{}").unwrap();

        assert!(Watchlist::load(&path).unwrap().is_empty());
    }

    #[test]
    fn mode_filters_addresses() {
        assert!(LedgerMode::Full.tracks("anything"));

        let mode = LedgerMode::Watchlist(["addrA"].into_iter().collect());
        assert!(mode.tracks("addrA"));
        assert!(!mode.tracks("addrB"));
    }
}
