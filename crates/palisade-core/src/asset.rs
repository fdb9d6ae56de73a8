//! Asset classification and symbol metadata.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Broad asset class; crypto symbols get wider risk parameters and bypass
/// equity market-hours filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    #[default]
    Equity,
    Crypto,
}

impl AssetClass {
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Crypto)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equity => write!(f, "equity"),
            Self::Crypto => write!(f, "crypto"),
        }
    }
}

/// Read-only symbol metadata lookup, resolved once at construction.
///
/// Tests substitute fakes; the binary builds a [`StaticAssetCatalog`] from
/// configuration. Unknown symbols default to equity with no sector.
pub trait AssetCatalog: Send + Sync {
    fn asset_class(&self, symbol: &str) -> AssetClass;

    fn sector(&self, symbol: &str) -> Option<&str>;
}

/// Catalog backed by in-memory sets built from configuration.
#[derive(Debug, Default)]
pub struct StaticAssetCatalog {
    crypto: HashSet<String>,
    sectors: HashMap<String, String>,
}

impl StaticAssetCatalog {
    pub fn new(
        crypto_symbols: impl IntoIterator<Item = String>,
        sectors: HashMap<String, String>,
    ) -> Self {
        Self {
            crypto: crypto_symbols.into_iter().collect(),
            sectors,
        }
    }
}

impl AssetCatalog for StaticAssetCatalog {
    fn asset_class(&self, symbol: &str) -> AssetClass {
        if self.crypto.contains(symbol) {
            AssetClass::Crypto
        } else {
            AssetClass::Equity
        }
    }

    fn sector(&self, symbol: &str) -> Option<&str> {
        self.sectors.get(symbol).map(String::as_str)
    }
}
