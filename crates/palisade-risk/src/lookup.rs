//! Injected read-only lookup tables.

use std::collections::HashMap;

/// Pairwise symbol correlation lookup, resolved once at construction.
///
/// Read-only after construction and freely shared. Returns `None` for
/// unknown pairs; the correlation gate treats missing data as
/// uncorrelated.
pub trait CorrelationSource: Send + Sync {
    fn correlation(&self, a: &str, b: &str) -> Option<f64>;
}

/// Correlation matrix backed by an in-memory symmetric map.
#[derive(Debug, Default)]
pub struct StaticCorrelationMatrix {
    entries: HashMap<(String, String), f64>,
}

impl StaticCorrelationMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symmetric pair. Order of arguments does not matter.
    pub fn insert(&mut self, a: impl Into<String>, b: impl Into<String>, correlation: f64) {
        let (a, b) = (a.into(), b.into());
        self.entries.insert(Self::key(&a, &b), correlation);
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

impl CorrelationSource for StaticCorrelationMatrix {
    fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        self.entries.get(&Self::key(a, b)).copied()
    }
}
