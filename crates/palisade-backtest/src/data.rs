//! Bar history storage and CSV loading.

use crate::error::BacktestResult;
use chrono::{DateTime, NaiveDate, Utc};
use palisade_core::Bar;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

/// One CSV row: `timestamp,open,high,low,close,volume`, RFC 3339 timestamp.
#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Per-symbol daily bar history.
///
/// Bars are keyed by UTC date; at most one bar per symbol per date (a
/// later insert for the same date replaces the earlier one). Symbol maps
/// are ordered so replay iterates deterministically.
#[derive(Debug, Default)]
pub struct BarHistory {
    bars: BTreeMap<String, BTreeMap<NaiveDate, Bar>>,
}

impl BarHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bar: Bar) {
        let date = bar.timestamp.date_naive();
        self.bars
            .entry(bar.symbol.clone())
            .or_default()
            .insert(date, bar);
    }

    /// Load one symbol's bars from a CSV file. Invalid rows are skipped
    /// with a warning rather than aborting the load.
    pub fn load_csv(&mut self, symbol: &str, path: &Path) -> BacktestResult<usize> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut loaded = 0usize;
        let mut skipped = 0usize;

        for row in reader.deserialize::<CsvBar>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    skipped += 1;
                    warn!(symbol, ?e, "skipping malformed CSV row");
                    continue;
                }
            };
            match Bar::new(
                symbol,
                row.timestamp,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume,
            ) {
                Ok(bar) => {
                    self.insert(bar);
                    loaded += 1;
                }
                Err(e) => {
                    skipped += 1;
                    warn!(symbol, %e, "skipping invalid bar");
                }
            }
        }

        info!(symbol, loaded, skipped, path = %path.display(), "loaded bar history");
        Ok(loaded)
    }

    pub fn bar(&self, symbol: &str, date: NaiveDate) -> Option<&Bar> {
        self.bars.get(symbol)?.get(&date)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(String::as_str)
    }

    /// Sorted union of every symbol's available dates.
    pub fn all_dates(&self) -> BTreeSet<NaiveDate> {
        self.bars
            .values()
            .flat_map(|by_date| by_date.keys().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.values().map(BTreeMap::len).sum()
    }
}
