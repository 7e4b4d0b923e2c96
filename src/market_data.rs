use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const PRICE_SNAPSHOT_VERSION: u32 = 1;

/// Date-indexed table of adjusted prices, one column per symbol. Cells are
/// `None` where a symbol has no quote for a date. The index is strictly
/// increasing with no duplicate dates; the table is immutable for the
/// duration of a run and only ever read through prefix views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTable {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    pub fn empty() -> Self {
        Self {
            symbols: Vec::new(),
            dates: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Assemble a table from per-symbol date series. The date index is the
    /// sorted union of all series dates.
    pub fn from_columns(columns: &BTreeMap<String, BTreeMap<NaiveDate, f64>>) -> Self {
        let symbols: Vec<String> = columns.keys().cloned().collect();
        let mut all_dates = BTreeSet::new();
        for series in columns.values() {
            all_dates.extend(series.keys().copied());
        }
        let dates: Vec<NaiveDate> = all_dates.into_iter().collect();
        let rows = dates
            .iter()
            .map(|date| {
                symbols
                    .iter()
                    .map(|symbol| columns[symbol].get(date).copied())
                    .collect()
            })
            .collect();
        Self {
            symbols,
            dates,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn price(&self, date: NaiveDate, symbol: &str) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        let col = self.symbol_index(symbol)?;
        self.rows[row][col]
    }

    /// Prefix view ending at `date` inclusive. This is the only way the
    /// simulation loop and strategies see price history, so nothing past
    /// `date` can leak into a decision made on `date`.
    pub fn up_to(&self, date: NaiveDate) -> PriceView<'_> {
        let len = self.dates.partition_point(|d| *d <= date);
        PriceView { table: self, len }
    }

    pub fn full_view(&self) -> PriceView<'_> {
        PriceView {
            table: self,
            len: self.dates.len(),
        }
    }

    /// New table covering only `[start, end]`.
    pub fn restrict(&self, start: NaiveDate, end: NaiveDate) -> PriceTable {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        Self {
            symbols: self.symbols.clone(),
            dates: self.dates[lo..hi].to_vec(),
            rows: self.rows[lo..hi].to_vec(),
        }
    }

    /// New table with only the requested symbols (in request order, silently
    /// dropping symbols the table does not carry).
    pub fn select(&self, symbols: &[String]) -> PriceTable {
        let keep: Vec<(usize, String)> = symbols
            .iter()
            .filter_map(|s| self.symbol_index(s).map(|idx| (idx, s.clone())))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| keep.iter().map(|(idx, _)| row[*idx]).collect())
            .collect();
        Self {
            symbols: keep.into_iter().map(|(_, s)| s).collect(),
            dates: self.dates.clone(),
            rows,
        }
    }

    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create snapshot file {}", path.display()))?;
        let snapshot = PriceSnapshot {
            version: PRICE_SNAPSHOT_VERSION,
            table: self.clone(),
        };
        bincode::serialize_into(BufWriter::new(file), &snapshot)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        info!(
            "Saved price snapshot with {} symbols and {} dates to {}",
            self.symbols.len(),
            self.dates.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open snapshot file {}", path.display()))?;
        let snapshot: PriceSnapshot = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        if snapshot.version != PRICE_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "unsupported snapshot version {} in {} (expected {})",
                snapshot.version,
                path.display(),
                PRICE_SNAPSHOT_VERSION
            ));
        }
        info!(
            "Loaded price snapshot with {} symbols and {} dates from {}",
            snapshot.table.symbols.len(),
            snapshot.table.dates.len(),
            path.display()
        );
        Ok(snapshot.table)
    }
}

#[derive(Serialize, Deserialize)]
struct PriceSnapshot {
    version: u32,
    table: PriceTable,
}

/// Read-only prefix of a `PriceTable`. Strategies receive one of these,
/// never the full table.
#[derive(Clone, Copy)]
pub struct PriceView<'a> {
    table: &'a PriceTable,
    len: usize,
}

impl<'a> PriceView<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn symbols(&self) -> &'a [String] {
        &self.table.symbols
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.table.has_symbol(symbol)
    }

    pub fn dates(&self) -> &'a [NaiveDate] {
        &self.table.dates[..self.len]
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates().last().copied()
    }

    /// Prices quoted on `date`, with unquoted symbols dropped.
    pub fn prices_on(&self, date: NaiveDate) -> BTreeMap<String, f64> {
        let Ok(row) = self.dates().binary_search(&date) else {
            return BTreeMap::new();
        };
        self.table
            .symbols
            .iter()
            .zip(self.table.rows[row].iter())
            .filter_map(|(symbol, price)| price.map(|p| (symbol.clone(), p)))
            .collect()
    }

    /// The quoted closes of one symbol within the view, gaps dropped.
    pub fn closes(&self, symbol: &str) -> Vec<f64> {
        let Some(col) = self.table.symbol_index(symbol) else {
            return Vec::new();
        };
        self.table.rows[..self.len]
            .iter()
            .filter_map(|row| row[col])
            .collect()
    }
}
