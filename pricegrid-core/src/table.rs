//! Raw price table: many symbols on one date axis.
//!
//! The table is a polars `DataFrame` with a `Date` column and one nullable
//! `Float64` column per (field, symbol) pair, named `"<Field>:<SYMBOL>"`.
//! Rows are not guaranteed to be sorted or complete. A symbol with no bar on
//! a date gets a null there (no forward-fill of price data).

use crate::data::provider::{FetchResult, RawBar};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Name of the row-index column.
pub const DATE_COLUMN: &str = "Date";

/// Separates field and symbol in a column name.
pub const KEY_SEPARATOR: char = ':';

/// Fields written for every symbol, in column order.
pub const TABLE_FIELDS: [&str; 5] = ["Open", "High", "Low", "Close", "Volume"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table has no 'Date' column of type Date")]
    MissingDateColumn,

    #[error("column '{0}' is not named <Field>:<Symbol>")]
    MalformedColumn(String),

    #[error("symbol '{0}' appears in more than one fetch result")]
    DuplicateSymbol(String),

    #[error("null date at row {0}")]
    NullDate(usize),

    #[error("polars: {0}")]
    Polars(#[from] PolarsError),
}

/// A (field, symbol) column key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub field: String,
    pub symbol: String,
}

impl ColumnKey {
    pub fn new(field: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            symbol: symbol.into(),
        }
    }

    /// Flattened column name, e.g. `Close:^SPX`.
    pub fn column_name(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.field, self.symbol)
    }

    /// Split a flattened column name at the first separator.
    pub fn parse(name: &str) -> Option<Self> {
        let (field, symbol) = name.split_once(KEY_SEPARATOR)?;
        if field.is_empty() || symbol.is_empty() {
            return None;
        }
        Some(Self::new(field, symbol))
    }
}

/// Fetched price data for one market group.
#[derive(Debug, Clone)]
pub struct RawPriceTable {
    frame: DataFrame,
    keys: Vec<ColumnKey>,
}

impl RawPriceTable {
    /// Wrap an existing frame, checking its column layout.
    pub fn from_frame(frame: DataFrame) -> Result<Self, TableError> {
        match frame.column(DATE_COLUMN) {
            Ok(col) if col.dtype() == &DataType::Date => {}
            _ => return Err(TableError::MissingDateColumn),
        }

        let keys = frame
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != DATE_COLUMN)
            .map(|name| {
                ColumnKey::parse(name.as_str())
                    .ok_or_else(|| TableError::MalformedColumn(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { frame, keys })
    }

    /// Merge per-symbol fetch results into one table.
    ///
    /// The date axis is the union of every symbol's dates, newest first, which
    /// is the order the provider publishes in. Columns are field-major: all
    /// `Open` columns (in fetch order), then all `High` columns, and so on.
    pub fn assemble(results: &[FetchResult]) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for result in results {
            if !seen.insert(result.symbol.as_str()) {
                return Err(TableError::DuplicateSymbol(result.symbol.clone()));
            }
        }

        let mut all_dates = BTreeSet::new();
        for result in results {
            for bar in &result.bars {
                all_dates.insert(bar.date);
            }
        }
        let dates: Vec<NaiveDate> = all_dates.into_iter().rev().collect();

        // date → bar, per symbol; a repeated date keeps the later bar
        let lookups: Vec<HashMap<NaiveDate, &RawBar>> = results
            .iter()
            .map(|r| r.bars.iter().map(|b| (b.date, b)).collect())
            .collect();

        let epoch = unix_epoch();
        let days: Vec<i32> = dates
            .iter()
            .map(|d| (*d - epoch).num_days() as i32)
            .collect();

        let mut columns = Vec::with_capacity(1 + TABLE_FIELDS.len() * results.len());
        columns.push(Column::new(DATE_COLUMN.into(), days).cast(&DataType::Date)?);

        for field in TABLE_FIELDS {
            for (result, lookup) in results.iter().zip(&lookups) {
                let values: Vec<Option<f64>> = dates
                    .iter()
                    .map(|d| lookup.get(d).and_then(|bar| field_value(bar, field)))
                    .collect();
                let key = ColumnKey::new(field, result.symbol.as_str());
                columns.push(Column::new(key.column_name().into(), values));
            }
        }

        Self::from_frame(DataFrame::new(columns)?)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Column keys in frame order, excluding the date column.
    pub fn keys(&self) -> &[ColumnKey] {
        &self.keys
    }

    /// Number of rows (dates).
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Distinct fields, in first-seen column order.
    pub fn fields(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.keys
            .iter()
            .filter(|k| seen.insert(k.field.as_str()))
            .map(|k| k.field.as_str())
            .collect()
    }

    /// Distinct symbols, in first-seen column order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.keys
            .iter()
            .filter(|k| seen.insert(k.symbol.as_str()))
            .map(|k| k.symbol.as_str())
            .collect()
    }

    /// Keys belonging to one field, in column order. Exact match on the field name.
    pub fn field_keys(&self, field: &str) -> Vec<&ColumnKey> {
        self.keys.iter().filter(|k| k.field == field).collect()
    }

    /// The row index as calendar dates.
    pub fn dates(&self) -> Result<Vec<NaiveDate>, TableError> {
        let date_ca = self.frame.column(DATE_COLUMN)?.date()?;
        let epoch = unix_epoch();

        (0..self.frame.height())
            .map(|i| {
                date_ca
                    .get(i)
                    .map(|days| epoch + chrono::Duration::days(days as i64))
                    .ok_or(TableError::NullDate(i))
            })
            .collect()
    }

    /// Values of one column as `f64`, nulls preserved.
    pub fn values(&self, key: &ColumnKey) -> Result<Vec<Option<f64>>, TableError> {
        let column = self
            .frame
            .column(&key.column_name())?
            .cast(&DataType::Float64)?;
        Ok(column.f64()?.into_iter().collect())
    }
}

fn field_value(bar: &RawBar, field: &str) -> Option<f64> {
    match field {
        "Open" => bar.open,
        "High" => bar.high,
        "Low" => bar.low,
        "Close" => bar.close,
        "Volume" => bar.volume,
        _ => None,
    }
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DataSource;

    fn bar(date: &str, close: f64) -> RawBar {
        RawBar {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: Some(close - 1.0),
            high: Some(close + 1.0),
            low: Some(close - 2.0),
            close: Some(close),
            volume: None,
        }
    }

    fn fetched(symbol: &str, bars: Vec<RawBar>) -> FetchResult {
        FetchResult {
            symbol: symbol.into(),
            bars,
            source: DataSource::Fixture,
        }
    }

    #[test]
    fn column_key_roundtrip() {
        let key = ColumnKey::new("Close", "^SPX");
        assert_eq!(key.column_name(), "Close:^SPX");
        assert_eq!(ColumnKey::parse("Close:^SPX"), Some(key));
        assert_eq!(ColumnKey::parse("Close"), None);
        assert_eq!(ColumnKey::parse(":SPY"), None);
    }

    #[test]
    fn assemble_unions_dates_newest_first_with_nulls() {
        let results = vec![
            fetched(
                "SPY",
                vec![
                    bar("2024-01-02", 100.0),
                    bar("2024-01-03", 101.0),
                    bar("2024-01-04", 102.0),
                ],
            ),
            fetched(
                "QQQ",
                // QQQ missing 2024-01-03
                vec![bar("2024-01-04", 202.0), bar("2024-01-02", 200.0)],
            ),
        ];

        let table = RawPriceTable::assemble(&results).unwrap();

        assert_eq!(table.height(), 3);
        assert_eq!(
            table.dates().unwrap(),
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            ]
        );
        assert_eq!(table.fields(), TABLE_FIELDS.to_vec());
        assert_eq!(table.symbols(), vec!["SPY", "QQQ"]);

        let qqq = table.values(&ColumnKey::new("Close", "QQQ")).unwrap();
        assert_eq!(qqq, vec![Some(202.0), None, Some(200.0)]);

        // volume was never reported
        let vol = table.values(&ColumnKey::new("Volume", "SPY")).unwrap();
        assert!(vol.iter().all(Option::is_none));
    }

    #[test]
    fn assemble_rejects_duplicate_symbols() {
        let results = vec![
            fetched("SPY", vec![bar("2024-01-02", 100.0)]),
            fetched("SPY", vec![bar("2024-01-03", 101.0)]),
        ];
        assert!(matches!(
            RawPriceTable::assemble(&results),
            Err(TableError::DuplicateSymbol(s)) if s == "SPY"
        ));
    }

    #[test]
    fn from_frame_requires_date_column() {
        let df = DataFrame::new(vec![Column::new("Close:SPY".into(), &[1.0, 2.0])]).unwrap();
        assert!(matches!(
            RawPriceTable::from_frame(df),
            Err(TableError::MissingDateColumn)
        ));
    }

    #[test]
    fn from_frame_rejects_unkeyed_columns() {
        let dates = Column::new(DATE_COLUMN.into(), &[19724i32])
            .cast(&DataType::Date)
            .unwrap();
        let df = DataFrame::new(vec![dates, Column::new("close".into(), &[1.0])]).unwrap();
        assert!(matches!(
            RawPriceTable::from_frame(df),
            Err(TableError::MalformedColumn(c)) if c == "close"
        ));
    }

    #[test]
    fn field_keys_is_exact_match() {
        let results = vec![fetched("SPY", vec![bar("2024-01-02", 100.0)])];
        let table = RawPriceTable::assemble(&results).unwrap();
        assert_eq!(table.field_keys("Close").len(), 1);
        assert!(table.field_keys("close").is_empty());
    }
}
