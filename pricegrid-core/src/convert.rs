//! Table → matrix conversion.
//!
//! Extracts one price field across every asset of a [`RawPriceTable`], drops
//! every day on which any asset is missing a value, and lays the result out
//! as a dense `(days, assets)` matrix with row 0 the earliest day.

use crate::config::capitalize;
use crate::table::{RawPriceTable, TableError};
use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use thiserror::Error;

/// Dense price matrix: row = trading day (ascending), column = asset.
pub type PriceMatrix = Array2<f64>;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("price field '{field}' not present in table (available: {available})")]
    MissingField { field: String, available: String },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("polars: {0}")]
    Polars(#[from] PolarsError),
}

/// A matrix together with the labels of its rows and columns.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    /// One date per matrix row, ascending.
    pub dates: Vec<NaiveDate>,
    /// One symbol per matrix column.
    pub symbols: Vec<String>,
    pub prices: PriceMatrix,
}

impl LabeledMatrix {
    pub fn n_assets(&self) -> usize {
        self.prices.ncols()
    }

    pub fn days(&self) -> usize {
        self.prices.nrows()
    }
}

/// Convert a table to a price matrix for one field.
///
/// `price_field` is capitalized before lookup, so `"close"` selects the
/// `Close` columns. Fails if the table has no columns for that field.
pub fn convert(table: &RawPriceTable, price_field: &str) -> Result<PriceMatrix, ConversionError> {
    Ok(convert_labeled(table, price_field)?.prices)
}

/// [`convert`], keeping the row dates and column symbols.
pub fn convert_labeled(
    table: &RawPriceTable,
    price_field: &str,
) -> Result<LabeledMatrix, ConversionError> {
    let field = capitalize(price_field);
    let keys = table.field_keys(&field);
    if keys.is_empty() {
        return Err(ConversionError::MissingField {
            field,
            available: table.fields().join(", "),
        });
    }

    let columns = keys
        .iter()
        .map(|k| {
            table
                .frame()
                .column(&k.column_name())
                .and_then(|c| c.cast(&DataType::Float64))
        })
        .collect::<PolarsResult<Vec<Column>>>()?;
    let values = columns
        .iter()
        .map(|c| c.f64())
        .collect::<PolarsResult<Vec<&Float64Chunked>>>()?;

    // One completeness mask across all assets keeps rows aligned: a single
    // missing value drops the day for every asset.
    let mut rows: Vec<usize> = (0..table.height())
        .filter(|&row| {
            values
                .iter()
                .all(|ca| matches!(ca.get(row), Some(v) if !v.is_nan()))
        })
        .collect();

    let all_dates = table.dates()?;
    if let (Some(&first), Some(&last)) = (rows.first(), rows.last()) {
        if all_dates[first] > all_dates[last] {
            rows.reverse();
        }
    }

    let mut prices = PriceMatrix::zeros((rows.len(), values.len()));
    for (mut column, ca) in prices.columns_mut().into_iter().zip(&values) {
        for (cell, &row) in column.iter_mut().zip(&rows) {
            *cell = ca.get(row).unwrap_or(f64::NAN);
        }
    }

    Ok(LabeledMatrix {
        dates: rows.iter().map(|&row| all_dates[row]).collect(),
        symbols: keys.iter().map(|k| k.symbol.clone()).collect(),
        prices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DATE_COLUMN;
    use ndarray::array;

    fn table(days: &[i32], spy: &[Option<f64>], qqq: &[Option<f64>]) -> RawPriceTable {
        let dates = Column::new(DATE_COLUMN.into(), days)
            .cast(&DataType::Date)
            .unwrap();
        let df = DataFrame::new(vec![
            dates,
            Column::new("Close:SPY".into(), spy),
            Column::new("Close:QQQ".into(), qqq),
            Column::new("Open:SPY".into(), spy),
            Column::new("Open:QQQ".into(), qqq),
        ])
        .unwrap();
        RawPriceTable::from_frame(df).unwrap()
    }

    #[test]
    fn ascending_table_keeps_order() {
        let t = table(
            &[1, 2, 3],
            &[Some(1.0), Some(2.0), Some(3.0)],
            &[Some(10.0), Some(20.0), Some(30.0)],
        );
        let m = convert(&t, "Close").unwrap();
        assert_eq!(m, array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]]);
    }

    #[test]
    fn descending_table_is_reversed() {
        let t = table(
            &[3, 2, 1],
            &[Some(3.0), Some(2.0), Some(1.0)],
            &[Some(30.0), Some(20.0), Some(10.0)],
        );
        let m = convert_labeled(&t, "close").unwrap();
        assert_eq!(m.prices, array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]]);
        assert!(m.dates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(m.symbols, vec!["SPY", "QQQ"]);
    }

    #[test]
    fn null_and_nan_rows_are_dropped_for_all_assets() {
        let t = table(
            &[1, 2, 3, 4],
            &[Some(1.0), None, Some(3.0), Some(4.0)],
            &[Some(10.0), Some(20.0), Some(f64::NAN), Some(40.0)],
        );
        let m = convert(&t, "Close").unwrap();
        assert_eq!(m, array![[1.0, 10.0], [4.0, 40.0]]);
    }

    #[test]
    fn all_rows_incomplete_gives_empty_matrix() {
        let t = table(&[1, 2], &[None, Some(2.0)], &[Some(1.0), None]);
        let m = convert(&t, "Close").unwrap();
        assert_eq!(m.dim(), (0, 2));
    }

    #[test]
    fn missing_field_is_reported() {
        let t = table(&[1], &[Some(1.0)], &[Some(2.0)]);
        match convert(&t, "High") {
            Err(ConversionError::MissingField { field, available }) => {
                assert_eq!(field, "High");
                assert_eq!(available, "Close, Open");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }
}
