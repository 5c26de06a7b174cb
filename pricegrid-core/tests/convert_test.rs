//! Table → matrix conversion: the reference scenario plus properties over
//! generated tables with gaps.

use chrono::NaiveDate;
use ndarray::array;
use polars::prelude::*;
use pricegrid_core::convert::{convert, convert_labeled, ConversionError};
use pricegrid_core::data::{DataSource, FetchResult, RawBar};
use pricegrid_core::table::{RawPriceTable, DATE_COLUMN};
use proptest::prelude::*;

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(n)
}

fn bar(n: i64, close: Option<f64>) -> RawBar {
    RawBar {
        date: day(n),
        open: close.map(|c| c - 0.5),
        high: close.map(|c| c + 1.0),
        low: close.map(|c| c - 1.0),
        close,
        volume: Some(1_000.0),
    }
}

fn fetched(symbol: &str, bars: Vec<RawBar>) -> FetchResult {
    FetchResult {
        symbol: symbol.into(),
        bars,
        source: DataSource::Fixture,
    }
}

/// Five timestamps, newest first, two assets; B has no Close at timestamp 3.
fn reference_table() -> RawPriceTable {
    let dates = Column::new(DATE_COLUMN.into(), &[5i32, 4, 3, 2, 1])
        .cast(&DataType::Date)
        .unwrap();
    let df = DataFrame::new(vec![
        dates,
        Column::new("Open:A".into(), &[50.0, 40.0, 30.0, 20.0, 10.0]),
        Column::new("Open:B".into(), &[5.0, 4.0, 3.0, 2.0, 1.0]),
        Column::new("Close:A".into(), &[55.0, 45.0, 35.0, 25.0, 15.0]),
        Column::new(
            "Close:B".into(),
            &[Some(5.5), Some(4.5), None, Some(2.5), Some(1.5)],
        ),
    ])
    .unwrap();
    RawPriceTable::from_frame(df).unwrap()
}

#[test]
fn reference_scenario_shape_and_order() {
    let m = convert_labeled(&reference_table(), "Close").unwrap();

    assert_eq!(m.prices.dim(), (4, 2));
    assert_eq!(
        m.prices,
        array![[15.0, 1.5], [25.0, 2.5], [45.0, 4.5], [55.0, 5.5]]
    );
    assert_eq!(m.symbols, vec!["A", "B"]);

    let epoch = NaiveDate::default();
    let expected: Vec<NaiveDate> = [1, 2, 4, 5]
        .iter()
        .map(|&d| epoch + chrono::Duration::days(d))
        .collect();
    assert_eq!(m.dates, expected);
}

#[test]
fn other_fields_ignore_gaps_in_close() {
    // Open has no gaps, so all five rows survive
    let m = convert(&reference_table(), "open").unwrap();
    assert_eq!(m.dim(), (5, 2));
    assert_eq!(m[[0, 0]], 10.0);
    assert_eq!(m[[4, 1]], 5.0);
}

#[test]
fn field_not_in_table_fails() {
    assert!(matches!(
        convert(&reference_table(), "High"),
        Err(ConversionError::MissingField { .. })
    ));
    assert!(matches!(
        convert(&reference_table(), "Volume"),
        Err(ConversionError::MissingField { .. })
    ));
}

#[test]
fn converting_ascending_input_matches_descending_input() {
    let bars = |offset: f64| -> Vec<RawBar> {
        (0..6).map(|n| bar(n, Some(offset + n as f64))).collect()
    };
    let descending = RawPriceTable::assemble(&[fetched("A", bars(100.0)), fetched("B", bars(200.0))])
        .unwrap();

    // same data with the rows flipped to ascending order
    let frame = descending.frame().reverse();
    let ascending = RawPriceTable::from_frame(frame).unwrap();

    let a = convert_labeled(&ascending, "Close").unwrap();
    let d = convert_labeled(&descending, "Close").unwrap();
    assert_eq!(a, d);
    assert_eq!(a.prices[[0, 0]], 100.0);
    assert_eq!(a.prices[[5, 1]], 205.0);
}

#[test]
fn single_asset_group() {
    let table = RawPriceTable::assemble(&[fetched(
        "^SPX",
        vec![bar(2, Some(3.0)), bar(1, Some(2.0)), bar(0, None)],
    )])
    .unwrap();
    let m = convert(&table, "Close").unwrap();
    assert_eq!(m, array![[2.0], [3.0]]);
}

// ── Properties ───────────────────────────────────────────────────────

/// Per asset, a Close series over days 0..n with random gaps (None) and
/// optionally some dates never reported at all.
fn arb_series(n: usize) -> impl Strategy<Value = Vec<Option<Option<f64>>>> {
    proptest::collection::vec(
        prop_oneof![
            6 => (1.0f64..1000.0).prop_map(|v| Some(Some(v))),
            1 => Just(Some(None)),
            1 => Just(None),
        ],
        n,
    )
}

fn arb_results() -> impl Strategy<Value = Vec<FetchResult>> {
    (1usize..40, 1usize..5).prop_flat_map(|(days, assets)| {
        proptest::collection::vec(arb_series(days), assets).prop_map(|series| {
            series
                .into_iter()
                .enumerate()
                .map(|(i, s)| {
                    let bars = s
                        .into_iter()
                        .enumerate()
                        .filter_map(|(n, v)| v.map(|close| bar(n as i64, close)))
                        .collect();
                    fetched(&format!("S{i}"), bars)
                })
                .collect()
        })
    })
}

proptest! {
    /// No missing values, one column per asset, rows strictly ascending.
    #[test]
    fn output_is_complete_and_ascending(results in arb_results()) {
        let table = RawPriceTable::assemble(&results).unwrap();
        let m = convert_labeled(&table, "Close").unwrap();

        prop_assert_eq!(m.n_assets(), results.len());
        prop_assert!(m.prices.iter().all(|v| !v.is_nan()));
        prop_assert!(m.dates.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(m.dates.len(), m.days());
        prop_assert!(m.days() <= table.height());
    }

    /// A day survives exactly when every asset has a Close on it.
    #[test]
    fn surviving_days_are_the_fully_reported_ones(results in arb_results()) {
        let table = RawPriceTable::assemble(&results).unwrap();
        let m = convert_labeled(&table, "Close").unwrap();

        let mut expected: Vec<NaiveDate> = table
            .dates()
            .unwrap()
            .into_iter()
            .filter(|d| {
                results.iter().all(|r| {
                    r.bars.iter().any(|b| b.date == *d && b.close.is_some())
                })
            })
            .collect();
        expected.sort();
        prop_assert_eq!(m.dates, expected);
    }
}
