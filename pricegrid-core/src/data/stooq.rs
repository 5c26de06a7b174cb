//! Stooq data provider.
//!
//! Fetches daily bars from Stooq's CSV download endpoint
//! (`https://stooq.com/q/d/l/`). The endpoint answers with a plain CSV body
//! (`Date,Open,High,Low,Close[,Volume]`) or with a short text message such as
//! `No data` when the symbol is unknown.
//!
//! Not every symbol listed on stooq.com is served by the endpoint, and the
//! service occasionally fails a symbol that succeeds on the next run. No retry
//! is attempted here.

use super::provider::{DataError, DataProvider, DataSource, FetchResult, RawBar};
use crate::config::DateRange;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Stooq's CSV download endpoint.
pub const STOOQ_CSV_URL: &str = "https://stooq.com/q/d/l/";

/// Country suffix Stooq expects on bare equity tickers.
pub const DEFAULT_COUNTRY: &str = "US";

/// One CSV row as Stooq writes it.
#[derive(Debug, Deserialize)]
struct StooqRow {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Open")]
    open: Option<f64>,
    #[serde(rename = "High")]
    high: Option<f64>,
    #[serde(rename = "Low")]
    low: Option<f64>,
    #[serde(rename = "Close")]
    close: Option<f64>,
    #[serde(rename = "Volume", default)]
    volume: Option<f64>,
}

/// Stooq daily data provider.
pub struct StooqProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl StooqProvider {
    pub fn new() -> Result<Self, DataError> {
        Self::with_base_url(STOOQ_CSV_URL)
    }

    /// Point the provider at a different endpoint (mirrors, local test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Symbol as sent to Stooq: bare tickers get the default country suffix,
    /// indices (`^SPX`) and already-qualified symbols (`AAPL.US`, `GC.F`) pass
    /// through.
    pub fn stooq_symbol(symbol: &str) -> String {
        if symbol.starts_with('^') || symbol.contains('.') {
            symbol.to_string()
        } else {
            format!("{symbol}.{DEFAULT_COUNTRY}")
        }
    }

    /// Parse a CSV response body into bars, in the order Stooq returned them.
    pub fn parse_csv(symbol: &str, body: &str) -> Result<Vec<RawBar>, DataError> {
        let body = body.trim_start_matches('\u{feff}');
        let first_line = body.lines().next().unwrap_or("").trim();

        if first_line.is_empty() || first_line.eq_ignore_ascii_case("no data") {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if !first_line.starts_with("Date,") {
            return Err(DataError::ResponseFormatChanged(format!(
                "unexpected response for {symbol}: {first_line}"
            )));
        }

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut bars = Vec::new();
        for record in reader.deserialize::<StooqRow>() {
            let row = record.map_err(|e| {
                DataError::ResponseFormatChanged(format!("bad CSV row for {symbol}: {e}"))
            })?;
            bars.push(RawBar {
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        if bars.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(bars)
    }
}

impl DataProvider for StooqProvider {
    fn name(&self) -> &str {
        "stooq"
    }

    fn fetch(&self, symbol: &str, range: &DateRange) -> Result<FetchResult, DataError> {
        let remote = Self::stooq_symbol(symbol);
        let d1 = range.start().compact();
        let d2 = range.end().compact();
        debug!(symbol, remote = %remote, d1 = %d1, d2 = %d2, "requesting stooq CSV");

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("s", remote.as_str()),
                ("i", "d"),
                ("d1", d1.as_str()),
                ("d2", d2.as_str()),
            ])
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::Http {
                symbol: symbol.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .text()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
        let bars = Self::parse_csv(symbol, &body)?;
        debug!(symbol, bars = bars.len(), "stooq CSV parsed");

        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars,
            source: DataSource::Stooq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_tickers_get_country_suffix() {
        assert_eq!(StooqProvider::stooq_symbol("AAPL"), "AAPL.US");
        assert_eq!(StooqProvider::stooq_symbol("AAPL.US"), "AAPL.US");
        assert_eq!(StooqProvider::stooq_symbol("^SPX"), "^SPX");
        assert_eq!(StooqProvider::stooq_symbol("GC.F"), "GC.F");
    }

    #[test]
    fn parses_csv_with_volume() {
        let body = "Date,Open,High,Low,Close,Volume\n\
                    2022-02-10,4553.24,4588.92,4484.31,4504.08,2780436352\n\
                    2022-02-09,4547.0,4590.03,4547.0,4587.18,2401540608\n";
        let bars = StooqProvider::parse_csv("^SPX", body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2022, 2, 10).unwrap());
        assert_eq!(bars[0].close, Some(4504.08));
        assert_eq!(bars[1].volume, Some(2401540608.0));
    }

    #[test]
    fn parses_csv_without_volume_and_blank_cells() {
        let body = "Date,Open,High,Low,Close\n\
                    1985-10-01,182.06,184.06,182.06,\n\
                    1985-10-02,185.07,185.88,184.36,184.06\n";
        let bars = StooqProvider::parse_csv("^SPX", body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, None);
        assert_eq!(bars[0].volume, None);
        assert_eq!(bars[1].close, Some(184.06));
    }

    #[test]
    fn no_data_body_is_symbol_not_found() {
        let err = StooqProvider::parse_csv("XYZ.US", "No data").unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { symbol } if symbol == "XYZ.US"));
    }

    #[test]
    fn header_only_body_is_symbol_not_found() {
        let err = StooqProvider::parse_csv("XYZ.US", "Date,Open,High,Low,Close,Volume\n").unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { .. }));
    }

    #[test]
    fn unexpected_text_is_format_change() {
        let err = StooqProvider::parse_csv("^SPX", "Exceeded the daily hits limit").unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }
}
