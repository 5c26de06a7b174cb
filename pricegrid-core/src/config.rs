//! Market configuration and the pre-flight validator.
//!
//! The configuration is stored as a TOML file holding the date range, the
//! output directory, the price field, and the market groups to fetch.
//! [`validate`] runs every precondition check before any network or disk I/O,
//! and fails on the first violated rule.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Years must be strictly greater than this.
pub const MIN_YEAR_EXCLUSIVE: i32 = 1900;

/// Console confirmation printed once a config passes [`validate`].
pub const CHECKS_PASSED: &str = "Market config checks: passed";

/// Prefix shared by every artifact written for a market group.
pub const DEFAULT_FILE_PREFIX: &str = "stooq_";

/// A violated configuration precondition.
///
/// Each variant names exactly one rule so the CLI can report which check failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{label} date '{value}' must be formatted as YYYY-MM-DD")]
    DateFormat { label: &'static str, value: String },

    #[error("{label} {component} '{value}' is not an integer")]
    DateComponent {
        label: &'static str,
        component: &'static str,
        value: String,
    },

    #[error("{label} year {year} must be after 1900")]
    YearOutOfRange { label: &'static str, year: i32 },

    #[error("{label} month {month} out of range (only 12 months in a year)")]
    MonthOutOfRange { label: &'static str, month: i32 },

    #[error("{label} day {day} out of range (maximum 31 days per month)")]
    DayOutOfRange { label: &'static str, day: i32 },

    #[error("end date {end} must be after start date {start}")]
    DateOrder { start: String, end: String },

    #[error("market group '{group}' must contain at least one symbol")]
    EmptyGroup { group: String },

    #[error("market group '{group}' lists symbol '{symbol}' more than once")]
    DuplicateSymbol { group: String, symbol: String },

    #[error("output path '{path}' must be a sub-directory relative to the working directory (start with './' and end with '/')")]
    OutputPath { path: String },

    #[error("price field '{value}' must be one of Open, High, Low, or Close")]
    PriceField { value: String },

    #[error("read config file: {0}")]
    Read(String),

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("serialize config TOML: {0}")]
    Serialize(String),
}

// ── Dates ────────────────────────────────────────────────────────────

/// A calendar date as written in the configuration.
///
/// Looser than `NaiveDate`: day 31 is accepted for every month.
/// Ordering matches comparing the concatenated `YYYYMMDD` digit strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateStamp {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DateStamp {
    /// Check the component ranges and build a stamp.
    fn checked(label: &'static str, year: i32, month: i32, day: i32) -> Result<Self, ConfigError> {
        if year <= MIN_YEAR_EXCLUSIVE {
            return Err(ConfigError::YearOutOfRange { label, year });
        }
        if !(1..=12).contains(&month) {
            return Err(ConfigError::MonthOutOfRange { label, month });
        }
        if !(1..=31).contains(&day) {
            return Err(ConfigError::DayOutOfRange { label, day });
        }
        Ok(Self {
            year,
            month: month as u32,
            day: day as u32,
        })
    }

    /// `YYYYMMDD`, the form data providers take in query strings.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }

    /// The real calendar date, if this stamp names one.
    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for DateStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Validated `(start, end)` pair with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateStamp,
    end: DateStamp,
}

impl DateRange {
    pub fn start(&self) -> DateStamp {
        self.start
    }

    pub fn end(&self) -> DateStamp {
        self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

// ── Price field ──────────────────────────────────────────────────────

/// One of the four OHLC price fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

impl PriceField {
    pub const ALL: [PriceField; 4] = [Self::Open, Self::High, Self::Low, Self::Close];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::High => "High",
            Self::Low => "Low",
            Self::Close => "Close",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceField {
    type Err = ConfigError;

    /// Case-insensitive on everything after the first character: the input is
    /// capitalized before comparison, so `close` and `CLOSE` both parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = capitalize(s);
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| ConfigError::PriceField {
                value: s.to_string(),
            })
    }
}

/// Uppercase the first character and lowercase the rest.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

// ── Market groups ────────────────────────────────────────────────────

/// A named collection of asset symbols fetched and converted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GroupEntry")]
pub struct MarketGroup {
    /// Display name, used to name the output files.
    pub name: String,
    /// Provider symbols, in column order.
    pub symbols: Vec<String>,
}

impl MarketGroup {
    pub fn new<S: Into<String>>(name: impl Into<String>, symbols: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

/// Either `{ name = "...", symbols = [...] }` or the two-element
/// `["name", ["SYM", ...]]` pair.
#[derive(Deserialize)]
#[serde(untagged)]
enum GroupEntry {
    Record { name: String, symbols: Vec<String> },
    Pair(String, Vec<String>),
}

impl From<GroupEntry> for MarketGroup {
    fn from(entry: GroupEntry) -> Self {
        match entry {
            GroupEntry::Record { name, symbols } | GroupEntry::Pair(name, symbols) => {
                Self { name, symbols }
            }
        }
    }
}

/// Group key → group, iterated in key order.
pub type MarketGroups = BTreeMap<String, MarketGroup>;

// ── Validation ───────────────────────────────────────────────────────

/// Values parsed out of a configuration that passed every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub range: DateRange,
    pub price_field: PriceField,
}

/// Run every precondition check, in order, failing on the first violation.
///
/// 1. both dates have `-` at positions 4 and 7
/// 2. all six date components parse as integers
/// 3. start year/month/day ranges
/// 4. end year/month/day ranges
/// 5. end strictly after start
/// 6. every group has symbols and none repeat
/// 7. output path is `./...` and ends with a separator
/// 8. price field is one of the OHLC fields
pub fn validate(
    start: &str,
    end: &str,
    groups: &MarketGroups,
    path: &str,
    price_field: &str,
) -> Result<ValidatedConfig, ConfigError> {
    check_date_format("start", start)?;
    check_date_format("end", end)?;

    let (y_s, m_s, d_s) = parse_components("start", start)?;
    let (y_e, m_e, d_e) = parse_components("end", end)?;

    let start_stamp = DateStamp::checked("start", y_s, m_s, d_s)?;
    let end_stamp = DateStamp::checked("end", y_e, m_e, d_e)?;

    if end_stamp <= start_stamp {
        return Err(ConfigError::DateOrder {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    validate_groups(groups)?;
    validate_output_path(path)?;
    let price_field = price_field.parse::<PriceField>()?;

    info!(
        start = %start_stamp,
        end = %end_stamp,
        groups = groups.len(),
        %price_field,
        "market config checks passed"
    );

    Ok(ValidatedConfig {
        range: DateRange {
            start: start_stamp,
            end: end_stamp,
        },
        price_field,
    })
}

fn check_date_format(label: &'static str, value: &str) -> Result<(), ConfigError> {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || !value.is_ascii() || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(ConfigError::DateFormat {
            label,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Split an already format-checked `YYYY-MM-DD` string into integers.
/// Components may be space-padded (`1985- 1-01`).
fn parse_components(label: &'static str, value: &str) -> Result<(i32, i32, i32), ConfigError> {
    let parse = |component: &'static str, raw: &str| {
        raw.trim()
            .parse::<i32>()
            .map_err(|_| ConfigError::DateComponent {
                label,
                component,
                value: raw.to_string(),
            })
    };
    Ok((
        parse("year", &value[..4])?,
        parse("month", &value[5..7])?,
        parse("day", &value[8..])?,
    ))
}

fn validate_groups(groups: &MarketGroups) -> Result<(), ConfigError> {
    for (key, group) in groups {
        if group.symbols.is_empty() {
            return Err(ConfigError::EmptyGroup { group: key.clone() });
        }
        let mut seen = std::collections::HashSet::with_capacity(group.symbols.len());
        for symbol in &group.symbols {
            if !seen.insert(symbol.as_str()) {
                return Err(ConfigError::DuplicateSymbol {
                    group: key.clone(),
                    symbol: symbol.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_output_path(path: &str) -> Result<(), ConfigError> {
    let ends_with_separator = path.ends_with('/') || path.ends_with(std::path::MAIN_SEPARATOR);
    if !path.starts_with("./") || !ends_with_separator {
        return Err(ConfigError::OutputPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

// ── Config file ──────────────────────────────────────────────────────

fn default_price_field() -> String {
    PriceField::Close.as_str().to_string()
}

fn default_file_prefix() -> String {
    DEFAULT_FILE_PREFIX.to_string()
}

/// The complete market data configuration.
///
/// Fields stay as raw strings until [`MarketConfig::validate`] runs, so that
/// malformed values are reported by the validator rather than by the TOML
/// parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// First day to fetch, `YYYY-MM-DD`.
    pub start: String,
    /// Last day to fetch, `YYYY-MM-DD`.
    pub end: String,
    /// Relative output directory, e.g. `./market_data/`.
    pub output_dir: String,
    #[serde(default = "default_price_field")]
    pub price_field: String,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    pub groups: MarketGroups,
}

impl MarketConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize the config to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Run [`validate`] over this config.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        validate(
            &self.start,
            &self.end,
            &self.groups,
            &self.output_dir,
            &self.price_field,
        )
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    /// File stem for a group's artifacts, e.g. `stooq_snp`.
    pub fn file_stem(&self, group: &MarketGroup) -> String {
        format!("{}{}", self.file_prefix, group.name)
    }

    /// US index and Dow component groups available from Stooq.
    ///
    /// Commodity futures (GC.F, CL.F, ...) are left out: Stooq no longer serves
    /// them through the CSV endpoint.
    pub fn default_stooq() -> Self {
        let mut groups = BTreeMap::new();

        groups.insert("mkt0".into(), MarketGroup::new("snp", ["^SPX"]));

        groups.insert(
            "mkt1".into(),
            MarketGroup::new("usei", ["^SPX", "^DJI", "^NDX"]),
        );

        groups.insert(
            "mkt2".into(),
            MarketGroup::new(
                "dji",
                [
                    "^SPX", "^DJI", "^NDX", "AAPL.US", "AMGN.US", "AXP.US", "BA.US", "CAT.US",
                    "CVX.US", "DIS.US", "HD.US", "IBM.US", "INTC.US", "JNJ.US", "JPM.US",
                    "KO.US", "MCD.US", "MMM.US", "MRK.US", "MSFT.US", "NKE.US", "PFE.US",
                    "PG.US", "VZ.US", "WBA.US", "WMT.US", "CSCO.US", "UNH.US",
                ],
            ),
        );

        Self {
            start: "1985-10-01".into(),
            end: "2022-02-10".into(),
            output_dir: "./market_data/".into(),
            price_field: default_price_field(),
            file_prefix: default_file_prefix(),
            groups,
        }
    }
}
