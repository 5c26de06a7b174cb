//! PriceGrid Core: market data configuration, fetching, and matrix conversion.
//!
//! This crate turns a list of market groups into dense price matrices:
//! - Config validation (date range, groups, output path, price field)
//! - Stooq daily data provider
//! - Raw price table assembly (union of dates, nulls for missing bars)
//! - Table → `(days, assets)` matrix conversion with row completeness and
//!   ascending date order
//! - Artifact persistence (Parquet, CSV, `.npy`, JSON sidecar)

pub mod config;
pub mod convert;
pub mod data;
pub mod export;
pub mod pipeline;
pub mod table;

pub use config::{
    validate, ConfigError, DateRange, DateStamp, MarketConfig, MarketGroup, MarketGroups,
    PriceField, ValidatedConfig,
};
pub use convert::{convert, convert_labeled, ConversionError, LabeledMatrix, PriceMatrix};
pub use data::{DataError, DataProvider, DataSource, FetchResult, RawBar, StooqProvider};
pub use export::{ArtifactPaths, ExportError, MatrixMeta};
pub use pipeline::{
    fetch_group, run_all, run_all_in, GroupProgress, GroupReport, NoProgress, PipelineError,
    StdoutProgress,
};
pub use table::{ColumnKey, RawPriceTable, TableError};
