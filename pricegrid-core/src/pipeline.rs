//! Market group pipeline: validate → confirm → fetch → persist → convert → persist.
//!
//! Groups are processed one at a time in key order. The first error stops the
//! run; groups already written stay on disk.

use crate::config::{
    ConfigError, DateRange, MarketConfig, MarketGroup, ValidatedConfig, CHECKS_PASSED,
};
use crate::convert::{convert_labeled, ConversionError};
use crate::data::provider::{DataError, DataProvider};
use crate::export::{self, ArtifactPaths, ExportError};
use crate::table::{RawPriceTable, TableError};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch failed for '{symbol}': {source}")]
    Fetch { symbol: String, source: DataError },

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),
}

/// Outcome of one processed market group.
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub key: String,
    /// File stem, e.g. `stooq_snp`.
    pub stem: String,
    pub n_assets: usize,
    pub days: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub paths: ArtifactPaths,
}

impl GroupReport {
    /// The console summary line: `<stem>: n_assets = <int>, days = <int>`.
    pub fn summary_line(&self) -> String {
        format!(
            "{}: n_assets = {}, days = {}",
            self.stem, self.n_assets, self.days
        )
    }
}

/// Progress callback for multi-group runs.
pub trait GroupProgress {
    /// Called once the config passes validation, before any group is fetched.
    fn on_validated(&self, validated: &ValidatedConfig);

    /// Called when starting to fetch a group.
    fn on_start(&self, key: &str, group: &MarketGroup, index: usize, total: usize);

    /// Called when a group's artifacts are all written.
    fn on_complete(&self, report: &GroupReport);

    /// Called when every group is done.
    fn on_batch_complete(&self, reports: &[GroupReport]);
}

/// Prints the per-group summary line to stdout.
pub struct StdoutProgress;

impl GroupProgress for StdoutProgress {
    fn on_validated(&self, _validated: &ValidatedConfig) {
        println!("{CHECKS_PASSED}");
    }

    fn on_start(&self, _key: &str, group: &MarketGroup, index: usize, total: usize) {
        println!(
            "[{}/{}] Fetching {} ({} symbols)...",
            index + 1,
            total,
            group.name,
            group.symbols.len()
        );
    }

    fn on_complete(&self, report: &GroupReport) {
        println!("{}", report.summary_line());
    }

    fn on_batch_complete(&self, reports: &[GroupReport]) {
        println!("\nDone: {} market group(s) written", reports.len());
    }
}

/// Reports nothing.
pub struct NoProgress;

impl GroupProgress for NoProgress {
    fn on_validated(&self, _validated: &ValidatedConfig) {}
    fn on_start(&self, _key: &str, _group: &MarketGroup, _index: usize, _total: usize) {}
    fn on_complete(&self, _report: &GroupReport) {}
    fn on_batch_complete(&self, _reports: &[GroupReport]) {}
}

/// Fetch every symbol of a group, sequentially, and assemble one table.
pub fn fetch_group(
    provider: &dyn DataProvider,
    group: &MarketGroup,
    range: &DateRange,
) -> Result<RawPriceTable, PipelineError> {
    let mut results = Vec::with_capacity(group.symbols.len());
    for symbol in &group.symbols {
        let result = provider
            .fetch(symbol, range)
            .map_err(|source| PipelineError::Fetch {
                symbol: symbol.clone(),
                source,
            })?;
        debug!(
            provider = provider.name(),
            symbol,
            bars = result.bars.len(),
            "fetched"
        );
        results.push(result);
    }
    Ok(RawPriceTable::assemble(&results)?)
}

/// Fetch, persist and convert a single group into `out_dir`.
pub fn process_group(
    provider: &dyn DataProvider,
    config: &MarketConfig,
    validated: &ValidatedConfig,
    out_dir: &Path,
    key: &str,
    group: &MarketGroup,
) -> Result<GroupReport, PipelineError> {
    let stem = config.file_stem(group);
    let paths = ArtifactPaths::new(out_dir, &stem);

    let table = fetch_group(provider, group, &validated.range)?;
    export::write_table_parquet(&table, &paths.table)?;
    export::write_table_csv(&table, &paths.csv)?;

    // the matrix is derived from the persisted table, not the in-memory one
    let table = export::load_table(&paths.table)?;
    let price_field = validated.price_field.as_str();
    let matrix = convert_labeled(&table, price_field)?;
    export::write_npy(&matrix.prices, &paths.matrix)?;

    let meta = export::matrix_meta(
        key,
        &group.name,
        price_field,
        (config.start.as_str(), config.end.as_str()),
        &matrix,
    );
    meta.write(&paths.meta)?;

    info!(
        group = key,
        stem = %stem,
        n_assets = matrix.n_assets(),
        days = matrix.days(),
        "group written"
    );

    Ok(GroupReport {
        key: key.to_string(),
        stem,
        n_assets: matrix.n_assets(),
        days: matrix.days(),
        first_date: meta.first_date,
        last_date: meta.last_date,
        paths,
    })
}

/// Validate the config, then process every group relative to the current directory.
pub fn run_all(
    provider: &dyn DataProvider,
    config: &MarketConfig,
    progress: &dyn GroupProgress,
) -> Result<Vec<GroupReport>, PipelineError> {
    run_all_in(provider, config, Path::new("."), progress)
}

/// [`run_all`] with the relative output directory resolved against `base_dir`.
pub fn run_all_in(
    provider: &dyn DataProvider,
    config: &MarketConfig,
    base_dir: &Path,
    progress: &dyn GroupProgress,
) -> Result<Vec<GroupReport>, PipelineError> {
    let validated = config.validate()?;
    progress.on_validated(&validated);

    let out_dir = base_dir.join(config.output_path());
    fs::create_dir_all(&out_dir).map_err(|source| ExportError::Io {
        path: out_dir.clone(),
        source,
    })?;
    info!(out_dir = %out_dir.display(), range = %validated.range, "writing market data");

    let total = config.groups.len();
    let mut reports = Vec::with_capacity(total);
    for (index, (key, group)) in config.groups.iter().enumerate() {
        progress.on_start(key, group, index, total);
        let report = process_group(provider, config, &validated, &out_dir, key, group)?;
        progress.on_complete(&report);
        reports.push(report);
    }

    progress.on_batch_complete(&reports);
    Ok(reports)
}
