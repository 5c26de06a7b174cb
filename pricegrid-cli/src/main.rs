//! PriceGrid CLI: fetch, check, convert, and config commands.
//!
//! Commands:
//! - `fetch` - download every market group from Stooq and write its artifacts
//! - `check` - run the config validator without touching the network
//! - `convert` - rebuild a price matrix from a persisted raw table
//! - `init-config` - write the built-in Stooq config as TOML

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use pricegrid_core::config::{MarketConfig, CHECKS_PASSED};
use pricegrid_core::convert::convert_labeled;
use pricegrid_core::data::StooqProvider;
use pricegrid_core::export::{load_table, write_npy};
use pricegrid_core::pipeline::{run_all, StdoutProgress};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pricegrid",
    version,
    about = "PriceGrid CLI: daily market data to dense price matrices"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every market group and write table, CSV, matrix, and sidecar files.
    Fetch(ConfigArgs),

    /// Validate the market config and exit.
    Check(ConfigArgs),

    /// Convert a persisted raw table (.parquet) into a price matrix (.npy).
    Convert {
        /// Raw table written by `fetch`.
        #[arg(long)]
        table: PathBuf,

        /// OHLC field to extract (case-insensitive).
        #[arg(long, default_value = "Close")]
        price_field: String,

        /// Output path. Defaults to the table path with a .npy extension.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Write the built-in Stooq market config as TOML.
    InitConfig {
        #[arg(long, default_value = "pricegrid.toml")]
        out: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

/// Config source plus per-field overrides.
#[derive(Args)]
struct ConfigArgs {
    /// Path to a TOML market config. Defaults to the built-in Stooq groups.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD).
    #[arg(long)]
    end: Option<String>,

    /// Relative output directory, written as `./dir/`.
    #[arg(long)]
    output_dir: Option<String>,

    /// OHLC field to extract (case-insensitive).
    #[arg(long)]
    price_field: Option<String>,
}

impl ConfigArgs {
    fn load(self) -> Result<MarketConfig> {
        let mut config = match &self.config {
            Some(path) => MarketConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => MarketConfig::default_stooq(),
        };

        if let Some(start) = self.start {
            config.start = start;
        }
        if let Some(end) = self.end {
            config.end = end;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(price_field) = self.price_field {
            config.price_field = price_field;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Fetch(args) => run_fetch(args.load()?),
        Commands::Check(args) => run_check(&args.load()?),
        Commands::Convert {
            table,
            price_field,
            out,
        } => run_convert(&table, &price_field, out),
        Commands::InitConfig { out, force } => run_init_config(&out, force),
    }
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_fetch(config: MarketConfig) -> Result<()> {
    let provider = StooqProvider::new()?;
    let reports = run_all(&provider, &config, &StdoutProgress)?;
    debug!(groups = reports.len(), "fetch finished");
    Ok(())
}

fn run_check(config: &MarketConfig) -> Result<()> {
    let validated = config.validate()?;
    info!(range = %validated.range, price_field = %validated.price_field, "config valid");
    println!("{CHECKS_PASSED}");
    Ok(())
}

fn run_convert(table_path: &Path, price_field: &str, out: Option<PathBuf>) -> Result<()> {
    let table = load_table(table_path)
        .with_context(|| format!("loading table {}", table_path.display()))?;
    let matrix = convert_labeled(&table, price_field)?;

    let out = out.unwrap_or_else(|| table_path.with_extension("npy"));
    write_npy(&matrix.prices, &out)?;

    let stem = table_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!(
        "{stem}: n_assets = {}, days = {}",
        matrix.n_assets(),
        matrix.days()
    );
    info!(out = %out.display(), "matrix written");
    Ok(())
}

fn run_init_config(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", out.display());
    }
    let content = MarketConfig::default_stooq().to_toml()?;
    std::fs::write(out, content).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {}", out.display());
    Ok(())
}
