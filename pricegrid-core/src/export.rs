//! Artifact persistence for one market group.
//!
//! Layout inside the output directory, for file stem `{stem}` (e.g. `stooq_snp`):
//! - `{stem}.parquet`: the raw table (all fields, nulls kept)
//! - `{stem}.csv`: the same table flattened to text
//! - `{stem}.npy`: the price matrix, NumPy v1.0 format, `<f8`, C order
//! - `{stem}.meta.json`: sidecar with shape, date span and a BLAKE3 hash
//!
//! Binary writes are atomic: write to `.tmp`, then rename into place.

use crate::convert::{LabeledMatrix, PriceMatrix};
use crate::table::{RawPriceTable, TableError, DATE_COLUMN};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parquet I/O error: {0}")]
    Parquet(#[from] PolarsError),

    #[error("csv export: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("metadata serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("table layout: {0}")]
    Table(#[from] TableError),

    #[error("npy format: {0}")]
    Npy(String),
}

impl ExportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The four artifact paths for one market group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub table: PathBuf,
    pub csv: PathBuf,
    pub matrix: PathBuf,
    pub meta: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            table: dir.join(format!("{stem}.parquet")),
            csv: dir.join(format!("{stem}.csv")),
            matrix: dir.join(format!("{stem}.npy")),
            meta: dir.join(format!("{stem}.meta.json")),
        }
    }
}

/// Metadata sidecar written next to each matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixMeta {
    pub group: String,
    pub name: String,
    pub symbols: Vec<String>,
    pub price_field: String,
    pub requested_start: String,
    pub requested_end: String,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub n_assets: usize,
    pub days: usize,
    /// BLAKE3 of the matrix data bytes (little-endian f64, row-major).
    pub data_hash: String,
    pub created_at: chrono::NaiveDateTime,
}

impl MatrixMeta {
    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| ExportError::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self, ExportError> {
        let content = fs::read_to_string(path).map_err(|e| ExportError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Hash of a matrix's data bytes, as stored in [`MatrixMeta::data_hash`].
pub fn matrix_hash(prices: &PriceMatrix) -> String {
    blake3::hash(&npy_data_bytes(prices)).to_hex().to_string()
}

/// Build the sidecar for a converted matrix.
pub fn matrix_meta(
    group: &str,
    name: &str,
    price_field: &str,
    requested: (&str, &str),
    matrix: &LabeledMatrix,
) -> MatrixMeta {
    MatrixMeta {
        group: group.to_string(),
        name: name.to_string(),
        symbols: matrix.symbols.clone(),
        price_field: price_field.to_string(),
        requested_start: requested.0.to_string(),
        requested_end: requested.1.to_string(),
        first_date: matrix.dates.first().copied(),
        last_date: matrix.dates.last().copied(),
        n_assets: matrix.n_assets(),
        days: matrix.days(),
        data_hash: matrix_hash(&matrix.prices),
        created_at: chrono::Local::now().naive_local(),
    }
}

// ── Raw table ───────────────────────────────────────────────────────

/// Write the raw table to Parquet.
pub fn write_table_parquet(table: &RawPriceTable, path: &Path) -> Result<(), ExportError> {
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| ExportError::io(&tmp_path, e))?;
    if let Err(e) = ParquetWriter::new(file).finish(&mut table.frame().clone()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    atomic_rename(&tmp_path, path)
}

/// Load a raw table written by [`write_table_parquet`].
pub fn load_table(path: &Path) -> Result<RawPriceTable, ExportError> {
    let file = fs::File::open(path).map_err(|e| ExportError::io(path, e))?;
    let df = ParquetReader::new(file).finish()?;
    Ok(RawPriceTable::from_frame(df)?)
}

/// Write the table as CSV: `Date` then one column per `Field:Symbol` key.
/// Missing values are empty cells.
pub fn write_table_csv(table: &RawPriceTable, path: &Path) -> Result<(), ExportError> {
    let tmp_path = path.with_extension("csv.tmp");
    if let Err(e) = write_csv_records(table, &tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    atomic_rename(&tmp_path, path)
}

fn write_csv_records(table: &RawPriceTable, path: &Path) -> Result<(), ExportError> {
    let dates = table.dates()?;
    let columns = table
        .keys()
        .iter()
        .map(|k| table.values(k))
        .collect::<Result<Vec<_>, _>>()?;

    let mut wtr = ::csv::Writer::from_path(path)?;

    let mut header = vec![DATE_COLUMN.to_string()];
    header.extend(table.keys().iter().map(|k| k.column_name()));
    wtr.write_record(&header)?;

    for (row, date) in dates.iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(date.to_string());
        for column in &columns {
            record.push(column[row].map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush().map_err(|e| ExportError::io(path, e))?;
    Ok(())
}

// ── NumPy .npy ──────────────────────────────────────────────────────

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Encode a matrix in NumPy `.npy` v1.0 format.
pub fn encode_npy(prices: &PriceMatrix) -> Vec<u8> {
    let (rows, cols) = prices.dim();
    let dict = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");

    // magic + version + u16 length + dict + padding + '\n' must align
    let preamble = NPY_MAGIC.len() + 2 + 2;
    let unpadded = preamble + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(preamble + header_len + rows * cols * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    out.extend_from_slice(&npy_data_bytes(prices));
    out
}

/// Decode a 2-D `<f8` C-order `.npy` v1.0 buffer.
pub fn decode_npy(bytes: &[u8]) -> Result<PriceMatrix, ExportError> {
    let preamble = NPY_MAGIC.len() + 4;
    if bytes.len() < preamble || &bytes[..NPY_MAGIC.len()] != NPY_MAGIC {
        return Err(ExportError::Npy("missing NUMPY magic".into()));
    }
    if bytes[6] != 1 {
        return Err(ExportError::Npy(format!("unsupported version {}.{}", bytes[6], bytes[7])));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = preamble + header_len;
    let header = bytes
        .get(preamble..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| ExportError::Npy("truncated header".into()))?;

    if !header.contains("'descr': '<f8'") || !header.contains("'fortran_order': False") {
        return Err(ExportError::Npy(format!("unsupported header: {}", header.trim())));
    }
    let shape = parse_shape(header)?;
    let (rows, cols) = match shape.as_slice() {
        [r, c] => (*r, *c),
        _ => return Err(ExportError::Npy(format!("expected 2-D shape, got {shape:?}"))),
    };

    let data = &bytes[data_start..];
    if data.len() != rows * cols * 8 {
        return Err(ExportError::Npy(format!(
            "expected {} data bytes, found {}",
            rows * cols * 8,
            data.len()
        )));
    }
    let values: Vec<f64> = data
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();

    PriceMatrix::from_shape_vec((rows, cols), values)
        .map_err(|e| ExportError::Npy(format!("shape: {e}")))
}

/// Write a matrix to a `.npy` file.
pub fn write_npy(prices: &PriceMatrix, path: &Path) -> Result<(), ExportError> {
    let tmp_path = path.with_extension("npy.tmp");
    fs::write(&tmp_path, encode_npy(prices)).map_err(|e| ExportError::io(&tmp_path, e))?;
    atomic_rename(&tmp_path, path)
}

/// Read a matrix written by [`write_npy`].
pub fn read_npy(path: &Path) -> Result<PriceMatrix, ExportError> {
    let bytes = fs::read(path).map_err(|e| ExportError::io(path, e))?;
    decode_npy(&bytes)
}

fn npy_data_bytes(prices: &PriceMatrix) -> Vec<u8> {
    // iter() walks in logical row-major order whatever the memory layout
    prices.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn parse_shape(header: &str) -> Result<Vec<usize>, ExportError> {
    let start = header
        .find("'shape': (")
        .map(|i| i + "'shape': (".len())
        .ok_or_else(|| ExportError::Npy("header has no shape".into()))?;
    let end = header[start..]
        .find(')')
        .map(|i| start + i)
        .ok_or_else(|| ExportError::Npy("unterminated shape".into()))?;

    header[start..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| ExportError::Npy(format!("bad shape entry '{s}'")))
        })
        .collect()
}

fn atomic_rename(tmp_path: &Path, path: &Path) -> Result<(), ExportError> {
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        ExportError::io(path, e)
    })
}
