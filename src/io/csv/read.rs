//! CSV reading operations.

use std::{fs::File, io::Cursor, path::Path, sync::Arc};

use anyhow::{Context, Result};
use polars::{frame::DataFrame, io::SerReader, prelude::{CsvReadOptions, DataType, Field, Schema, SchemaRef}};

/// Reads a delimited file with a header row from `path` into a Polars DataFrame.
pub(crate) fn read_csv(path: &Path, separator: u8) -> Result<DataFrame> {
    let file = File::open(path)
        .with_context(|| format!("[io::csv::read] Failed to open CSV file: {}", path.display()))?;
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|po| po.with_separator(separator))
        .into_reader_with_file_handle(file)
        .finish()
        .with_context(|| format!("[io::csv::read] Failed to read CSV from {:?}", path))
}

/// Read a DataFrame from CSV bytes, forcing the given column types.
pub(crate) fn read_csv_bytes(bytes: &[u8], schema: &[(String, String)]) -> Result<DataFrame> {
    let options = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(schema_ref(schema)?));
    options
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .context("[io::csv::read] Failed to read CSV from bytes")
}

/// Build a schema overwrite from `(column, dtype name)` pairs.
fn schema_ref(columns: &[(String, String)]) -> Result<SchemaRef> {
    let fields = columns.iter()
        .map(|(name, dtype)| Ok(Field::new(name.as_str().into(), parse_dtype(dtype)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Schema::from_iter(fields)))
}

/// Inverse of [`super::dtype_name`].
pub(crate) fn parse_dtype(name: &str) -> Result<DataType> {
    Ok(match name {
        "bool" => DataType::Boolean,
        "i32" => DataType::Int32,
        "i64" => DataType::Int64,
        "u32" => DataType::UInt32,
        "u64" => DataType::UInt64,
        "f32" => DataType::Float32,
        "f64" => DataType::Float64,
        "str" => DataType::String,
        other => anyhow::bail!("[io::csv::read] Unsupported column type {other:?}"),
    })
}
