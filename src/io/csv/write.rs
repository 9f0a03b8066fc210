//! CSV writing operations.

use anyhow::{Context, Result};
use polars::{frame::DataFrame, io::SerWriter, prelude::{CsvWriter, DataType}};

/// Write a DataFrame to CSV bytes.
pub(crate) fn write_csv_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    CsvWriter::new(&mut out)
        .include_header(true)
        .finish(&mut df.clone())
        .context("[io::csv::write] Failed to write CSV to bytes")?;
    Ok(out)
}

/// Short dtype name stored alongside CSV tables; anything exotic is stored as text.
pub(crate) fn dtype_name(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean => "bool",
        DataType::Int8 | DataType::Int16 | DataType::Int32 => "i32",
        DataType::Int64 => "i64",
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => "u32",
        DataType::UInt64 => "u64",
        DataType::Float32 => "f32",
        DataType::Float64 => "f64",
        _ => "str",
    }
}

/// `(column, dtype name)` pairs for every column of `df`, in order.
pub(crate) fn frame_schema(df: &DataFrame) -> Vec<(String, String)> {
    df.get_columns().iter()
        .map(|column| (column.name().to_string(), dtype_name(column.dtype()).to_string()))
        .collect()
}
