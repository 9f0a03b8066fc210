//! Format-specific reading and writing.
//!
//! - `csv` - delimited tables for loaders and pipeline packs
//! - `parquet` - Parquet tables (requires `parquet` feature)
//! - `shp` - Shapefile geometries and their attribute tables
//! - `geojson` - GeoJSON geometries and feature collections
//! - `svg` - SVG output for static maps

pub(crate) mod csv;
pub(crate) mod geojson;
pub(crate) mod shp;
pub(crate) mod svg;

#[cfg(feature = "parquet")]
pub(crate) mod parquet;
