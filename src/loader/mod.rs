//! Loaders: read point data into a [`GeoFrame`] in WGS84.

mod csv;
mod dataframe;
mod factory;
mod multi;
#[cfg(feature = "parquet")]
mod parquet;
mod shapefile;

use std::{fmt, path::PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::{Projector, is_wgs84, require_file_exists},
    error::PipelineError,
    geo_frame::{GeoFrame, WGS84, coordinates_of},
    registry::Registry,
    stage::{Preview, PreviewFormat, StageFamily, config_preview},
};

pub use csv::CsvLoader;
pub use dataframe::DataFrameLoader;
pub use factory::LoaderFactory;
pub use multi::MultiLoader;
#[cfg(feature = "parquet")]
pub use parquet::ParquetLoader;
pub use shapefile::ShapefileLoader;

/// File path, coordinate columns and source CRS of a file-backed loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSettings {
    pub file_path: PathBuf,
    #[serde(default)]
    pub longitude_column: Option<String>,
    #[serde(default)]
    pub latitude_column: Option<String>,
    /// CRS of the coordinates in the file; converted to WGS84 on load.
    #[serde(default = "default_crs")]
    pub coordinate_reference_system: String,
}

fn default_crs() -> String { WGS84.to_string() }

impl LoaderSettings {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            longitude_column: None,
            latitude_column: None,
            coordinate_reference_system: default_crs(),
        }
    }

    pub fn with_columns(mut self, longitude_column: &str, latitude_column: &str) -> Self {
        self.longitude_column = Some(longitude_column.to_string());
        self.latitude_column = Some(latitude_column.to_string());
        self
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.coordinate_reference_system = crs.to_string();
        self
    }

    /// `(longitude, latitude)` column names, or [`PipelineError::MissingAttribute`].
    pub fn coordinate_columns(&self, stage: &str) -> Result<(&str, &str)> {
        let longitude = self.longitude_column.as_deref().filter(|c| !c.is_empty())
            .ok_or_else(|| PipelineError::missing_attribute(stage, "longitude_column"))?;
        let latitude = self.latitude_column.as_deref().filter(|c| !c.is_empty())
            .ok_or_else(|| PipelineError::missing_attribute(stage, "latitude_column"))?;
        Ok((longitude, latitude))
    }
}

/// Reads a table with point coordinates.
///
/// Callers use [`Loader::load_data_from_file`], which checks the configured file and
/// columns before delegating to [`Loader::read`].
pub trait Loader: Send + fmt::Debug {
    /// Registry name.
    fn type_name(&self) -> &'static str;

    /// File-backed loaders return their settings; in-memory loaders return `None`.
    fn settings(&self) -> Option<&LoaderSettings> { None }

    /// Whether coordinate columns must be configured before loading.
    fn requires_coordinate_columns(&self) -> bool { true }

    /// Read and convert the data. Called only after the checks in `load_data_from_file`.
    fn read(&self) -> Result<GeoFrame>;

    fn to_config(&self) -> Result<Value>;

    fn load_data_from_file(&self) -> Result<GeoFrame> {
        if let Some(settings) = self.settings() {
            require_file_exists(&settings.file_path)?;
            if self.requires_coordinate_columns() {
                settings.coordinate_columns(self.type_name())?;
            }
        }
        let data = self.read()
            .with_context(|| format!("[loader] {} failed to load data", self.type_name()))?;
        tracing::debug!(loader = self.type_name(), rows = data.height(), "data loaded");
        Ok(data)
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(config_preview("Loader", self.type_name(), &self.to_config()?, format))
    }
}

/// Check the coordinate columns, convert them to WGS84 and wrap the table.
pub(crate) fn into_geo_frame(frame: DataFrame, stage: &str, longitude: &str, latitude: &str, crs: &str) -> Result<GeoFrame> {
    let missing = [longitude, latitude].into_iter()
        .filter(|name| frame.column(name).is_err())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(PipelineError::missing_columns(stage, &missing).into());
    }
    let frame = if is_wgs84(crs) { frame } else { reproject(frame, longitude, latitude, crs)? };
    GeoFrame::new(frame, longitude, latitude)
}

/// Replace the coordinate columns with their WGS84 equivalents; nulls stay null.
fn reproject(mut frame: DataFrame, longitude: &str, latitude: &str, crs: &str) -> Result<DataFrame> {
    let projector = Projector::to_wgs84(crs)?;
    let coords = coordinates_of(&frame, longitude, latitude)?
        .into_iter()
        .map(|coord| coord.map(|c| projector.project(c)).transpose())
        .collect::<Result<Vec<_>>>()?;
    let lon: Float64Chunked = coords.iter().map(|c| c.map(|c| c.x)).collect();
    let lat: Float64Chunked = coords.iter().map(|c| c.map(|c| c.y)).collect();
    frame.replace_or_add(longitude.into(), lon.with_name(longitude.into()).into_series())?;
    frame.replace_or_add(latitude.into(), lat.with_name(latitude.into()).into_series())?;
    Ok(frame)
}

/// Registers the shipped loaders.
pub(crate) fn register_builtin(registry: &mut Registry<dyn Loader>) -> Result<()> {
    debug_assert_eq!(registry.family(), StageFamily::Loader);
    registry.register(CsvLoader::NAME, |config| Ok(Box::new(CsvLoader::from_config(config)?)))?;
    #[cfg(feature = "parquet")]
    registry.register(ParquetLoader::NAME, |config| Ok(Box::new(ParquetLoader::from_config(config)?)))?;
    registry.register(ShapefileLoader::NAME, |config| Ok(Box::new(ShapefileLoader::from_config(config)?)))?;
    registry.register(DataFrameLoader::NAME, |config| Ok(Box::new(DataFrameLoader::from_config(config)?)))?;
    registry.register(MultiLoader::NAME, |config| Ok(Box::new(MultiLoader::from_config(config)?)))?;
    Ok(())
}

crate::stage::impl_into_stage!(Loader: CsvLoader, ShapefileLoader, DataFrameLoader, MultiLoader);
#[cfg(feature = "parquet")]
crate::stage::impl_into_stage!(Loader: ParquetLoader);
