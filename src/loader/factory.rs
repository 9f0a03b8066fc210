use std::path::PathBuf;

use anyhow::Result;
use polars::prelude::DataFrame;
use tracing::debug;

use crate::{common::extension, error::PipelineError, geo_frame::WGS84, stage::Stage};

use super::{CsvLoader, DataFrameLoader, Loader, LoaderSettings, ShapefileLoader};

const FACTORY: &str = "LoaderFactory";

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Frame(DataFrame),
}

/// Fluent builder picking a loader from the file extension.
#[derive(Debug, Clone, Default)]
pub struct LoaderFactory {
    source: Option<Source>,
    columns: Option<(String, String)>,
    crs: Option<String>,
    separator: Option<char>,
}

impl LoaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `.csv`, `.tsv`, `.txt`, `.parquet` or `.shp`.
    pub fn from_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(Source::File(path.into()));
        self
    }

    pub fn from_dataframe(mut self, frame: DataFrame) -> Self {
        self.source = Some(Source::Frame(frame));
        self
    }

    pub fn with_columns(mut self, longitude_column: &str, latitude_column: &str) -> Self {
        self.columns = Some((longitude_column.to_string(), latitude_column.to_string()));
        self
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.crs = Some(crs.to_string());
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn build(self) -> Result<Box<dyn Loader>> {
        let source = self.source.clone()
            .ok_or_else(|| PipelineError::incomplete(FACTORY, "no source; call from_file() or from_dataframe()"))?;
        let crs = self.crs.clone().unwrap_or_else(|| WGS84.to_string());

        let loader: Box<dyn Loader> = match source {
            Source::Frame(frame) => {
                let (longitude, latitude) = self.required_columns("in-memory data")?;
                Box::new(DataFrameLoader::new(frame, longitude, latitude).with_crs(&crs))
            }
            Source::File(path) => {
                let ext = extension(&path).unwrap_or_default();
                let mut settings = LoaderSettings::new(&path).with_crs(&crs);
                if let Some((longitude, latitude)) = &self.columns {
                    settings = settings.with_columns(longitude, latitude);
                }
                match ext.as_str() {
                    "csv" | "tsv" | "txt" => {
                        self.required_columns(&ext)?;
                        let separator = self.separator.unwrap_or(if ext == "tsv" { '\t' } else { ',' });
                        Box::new(CsvLoader::new(settings).with_separator(separator)?)
                    }
                    #[cfg(feature = "parquet")]
                    "parquet" => {
                        self.required_columns(&ext)?;
                        Box::new(super::ParquetLoader::new(settings))
                    }
                    "shp" => Box::new(ShapefileLoader::new(settings)),
                    other => {
                        return Err(PipelineError::incomplete(
                            FACTORY,
                            format!("unsupported file extension {other:?} for {}", path.display()),
                        ).into());
                    }
                }
            }
        };
        debug!(loader = loader.type_name(), "loader built");
        Ok(loader)
    }

    fn required_columns(&self, what: &str) -> Result<(&str, &str)> {
        self.columns.as_ref()
            .map(|(lon, lat)| (lon.as_str(), lat.as_str()))
            .ok_or_else(|| PipelineError::incomplete(
                FACTORY,
                format!("{what} needs coordinate columns; call with_columns()"),
            ).into())
    }
}

impl From<LoaderFactory> for Stage {
    fn from(factory: LoaderFactory) -> Self {
        Stage::other(factory)
    }
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;

    #[test]
    fn picks_loader_by_extension() {
        let loader = LoaderFactory::new().from_file("trips.csv").with_columns("lon", "lat").build().unwrap();
        assert_eq!(loader.type_name(), CsvLoader::NAME);

        let loader = LoaderFactory::new().from_file("zones.SHP").build().unwrap();
        assert_eq!(loader.type_name(), ShapefileLoader::NAME);
    }

    #[test]
    fn csv_requires_columns() {
        let err = LoaderFactory::new().from_file("trips.csv").build().unwrap_err();
        assert!(err.to_string().contains("with_columns()"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = LoaderFactory::new().from_file("trips.xlsx").with_columns("a", "b").build().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::IncompleteFactory { .. })));
    }

    #[test]
    fn dataframe_source() {
        let df = df!("lon" => [1.0], "lat" => [2.0]).unwrap();
        let loader = LoaderFactory::new().from_dataframe(df).with_columns("lon", "lat").build().unwrap();
        assert_eq!(loader.load_data_from_file().unwrap().height(), 1);
    }
}
