use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{geo_frame::GeoFrame, io::csv::read_csv};

use super::{Loader, LoaderSettings, into_geo_frame};

/// Delimited text with a header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvLoader {
    #[serde(flatten)]
    settings: LoaderSettings,
    #[serde(default = "default_separator")]
    separator: char,
}

fn default_separator() -> char { ',' }

impl CsvLoader {
    pub const NAME: &'static str = "CSVLoader";

    pub fn new(settings: LoaderSettings) -> Self {
        Self { settings, separator: default_separator() }
    }

    /// Single-byte field separator such as `;` or `\t`.
    pub fn with_separator(mut self, separator: char) -> Result<Self> {
        ensure!(separator.is_ascii(), "[loader::csv] Separator must be a single ASCII character, got {separator:?}");
        self.separator = separator;
        Ok(self)
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let loader: Self = serde_json::from_value(config.clone())?;
        ensure!(loader.separator.is_ascii(), "[loader::csv] Separator must be a single ASCII character");
        Ok(loader)
    }
}

impl Loader for CsvLoader {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn settings(&self) -> Option<&LoaderSettings> { Some(&self.settings) }

    fn read(&self) -> Result<GeoFrame> {
        let (longitude, latitude) = self.settings.coordinate_columns(Self::NAME)?;
        let frame = read_csv(&self.settings.file_path, self.separator as u8)?;
        into_geo_frame(frame, Self::NAME, longitude, latitude, &self.settings.coordinate_reference_system)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::error::PipelineError;

    use super::*;

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_with_separator() {
        let file = csv_file("lon;lat;kind\n-73.99;40.69;a\n-73.98;40.70;b\n");
        let loader = CsvLoader::new(LoaderSettings::new(file.path()).with_columns("lon", "lat"))
            .with_separator(';')
            .unwrap();
        let data = loader.load_data_from_file().unwrap();
        assert_eq!(data.height(), 2);
        assert_eq!(data.longitude_column(), "lon");
    }

    #[test]
    fn missing_file_is_reported() {
        let loader = CsvLoader::new(LoaderSettings::new("/nonexistent/data.csv").with_columns("lon", "lat"));
        let err = loader.load_data_from_file().unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[test]
    fn unconfigured_columns_fail_before_reading() {
        let file = csv_file("lon,lat\n1,2\n");
        let loader = CsvLoader::new(LoaderSettings::new(file.path()));
        let err = loader.load_data_from_file().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingAttribute { .. })));
    }

    #[test]
    fn absent_coordinate_column_is_named() {
        let file = csv_file("x,lat\n1,2\n");
        let loader = CsvLoader::new(LoaderSettings::new(file.path()).with_columns("lon", "lat"));
        let err = loader.load_data_from_file().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingColumns { .. })));
    }

    #[test]
    fn config_round_trip() {
        let loader = CsvLoader::new(LoaderSettings::new("a.csv").with_columns("x", "y").with_crs("EPSG:3857"))
            .with_separator('\t')
            .unwrap();
        let config = loader.to_config().unwrap();
        assert_eq!(config["file_path"], "a.csv");
        assert_eq!(CsvLoader::from_config(&config).unwrap(), loader);
    }
}
