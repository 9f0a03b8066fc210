use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{geo_frame::GeoFrame, io::parquet::read_parquet};

use super::{Loader, LoaderSettings, into_geo_frame};

/// Apache Parquet files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParquetLoader {
    #[serde(flatten)]
    settings: LoaderSettings,
}

impl ParquetLoader {
    pub const NAME: &'static str = "ParquetLoader";

    pub fn new(settings: LoaderSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Ok(serde_json::from_value(config.clone())?)
    }
}

impl Loader for ParquetLoader {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn settings(&self) -> Option<&LoaderSettings> { Some(&self.settings) }

    fn read(&self) -> Result<GeoFrame> {
        let (longitude, latitude) = self.settings.coordinate_columns(Self::NAME)?;
        let frame = read_parquet(&self.settings.file_path)?;
        into_geo_frame(frame, Self::NAME, longitude, latitude, &self.settings.coordinate_reference_system)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;

    #[test]
    fn loads_parquet_file() {
        let file = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        let mut df = df!("lng" => [1.0, 2.0], "lat" => [3.0, 4.0], "n" => [1i64, 2]).unwrap();
        ParquetWriter::new(file.reopen().unwrap()).finish(&mut df).unwrap();

        let loader = ParquetLoader::new(LoaderSettings::new(file.path()).with_columns("lng", "lat"));
        let data = loader.load_data_from_file().unwrap();
        assert_eq!(data.height(), 2);
        assert_eq!(data.frame().column("n").unwrap().i64().unwrap().get(1), Some(2));
    }
}
