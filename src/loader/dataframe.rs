use anyhow::{Context, Result, anyhow};
use polars::prelude::*;
use serde_json::{Value, json};

use crate::{
    geo_frame::{GeoFrame, WGS84},
    io::csv::{frame_schema, read_csv_bytes, write_csv_bytes},
};

use super::{Loader, into_geo_frame};

/// A table already in memory.
#[derive(Debug, Clone)]
pub struct DataFrameLoader {
    frame: DataFrame,
    longitude_column: String,
    latitude_column: String,
    crs: String,
}

impl DataFrameLoader {
    pub const NAME: &'static str = "DataFrameLoader";

    pub fn new(frame: DataFrame, longitude_column: &str, latitude_column: &str) -> Self {
        Self {
            frame,
            longitude_column: longitude_column.to_string(),
            latitude_column: latitude_column.to_string(),
            crs: WGS84.to_string(),
        }
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.crs = crs.to_string();
        self
    }

    /// The table travels inside the config as CSV text plus its column types.
    pub fn from_config(config: &Value) -> Result<Self> {
        let field = |key: &str| config.get(key).and_then(Value::as_str)
            .ok_or_else(|| anyhow!("[loader::dataframe] Config is missing {key:?}"));
        let schema: Vec<(String, String)> = serde_json::from_value(config["schema"].clone())
            .context("[loader::dataframe] Config has no valid `schema`")?;
        let frame = read_csv_bytes(field("csv")?.as_bytes(), &schema)?;
        Ok(Self::new(frame, field("longitude_column")?, field("latitude_column")?).with_crs(field("crs")?))
    }
}

impl Loader for DataFrameLoader {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn read(&self) -> Result<GeoFrame> {
        into_geo_frame(self.frame.clone(), Self::NAME, &self.longitude_column, &self.latitude_column, &self.crs)
    }

    fn to_config(&self) -> Result<Value> {
        let csv = String::from_utf8(write_csv_bytes(&self.frame)?)
            .context("[loader::dataframe] CSV output is not UTF-8")?;
        Ok(json!({
            "longitude_column": self.longitude_column,
            "latitude_column": self.latitude_column,
            "crs": self.crs,
            "schema": frame_schema(&self.frame),
            "csv": csv,
        }))
    }

    fn preview(&self, format: crate::stage::PreviewFormat) -> Result<crate::stage::Preview> {
        let summary = json!({
            "rows": self.frame.height(),
            "columns": self.frame.get_column_names_str(),
            "longitude_column": self.longitude_column,
            "latitude_column": self.latitude_column,
            "crs": self.crs,
        });
        Ok(crate::stage::config_preview("Loader", Self::NAME, &summary, format))
    }
}
