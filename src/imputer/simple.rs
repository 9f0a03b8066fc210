use anyhow::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    geo_frame::{GeoFrame, coordinates_of},
    urban_layer::UrbanLayer,
};

use super::{Imputer, ImputerColumns};

/// Drops rows whose longitude or latitude is missing or not a finite number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimpleGeoImputer {
    #[serde(flatten)]
    columns: ImputerColumns,
}

impl SimpleGeoImputer {
    pub const NAME: &'static str = "SimpleGeoImputer";

    pub fn new(longitude_column: &str, latitude_column: &str) -> Self {
        Self { columns: ImputerColumns::new(longitude_column, latitude_column) }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Ok(serde_json::from_value(config.clone())?)
    }
}

impl Imputer for SimpleGeoImputer {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn columns(&self) -> &ImputerColumns { &self.columns }

    fn impute(&self, data: GeoFrame, _layer: &dyn UrbanLayer) -> Result<GeoFrame> {
        let coords = coordinates_of(data.frame(), &self.columns.longitude_column, &self.columns.latitude_column)?;
        if coords.iter().all(Option::is_some) {
            return Ok(data);
        }
        let mask: BooleanChunked = coords.iter().map(|c| Some(c.is_some())).collect();
        data.filter(&mask)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
