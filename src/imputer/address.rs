use anyhow::{Result, anyhow};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    common::{geocode, http_client},
    config::Network,
    geo_frame::{GeoFrame, coordinates_of},
    urban_layer::UrbanLayer,
};

use super::{Imputer, ImputerColumns};

/// Geocodes an address column for rows missing coordinates, searching only inside the
/// urban layer's extent. Rows that cannot be geocoded are dropped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AddressGeoImputer {
    #[serde(flatten)]
    columns: ImputerColumns,
    address_column: String,
    #[serde(default)]
    network: Network,
}

impl AddressGeoImputer {
    pub const NAME: &'static str = "AddressGeoImputer";

    pub fn new(longitude_column: &str, latitude_column: &str, address_column: &str) -> Self {
        Self {
            columns: ImputerColumns::new(longitude_column, latitude_column),
            address_column: address_column.to_string(),
            network: Network::default(),
        }
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Ok(serde_json::from_value(config.clone())?)
    }
}

impl Imputer for AddressGeoImputer {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn columns(&self) -> &ImputerColumns { &self.columns }

    fn impute(&self, data: GeoFrame, layer: &dyn UrbanLayer) -> Result<GeoFrame> {
        data.require_columns(Self::NAME, &[self.address_column.as_str()])?;
        let (lon_name, lat_name) = (&self.columns.longitude_column, &self.columns.latitude_column);
        let mut coords = coordinates_of(data.frame(), lon_name, lat_name)?;
        let missing = coords.iter().filter(|c| c.is_none()).count();
        if missing == 0 {
            return Ok(data);
        }

        let extent = layer.get_layer_bounding_box()?;
        let addresses = data.frame().column(&self.address_column)?.cast(&DataType::String)?;
        let addresses = addresses.str()
            .map_err(|e| anyhow!("[imputer::address] Address column is not text: {e}"))?;
        let client = http_client(&self.network)?;

        info!(rows = missing, "geocoding rows without coordinates");
        for (coord, address) in coords.iter_mut().zip(addresses.into_iter()) {
            let (None, Some(address)) = (*coord, address) else { continue };
            match geocode(&client, address, Some(&extent), &self.network) {
                Ok(hit) => *coord = hit.map(|h| h.point),
                Err(err) => warn!(address, error = %err, "geocoding failed; row will be dropped"),
            }
        }

        let lon: Float64Chunked = coords.iter().map(|c| c.map(|c| c.x)).collect();
        let lat: Float64Chunked = coords.iter().map(|c| c.map(|c| c.y)).collect();
        let mask: BooleanChunked = coords.iter().map(|c| Some(c.is_some())).collect();
        data.with_column(lon.with_name(lon_name.as_str().into()).into_series())?
            .with_column(lat.with_name(lat_name.as_str().into()).into_series())?
            .filter(&mask)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
