//! Imputers: fill in or discard rows with missing coordinates.

#[cfg(feature = "download")]
mod address;
mod factory;
mod simple;

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::PipelineError,
    geo_frame::GeoFrame,
    registry::Registry,
    stage::{Preview, PreviewFormat, StageFamily, config_preview},
    urban_layer::UrbanLayer,
};

#[cfg(feature = "download")]
pub use address::AddressGeoImputer;
pub use factory::ImputerFactory;
pub use simple::SimpleGeoImputer;

/// Coordinate columns an imputer works on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImputerColumns {
    pub longitude_column: String,
    pub latitude_column: String,
}

impl ImputerColumns {
    pub fn new(longitude_column: &str, latitude_column: &str) -> Self {
        Self { longitude_column: longitude_column.to_string(), latitude_column: latitude_column.to_string() }
    }
}

/// Repairs missing coordinates.
///
/// [`Imputer::transform`] checks that the columns are configured and present, then
/// calls [`Imputer::impute`].
pub trait Imputer: Send + fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn columns(&self) -> &ImputerColumns;

    fn impute(&self, data: GeoFrame, layer: &dyn UrbanLayer) -> Result<GeoFrame>;

    fn to_config(&self) -> Result<Value>;

    fn transform(&self, data: GeoFrame, layer: &dyn UrbanLayer) -> Result<GeoFrame> {
        let columns = self.columns();
        if columns.longitude_column.is_empty() {
            return Err(PipelineError::missing_attribute(self.type_name(), "longitude_column").into());
        }
        if columns.latitude_column.is_empty() {
            return Err(PipelineError::missing_attribute(self.type_name(), "latitude_column").into());
        }
        data.require_columns(self.type_name(), &[columns.longitude_column.as_str(), columns.latitude_column.as_str()])?;

        let before = data.height();
        let imputed = self.impute(data, layer)?;
        tracing::debug!(imputer = self.type_name(), before, after = imputed.height(), "imputation done");
        Ok(imputed)
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(config_preview("Imputer", self.type_name(), &self.to_config()?, format))
    }
}

/// Registers the shipped imputers.
pub(crate) fn register_builtin(registry: &mut Registry<dyn Imputer>) -> Result<()> {
    debug_assert_eq!(registry.family(), StageFamily::Imputer);
    registry.register(SimpleGeoImputer::NAME, |config| Ok(Box::new(SimpleGeoImputer::from_config(config)?)))?;
    #[cfg(feature = "download")]
    registry.register(AddressGeoImputer::NAME, |config| Ok(Box::new(AddressGeoImputer::from_config(config)?)))?;
    Ok(())
}

crate::stage::impl_into_stage!(Imputer: SimpleGeoImputer);
#[cfg(feature = "download")]
crate::stage::impl_into_stage!(Imputer: AddressGeoImputer);
