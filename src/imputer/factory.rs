use anyhow::Result;
use tracing::debug;

use crate::{config::Config, error::PipelineError, registry::Registries, stage::Stage};

use super::{Imputer, SimpleGeoImputer};

const FACTORY: &str = "ImputerFactory";

/// Fluent builder for imputers.
#[derive(Debug, Clone, Default)]
pub struct ImputerFactory {
    imputer_type: Option<String>,
    columns: Option<(String, String)>,
    address_column: Option<String>,
    config: Config,
}

impl ImputerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_type(mut self, imputer_type: &str) -> Self {
        self.imputer_type = Some(imputer_type.to_string());
        self
    }

    /// Longitude and latitude columns to impute.
    pub fn on_columns(mut self, longitude_column: &str, latitude_column: &str) -> Self {
        self.columns = Some((longitude_column.to_string(), latitude_column.to_string()));
        self
    }

    /// Column holding free-text addresses, for `AddressGeoImputer`.
    pub fn with_address_column(mut self, address_column: &str) -> Self {
        self.address_column = Some(address_column.to_string());
        self
    }

    pub fn build(self) -> Result<Box<dyn Imputer>> {
        let imputer_type = self.imputer_type.as_deref()
            .ok_or_else(|| PipelineError::incomplete(FACTORY, "imputer type not set; call with_type()"))?;
        let registries = Registries::global()?;
        let imputer_type = registries.imputers.resolve(imputer_type)?;
        let (longitude, latitude) = self.columns.as_ref()
            .ok_or_else(|| PipelineError::incomplete(FACTORY, "coordinate columns not set; call on_columns()"))?;

        let imputer: Box<dyn Imputer> = match imputer_type {
            SimpleGeoImputer::NAME => Box::new(SimpleGeoImputer::new(longitude, latitude)),
            #[cfg(feature = "download")]
            super::AddressGeoImputer::NAME => {
                let address = self.address_column.as_deref().ok_or_else(|| PipelineError::incomplete(
                    FACTORY,
                    "AddressGeoImputer needs an address column; call with_address_column()",
                ))?;
                Box::new(super::AddressGeoImputer::new(longitude, latitude, address)
                    .with_network(self.config.network.clone()))
            }
            other => return Err(registries.imputers.unknown(other).into()),
        };
        debug!(imputer = imputer_type, longitude = %longitude, latitude = %latitude, "imputer built");
        Ok(imputer)
    }
}

impl From<ImputerFactory> for Stage {
    fn from(factory: ImputerFactory) -> Self {
        Stage::other(factory)
    }
}
