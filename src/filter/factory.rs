use anyhow::Result;
use tracing::debug;

use crate::{error::PipelineError, registry::Registries, stage::Stage};

use super::{BoundingBoxFilter, Filter};

/// Fluent builder for filters.
#[derive(Debug, Clone, Default)]
pub struct FilterFactory {
    filter_type: Option<String>,
}

impl FilterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, filter_type: &str) -> Self {
        self.filter_type = Some(filter_type.to_string());
        self
    }

    pub fn build(self) -> Result<Box<dyn Filter>> {
        let filter_type = self.filter_type.as_deref()
            .ok_or_else(|| PipelineError::incomplete("FilterFactory", "filter type not set; call with_type()"))?;
        let registries = Registries::global()?;
        let filter: Box<dyn Filter> = match registries.filters.resolve(filter_type)? {
            BoundingBoxFilter::NAME => Box::new(BoundingBoxFilter::new()),
            other => return Err(registries.filters.unknown(other).into()),
        };
        debug!(filter = filter.type_name(), "filter built");
        Ok(filter)
    }
}

impl From<FilterFactory> for Stage {
    fn from(factory: FilterFactory) -> Self {
        Stage::other(factory)
    }
}
