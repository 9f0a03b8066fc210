//! Enrichers: aggregate mapped rows per feature and write the result onto the layer.

mod aggregator;
mod config;
mod factory;
mod single;

use std::fmt;

use anyhow::Result;
use serde_json::Value;

use crate::{
    error::PipelineError,
    geo_frame::GeoFrame,
    registry::Registry,
    stage::{Preview, PreviewFormat, StageFamily, config_preview},
    urban_layer::UrbanLayer,
};

pub use aggregator::{Aggregated, AggregationMethod, Aggregator, CountAggregator, SimpleAggregator};
pub use config::{Action, EnricherConfig};
pub use factory::EnricherFactory;
pub use single::SingleAggregatorEnricher;

/// Adds one column to an urban layer's feature table.
///
/// [`Enricher::enrich`] rejects empty input and missing columns and makes sure the layer
/// is built before calling [`Enricher::enrich_layer`].
pub trait Enricher: Send + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Data columns the enrichment reads.
    fn required_columns(&self) -> Vec<&str>;

    /// Layer column the enrichment writes.
    fn output_column(&self) -> &str;

    fn enrich_layer(&self, data: &GeoFrame, layer: &mut dyn UrbanLayer) -> Result<()>;

    fn to_config(&self) -> Result<Value>;

    fn enrich(&self, data: &GeoFrame, layer: &mut dyn UrbanLayer) -> Result<()> {
        if data.is_empty() {
            return Err(PipelineError::EmptyInput { stage: self.type_name().to_string() }.into());
        }
        data.require_columns(self.type_name(), &self.required_columns())?;
        let features = layer.get_layer()?.len();
        self.enrich_layer(data, layer)?;
        tracing::debug!(
            enricher = self.type_name(),
            rows = data.height(),
            features,
            output = self.output_column(),
            "layer enriched",
        );
        Ok(())
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(config_preview("Enricher", self.type_name(), &self.to_config()?, format))
    }
}

/// Registers the shipped enrichers.
pub(crate) fn register_builtin(registry: &mut Registry<dyn Enricher>) -> Result<()> {
    debug_assert_eq!(registry.family(), StageFamily::Enricher);
    registry.register(SingleAggregatorEnricher::NAME, |config| {
        Ok(Box::new(SingleAggregatorEnricher::from_config(config)?))
    })?;
    Ok(())
}

crate::stage::impl_into_stage!(Enricher: SingleAggregatorEnricher);
