//! Filters: drop rows that should not take part in the analysis.

mod bbox;
mod factory;

use std::fmt;

use anyhow::Result;
use serde_json::Value;

use crate::{
    geo_frame::GeoFrame,
    registry::Registry,
    stage::{Preview, PreviewFormat, StageFamily, config_preview},
    urban_layer::UrbanLayer,
};

pub use bbox::BoundingBoxFilter;
pub use factory::FilterFactory;

/// Removes rows. [`Filter::transform`] checks the data's coordinate columns and calls
/// [`Filter::filter_rows`].
pub trait Filter: Send + fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn filter_rows(&self, data: GeoFrame, layer: &dyn UrbanLayer) -> Result<GeoFrame>;

    fn to_config(&self) -> Result<Value> {
        Ok(Value::Object(Default::default()))
    }

    fn transform(&self, data: GeoFrame, layer: &dyn UrbanLayer) -> Result<GeoFrame> {
        data.require_columns(self.type_name(), &[data.longitude_column(), data.latitude_column()])?;
        let before = data.height();
        let kept = self.filter_rows(data, layer)?;
        tracing::debug!(filter = self.type_name(), before, after = kept.height(), "rows filtered");
        Ok(kept)
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(config_preview("Filter", self.type_name(), &self.to_config()?, format))
    }
}

/// Registers the shipped filters.
pub(crate) fn register_builtin(registry: &mut Registry<dyn Filter>) -> Result<()> {
    debug_assert_eq!(registry.family(), StageFamily::Filter);
    registry.register(BoundingBoxFilter::NAME, |config| Ok(Box::new(BoundingBoxFilter::from_config(config)?)))?;
    Ok(())
}

crate::stage::impl_into_stage!(Filter: BoundingBoxFilter);
