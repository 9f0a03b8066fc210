use anyhow::Result;
use polars::prelude::*;
use serde_json::{Value, json};

use crate::{
    geo_frame::GeoFrame,
    stage::{Preview, PreviewFormat},
    urban_layer::UrbanLayer,
};

use super::Filter;

const ACTION: &str = "Filter data to the bounding box of the urban layer";

/// Keeps rows whose coordinates fall inside the urban layer's bounding box, edges included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBoxFilter;

impl BoundingBoxFilter {
    pub const NAME: &'static str = "BoundingBoxFilter";

    pub fn new() -> Self {
        Self
    }

    pub fn from_config(_config: &Value) -> Result<Self> {
        Ok(Self)
    }
}

impl Filter for BoundingBoxFilter {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn filter_rows(&self, data: GeoFrame, layer: &dyn UrbanLayer) -> Result<GeoFrame> {
        let bbox = layer.get_layer_bounding_box()?;
        let (min, max) = (bbox.min(), bbox.max());
        let mask: BooleanChunked = data.coordinates()?
            .into_iter()
            .map(|coord| Some(coord.is_some_and(|c| c.x >= min.x && c.x <= max.x && c.y >= min.y && c.y <= max.y)))
            .collect();
        data.filter(&mask)
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(match format {
            PreviewFormat::Ascii => Preview::Ascii(format!("Filter: {}\n  Action: {ACTION}", Self::NAME)),
            PreviewFormat::Json => Preview::Json(json!({ "filter": Self::NAME, "action": ACTION })),
        })
    }
}

#[cfg(test)]
mod tests {
    use geo::LineString;

    use crate::{
        error::PipelineError,
        urban_layer::{CustomUrbanLayer, Features},
    };

    use super::*;

    fn layer() -> CustomUrbanLayer {
        CustomUrbanLayer::from_features(Features::from_geometries(vec![
            LineString::from(vec![(0.0, 0.0), (2.0, 1.0)]).into(),
        ]))
    }

    #[test]
    fn keeps_rows_inside_inclusive() {
        let df = df!(
            "lon" => [Some(1.0), Some(2.0), Some(3.0), None],
            "lat" => [Some(0.5), Some(1.0), Some(0.5), Some(0.5)],
        ).unwrap();
        let data = GeoFrame::new(df, "lon", "lat").unwrap();
        let kept = BoundingBoxFilter.transform(data, &layer()).unwrap();
        assert_eq!(kept.height(), 2);
    }

    #[test]
    fn unbuilt_layer_is_an_error() {
        let data = GeoFrame::new(df!("lon" => [1.0], "lat" => [1.0]).unwrap(), "lon", "lat").unwrap();
        let err = BoundingBoxFilter.transform(data, &CustomUrbanLayer::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerNotBuilt)));
    }

    #[test]
    fn preview_describes_action() {
        let preview = BoundingBoxFilter.preview(PreviewFormat::Json).unwrap();
        assert_eq!(preview.as_json().unwrap()["filter"], "BoundingBoxFilter");
    }
}
