//! Urban layers: the spatial reference data points are mapped onto.

mod custom;
mod factory;
mod features;
mod grid;
mod intersections;
mod nearest;
mod osm;
mod osm_features;
mod region;
mod streets;
mod tile2net;

use std::{fmt, path::PathBuf};

use anyhow::Result;
use geo::Rect;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    error::PipelineError,
    geo_frame::{GeoFrame, WGS84},
    registry::Registry,
    stage::{Preview, PreviewFormat, StageFamily, config_preview},
};

pub use custom::CustomUrbanLayer;
pub use factory::UrbanLayerFactory;
pub use features::Features;
pub use grid::GridLayer;
pub use intersections::OsmIntersections;
pub use osm::NetworkType;
pub use osm_features::{OsmFeatures, TagValue, Tags};
pub use region::{AdminRegions, Division};
pub use streets::OsmStreets;
pub use tile2net::{PedestrianFeature, Tile2NetLayer};

pub(crate) use nearest::map_to_nearest;

/// Which data columns to map and where to write the nearest feature index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub longitude_column: String,
    pub latitude_column: String,
    pub output_column: String,
    /// Maximum distance in metres; farther rows get no feature.
    #[serde(default)]
    pub threshold_distance: Option<f64>,
}

impl Mapping {
    pub fn new(longitude_column: &str, latitude_column: &str, output_column: &str) -> Self {
        Self {
            longitude_column: longitude_column.to_string(),
            latitude_column: latitude_column.to_string(),
            output_column: output_column.to_string(),
            threshold_distance: None,
        }
    }

    pub fn with_threshold(mut self, metres: f64) -> Self {
        self.threshold_distance = Some(metres);
        self
    }
}

/// Where a layer's features came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSource {
    File(PathBuf),
    Place(String),
    /// `(min_lon, min_lat, max_lon, max_lat)`
    Bbox([f64; 4]),
    Layer(String),
    Inline,
}

impl LayerSource {
    pub(crate) fn bbox(rect: &Rect<f64>) -> Self {
        LayerSource::Bbox([rect.min().x, rect.min().y, rect.max().x, rect.max().y])
    }
}

/// State shared by every urban layer implementation.
#[derive(Debug, Clone)]
pub struct LayerState {
    features: Option<Features>,
    mappings: Vec<Mapping>,
    has_mapped: bool,
    crs: String,
    source: Option<LayerSource>,
}

impl Default for LayerState {
    fn default() -> Self {
        Self { features: None, mappings: Vec::new(), has_mapped: false, crs: WGS84.into(), source: None }
    }
}

impl LayerState {
    pub fn features(&self) -> Option<&Features> { self.features.as_ref() }

    pub fn mappings(&self) -> &[Mapping] { &self.mappings }

    pub fn has_mapped(&self) -> bool { self.has_mapped }

    pub fn crs(&self) -> &str { &self.crs }

    pub fn source(&self) -> Option<&LayerSource> { self.source.as_ref() }

    pub(crate) fn set_features(&mut self, features: Features, source: LayerSource) {
        self.features = Some(features);
        self.source = Some(source);
    }

    pub(crate) fn add_mapping(&mut self, mapping: Mapping) -> Result<()> {
        if self.mappings.iter().any(|m| m.output_column == mapping.output_column) {
            return Err(PipelineError::incomplete(
                "urban_layer",
                format!("output column {:?} is already used by another mapping", mapping.output_column),
            ).into());
        }
        self.mappings.push(mapping);
        Ok(())
    }

    /// Reinstate features and the mapped flag, e.g. when loading a saved pipeline.
    pub(crate) fn restore(&mut self, features: Option<Features>, has_mapped: bool) {
        self.features = features;
        self.has_mapped = has_mapped;
    }

    /// Put back an attribute table saved before a failed enrichment.
    pub(crate) fn restore_attributes(&mut self, attributes: DataFrame) -> Result<()> {
        match self.features.as_mut() {
            Some(features) => features.set_attributes(attributes),
            None => Ok(()),
        }
    }

    /// Shared part of every layer's persisted configuration.
    pub(crate) fn to_config(&self) -> Value {
        json!({
            "mappings": self.mappings,
            "source": self.source,
            "crs": self.crs,
        })
    }

    /// Inverse of [`LayerState::to_config`]; missing keys keep their defaults.
    pub(crate) fn from_config(config: &Value) -> Result<Self> {
        let mut state = LayerState::default();
        if let Some(mappings) = config.get("mappings").filter(|v| !v.is_null()) {
            state.mappings = serde_json::from_value(mappings.clone())?;
        }
        if let Some(source) = config.get("source").filter(|v| !v.is_null()) {
            state.source = Some(serde_json::from_value(source.clone())?);
        }
        Ok(state)
    }
}

/// A layer of spatial features that point data is mapped onto.
///
/// Implementations provide [`UrbanLayer::map_nearest`]; the provided
/// [`UrbanLayer::map_nearest_layer`] enforces the single-mapping rule and applies every
/// configured mapping.
pub trait UrbanLayer: Send + fmt::Debug {
    /// Registry name.
    fn type_name(&self) -> &'static str;

    fn state(&self) -> &LayerState;

    fn state_mut(&mut self) -> &mut LayerState;

    /// Feature index for every row of `data`, using the mapping's coordinate columns.
    fn map_nearest(&self, features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>>;

    /// Configuration needed to rebuild an equivalent (unbuilt) layer through the registry.
    fn to_config(&self) -> Result<Value> {
        Ok(self.state().to_config())
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        let mut config = self.to_config()?;
        if let Some(map) = config.as_object_mut() {
            map.insert("features".into(), json!(self.state().features().map(Features::len)));
            map.insert("has_mapped".into(), json!(self.has_mapped()));
        }
        Ok(config_preview("Urban Layer", self.type_name(), &config, format))
    }

    /// Map every row of `data` to its nearest feature, adding one index column per mapping.
    ///
    /// `overrides` replaces the layer's own mappings for this call. Fails if the layer is
    /// not built, was already mapped, or the data lacks a mapping's coordinate columns.
    fn map_nearest_layer(&mut self, data: GeoFrame, overrides: Option<Mapping>) -> Result<GeoFrame> {
        let features = self.state().features().ok_or(PipelineError::LayerNotBuilt)?;
        if self.has_mapped() {
            return Err(PipelineError::AlreadyMapped.into());
        }
        let mappings = match overrides {
            Some(mapping) => vec![mapping],
            None if self.mappings().is_empty() => {
                return Err(PipelineError::missing_attribute(self.type_name(), "mappings (use with_mapping())").into());
            }
            None => self.mappings().to_vec(),
        };

        let mut mapped = data;
        for mapping in &mappings {
            mapped.require_columns(self.type_name(), &[mapping.longitude_column.as_str(), mapping.latitude_column.as_str()])?;
            let nearest = self.map_nearest(features, &mapped, mapping)?;
            debug!(
                layer = self.type_name(),
                output = %mapping.output_column,
                matched = nearest.iter().flatten().count(),
                rows = nearest.len(),
                "mapped rows onto nearest features",
            );
            let column: UInt32Chunked = nearest.into_iter().collect();
            mapped = mapped.with_column(column.with_name(mapping.output_column.as_str().into()).into_series())?;
        }

        self.state_mut().has_mapped = true;
        Ok(mapped)
    }

    /// The feature table.
    fn get_layer(&self) -> Result<&Features> {
        Ok(self.state().features().ok_or(PipelineError::LayerNotBuilt)?)
    }

    /// `(min_lon, min_lat)`-`(max_lon, max_lat)` of the features.
    fn get_layer_bounding_box(&self) -> Result<Rect<f64>> {
        self.get_layer()?.bounds()
            .ok_or_else(|| anyhow::anyhow!("[urban_layer] {} has no geometries", self.type_name()))
    }

    fn has_mapped(&self) -> bool { self.state().has_mapped() }

    fn mappings(&self) -> &[Mapping] { self.state().mappings() }

    /// Declare a mapping; output columns must be unique across mappings.
    fn add_mapping(&mut self, mapping: Mapping) -> Result<()> {
        self.state_mut().add_mapping(mapping)
    }

    /// Write a column onto the feature table.
    fn set_layer_column(&mut self, series: Series) -> Result<()> {
        self.state_mut().features.as_mut().ok_or(PipelineError::LayerNotBuilt)?.set_column(series)
    }

    /// Export the feature table as a GeoJSON FeatureCollection.
    fn to_geojson(&self) -> Result<Value> {
        self.get_layer()?.to_geojson()
    }
}

/// Registers the shipped urban layers.
pub(crate) fn register_builtin(registry: &mut Registry<dyn UrbanLayer>) -> Result<()> {
    debug_assert_eq!(registry.family(), StageFamily::UrbanLayer);
    registry.register(OsmStreets::NAME, |config| Ok(Box::new(OsmStreets::from_config(config)?)))?;
    registry.register(OsmIntersections::NAME, |config| Ok(Box::new(OsmIntersections::from_config(config)?)))?;
    registry.register(CustomUrbanLayer::NAME, |config| Ok(Box::new(CustomUrbanLayer::from_config(config)?)))?;
    registry.register(GridLayer::NAME, |config| Ok(Box::new(GridLayer::from_config(config)?)))?;
    registry.register(OsmFeatures::NAME, |config| Ok(Box::new(OsmFeatures::from_config(config)?)))?;
    registry.register(Tile2NetLayer::SIDEWALKS, |config| {
        Ok(Box::new(Tile2NetLayer::from_config(config, PedestrianFeature::Sidewalk)?))
    })?;
    registry.register(Tile2NetLayer::CROSSWALKS, |config| {
        Ok(Box::new(Tile2NetLayer::from_config(config, PedestrianFeature::Crosswalk)?))
    })?;
    registry.register(Division::Neighborhood.layer_name(), |config| {
        Ok(Box::new(AdminRegions::from_config(config, Division::Neighborhood)?))
    })?;
    registry.register(Division::City.layer_name(), |config| {
        Ok(Box::new(AdminRegions::from_config(config, Division::City)?))
    })?;
    registry.register(Division::State.layer_name(), |config| {
        Ok(Box::new(AdminRegions::from_config(config, Division::State)?))
    })?;
    registry.register(Division::Country.layer_name(), |config| {
        Ok(Box::new(AdminRegions::from_config(config, Division::Country)?))
    })?;
    Ok(())
}

crate::stage::impl_into_stage!(
    UrbanLayer: OsmStreets, OsmIntersections, CustomUrbanLayer, GridLayer, OsmFeatures, Tile2NetLayer, AdminRegions,
);

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;

    fn points_layer() -> CustomUrbanLayer {
        let features = Features::from_geometries(vec![
            Point::new(-73.99, 40.69).into(),
            Point::new(-73.98, 40.70).into(),
        ]);
        let mut layer = CustomUrbanLayer::from_features(features);
        layer.add_mapping(Mapping::new("lon", "lat", "nearest")).unwrap();
        layer
    }

    fn data() -> GeoFrame {
        let df = df!("lon" => [-73.9899, -73.9801, -73.985], "lat" => [40.6901, 40.6999, 40.6901]).unwrap();
        GeoFrame::new(df, "lon", "lat").unwrap()
    }

    #[test]
    fn maps_once_then_refuses() {
        let mut layer = points_layer();
        let mapped = layer.map_nearest_layer(data(), None).unwrap();
        let nearest = mapped.frame().column("nearest").unwrap();
        assert_eq!(nearest.u32().unwrap().get(0), Some(0));
        assert_eq!(nearest.u32().unwrap().get(1), Some(1));
        assert!(layer.has_mapped());

        let err = layer.map_nearest_layer(data(), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::AlreadyMapped)));
    }

    #[test]
    fn unbuilt_layer_cannot_map() {
        let mut layer = OsmStreets::new();
        let err = layer.map_nearest_layer(data(), Some(Mapping::new("lon", "lat", "n"))).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerNotBuilt)));
    }

    #[test]
    fn mapping_columns_must_exist() {
        let mut layer = points_layer();
        let err = layer.map_nearest_layer(data(), Some(Mapping::new("x", "lat", "n"))).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingColumns { .. })));
        // a failed attempt does not consume the layer
        assert!(!layer.has_mapped());
    }

    #[test]
    fn layer_without_mappings_needs_override() {
        let mut layer = CustomUrbanLayer::from_features(Features::from_geometries(vec![Point::new(0.0, 0.0).into()]));
        let err = layer.map_nearest_layer(data(), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingAttribute { .. })));
    }

    #[test]
    fn duplicate_output_columns_are_rejected() {
        let mut layer = points_layer();
        assert!(layer.add_mapping(Mapping::new("a", "b", "nearest")).is_err());
    }

    #[test]
    fn state_config_round_trip() {
        let mut state = LayerState::default();
        state.add_mapping(Mapping::new("lon", "lat", "out").with_threshold(50.0)).unwrap();
        state.source = Some(LayerSource::Place("Downtown Brooklyn".into()));
        let back = LayerState::from_config(&state.to_config()).unwrap();
        assert_eq!(back.mappings(), state.mappings());
        assert_eq!(back.source(), state.source());
    }
}
