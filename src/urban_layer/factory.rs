use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::PipelineError,
    registry::Registries,
    stage::Stage,
};

use super::{
    AdminRegions, CustomUrbanLayer, Division, Features, GridLayer, Mapping, NetworkType, OsmFeatures,
    OsmIntersections, OsmStreets, PedestrianFeature, TagValue, Tags, Tile2NetLayer, UrbanLayer,
    osm::rect_from_bbox,
};

const FACTORY: &str = "UrbanLayerFactory";

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Place(String),
    Bbox((f64, f64, f64, f64)),
    Overpass(Value),
    Features(Features),
}

/// Fluent builder for urban layers.
///
/// ```no_run
/// # use urban_mapper::urban_layer::{Mapping, UrbanLayerFactory};
/// let layer = UrbanLayerFactory::new()
///     .with_type("streets_intersections")
///     .from_file("downtown.osm.json")
///     .with_mapping(Mapping::new("longitude", "latitude", "nearest_intersection"))
///     .build()?;
/// # anyhow::Ok(())
/// ```
///
/// A factory is not a stage: putting one in a pipeline without calling `build()` fails
/// validation.
#[derive(Debug, Clone, Default)]
pub struct UrbanLayerFactory {
    layer_type: Option<String>,
    source: Option<Source>,
    mappings: Vec<Mapping>,
    network_type: NetworkType,
    cell_size: Option<f64>,
    source_crs: Option<String>,
    tags: Tags,
    admin_level: Option<String>,
    config: Config,
}

impl UrbanLayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for network access and default column names.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Registry name of the layer to build, e.g. `streets_roads`.
    pub fn with_type(mut self, layer_type: &str) -> Self {
        self.layer_type = Some(layer_type.to_string());
        self
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    /// Cell size in degrees for grid layers.
    pub fn with_cell_size(mut self, cell_size: f64) -> Self {
        self.cell_size = Some(cell_size);
        self
    }

    /// Tag filter for `streets_features`; a feature is kept when any entry matches.
    ///
    /// ```no_run
    /// # use urban_mapper::urban_layer::{TagValue, UrbanLayerFactory};
    /// let cafes = UrbanLayerFactory::new()
    ///     .with_type("streets_features")
    ///     .with_tags([("amenity", TagValue::from(["cafe", "bar"]))])
    ///     .from_place("Downtown Brooklyn");
    /// ```
    pub fn with_tags<'a>(mut self, tags: impl IntoIterator<Item = (&'a str, TagValue)>) -> Self {
        self.tags.extend(tags.into_iter().map(|(key, value)| (key.to_string(), value)));
        self
    }

    /// `admin_level` for `region_*` layers instead of inferring one.
    pub fn with_admin_level(mut self, level: &str) -> Self {
        self.admin_level = Some(level.to_string());
        self
    }

    /// CRS of the file passed to `from_file` when it is not WGS84.
    pub fn with_source_crs(mut self, crs: &str) -> Self {
        self.source_crs = Some(crs.to_string());
        self
    }

    pub fn from_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(Source::File(path.into()));
        self
    }

    pub fn from_place(mut self, place: &str) -> Self {
        self.source = Some(Source::Place(place.to_string()));
        self
    }

    /// `(min_lon, min_lat, max_lon, max_lat)`; checked at `build()`.
    pub fn from_bbox(mut self, bbox: (f64, f64, f64, f64)) -> Self {
        self.source = Some(Source::Bbox(bbox));
        self
    }

    /// Overpass `[out:json]` data already in memory.
    pub fn from_overpass(mut self, value: Value) -> Self {
        self.source = Some(Source::Overpass(value));
        self
    }

    pub fn from_features(mut self, features: Features) -> Self {
        self.source = Some(Source::Features(features));
        self
    }

    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Mapping into the configured default output column.
    pub fn with_default_mapping(self, longitude_column: &str, latitude_column: &str) -> Self {
        let output = self.config.mapping.default_output_column.clone();
        self.with_mapping(Mapping::new(longitude_column, latitude_column, &output))
    }

    /// Load the features and return the layer.
    pub fn build(self) -> Result<Box<dyn UrbanLayer>> {
        let layer_type = self.layer_type.as_deref()
            .ok_or_else(|| PipelineError::incomplete(FACTORY, "layer type not set; call with_type()"))?;
        let registries = Registries::global()?;
        let layer_type = registries.urban_layers.resolve(layer_type)?;
        let source = self.source.clone().ok_or_else(|| PipelineError::incomplete(
            FACTORY,
            "no source; call from_place(), from_bbox(), from_file() or from_features()",
        ))?;

        let mut layer: Box<dyn UrbanLayer> = match layer_type {
            OsmStreets::NAME => Box::new(self.build_streets(source)?),
            OsmIntersections::NAME => Box::new(self.build_intersections(source)?),
            CustomUrbanLayer::NAME => Box::new(self.build_custom(source)?),
            GridLayer::NAME => Box::new(self.build_grid(source)?),
            OsmFeatures::NAME => Box::new(self.build_osm_features(source)?),
            Tile2NetLayer::SIDEWALKS => Box::new(self.build_tile2net(PedestrianFeature::Sidewalk, source)?),
            Tile2NetLayer::CROSSWALKS => Box::new(self.build_tile2net(PedestrianFeature::Crosswalk, source)?),
            other => match Division::from_layer_name(other) {
                Some(division) => Box::new(self.build_region(division, source)?),
                None => return Err(registries.urban_layers.unknown(other).into()),
            },
        };

        if self.mappings.is_empty() {
            warn!(layer = layer_type, "urban layer built without mappings; add one before composing");
        }
        for mapping in self.mappings {
            layer.add_mapping(mapping)?;
        }
        info!(layer = layer_type, features = layer.get_layer()?.len(), "urban layer built");
        Ok(layer)
    }

    fn unsupported(&self, layer_type: &str, source: &Source) -> PipelineError {
        let kind = match source {
            Source::File(_) => "from_file()",
            Source::Place(_) => "from_place()",
            Source::Bbox(_) => "from_bbox()",
            Source::Overpass(_) => "from_overpass()",
            Source::Features(_) => "from_features()",
        };
        PipelineError::incomplete(FACTORY, format!("{layer_type} cannot be built with {kind}"))
    }

    fn build_streets(&self, source: Source) -> Result<OsmStreets> {
        let layer = OsmStreets::new().with_network_type(self.network_type);
        match source {
            Source::File(path) => layer.load_file(path),
            Source::Overpass(value) => layer.load_overpass(&value),
            #[cfg(feature = "download")]
            Source::Bbox(bbox) => layer.load_bbox(rect_from_bbox(bbox)?, &self.config.network),
            #[cfg(feature = "download")]
            Source::Place(place) => layer.load_place(&place, &self.config.network),
            other => Err(self.unsupported(OsmStreets::NAME, &other).into()),
        }
    }

    fn build_intersections(&self, source: Source) -> Result<OsmIntersections> {
        let layer = OsmIntersections::new().with_network_type(self.network_type);
        match source {
            Source::File(path) => layer.load_file(path),
            Source::Overpass(value) => layer.load_overpass(&value),
            #[cfg(feature = "download")]
            Source::Bbox(bbox) => layer.load_bbox(rect_from_bbox(bbox)?, &self.config.network),
            #[cfg(feature = "download")]
            Source::Place(place) => layer.load_place(&place, &self.config.network),
            other => Err(self.unsupported(OsmIntersections::NAME, &other).into()),
        }
    }

    fn build_custom(&self, source: Source) -> Result<CustomUrbanLayer> {
        match source {
            Source::File(path) => {
                let layer = match &self.source_crs {
                    Some(crs) => CustomUrbanLayer::new().with_source_crs(crs),
                    None => CustomUrbanLayer::new(),
                };
                layer.load_file(path)
            }
            Source::Features(features) => Ok(CustomUrbanLayer::from_features(features)),
            other => Err(self.unsupported(CustomUrbanLayer::NAME, &other).into()),
        }
    }

    fn build_grid(&self, source: Source) -> Result<GridLayer> {
        let layer = match self.cell_size {
            Some(size) => GridLayer::new(size),
            None => GridLayer::default(),
        };
        match source {
            Source::Bbox(bbox) => layer.load_bbox(rect_from_bbox(bbox)?),
            #[cfg(feature = "download")]
            Source::Place(place) => layer.load_place(&place, &self.config.network),
            other => Err(self.unsupported(GridLayer::NAME, &other).into()),
        }
    }

    fn build_osm_features(&self, source: Source) -> Result<OsmFeatures> {
        if self.tags.is_empty() {
            return Err(PipelineError::incomplete(FACTORY, "streets_features needs tags; call with_tags()").into());
        }
        let layer = OsmFeatures::new(self.tags.clone());
        match source {
            Source::File(path) => layer.load_file(path),
            Source::Overpass(value) => layer.load_overpass(&value),
            #[cfg(feature = "download")]
            Source::Bbox(bbox) => layer.load_bbox(rect_from_bbox(bbox)?, &self.config.network),
            #[cfg(feature = "download")]
            Source::Place(place) => layer.load_place(&place, &self.config.network),
            other => Err(self.unsupported(OsmFeatures::NAME, &other).into()),
        }
    }

    fn build_region(&self, division: Division, source: Source) -> Result<AdminRegions> {
        let layer = match &self.admin_level {
            Some(level) => AdminRegions::new(division).with_admin_level(level),
            None => AdminRegions::new(division),
        };
        match source {
            Source::File(path) => layer.load_file(path),
            Source::Overpass(value) => layer.load_overpass(&value),
            #[cfg(feature = "download")]
            Source::Bbox(bbox) => layer.load_bbox(rect_from_bbox(bbox)?, &self.config.network),
            #[cfg(feature = "download")]
            Source::Place(place) => layer.load_place(&place, &self.config.network),
            other => Err(self.unsupported(division.layer_name(), &other).into()),
        }
    }

    fn build_tile2net(&self, kind: PedestrianFeature, source: Source) -> Result<Tile2NetLayer> {
        let layer = match &self.source_crs {
            Some(crs) => Tile2NetLayer::new(kind).with_source_crs(crs),
            None => Tile2NetLayer::new(kind),
        };
        match source {
            Source::File(path) => layer.load_file(path),
            other => Err(self.unsupported(layer.type_name(), &other).into()),
        }
    }
}

impl From<UrbanLayerFactory> for Stage {
    fn from(factory: UrbanLayerFactory) -> Self {
        Stage::other(factory)
    }
}

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;

    #[test]
    fn type_is_required() {
        let err = UrbanLayerFactory::new().from_bbox((0.0, 0.0, 1.0, 1.0)).build().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::IncompleteFactory { .. })));
    }

    #[test]
    fn misspelled_type_gets_suggestion() {
        let err = UrbanLayerFactory::new()
            .with_type("streets_intersection")
            .from_bbox((0.0, 0.0, 1.0, 1.0))
            .build()
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::UnknownStageType { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("streets_intersections"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn builds_grid_with_mapping() {
        let layer = UrbanLayerFactory::new()
            .with_type(GridLayer::NAME)
            .with_cell_size(0.5)
            .from_bbox((0.0, 0.0, 1.0, 1.0))
            .with_default_mapping("lon", "lat")
            .build()
            .unwrap();
        assert_eq!(layer.get_layer().unwrap().len(), 4);
        assert_eq!(layer.mappings()[0].output_column, "nearest_element");
    }

    #[test]
    fn source_must_suit_layer() {
        let features = Features::from_geometries(vec![Point::new(0.0, 0.0).into()]);
        let err = UrbanLayerFactory::new()
            .with_type(GridLayer::NAME)
            .from_features(features)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cannot be built with from_features()"));
    }

    #[test]
    fn invalid_bbox_is_reported() {
        let err = UrbanLayerFactory::new()
            .with_type(GridLayer::NAME)
            .from_bbox((1.0, 1.0, 0.0, 0.0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Bounding box"));
    }

    #[test]
    fn feature_layer_needs_tags() {
        let overpass = serde_json::json!({
            "elements": [{ "type": "node", "id": 1, "lon": 0.0, "lat": 0.0, "tags": { "amenity": "cafe" } }]
        });
        let err = UrbanLayerFactory::new()
            .with_type(OsmFeatures::NAME)
            .from_overpass(overpass.clone())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("with_tags()"));

        let layer = UrbanLayerFactory::new()
            .with_type(OsmFeatures::NAME)
            .with_tags([("amenity", TagValue::Any(true))])
            .from_overpass(overpass)
            .with_default_mapping("lon", "lat")
            .build()
            .unwrap();
        assert_eq!(layer.get_layer().unwrap().len(), 1);
        assert_eq!(layer.type_name(), "streets_features");
    }

    #[test]
    fn region_layer_uses_admin_level() {
        let square = |id: i64, x: f64, level: &str| serde_json::json!([
            { "type": "node", "id": id * 10, "lon": x, "lat": 0.0 },
            { "type": "node", "id": id * 10 + 1, "lon": x + 1.0, "lat": 0.0 },
            { "type": "node", "id": id * 10 + 2, "lon": x + 1.0, "lat": 1.0 },
            { "type": "way", "id": id, "nodes": [id * 10, id * 10 + 1, id * 10 + 2, id * 10],
              "tags": { "boundary": "administrative", "admin_level": level } },
        ]);
        let elements = [square(1, 0.0, "6"), square(2, 5.0, "8")].into_iter()
            .flat_map(|v| v.as_array().cloned().unwrap_or_default())
            .collect::<Vec<_>>();
        let layer = UrbanLayerFactory::new()
            .with_type("region_cities")
            .with_admin_level("8")
            .from_overpass(serde_json::json!({ "elements": elements }))
            .build()
            .unwrap();
        assert_eq!(layer.get_layer().unwrap().len(), 1);
        assert_eq!(layer.to_config().unwrap()["admin_level"], "8");
    }

    #[test]
    fn tile2net_layers_only_load_files() {
        let err = UrbanLayerFactory::new()
            .with_type(Tile2NetLayer::CROSSWALKS)
            .from_bbox((0.0, 0.0, 1.0, 1.0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("streets_crosswalks cannot be built with from_bbox()"));
    }

    #[test]
    fn unbuilt_factory_is_not_a_stage() {
        let stage: Stage = UrbanLayerFactory::new().with_type(GridLayer::NAME).into();
        assert_eq!(stage.type_name(), "UrbanLayerFactory");
    }
}
