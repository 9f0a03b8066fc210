use std::path::Path;

use anyhow::{Context, Result, bail};
use polars::prelude::*;
use serde_json::{Value, json};

use crate::{
    error::PipelineError,
    geo_frame::{GeoFrame, WGS84},
};

use super::{Features, LayerSource, LayerState, Mapping, UrbanLayer, custom::read_layer_file, map_to_nearest};

const FEATURE_TYPE_COLUMN: &str = "f_type";
const FEATURE_ID_COLUMN: &str = "feature_id";

/// Which pedestrian features of a tile2net export a layer keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedestrianFeature {
    Sidewalk,
    Crosswalk,
}

impl PedestrianFeature {
    /// Value of the `f_type` attribute for this kind.
    pub fn f_type(self) -> &'static str {
        match self {
            PedestrianFeature::Sidewalk => "sidewalk",
            PedestrianFeature::Crosswalk => "crosswalk",
        }
    }

    fn layer_name(self) -> &'static str {
        match self {
            PedestrianFeature::Sidewalk => Tile2NetLayer::SIDEWALKS,
            PedestrianFeature::Crosswalk => Tile2NetLayer::CROSSWALKS,
        }
    }
}

/// Sidewalk or crosswalk polygons from a tile2net export (`.shp` or `.geojson`).
///
/// Only rows whose `f_type` matches the kind are kept; each gets a `feature_id`
/// equal to its position in the layer.
#[derive(Debug, Clone)]
pub struct Tile2NetLayer {
    state: LayerState,
    kind: PedestrianFeature,
    source_crs: Option<String>,
}

impl Tile2NetLayer {
    pub const SIDEWALKS: &'static str = "streets_sidewalks";
    pub const CROSSWALKS: &'static str = "streets_crosswalks";

    pub fn new(kind: PedestrianFeature) -> Self {
        Self { state: LayerState::default(), kind, source_crs: None }
    }

    pub fn sidewalks() -> Self { Self::new(PedestrianFeature::Sidewalk) }

    pub fn crosswalks() -> Self { Self::new(PedestrianFeature::Crosswalk) }

    pub fn kind(&self) -> PedestrianFeature { self.kind }

    /// CRS of files loaded afterwards; geometries are reprojected to WGS84.
    pub fn with_source_crs(mut self, crs: &str) -> Self {
        self.source_crs = Some(crs.to_string());
        self
    }

    pub fn load_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (geometries, attributes) = read_layer_file(path, self.source_crs.as_deref())?;
        let features = select_kind(geometries, attributes, self.kind, self.type_name())?;
        self.state.set_features(features, LayerSource::File(path.to_path_buf()));
        Ok(self)
    }

    pub fn from_config(config: &Value, kind: PedestrianFeature) -> Result<Self> {
        let source_crs = config.get("source_crs").and_then(Value::as_str).map(str::to_string);
        Ok(Self { state: LayerState::from_config(config)?, kind, source_crs })
    }
}

/// Keep the rows of `kind` and number them with a fresh `feature_id` column.
fn select_kind(
    geometries: Vec<geo::Geometry<f64>>,
    attributes: DataFrame,
    kind: PedestrianFeature,
    layer: &str,
) -> Result<Features> {
    let Ok(f_type) = attributes.column(FEATURE_TYPE_COLUMN) else {
        return Err(PipelineError::missing_columns(layer, &[FEATURE_TYPE_COLUMN]).into());
    };
    if attributes.column(FEATURE_ID_COLUMN).is_ok() {
        bail!("[urban_layer::tile2net] `{FEATURE_ID_COLUMN}` already exists in the layer; remove it before loading");
    }

    let mask = f_type.str()
        .with_context(|| format!("[urban_layer::tile2net] `{FEATURE_TYPE_COLUMN}` must be a text column"))?
        .equal(kind.f_type());
    let attributes = attributes.filter(&mask).context("[urban_layer::tile2net] Failed to filter features")?;
    let geometries = geometries.into_iter()
        .zip(mask.iter())
        .filter_map(|(geometry, keep)| keep.unwrap_or(false).then_some(geometry))
        .collect::<Vec<_>>();

    let ids = (0..geometries.len() as u32).collect::<Vec<_>>();
    let mut features = Features::new(geometries, attributes)?;
    features.set_column(Series::new(FEATURE_ID_COLUMN.into(), ids))?;
    Ok(features)
}

impl UrbanLayer for Tile2NetLayer {
    fn type_name(&self) -> &'static str { self.kind.layer_name() }

    fn state(&self) -> &LayerState { &self.state }

    fn state_mut(&mut self) -> &mut LayerState { &mut self.state }

    fn map_nearest(&self, features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>> {
        map_to_nearest(features, data, mapping)
    }

    fn to_config(&self) -> Result<Value> {
        let mut config = self.state.to_config();
        config["source_crs"] = json!(self.source_crs.as_deref().unwrap_or(WGS84));
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use geo::{Geometry, Point};

    use super::*;

    fn export() -> tempfile::NamedTempFile {
        let square = |x: f64| json!({
            "type": "Polygon",
            "coordinates": [[[x, 0.0], [x + 0.001, 0.0], [x + 0.001, 0.001], [x, 0.001], [x, 0.0]]],
        });
        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "geometry": square(-73.990), "properties": { "f_type": "sidewalk" } },
                { "type": "Feature", "geometry": square(-73.985), "properties": { "f_type": "crosswalk" } },
                { "type": "Feature", "geometry": square(-73.980), "properties": { "f_type": "sidewalk" } },
                { "type": "Feature", "geometry": square(-73.975), "properties": { "f_type": "island" } },
            ]
        });
        let mut file = tempfile::Builder::new().suffix(".geojson").tempfile().unwrap();
        write!(file, "{collection}").unwrap();
        file
    }

    #[test]
    fn keeps_only_requested_kind() {
        let file = export();
        let sidewalks = Tile2NetLayer::sidewalks().load_file(file.path()).unwrap();
        let features = sidewalks.get_layer().unwrap();
        assert_eq!(features.len(), 2);
        let ids = features.attributes().column(FEATURE_ID_COLUMN).unwrap();
        assert_eq!(ids.u32().unwrap().into_no_null_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(sidewalks.type_name(), "streets_sidewalks");

        let crosswalks = Tile2NetLayer::crosswalks().load_file(file.path()).unwrap();
        assert_eq!(crosswalks.get_layer().unwrap().len(), 1);
    }

    #[test]
    fn rows_map_to_nearest_sidewalk() {
        let file = export();
        let mut layer = Tile2NetLayer::sidewalks().load_file(file.path()).unwrap();
        let data = df!("lon" => [-73.9895, -73.9793], "lat" => [0.0005, 0.0005]).unwrap();
        let data = GeoFrame::new(data, "lon", "lat").unwrap();
        let mapped = layer.map_nearest_layer(data, Some(Mapping::new("lon", "lat", "nearest_sidewalk"))).unwrap();
        let nearest = mapped.frame().column("nearest_sidewalk").unwrap().u32().unwrap().clone();
        assert_eq!(nearest.into_no_null_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn feature_type_column_is_required() {
        let attributes = df!("kind" => ["sidewalk"]).unwrap();
        let geometries: Vec<Geometry<f64>> = vec![Point::new(0.0, 0.0).into()];
        let err = select_kind(geometries, attributes, PedestrianFeature::Sidewalk, Tile2NetLayer::SIDEWALKS).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingColumns { .. })));
    }

    #[test]
    fn existing_feature_id_is_rejected() {
        let attributes = df!("f_type" => ["sidewalk"], "feature_id" => [9u32]).unwrap();
        let geometries: Vec<Geometry<f64>> = vec![Point::new(0.0, 0.0).into()];
        let err = select_kind(geometries, attributes, PedestrianFeature::Sidewalk, Tile2NetLayer::SIDEWALKS).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn config_keeps_kind_through_registry_name() {
        let layer = Tile2NetLayer::crosswalks().with_source_crs("EPSG:2263");
        let config = layer.to_config().unwrap();
        let back = Tile2NetLayer::from_config(&config, PedestrianFeature::Crosswalk).unwrap();
        assert_eq!(back.type_name(), "streets_crosswalks");
        assert_eq!(back.source_crs.as_deref(), Some("EPSG:2263"));
    }
}
