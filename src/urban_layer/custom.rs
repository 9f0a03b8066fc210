use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use geo::Geometry;
use polars::prelude::DataFrame;
use serde_json::{Value, json};

use crate::{
    common::{Projector, extension, is_wgs84, require_file_exists},
    geo_frame::{GeoFrame, WGS84},
    io::{geojson, shp},
};

use super::{Features, LayerSource, LayerState, Mapping, UrbanLayer, map_to_nearest};

/// A layer built from user-supplied geometries: a Shapefile, a GeoJSON file, another
/// layer's features, or geometries constructed in code.
#[derive(Debug, Clone, Default)]
pub struct CustomUrbanLayer {
    state: LayerState,
    source_crs: Option<String>,
}

impl CustomUrbanLayer {
    pub const NAME: &'static str = "custom_urban_layer";

    pub fn new() -> Self {
        Self::default()
    }

    /// A built layer over features that are already in WGS84.
    pub fn from_features(features: Features) -> Self {
        let mut layer = Self::default();
        layer.state.set_features(features, LayerSource::Inline);
        layer
    }

    /// A built layer holding a copy of another layer's features.
    pub fn from_layer(other: &dyn UrbanLayer) -> Result<Self> {
        let features = other.get_layer()?.clone();
        let mut layer = Self::default();
        layer.state.set_features(features, LayerSource::Layer(other.type_name().to_string()));
        Ok(layer)
    }

    /// CRS of files loaded afterwards; geometries are reprojected to WGS84.
    pub fn with_source_crs(mut self, crs: &str) -> Self {
        self.source_crs = Some(crs.to_string());
        self
    }

    /// Load `.shp`, `.geojson` or `.json` features.
    pub fn load_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (geometries, attributes) = read_layer_file(path, self.source_crs.as_deref())?;
        self.state.set_features(Features::new(geometries, attributes)?, LayerSource::File(path.to_path_buf()));
        Ok(self)
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let source_crs = config.get("source_crs").and_then(Value::as_str).map(str::to_string);
        Ok(Self { state: LayerState::from_config(config)?, source_crs })
    }
}

/// Geometries in WGS84 and the attribute table of a `.shp`, `.geojson` or `.json` file.
pub(super) fn read_layer_file(path: &Path, source_crs: Option<&str>) -> Result<(Vec<Geometry<f64>>, DataFrame)> {
    require_file_exists(path)?;
    let (geometries, attributes) = match extension(path).as_deref() {
        Some("shp") => shp::read_shapefile(path)?,
        Some("geojson" | "json") => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("[urban_layer::custom] Failed to read {}", path.display()))?;
            let value: Value = serde_json::from_str(&text)
                .with_context(|| format!("[urban_layer::custom] {} is not valid JSON", path.display()))?;
            geojson::read_feature_collection(&value)?
        }
        other => bail!(
            "[urban_layer::custom] Unsupported layer file extension {:?} for {}; expected .shp or .geojson",
            other.unwrap_or(""), path.display(),
        ),
    };

    let geometries = match source_crs.filter(|crs| !is_wgs84(crs)) {
        Some(crs) => {
            let projector = Projector::to_wgs84(crs)?;
            geometries.iter()
                .map(|g| projector.project_geometry(g))
                .collect::<Result<Vec<_>>>()?
        }
        None => geometries,
    };
    Ok((geometries, attributes))
}

impl UrbanLayer for CustomUrbanLayer {
    fn type_name(&self) -> &'static str { Self::NAME }

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
