use anyhow::Result;
use geo::{Geometry, InteriorPoint};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{geo_frame::GeoFrame, io::shp::read_shapefile};

use super::{Loader, LoaderSettings, into_geo_frame};

/// Column names used when a shapefile is loaded without coordinate columns.
pub const TEMPORARY_LONGITUDE: &str = "temporary_longitude";
pub const TEMPORARY_LATITUDE: &str = "temporary_latitude";

/// ESRI Shapefiles. Without configured coordinate columns every shape is reduced to a
/// point inside it, written to `temporary_longitude`/`temporary_latitude`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapefileLoader {
    #[serde(flatten)]
    settings: LoaderSettings,
}

impl ShapefileLoader {
    pub const NAME: &'static str = "ShapefileLoader";

    pub fn new(settings: LoaderSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Ok(serde_json::from_value(config.clone())?)
    }
}

impl Loader for ShapefileLoader {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn settings(&self) -> Option<&LoaderSettings> { Some(&self.settings) }

    fn requires_coordinate_columns(&self) -> bool { false }

    fn read(&self) -> Result<GeoFrame> {
        let (geometries, attributes) = read_shapefile(&self.settings.file_path)?;
        let crs = &self.settings.coordinate_reference_system;
        if let Ok((longitude, latitude)) = self.settings.coordinate_columns(Self::NAME) {
            return into_geo_frame(attributes, Self::NAME, longitude, latitude, crs);
        }

        let attributes = with_interior_points(&geometries, attributes)?;
        into_geo_frame(attributes, Self::NAME, TEMPORARY_LONGITUDE, TEMPORARY_LATITUDE, crs)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Add a point inside each geometry as the temporary coordinate columns.
fn with_interior_points(geometries: &[Geometry<f64>], mut attributes: DataFrame) -> Result<DataFrame> {
    let points = geometries.iter().map(|g| g.interior_point()).collect::<Vec<_>>();
    let lon: Float64Chunked = points.iter().map(|p| p.map(|p| p.x())).collect();
    let lat: Float64Chunked = points.iter().map(|p| p.map(|p| p.y())).collect();
    attributes.replace_or_add(TEMPORARY_LONGITUDE.into(), lon.with_name(TEMPORARY_LONGITUDE.into()).into_series())?;
    attributes.replace_or_add(TEMPORARY_LATITUDE.into(), lat.with_name(TEMPORARY_LATITUDE.into()).into_series())?;
    Ok(attributes)
}
