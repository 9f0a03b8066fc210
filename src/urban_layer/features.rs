use anyhow::{Context, Result, ensure};
use geo::{BoundingRect, Geometry, Rect};
use polars::prelude::*;
use serde_json::Value;

use crate::io::geojson;

/// The feature table of an urban layer: one geometry and one attribute row per feature.
/// Mapped data refers to features by their position.
#[derive(Debug, Clone)]
pub struct Features {
    geometries: Vec<Geometry<f64>>,
    attributes: DataFrame,
}

impl Features {
    pub fn new(geometries: Vec<Geometry<f64>>, attributes: DataFrame) -> Result<Self> {
        ensure!(geometries.len() == attributes.height(),
            "[urban_layer] {} geometries but {} attribute rows", geometries.len(), attributes.height());
        Ok(Self { geometries, attributes })
    }

    /// Geometries with no attributes.
    pub fn from_geometries(geometries: Vec<Geometry<f64>>) -> Self {
        let attributes = DataFrame::empty_with_height(geometries.len());
        Self { geometries, attributes }
    }

    pub fn len(&self) -> usize { self.geometries.len() }

    pub fn is_empty(&self) -> bool { self.geometries.is_empty() }

    pub fn geometries(&self) -> &[Geometry<f64>] { &self.geometries }

    pub fn attributes(&self) -> &DataFrame { &self.attributes }

    /// Bounding box over every geometry.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.geometries.iter()
            .filter_map(|geometry| geometry.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }

    /// Append or replace an attribute column; its length must match the feature count.
    pub(crate) fn set_column(&mut self, series: Series) -> Result<()> {
        ensure!(series.len() == self.len(),
            "[urban_layer] Column {:?} has {} values for {} features", series.name(), series.len(), self.len());
        self.attributes.replace_or_add(series.name().clone(), series)
            .context("[urban_layer] Failed to set layer column")?;
        Ok(())
    }

    pub(crate) fn set_attributes(&mut self, attributes: DataFrame) -> Result<()> {
        ensure!(attributes.height() == self.len(),
            "[urban_layer] {} attribute rows for {} features", attributes.height(), self.len());
        self.attributes = attributes;
        Ok(())
    }

    /// GeoJSON FeatureCollection with every attribute column as properties.
    pub fn to_geojson(&self) -> Result<Value> {
        geojson::write_feature_collection(&self.geometries, &self.attributes)
    }

    pub fn from_geojson(value: &Value) -> Result<Self> {
        let (geometries, attributes) = geojson::read_feature_collection(value)?;
        Self::new(geometries, attributes)
    }
}
