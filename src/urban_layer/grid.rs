use anyhow::{Result, ensure};
use geo::{Rect, coord};
use polars::prelude::*;
use serde_json::{Value, json};

use crate::geo_frame::{GeoFrame, coordinates_of};

use super::{Features, LayerSource, LayerState, Mapping, UrbanLayer};

const DEFAULT_CELL_SIZE: f64 = 0.01;
const MAX_CELLS: usize = 1_000_000;

/// Regular lon/lat grid over a bounding box. Cells are numbered row-major from the
/// south-west corner; rows outside the grid map to no cell.
#[derive(Debug, Clone)]
pub struct GridLayer {
    state: LayerState,
    cell_size: f64,
    extent: Option<Rect<f64>>,
}

impl Default for GridLayer {
    fn default() -> Self {
        Self { state: LayerState::default(), cell_size: DEFAULT_CELL_SIZE, extent: None }
    }
}

impl GridLayer {
    pub const NAME: &'static str = "region_grid";

    pub fn new(cell_size: f64) -> Self {
        Self { cell_size, ..Self::default() }
    }

    pub fn cell_size(&self) -> f64 { self.cell_size }

    /// Build square cells of `cell_size` degrees covering `bbox`.
    pub fn load_bbox(mut self, bbox: Rect<f64>) -> Result<Self> {
        ensure!(self.cell_size > 0.0 && self.cell_size.is_finite(),
            "[urban_layer::grid] Cell size must be positive, got {}", self.cell_size);
        let (cols, rows) = self.dimensions(&bbox)?;

        let mut geometries = Vec::with_capacity(cols * rows);
        let (mut row_ids, mut col_ids) = (Vec::new(), Vec::new());
        for row in 0..rows {
            for col in 0..cols {
                let min = coord! {
                    x: bbox.min().x + col as f64 * self.cell_size,
                    y: bbox.min().y + row as f64 * self.cell_size,
                };
                let max = coord! { x: min.x + self.cell_size, y: min.y + self.cell_size };
                geometries.push(Rect::new(min, max).to_polygon().into());
                row_ids.push(row as u32);
                col_ids.push(col as u32);
            }
        }
        let attributes = DataFrame::new(vec![
            Series::new("row".into(), row_ids).into(),
            Series::new("col".into(), col_ids).into(),
        ])?;

        self.extent = Some(bbox);
        self.state.set_features(Features::new(geometries, attributes)?, LayerSource::bbox(&bbox));
        Ok(self)
    }

    /// Grid over the geocoded extent of `place`.
    #[cfg(feature = "download")]
    pub fn load_place(self, place: &str, network: &crate::config::Network) -> Result<Self> {
        let bbox = super::osm::geocode_place(place, network)?;
        let mut layer = self.load_bbox(bbox)?;
        layer.state.source = Some(LayerSource::Place(place.to_string()));
        Ok(layer)
    }

    /// Columns and rows covering `bbox`, at most [`MAX_CELLS`] cells in total.
    fn dimensions(&self, bbox: &Rect<f64>) -> Result<(usize, usize)> {
        let cols = (bbox.width() / self.cell_size).ceil().max(1.0);
        let rows = (bbox.height() / self.cell_size).ceil().max(1.0);
        // checked in f64 first: the counts may not fit a usize at all
        ensure!(cols.is_finite() && rows.is_finite() && cols * rows <= MAX_CELLS as f64,
            "[urban_layer::grid] Cell size {} gives too many cells over a {}x{} extent (limit {MAX_CELLS}); use a larger cell size",
            self.cell_size, bbox.width(), bbox.height());
        let (cols, rows) = (cols as usize, rows as usize);
        cols.checked_mul(rows)
            .filter(|&cells| cells <= MAX_CELLS)
            .ok_or_else(|| anyhow::anyhow!("[urban_layer::grid] {cols}x{rows} cells is too many; use a larger cell size"))?;
        Ok((cols, rows))
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let cell_size = config.get("cell_size").and_then(Value::as_f64).unwrap_or(DEFAULT_CELL_SIZE);
        let extent = match config.get("extent").filter(|v| !v.is_null()) {
            Some(value) => {
                let [min_x, min_y, max_x, max_y]: [f64; 4] = serde_json::from_value(value.clone())?;
                Some(Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }))
            }
            None => None,
        };
        Ok(Self { state: LayerState::from_config(config)?, cell_size, extent })
    }
}

impl UrbanLayer for GridLayer {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn state(&self) -> &LayerState { &self.state }

    fn state_mut(&mut self) -> &mut LayerState { &mut self.state }

    fn map_nearest(&self, features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>> {
        let extent = self.extent.ok_or(crate::error::PipelineError::LayerNotBuilt)?;
        let (cols, rows) = self.dimensions(&extent)?;
        ensure!(cols * rows == features.len(),
            "[urban_layer::grid] Grid has {} features but its extent implies {}", features.len(), cols * rows);

        let coords = coordinates_of(data.frame(), &mapping.longitude_column, &mapping.latitude_column)?;
        Ok(coords.into_iter()
            .map(|coord| {
                let coord = coord?;
                let col = ((coord.x - extent.min().x) / self.cell_size).floor();
                let row = ((coord.y - extent.min().y) / self.cell_size).floor();
                if col < 0.0 || row < 0.0 || col as usize >= cols || row as usize >= rows {
                    return None;
                }
                Some((row as usize * cols + col as usize) as u32)
            })
            .collect())
    }

    fn to_config(&self) -> Result<Value> {
        let mut config = self.state.to_config();
        config["cell_size"] = json!(self.cell_size);
        config["extent"] = json!(self.extent.map(|r| [r.min().x, r.min().y, r.max().x, r.max().y]));
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridLayer {
        let bbox = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 0.5 });
        GridLayer::new(0.25).load_bbox(bbox).unwrap()
    }

    #[test]
    fn covers_extent_row_major() {
        let layer = grid();
        let features = layer.get_layer().unwrap();
        assert_eq!(features.len(), 8);
        let row = features.attributes().column("row").unwrap();
        assert_eq!(row.u32().unwrap().get(4), Some(1));
    }

    #[test]
    fn maps_points_to_cells() {
        let mut layer = grid();
        let data = df!("x" => [0.1, 0.9, 0.3, 2.0], "y" => [0.1, 0.4, 0.3, 0.1]).unwrap();
        let data = GeoFrame::new(data, "x", "y").unwrap();
        let mapped = layer.map_nearest_layer(data, Some(Mapping::new("x", "y", "cell"))).unwrap();
        let cell: Vec<Option<u32>> = mapped.frame().column("cell").unwrap().u32().unwrap().into_iter().collect();
        assert_eq!(cell, vec![Some(0), Some(7), Some(5), None]);
    }

    #[test]
    fn config_restores_extent() {
        let config = grid().to_config().unwrap();
        let back = GridLayer::from_config(&config).unwrap();
        assert_eq!(back.cell_size(), 0.25);
        assert_eq!(back.extent, grid().extent);
    }

    #[test]
    fn rejects_bad_cell_size() {
        let bbox = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert!(GridLayer::new(0.0).load_bbox(bbox).is_err());
        assert!(GridLayer::new(1e-6).load_bbox(bbox).is_err());
    }

    #[test]
    fn tiny_cell_size_is_rejected_not_wrapped() {
        let bbox = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        let err = GridLayer::new(1e-300).load_bbox(bbox).unwrap_err();
        assert!(err.to_string().contains("too many"));
        // a single huge axis overflows usize on its own
        let err = GridLayer::new(1e-300).load_bbox(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1e-302 })).unwrap_err();
        assert!(err.to_string().contains("too many"));
    }

    #[test]
    fn restored_grid_with_oversized_extent_fails_to_map() {
        let config = json!({ "cell_size": 1e-300, "extent": [0.0, 0.0, 1.0, 1.0] });
        let layer = GridLayer::from_config(&config).unwrap();
        let features = Features::from_geometries(vec![]);
        let data = GeoFrame::new(df!("x" => [0.5], "y" => [0.5]).unwrap(), "x", "y").unwrap();
        assert!(layer.map_nearest(&features, &data, &Mapping::new("x", "y", "cell")).is_err());
    }
}
