use anyhow::{Result, anyhow};
use geo::{BoundingRect, Closest, ClosestPoint, Coord, Geometry, Point};
use rstar::{AABB, PointDistance, RTree, RTreeObject};

use crate::{common::Projector, geo_frame::{GeoFrame, coordinates_of}};

use super::{Features, Mapping};

/// A projected feature geometry in an R-tree, associated with its feature by index.
#[derive(Debug, Clone)]
struct IndexedGeometry {
    idx: u32,
    geometry: Geometry<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedGeometry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope { self.envelope }
}

impl PointDistance for IndexedGeometry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let query = Point::new(point[0], point[1]);
        match self.geometry.closest_point(&query) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => {
                (p.x() - point[0]).powi(2) + (p.y() - point[1]).powi(2)
            }
            Closest::Indeterminate => f64::INFINITY,
        }
    }
}

/// Nearest-feature lookup in metres, using the UTM zone at the centre of the layer.
pub(crate) struct NearestIndex {
    tree: RTree<IndexedGeometry>,
    projector: Projector,
}

impl NearestIndex {
    pub(crate) fn build(features: &Features) -> Result<Self> {
        let bounds = features.bounds()
            .ok_or_else(|| anyhow!("[urban_layer::nearest] Layer has no geometries to map onto"))?;
        let projector = Projector::to_local_metric(&bounds)?;

        let objects = features.geometries().iter().enumerate()
            .map(|(idx, geometry)| {
                let geometry = projector.project_geometry(geometry)?;
                let rect = geometry.bounding_rect()
                    .ok_or_else(|| anyhow!("[urban_layer::nearest] Feature {idx} has an empty geometry"))?;
                let envelope = AABB::from_corners(rect.min().into(), rect.max().into());
                Ok(IndexedGeometry { idx: idx as u32, geometry, envelope })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { tree: RTree::bulk_load(objects), projector })
    }

    /// Index of the nearest feature for every coordinate; `None` for missing coordinates
    /// and for points farther than `threshold` metres.
    pub(crate) fn nearest(&self, coords: &[Option<Coord<f64>>], threshold: Option<f64>) -> Result<Vec<Option<u32>>> {
        coords.iter()
            .map(|coord| {
                let Some(coord) = coord else { return Ok(None) };
                let projected = self.projector.project(*coord)?;
                let hit = self.tree
                    .nearest_neighbor_iter_with_distance_2(&[projected.x, projected.y])
                    .next();
                Ok(hit.and_then(|(object, d2)| match threshold {
                    Some(limit) if d2.sqrt() > limit => None,
                    _ => Some(object.idx),
                }))
            })
            .collect()
    }
}

/// Nearest feature per row of `data` for the mapping's coordinate columns.
pub(crate) fn map_to_nearest(features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>> {
    let coords = coordinates_of(data.frame(), &mapping.longitude_column, &mapping.latitude_column)?;
    NearestIndex::build(features)?.nearest(&coords, mapping.threshold_distance)
}

#[cfg(test)]
mod tests {
    use geo::LineString;

    use super::*;

    fn two_streets() -> Features {
        Features::from_geometries(vec![
            // east-west street at 40.690
            LineString::from(vec![(-74.000, 40.690), (-73.980, 40.690)]).into(),
            // east-west street at 40.700
            LineString::from(vec![(-74.000, 40.700), (-73.980, 40.700)]).into(),
        ])
    }

    #[test]
    fn picks_closest_line() {
        let index = NearestIndex::build(&two_streets()).unwrap();
        let coords = vec![
            Some(Coord { x: -73.99, y: 40.691 }),
            Some(Coord { x: -73.99, y: 40.699 }),
            None,
        ];
        assert_eq!(index.nearest(&coords, None).unwrap(), vec![Some(0), Some(1), None]);
    }

    #[test]
    fn threshold_drops_far_points() {
        let index = NearestIndex::build(&two_streets()).unwrap();
        // ~110 m and ~550 m from the nearest street
        let coords = vec![Some(Coord { x: -73.99, y: 40.691 }), Some(Coord { x: -73.99, y: 40.685 })];
        assert_eq!(index.nearest(&coords, Some(200.0)).unwrap(), vec![Some(0), None]);
    }

    #[test]
    fn empty_layer_cannot_be_indexed() {
        assert!(NearestIndex::build(&Features::from_geometries(vec![])).is_err());
    }
}
