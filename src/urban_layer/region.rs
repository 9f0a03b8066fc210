use std::{collections::BTreeSet, path::Path};

use anyhow::{Result, bail};
use geo::{BoundingRect, Geometry, MultiPolygon, Rect, Relate};
use rstar::{AABB, RTree, primitives::{GeomWithData, Rectangle}};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::geo_frame::GeoFrame;

use super::{
    Features, LayerSource, LayerState, Mapping, UrbanLayer, map_to_nearest,
    osm_features::{ElementKind, OsmElements, TagValue, Tags, Tagged, features_table},
};

/// Administrative division a region layer is after. OSM `admin_level` numbers differ
/// between countries, so the division only guides the choice of level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Division {
    Neighborhood,
    City,
    State,
    Country,
}

impl Division {
    pub const ALL: [Division; 4] = [Division::Neighborhood, Division::City, Division::State, Division::Country];

    pub fn layer_name(self) -> &'static str {
        match self {
            Division::Neighborhood => "region_neighborhoods",
            Division::City => "region_cities",
            Division::State => "region_states",
            Division::Country => "region_countries",
        }
    }

    pub fn from_layer_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|division| division.layer_name() == name)
    }

    /// Preference for a level holding `share` of all boundaries, `connectivity` percent of
    /// which touch or overlap another boundary of the same level. Fine divisions favour
    /// many boundaries, coarse ones favour few well-connected ones.
    fn score(self, share: f64, connectivity: f64) -> f64 {
        match self {
            Division::Neighborhood => share * 100.0 + connectivity * 0.5,
            Division::City => share * 50.0 + connectivity * 0.75,
            Division::State => connectivity - share * 20.0,
            Division::Country => connectivity * 1.5 - share * 10.0,
        }
    }
}

fn boundary_tags() -> Tags {
    Tags::from([("boundary".to_string(), TagValue::from("administrative"))])
}

/// `boundary=administrative` areas at one `admin_level`.
///
/// Without an explicit level the layer picks the one that best fits its [`Division`].
#[derive(Debug, Clone)]
pub struct AdminRegions {
    state: LayerState,
    division: Division,
    admin_level: Option<String>,
}

impl AdminRegions {
    pub fn new(division: Division) -> Self {
        Self { state: LayerState::default(), division, admin_level: None }
    }

    pub fn division(&self) -> Division { self.division }

    /// Level requested before loading, or the level chosen once loaded.
    pub fn admin_level(&self) -> Option<&str> { self.admin_level.as_deref() }

    /// Use this `admin_level` instead of inferring one; loading fails if the data has none.
    pub fn with_admin_level(mut self, level: &str) -> Self {
        self.admin_level = Some(level.to_string());
        self
    }

    /// Boundaries from a saved Overpass `[out:json]` response.
    pub fn load_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        self.load_elements(&OsmElements::from_file(path)?, None, LayerSource::File(path.to_path_buf()))
    }

    pub fn load_overpass(self, value: &Value) -> Result<Self> {
        self.load_elements(&OsmElements::from_overpass(value)?, None, LayerSource::Inline)
    }

    #[cfg(feature = "download")]
    pub fn load_bbox(self, bbox: Rect<f64>, network: &crate::config::Network) -> Result<Self> {
        let elements = super::osm_features::fetch_elements(&boundary_tags(), &bbox, network)?;
        self.load_elements(&elements, None, LayerSource::bbox(&bbox))
    }

    /// Boundaries inside the geocoded extent of `place`; all fetched boundaries when none
    /// lie fully inside it.
    #[cfg(feature = "download")]
    pub fn load_place(self, place: &str, network: &crate::config::Network) -> Result<Self> {
        let extent = super::osm::geocode_place(place, network)?;
        let elements = super::osm_features::fetch_elements(&boundary_tags(), &extent, network)?;
        self.load_elements(&elements, Some(&extent), LayerSource::Place(place.to_string()))
    }

    fn load_elements(mut self, elements: &OsmElements, within: Option<&Rect<f64>>, source: LayerSource) -> Result<Self> {
        let candidates = boundaries(elements, within);
        let levels = candidates.iter().map(|(level, _, _)| level.clone()).collect::<BTreeSet<_>>();
        if levels.is_empty() {
            bail!("[urban_layer::region] No administrative boundaries with an admin_level in the data");
        }

        let level = match self.admin_level.take() {
            Some(level) if levels.contains(&level) => {
                debug!(level = %level, "admin level overridden");
                level
            }
            Some(level) => bail!(
                "[urban_layer::region] admin_level {level} not found; available levels: {}",
                levels.into_iter().collect::<Vec<_>>().join(", "),
            ),
            None => {
                let level = infer_admin_level(&candidates, self.division)?;
                info!(
                    division = ?self.division,
                    level = %level,
                    available = ?levels,
                    "inferred admin level; set one explicitly with with_admin_level() to override",
                );
                level
            }
        };

        let selected = candidates.into_iter()
            .filter(|(candidate, _, _)| *candidate == level)
            .map(|(_, element, area)| (element, Geometry::MultiPolygon(area)))
            .collect();
        self.state.set_features(features_table(selected)?, source);
        self.admin_level = Some(level);
        Ok(self)
    }

    pub fn from_config(config: &Value, division: Division) -> Result<Self> {
        let admin_level = config.get("admin_level").and_then(Value::as_str).map(str::to_string);
        Ok(Self { state: LayerState::from_config(config)?, division, admin_level })
    }
}

/// Areal administrative boundaries as `(admin_level, element, area)`. Relations are
/// preferred over closed ways when the data has any.
fn boundaries<'a>(elements: &'a OsmElements, within: Option<&Rect<f64>>) -> Vec<(String, &'a Tagged, MultiPolygon<f64>)> {
    let all = elements.matching(&boundary_tags()).into_iter()
        .filter_map(|(element, geometry)| {
            let level = element.tags.get("admin_level")?.clone();
            let area = match geometry {
                Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
                Geometry::MultiPolygon(area) => area,
                _ => return None,
            };
            Some((level, element, area))
        })
        .collect::<Vec<_>>();

    let inside = |area: &MultiPolygon<f64>| {
        within.zip(area.bounding_rect()).is_some_and(|(extent, rect)| {
            rect.min().x >= extent.min().x && rect.min().y >= extent.min().y
                && rect.max().x <= extent.max().x && rect.max().y <= extent.max().y
        })
    };
    let mut kept = match within {
        Some(_) if all.iter().any(|(_, _, area)| inside(area)) => {
            all.into_iter().filter(|(_, _, area)| inside(area)).collect::<Vec<_>>()
        }
        Some(_) => {
            debug!("no boundaries lie inside the place extent; using all fetched boundaries");
            all
        }
        None => all,
    };

    if kept.iter().any(|(_, element, _)| element.kind == ElementKind::Relation) {
        kept.retain(|(_, element, _)| element.kind == ElementKind::Relation);
    }
    kept
}

/// Level with the best [`Division::score`]; ties go to the lowest level.
fn infer_admin_level(candidates: &[(String, &Tagged, MultiPolygon<f64>)], division: Division) -> Result<String> {
    let levels = candidates.iter().map(|(level, _, _)| level.as_str()).collect::<BTreeSet<_>>();
    let mut levels = levels.into_iter().collect::<Vec<_>>();
    levels.sort_by_key(|level| (level.parse::<i64>().unwrap_or(i64::MAX), *level));

    let total = candidates.len() as f64;
    let mut best: Option<(&str, f64)> = None;
    for level in levels {
        let areas = candidates.iter()
            .filter(|(candidate, _, _)| candidate == level)
            .map(|(_, _, area)| area)
            .collect::<Vec<_>>();
        let share = areas.len() as f64 / total;
        let percent = connectivity(&areas);
        let score = division.score(share, percent);
        debug!(level, count = areas.len(), connectivity = percent, score, "scored admin level");
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((level, score));
        }
    }
    best.map(|(level, _)| level.to_string())
        .ok_or_else(|| anyhow::anyhow!("[urban_layer::region] No admin levels to choose from"))
}

/// Percentage of `areas` that touch or overlap at least one other area.
fn connectivity(areas: &[&MultiPolygon<f64>]) -> f64 {
    if areas.len() < 2 {
        return 0.0;
    }
    let rects = areas.iter().map(|area| area.bounding_rect()).collect::<Vec<_>>();
    let tree = RTree::bulk_load(rects.iter().enumerate()
        .filter_map(|(idx, rect)| rect.map(|r| GeomWithData::new(Rectangle::<[f64; 2]>::from_corners(r.min().into(), r.max().into()), idx)))
        .collect());

    let connected = rects.iter().enumerate()
        .filter(|(i, rect)| {
            let Some(rect) = rect else { return false };
            let search = AABB::<[f64; 2]>::from_corners(rect.min().into(), rect.max().into());
            tree.locate_in_envelope_intersecting(&search).any(|candidate| {
                let j = candidate.data;
                if j == *i {
                    return false;
                }
                let im = areas[*i].relate(areas[j]);
                // touching or partially overlapping, not nested
                im.is_intersects() && !im.is_within() && !im.is_contains()
            })
        })
        .count();
    connected as f64 / areas.len() as f64 * 100.0
}

impl UrbanLayer for AdminRegions {
    fn type_name(&self) -> &'static str { self.division.layer_name() }

    fn state(&self) -> &LayerState { &self.state }

    fn state_mut(&mut self) -> &mut LayerState { &mut self.state }

    fn map_nearest(&self, features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>> {
        map_to_nearest(features, data, mapping)
    }

    fn to_config(&self) -> Result<Value> {
        let mut config = self.state.to_config();
        config["tags"] = json!(boundary_tags());
        config["admin_level"] = json!(self.admin_level);
        Ok(config)
    }
}
