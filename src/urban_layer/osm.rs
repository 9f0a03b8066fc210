//! OpenStreetMap street networks from Overpass API JSON.

use std::{collections::BTreeMap, fs, path::Path};

use ahash::AHashMap;
use anyhow::{Context, Result, anyhow, ensure};
use geo::{Coord, Geometry, LineString, Point, Rect};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Features;

/// Which ways count as part of the street network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Streets usable by cars.
    #[default]
    Drive,
    /// Streets and paths usable on foot.
    Walk,
    /// Streets and paths usable by bicycle.
    Bike,
    /// Every way with a `highway` tag.
    All,
}

impl NetworkType {
    fn excluded(self) -> &'static [&'static str] {
        match self {
            NetworkType::Drive => &[
                "footway", "path", "cycleway", "pedestrian", "steps", "bridleway",
                "corridor", "track", "proposed", "construction", "abandoned", "platform",
            ],
            NetworkType::Walk => &["motorway", "motorway_link", "trunk", "trunk_link", "proposed", "construction", "abandoned"],
            NetworkType::Bike => &["motorway", "motorway_link", "footway", "steps", "corridor", "proposed", "construction", "abandoned"],
            NetworkType::All => &[],
        }
    }

    pub(crate) fn includes(self, highway: &str) -> bool {
        !self.excluded().contains(&highway)
    }

    /// Overpass QL highway filter for this network.
    #[cfg(feature = "download")]
    fn overpass_filter(self) -> String {
        match self.excluded() {
            [] => r#"["highway"]"#.to_string(),
            excluded => format!(r#"["highway"]["highway"!~"{}"]"#, excluded.join("|")),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Way {
    pub(crate) id: i64,
    pub(crate) nodes: Vec<i64>,
    pub(crate) tags: BTreeMap<String, String>,
}

/// Nodes and highway ways from an Overpass `[out:json]` response.
#[derive(Debug, Clone, Default)]
pub(crate) struct OsmNetwork {
    nodes: AHashMap<i64, Coord<f64>>,
    ways: Vec<Way>,
}

impl OsmNetwork {
    pub(crate) fn from_overpass(value: &Value, network_type: NetworkType) -> Result<Self> {
        let elements = value["elements"].as_array()
            .ok_or_else(|| anyhow!("[urban_layer::osm] Overpass response has no `elements` array"))?;

        let mut network = OsmNetwork::default();
        for element in elements {
            let id = element["id"].as_i64()
                .ok_or_else(|| anyhow!("[urban_layer::osm] Element without an integer id: {element}"))?;
            match element["type"].as_str() {
                Some("node") => {
                    let (Some(lon), Some(lat)) = (element["lon"].as_f64(), element["lat"].as_f64()) else {
                        continue;
                    };
                    network.nodes.insert(id, Coord { x: lon, y: lat });
                }
                Some("way") => {
                    let tags: BTreeMap<String, String> = element["tags"].as_object()
                        .map(|tags| tags.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect())
                        .unwrap_or_default();
                    let Some(highway) = tags.get("highway") else { continue };
                    if !network_type.includes(highway) {
                        continue;
                    }
                    let nodes = element["nodes"].as_array()
                        .map(|nodes| nodes.iter().filter_map(Value::as_i64).collect())
                        .unwrap_or_default();
                    network.ways.push(Way { id, nodes, tags });
                }
                _ => {}
            }
        }
        ensure!(!network.ways.is_empty(), "[urban_layer::osm] No {network_type:?} streets in Overpass data");
        Ok(network)
    }

    pub(crate) fn from_file(path: &Path, network_type: NetworkType) -> Result<Self> {
        Self::from_overpass(&read_overpass_file(path)?, network_type)
    }

    fn way_coords(&self, way: &Way) -> Vec<Coord<f64>> {
        way.nodes.iter().filter_map(|id| self.nodes.get(id).copied()).collect()
    }

    /// One line feature per way, with `osm_id`, `name` and `highway` attributes.
    pub(crate) fn streets(&self) -> Result<Features> {
        let mut geometries = Vec::new();
        let (mut ids, mut names, mut highways) = (Vec::new(), Vec::new(), Vec::new());
        for way in &self.ways {
            let coords = self.way_coords(way);
            if coords.len() < 2 { continue }
            geometries.push(Geometry::LineString(LineString::new(coords)));
            ids.push(way.id);
            names.push(way.tags.get("name").cloned());
            highways.push(way.tags.get("highway").cloned());
        }
        let attributes = DataFrame::new(vec![
            Series::new("osm_id".into(), ids).into(),
            Series::new("name".into(), names).into(),
            Series::new("highway".into(), highways).into(),
        ])?;
        Features::new(geometries, attributes)
    }

    /// Street-graph nodes: dead ends and junctions, i.e. nodes whose number of incident
    /// street segments is not two.
    pub(crate) fn intersections(&self) -> Result<Features> {
        let mut degree: AHashMap<i64, u32> = AHashMap::new();
        for way in &self.ways {
            let last = way.nodes.len().saturating_sub(1);
            for (i, id) in way.nodes.iter().enumerate() {
                let segments = if i == 0 || i == last { 1 } else { 2 };
                *degree.entry(*id).or_default() += segments;
            }
        }

        let mut ids = degree.into_iter()
            .filter(|&(id, count)| count != 2 && self.nodes.contains_key(&id))
            .collect::<Vec<_>>();
        ids.sort_unstable();

        let geometries = ids.iter()
            .filter_map(|(id, _)| self.nodes.get(id).map(|c| Geometry::Point(Point::from(*c))))
            .collect();
        let attributes = DataFrame::new(vec![
            Series::new("osm_id".into(), ids.iter().map(|(id, _)| *id).collect::<Vec<_>>()).into(),
            Series::new("street_count".into(), ids.iter().map(|(_, n)| *n).collect::<Vec<_>>()).into(),
        ])?;
        Features::new(geometries, attributes)
    }
}

/// Query Overpass for the highway ways (and their nodes) inside `bbox`.
#[cfg(feature = "download")]
pub(crate) fn fetch_network(bbox: &Rect<f64>, network_type: NetworkType, network: &crate::config::Network) -> Result<OsmNetwork> {
    let query = format!(
        "[out:json][timeout:{timeout}];(way{filter}{bbox};);(._;>;);out body;",
        timeout = network.timeout_secs,
        filter = network_type.overpass_filter(),
        bbox = bbox_clause(bbox),
    );
    tracing::info!(url = %network.overpass_url, "downloading street network from Overpass");
    OsmNetwork::from_overpass(&post_overpass(&query, network)?, network_type)
}

/// Overpass `(south,west,north,east)` clause.
#[cfg(feature = "download")]
pub(crate) fn bbox_clause(bbox: &Rect<f64>) -> String {
    format!("({},{},{},{})", bbox.min().y, bbox.min().x, bbox.max().y, bbox.max().x)
}

/// Run an Overpass QL query and parse the JSON response.
#[cfg(feature = "download")]
pub(crate) fn post_overpass(query: &str, network: &crate::config::Network) -> Result<Value> {
    let body = crate::common::http_client(network)?
        .post(&network.overpass_url)
        .form(&[("data", query)])
        .send()
        .with_context(|| format!("POST {}", network.overpass_url))?
        .error_for_status()
        .with_context(|| format!("POST {} returned error status", network.overpass_url))?
        .text()?;
    serde_json::from_str(&body).context("[urban_layer::osm] Overpass returned invalid JSON")
}

/// Parse a saved Overpass `[out:json]` response.
pub(crate) fn read_overpass_file(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("[urban_layer::osm] Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("[urban_layer::osm] {} is not valid JSON", path.display()))
}

/// Extent of a place name via the configured geocoder.
#[cfg(feature = "download")]
pub(crate) fn geocode_place(place: &str, network: &crate::config::Network) -> Result<Rect<f64>> {
    let client = crate::common::http_client(network)?;
    let hit = crate::common::geocode(&client, place, None, network)?
        .ok_or_else(|| anyhow!("[urban_layer::osm] No geocoding result for {place:?}"))?;
    Ok(hit.extent)
}

/// Bounding box `(min_lon, min_lat, max_lon, max_lat)` as a rectangle.
pub(crate) fn rect_from_bbox(bbox: (f64, f64, f64, f64)) -> Result<Rect<f64>> {
    let (min_x, min_y, max_x, max_y) = bbox;
    ensure!(min_x < max_x && min_y < max_y,
        "[urban_layer::osm] Bounding box must be (min_lon, min_lat, max_lon, max_lat), got {bbox:?}");
    Ok(Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y }))
}
