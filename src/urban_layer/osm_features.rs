//! Tagged OpenStreetMap features (points, lines and areas) from Overpass API JSON.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::Path,
};

use ahash::AHashMap;
use anyhow::{Result, anyhow, ensure};
use geo::{Contains, Coord, Geometry, LineString, MultiPolygon, Point, Polygon};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{error::PipelineError, geo_frame::GeoFrame};

use super::{Features, LayerSource, LayerState, Mapping, UrbanLayer, map_to_nearest, osm::read_overpass_file};

/// Accepted values for one tag key: `true` for any value, a single value, or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Any(bool),
    Exact(String),
    OneOf(Vec<String>),
}

impl TagValue {
    fn matches(&self, value: &str) -> bool {
        match self {
            TagValue::Any(any) => *any,
            TagValue::Exact(expected) => expected == value,
            TagValue::OneOf(values) => values.iter().any(|v| v == value),
        }
    }
}

impl From<bool> for TagValue {
    fn from(any: bool) -> Self { TagValue::Any(any) }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self { TagValue::Exact(value.to_string()) }
}

impl<const N: usize> From<[&str; N]> for TagValue {
    fn from(values: [&str; N]) -> Self { TagValue::OneOf(values.iter().map(|v| v.to_string()).collect()) }
}

/// A feature is kept when any of its tags matches an entry.
pub type Tags = BTreeMap<String, TagValue>;

fn matches_any(filter: &Tags, tags: &BTreeMap<String, String>) -> bool {
    filter.iter().any(|(key, accepted)| tags.get(key).is_some_and(|value| accepted.matches(value)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "node" => Some(ElementKind::Node),
            "way" => Some(ElementKind::Way),
            "relation" => Some(ElementKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        })
    }
}

#[derive(Debug, Clone)]
struct Member {
    kind: Option<ElementKind>,
    id: i64,
    role: String,
}

/// An element carrying tags.
#[derive(Debug, Clone)]
pub(crate) struct Tagged {
    pub(crate) kind: ElementKind,
    pub(crate) id: i64,
    pub(crate) tags: BTreeMap<String, String>,
    members: Vec<Member>,
}

/// Every node and way of an Overpass `[out:json]` response, plus the tagged elements in
/// response order.
#[derive(Debug, Clone, Default)]
pub(crate) struct OsmElements {
    nodes: AHashMap<i64, Coord<f64>>,
    ways: AHashMap<i64, Vec<i64>>,
    tagged: Vec<Tagged>,
}

impl OsmElements {
    pub(crate) fn from_overpass(value: &Value) -> Result<Self> {
        let elements = value["elements"].as_array()
            .ok_or_else(|| anyhow!("[urban_layer::osm_features] Overpass response has no `elements` array"))?;

        let mut parsed = OsmElements::default();
        for element in elements {
            let id = element["id"].as_i64()
                .ok_or_else(|| anyhow!("[urban_layer::osm_features] Element without an integer id: {element}"))?;
            let Some(kind) = element["type"].as_str().and_then(ElementKind::parse) else { continue };
            match kind {
                ElementKind::Node => {
                    if let (Some(lon), Some(lat)) = (element["lon"].as_f64(), element["lat"].as_f64()) {
                        parsed.nodes.insert(id, Coord { x: lon, y: lat });
                    }
                }
                ElementKind::Way => {
                    let nodes = element["nodes"].as_array()
                        .map(|nodes| nodes.iter().filter_map(Value::as_i64).collect())
                        .unwrap_or_default();
                    parsed.ways.insert(id, nodes);
                }
                ElementKind::Relation => {}
            }

            let tags: BTreeMap<String, String> = element["tags"].as_object()
                .map(|tags| tags.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect())
                .unwrap_or_default();
            if tags.is_empty() {
                continue;
            }
            let members = element["members"].as_array()
                .map(|members| members.iter()
                    .filter_map(|m| Some(Member {
                        kind: m["type"].as_str().and_then(ElementKind::parse),
                        id: m["ref"].as_i64()?,
                        role: m["role"].as_str().unwrap_or_default().to_string(),
                    }))
                    .collect())
                .unwrap_or_default();
            parsed.tagged.push(Tagged { kind, id, tags, members });
        }
        Ok(parsed)
    }

    pub(crate) fn from_file(path: &Path) -> Result<Self> {
        Self::from_overpass(&read_overpass_file(path)?)
    }

    /// Tagged elements matching `filter` that resolve to a geometry.
    pub(crate) fn matching<'a>(&'a self, filter: &Tags) -> Vec<(&'a Tagged, Geometry<f64>)> {
        self.tagged.iter()
            .filter(|element| matches_any(filter, &element.tags))
            .filter_map(|element| self.geometry(element).map(|geometry| (element, geometry)))
            .collect()
    }

    fn way_coords(&self, id: i64) -> Option<Vec<Coord<f64>>> {
        let nodes = self.ways.get(&id)?;
        Some(nodes.iter().filter_map(|node| self.nodes.get(node).copied()).collect())
    }

    fn geometry(&self, element: &Tagged) -> Option<Geometry<f64>> {
        match element.kind {
            ElementKind::Node => self.nodes.get(&element.id).map(|c| Point::from(*c).into()),
            ElementKind::Way => {
                let coords = self.way_coords(element.id)?;
                let closed = coords.len() >= 4 && coords.first() == coords.last();
                let linear = element.tags.contains_key("highway") || element.tags.get("area").is_some_and(|a| a == "no");
                match coords.len() {
                    _ if closed && !linear => Some(Polygon::new(LineString::new(coords), vec![]).into()),
                    0 | 1 => None,
                    _ => Some(LineString::new(coords).into()),
                }
            }
            ElementKind::Relation => {
                let area = matches!(element.tags.get("type").map(String::as_str), Some("multipolygon" | "boundary"));
                if !area {
                    return None;
                }
                self.relation_area(element).map(Geometry::MultiPolygon)
            }
        }
    }

    /// Outer rings become polygons; inner rings become holes of the outer ring holding them.
    fn relation_area(&self, relation: &Tagged) -> Option<MultiPolygon<f64>> {
        let (mut outer, mut inner) = (Vec::new(), Vec::new());
        for member in &relation.members {
            if member.kind != Some(ElementKind::Way) {
                continue;
            }
            let Some(coords) = self.way_coords(member.id).filter(|c| c.len() >= 2) else { continue };
            match member.role.as_str() {
                "inner" => inner.push(coords),
                "outer" | "" => outer.push(coords),
                _ => {}
            }
        }

        let mut polygons = assemble_rings(outer).into_iter()
            .map(|ring| Polygon::new(ring, vec![]))
            .collect::<Vec<_>>();
        if polygons.is_empty() {
            return None;
        }
        for hole in assemble_rings(inner) {
            let Some(first) = hole.0.first().copied() else { continue };
            if let Some(polygon) = polygons.iter_mut().find(|p| p.contains(&Point::from(first))) {
                polygon.interiors_push(hole);
            }
        }
        Some(MultiPolygon::new(polygons))
    }
}

/// Join way segments end to end into closed rings; segments that never close are dropped.
fn assemble_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    let mut rings = Vec::new();
    while let Some(mut ring) = segments.pop() {
        loop {
            if ring.len() >= 4 && ring.first() == ring.last() {
                rings.push(LineString::new(ring));
                break;
            }
            let Some(end) = ring.last().copied() else { break };
            let Some(next) = segments.iter().position(|s| s.first() == Some(&end) || s.last() == Some(&end)) else {
                break;
            };
            let mut segment = segments.swap_remove(next);
            if segment.first() != Some(&end) {
                segment.reverse();
            }
            ring.extend(segment.into_iter().skip(1));
        }
    }
    rings
}

/// Feature table with `osm_id`, `element` and one text column per tag key.
pub(crate) fn features_table(matched: Vec<(&Tagged, Geometry<f64>)>) -> Result<Features> {
    const RESERVED: [&str; 2] = ["osm_id", "element"];
    let keys = matched.iter()
        .flat_map(|(element, _)| element.tags.keys())
        .filter(|key| !RESERVED.contains(&key.as_str()))
        .collect::<BTreeSet<_>>();

    let mut columns = vec![
        Series::new("osm_id".into(), matched.iter().map(|(e, _)| e.id).collect::<Vec<_>>()).into_column(),
        Series::new("element".into(), matched.iter().map(|(e, _)| e.kind.to_string()).collect::<Vec<_>>()).into_column(),
    ];
    for key in keys {
        let values = matched.iter().map(|(e, _)| e.tags.get(key).cloned()).collect::<Vec<_>>();
        columns.push(Series::new(key.as_str().into(), values).into_column());
    }
    let attributes = DataFrame::new(columns)?;
    let geometries = matched.into_iter().map(|(_, geometry)| geometry).collect();
    Features::new(geometries, attributes)
}

/// Overpass QL query for every node, way and relation matching `tags` inside `bbox`,
/// with the nodes and ways needed to rebuild their geometries.
#[cfg(feature = "download")]
pub(crate) fn overpass_query(tags: &Tags, bbox: &geo::Rect<f64>, timeout_secs: u64) -> String {
    let area = super::osm::bbox_clause(bbox);
    let mut clauses = String::new();
    for (key, accepted) in tags {
        let key = ql_string(key);
        let filters = match accepted {
            TagValue::Any(false) => vec![],
            TagValue::Any(true) => vec![format!("[\"{key}\"]")],
            TagValue::Exact(value) => vec![format!("[\"{key}\"=\"{}\"]", ql_string(value))],
            TagValue::OneOf(values) => values.iter().map(|v| format!("[\"{key}\"=\"{}\"]", ql_string(v))).collect(),
        };
        for filter in filters {
            for kind in ["node", "way", "relation"] {
                clauses.push_str(&format!("{kind}{filter}{area};"));
            }
        }
    }
    format!("[out:json][timeout:{timeout_secs}];({clauses});(._;>;);out body;")
}

#[cfg(feature = "download")]
fn ql_string(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Query Overpass for the elements matching `tags` inside `bbox`.
#[cfg(feature = "download")]
pub(crate) fn fetch_elements(tags: &Tags, bbox: &geo::Rect<f64>, network: &crate::config::Network) -> Result<OsmElements> {
    let query = overpass_query(tags, bbox, network.timeout_secs);
    tracing::info!(url = %network.overpass_url, tags = tags.len(), "downloading tagged features from Overpass");
    OsmElements::from_overpass(&super::osm::post_overpass(&query, network)?)
}

/// OpenStreetMap features selected by tags, e.g. `{"amenity": ["cafe", "bar"]}`.
#[derive(Debug, Clone, Default)]
pub struct OsmFeatures {
    state: LayerState,
    tags: Tags,
}

impl OsmFeatures {
    pub const NAME: &'static str = "streets_features";

    pub fn new(tags: Tags) -> Self {
        Self { state: LayerState::default(), tags }
    }

    pub fn tags(&self) -> &Tags { &self.tags }

    fn select(&self, elements: &OsmElements) -> Result<Features> {
        if self.tags.is_empty() {
            return Err(PipelineError::missing_attribute(Self::NAME, "tags (use with_tags())").into());
        }
        let matched = elements.matching(&self.tags);
        ensure!(!matched.is_empty(), "[urban_layer::osm_features] No OSM features match {:?}", self.tags);
        features_table(matched)
    }

    /// Features from a saved Overpass `[out:json]` response.
    pub fn load_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let features = self.select(&OsmElements::from_file(path)?)?;
        self.state.set_features(features, LayerSource::File(path.to_path_buf()));
        Ok(self)
    }

    pub fn load_overpass(mut self, value: &Value) -> Result<Self> {
        let features = self.select(&OsmElements::from_overpass(value)?)?;
        self.state.set_features(features, LayerSource::Inline);
        Ok(self)
    }

    #[cfg(feature = "download")]
    pub fn load_bbox(mut self, bbox: geo::Rect<f64>, network: &crate::config::Network) -> Result<Self> {
        let features = self.select(&fetch_elements(&self.tags, &bbox, network)?)?;
        self.state.set_features(features, LayerSource::bbox(&bbox));
        Ok(self)
    }

    #[cfg(feature = "download")]
    pub fn load_place(mut self, place: &str, network: &crate::config::Network) -> Result<Self> {
        let bbox = super::osm::geocode_place(place, network)?;
        let features = self.select(&fetch_elements(&self.tags, &bbox, network)?)?;
        self.state.set_features(features, LayerSource::Place(place.to_string()));
        Ok(self)
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let tags = match config.get("tags").filter(|v| !v.is_null()) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Tags::new(),
        };
        Ok(Self { state: LayerState::from_config(config)?, tags })
    }
}

impl UrbanLayer for OsmFeatures {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn state(&self) -> &LayerState { &self.state }

    fn state_mut(&mut self) -> &mut LayerState { &mut self.state }

    fn map_nearest(&self, features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>> {
        map_to_nearest(features, data, mapping)
    }

    fn to_config(&self) -> Result<Value> {
        let mut config = self.state.to_config();
        config["tags"] = json!(self.tags);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "elements": [
                { "type": "node", "id": 1, "lon": 0.0, "lat": 0.0, "tags": { "amenity": "cafe", "name": "Beans" } },
                { "type": "node", "id": 2, "lon": 0.5, "lat": 0.5, "tags": { "amenity": "bench" } },
                { "type": "node", "id": 3, "lon": 1.0, "lat": 0.0 },
                { "type": "node", "id": 4, "lon": 1.0, "lat": 1.0 },
                { "type": "node", "id": 5, "lon": 2.0, "lat": 1.0 },
                { "type": "node", "id": 6, "lon": 2.0, "lat": 0.0 },
                { "type": "way", "id": 10, "nodes": [3, 4, 5, 6, 3], "tags": { "amenity": "bar", "building": "yes" } },
                { "type": "way", "id": 11, "nodes": [3, 4], "tags": { "highway": "service" } },
            ]
        })
    }

    fn two_halves() -> Value {
        // a square whose outline is split across two open ways
        json!({
            "elements": [
                { "type": "node", "id": 1, "lon": 0.0, "lat": 0.0 },
                { "type": "node", "id": 2, "lon": 1.0, "lat": 0.0 },
                { "type": "node", "id": 3, "lon": 1.0, "lat": 1.0 },
                { "type": "node", "id": 4, "lon": 0.0, "lat": 1.0 },
                { "type": "way", "id": 20, "nodes": [1, 2, 3] },
                { "type": "way", "id": 21, "nodes": [1, 4, 3] },
                { "type": "relation", "id": 30, "members": [
                    { "type": "way", "ref": 20, "role": "outer" },
                    { "type": "way", "ref": 21, "role": "outer" },
                ], "tags": { "type": "multipolygon", "leisure": "park" } },
            ]
        })
    }

    #[test]
    fn tag_filters_select_nodes_and_areas() {
        let tags = Tags::from([("amenity".to_string(), TagValue::from(["cafe", "bar"]))]);
        let layer = OsmFeatures::new(tags).load_overpass(&sample()).unwrap();
        let features = layer.get_layer().unwrap();
        assert_eq!(features.len(), 2);
        assert!(matches!(features.geometries()[0], Geometry::Point(_)));
        assert!(matches!(features.geometries()[1], Geometry::Polygon(_)));

        let elements = features.attributes().column("element").unwrap();
        assert_eq!(elements.str().unwrap().get(1), Some("way"));
        let names = features.attributes().column("name").unwrap();
        assert_eq!(names.str().unwrap().get(0), Some("Beans"));
        assert_eq!(names.str().unwrap().get(1), None);
    }

    #[test]
    fn any_value_and_highways_stay_lines() {
        let tags = Tags::from([("highway".to_string(), TagValue::Any(true))]);
        let elements = OsmElements::from_overpass(&sample()).unwrap();
        let matched = elements.matching(&tags);
        assert_eq!(matched.len(), 1);
        assert!(matches!(matched[0].1, Geometry::LineString(_)));
    }

    #[test]
    fn multipolygon_rings_are_joined() {
        let tags = Tags::from([("leisure".to_string(), TagValue::from("park"))]);
        let elements = OsmElements::from_overpass(&two_halves()).unwrap();
        let matched = elements.matching(&tags);
        assert_eq!(matched.len(), 1);
        let Geometry::MultiPolygon(area) = &matched[0].1 else { panic!("expected a multipolygon") };
        assert_eq!(area.0.len(), 1);
        assert_eq!(area.0[0].exterior().0.len(), 5);
        assert!(area.contains(&Point::new(0.5, 0.5)));
    }

    #[test]
    fn no_match_and_no_tags_are_errors() {
        let tags = Tags::from([("shop".to_string(), TagValue::Any(true))]);
        assert!(OsmFeatures::new(tags).load_overpass(&sample()).is_err());

        let err = OsmFeatures::default().load_overpass(&sample()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingAttribute { .. })));
    }

    #[test]
    fn tags_survive_config() {
        let tags = Tags::from([
            ("amenity".to_string(), TagValue::from(["cafe", "bar"])),
            ("shop".to_string(), TagValue::Any(true)),
        ]);
        let config = OsmFeatures::new(tags.clone()).to_config().unwrap();
        assert_eq!(config["tags"]["shop"], true);
        assert_eq!(OsmFeatures::from_config(&config).unwrap().tags(), &tags);
    }

    #[cfg(feature = "download")]
    #[test]
    fn query_lists_each_accepted_value() {
        let tags = Tags::from([("amenity".to_string(), TagValue::from(["cafe", "bar"]))]);
        let bbox = geo::Rect::new(Coord { x: 0.0, y: 1.0 }, Coord { x: 2.0, y: 3.0 });
        let query = overpass_query(&tags, &bbox, 25);
        assert!(query.starts_with("[out:json][timeout:25];("));
        assert!(query.contains(r#"node["amenity"="cafe"](1,0,3,2);"#));
        assert!(query.contains(r#"relation["amenity"="bar"](1,0,3,2);"#));
        assert!(query.ends_with("(._;>;);out body;"));
    }
}
