use std::path::Path;

use anyhow::Result;
use serde_json::{Value, json};

use crate::geo_frame::GeoFrame;

use super::{
    Features, LayerSource, LayerState, Mapping, UrbanLayer, map_to_nearest,
    osm::{NetworkType, OsmNetwork},
};

/// Street intersections and dead ends from OpenStreetMap, as points.
#[derive(Debug, Clone, Default)]
pub struct OsmIntersections {
    state: LayerState,
    network_type: NetworkType,
}

impl OsmIntersections {
    pub const NAME: &'static str = "streets_intersections";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    pub fn network_type(&self) -> NetworkType { self.network_type }

    pub fn load_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let network = OsmNetwork::from_file(path, self.network_type)?;
        self.state.set_features(network.intersections()?, LayerSource::File(path.to_path_buf()));
        Ok(self)
    }

    pub fn load_overpass(mut self, value: &Value) -> Result<Self> {
        let network = OsmNetwork::from_overpass(value, self.network_type)?;
        self.state.set_features(network.intersections()?, LayerSource::Inline);
        Ok(self)
    }

    #[cfg(feature = "download")]
    pub fn load_bbox(mut self, bbox: geo::Rect<f64>, network: &crate::config::Network) -> Result<Self> {
        let osm = super::osm::fetch_network(&bbox, self.network_type, network)?;
        self.state.set_features(osm.intersections()?, LayerSource::bbox(&bbox));
        Ok(self)
    }

    #[cfg(feature = "download")]
    pub fn load_place(mut self, place: &str, network: &crate::config::Network) -> Result<Self> {
        let bbox = super::osm::geocode_place(place, network)?;
        let osm = super::osm::fetch_network(&bbox, self.network_type, network)?;
        self.state.set_features(osm.intersections()?, LayerSource::Place(place.to_string()));
        Ok(self)
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let network_type = match config.get("network_type").filter(|v| !v.is_null()) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => NetworkType::default(),
        };
        Ok(Self { state: LayerState::from_config(config)?, network_type })
    }
}

impl UrbanLayer for OsmIntersections {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn state(&self) -> &LayerState { &self.state }

    fn state_mut(&mut self) -> &mut LayerState { &mut self.state }

    fn map_nearest(&self, features: &Features, data: &GeoFrame, mapping: &Mapping) -> Result<Vec<Option<u32>>> {
        map_to_nearest(features, data, mapping)
    }

    fn to_config(&self) -> Result<Value> {
        let mut config = self.state.to_config();
        config["network_type"] = json!(self.network_type);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;

    #[test]
    fn maps_to_nearest_junction() {
        let overpass = json!({
            "elements": [
                { "type": "node", "id": 1, "lon": -74.00, "lat": 40.69 },
                { "type": "node", "id": 2, "lon": -73.99, "lat": 40.69 },
                { "type": "node", "id": 3, "lon": -73.98, "lat": 40.69 },
                { "type": "way", "id": 7, "nodes": [1, 2, 3], "tags": { "highway": "residential" } },
            ]
        });
        let mut layer = OsmIntersections::new().load_overpass(&overpass).unwrap();
        // node 2 is a pass-through, only the two ends are intersections
        assert_eq!(layer.get_layer().unwrap().len(), 2);

        let data = df!("lon" => [-73.981], "lat" => [40.6901]).unwrap();
        let data = GeoFrame::new(data, "lon", "lat").unwrap();
        let mapped = layer.map_nearest_layer(data, Some(Mapping::new("lon", "lat", "node"))).unwrap();
        assert_eq!(mapped.frame().column("node").unwrap().u32().unwrap().get(0), Some(1));
    }
}
