use std::path::Path;

use anyhow::Result;
use serde_json::{Value, json};

use crate::geo_frame::GeoFrame;

use super::{
    Features, LayerSource, LayerState, Mapping, UrbanLayer, map_to_nearest,
    osm::{NetworkType, OsmNetwork},
};

/// Street segments from OpenStreetMap; rows map to the closest segment.
#[derive(Debug, Clone, Default)]
pub struct OsmStreets {
    state: LayerState,
    network_type: NetworkType,
}

impl OsmStreets {
    pub const NAME: &'static str = "streets_roads";

    /// An unbuilt layer; load features with one of the `load_*` methods.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    pub fn network_type(&self) -> NetworkType { self.network_type }

    /// Features from a saved Overpass `[out:json]` response.
    pub fn load_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let network = OsmNetwork::from_file(path, self.network_type)?;
        self.state.set_features(network.streets()?, LayerSource::File(path.to_path_buf()));
        Ok(self)
    }

    /// Features from an Overpass response already in memory.
    pub fn load_overpass(mut self, value: &Value) -> Result<Self> {
        let network = OsmNetwork::from_overpass(value, self.network_type)?;
        self.state.set_features(network.streets()?, LayerSource::Inline);
        Ok(self)
    }

    #[cfg(feature = "download")]
    pub fn load_bbox(mut self, bbox: geo::Rect<f64>, network: &crate::config::Network) -> Result<Self> {
        let osm = super::osm::fetch_network(&bbox, self.network_type, network)?;
        self.state.set_features(osm.streets()?, LayerSource::bbox(&bbox));
        Ok(self)
    }

    #[cfg(feature = "download")]
    pub fn load_place(mut self, place: &str, network: &crate::config::Network) -> Result<Self> {
        let bbox = super::osm::geocode_place(place, network)?;
        let osm = super::osm::fetch_network(&bbox, self.network_type, network)?;
        self.state.set_features(osm.streets()?, LayerSource::Place(place.to_string()));
        Ok(self)
    }

    /// Unbuilt layer with the configured mappings and network type.
    pub fn from_config(config: &Value) -> Result<Self> {
        let network_type = match config.get("network_type").filter(|v| !v.is_null()) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => NetworkType::default(),
        };
        Ok(Self { state: LayerState::from_config(config)?, network_type })
    }
}

impl UrbanLayer for OsmStreets {
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

    fn overpass() -> Value {
        json!({
            "elements": [
                { "type": "node", "id": 1, "lon": -74.00, "lat": 40.690 },
                { "type": "node", "id": 2, "lon": -73.98, "lat": 40.690 },
                { "type": "node", "id": 3, "lon": -74.00, "lat": 40.700 },
                { "type": "node", "id": 4, "lon": -73.98, "lat": 40.700 },
                { "type": "way", "id": 7, "nodes": [1, 2], "tags": { "highway": "primary" } },
                { "type": "way", "id": 8, "nodes": [3, 4], "tags": { "highway": "primary" } },
            ]
        })
    }

    #[test]
    fn maps_to_closest_segment() {
        let mut layer = OsmStreets::new().load_overpass(&overpass()).unwrap();
        let data = df!("lon" => [-73.99, -73.99], "lat" => [40.699, 40.6905]).unwrap();
        let data = GeoFrame::new(data, "lon", "lat").unwrap();
        let mapped = layer.map_nearest_layer(data, Some(Mapping::new("lon", "lat", "street"))).unwrap();
        let street = mapped.frame().column("street").unwrap().u32().unwrap().clone();
        assert_eq!(street.get(0), Some(1));
        assert_eq!(street.get(1), Some(0));
    }

    #[test]
    fn config_keeps_network_type() {
        let mut layer = OsmStreets::new().with_network_type(NetworkType::Walk);
        layer.add_mapping(Mapping::new("x", "y", "z")).unwrap();
        let config = layer.to_config().unwrap();
        assert_eq!(config["network_type"], "walk");

        let back = OsmStreets::from_config(&config).unwrap();
        assert_eq!(back.network_type(), NetworkType::Walk);
        assert_eq!(back.mappings().len(), 1);
        assert!(back.state().features().is_none());
    }
}
