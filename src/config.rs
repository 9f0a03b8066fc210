use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::stage::StageFamily;

/// Library settings. `Config::default()` matches the shipped `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub mapping: MappingDefaults,
    pub network: Network,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// CRS loaders from `UrbanMapper` assume for their input unless `with_crs` says otherwise.
    pub crs: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self { crs: "EPSG:4326".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingDefaults {
    pub default_output_column: String,
}

impl Default for MappingDefaults {
    fn default() -> Self {
        Self { default_output_column: "nearest_element".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub overpass_url: String,
    pub nominatim_url: String,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: "urban-mapper/0.1".into(),
            overpass_url: "https://overpass-api.de/api/interpreter".into(),
            nominatim_url: "https://nominatim.openstreetmap.org/search".into(),
        }
    }
}

impl Network {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One `{family, min, max}` row of the pipeline schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub family: StageFamily,
    #[serde(default)]
    pub min: usize,
    #[serde(default)]
    pub max: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub schema: Vec<SchemaEntry>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let entry = |family, min, max| SchemaEntry { family, min, max };
        Self {
            schema: vec![
                entry(StageFamily::UrbanLayer, 1, Some(1)),
                entry(StageFamily::Loader, 1, Some(1)),
                entry(StageFamily::Imputer, 0, None),
                entry(StageFamily::Filter, 0, None),
                entry(StageFamily::Enricher, 0, None),
                entry(StageFamily::Visualiser, 0, Some(1)),
            ],
        }
    }
}

impl Config {
    /// Parse a YAML document; absent keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("[config] Failed to parse YAML configuration")
    }

    /// Read a YAML configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("[config] Failed to read {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("[config] Invalid configuration in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_yaml_matches_defaults() {
        let shipped = Config::from_yaml_str(include_str!("../config.yaml")).unwrap();
        assert_eq!(shipped, Config::default());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = Config::from_yaml_str("network:\n  timeout_secs: 5\n").unwrap();
        assert_eq!(config.network.timeout_secs, 5);
        assert_eq!(config.network.user_agent, Network::default().user_agent);
        assert_eq!(config.defaults.crs, "EPSG:4326");
        assert_eq!(config.pipeline.schema.len(), 6);
    }

    #[test]
    fn unknown_family_is_rejected() {
        let yaml = "pipeline:\n  schema:\n    - family: model\n      min: 0\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }
}
