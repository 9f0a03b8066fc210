//! Name → constructor tables for every stage family.
//!
//! Saved pipelines store each step as `(family, type name, config)`; loading looks the
//! type name up here and rebuilds the stage from its config.

use std::{collections::BTreeMap, sync::LazyLock};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::{
    common::closest_match,
    enricher::{self, Enricher},
    error::PipelineError,
    filter::{self, Filter},
    imputer::{self, Imputer},
    loader::{self, Loader},
    stage::{Stage, StageFamily},
    urban_layer::{self, UrbanLayer},
    visualiser::{self, Visualiser},
};

/// Builds a stage from its persisted configuration.
pub type Constructor<T> = fn(&Value) -> Result<Box<T>>;

/// Constructors for one stage family, keyed by type name.
pub struct Registry<T: ?Sized> {
    family: StageFamily,
    entries: BTreeMap<String, Constructor<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new(family: StageFamily) -> Self {
        Self { family, entries: BTreeMap::new() }
    }

    pub fn family(&self) -> StageFamily { self.family }

    /// Add a constructor; names are unique within a family.
    pub fn register(&mut self, name: &str, constructor: Constructor<T>) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(PipelineError::DuplicateRegistration {
                family: self.family.to_string(),
                name: name.to_string(),
            }.into());
        }
        self.entries.insert(name.to_string(), constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Error for a name that is not registered, with the closest registered name if any.
    pub fn unknown(&self, name: &str) -> PipelineError {
        PipelineError::UnknownStageType {
            family: self.family.to_string(),
            name: name.to_string(),
            available: self.entries.keys().cloned().collect(),
            suggestion: closest_match(name, self.entries.keys().map(String::as_str)),
        }
    }

    /// Exact name, or [`PipelineError::UnknownStageType`].
    pub fn resolve(&self, name: &str) -> Result<&str> {
        self.entries.get_key_value(name)
            .map(|(key, _)| key.as_str())
            .ok_or_else(|| self.unknown(name).into())
    }

    pub fn build(&self, name: &str, config: &Value) -> Result<Box<T>> {
        let constructor = self.entries.get(name).ok_or_else(|| self.unknown(name))?;
        constructor(config)
    }
}

/// One registry per stage family.
pub struct Registries {
    pub loaders: Registry<dyn Loader>,
    pub imputers: Registry<dyn Imputer>,
    pub filters: Registry<dyn Filter>,
    pub enrichers: Registry<dyn Enricher>,
    pub urban_layers: Registry<dyn UrbanLayer>,
    pub visualisers: Registry<dyn Visualiser>,
}

static BUILTIN: LazyLock<Result<Registries, String>> =
    LazyLock::new(|| Registries::builtin().map_err(|e| format!("{e:#}")));

impl Registries {
    /// Empty registries.
    pub fn new() -> Self {
        Self {
            loaders: Registry::new(StageFamily::Loader),
            imputers: Registry::new(StageFamily::Imputer),
            filters: Registry::new(StageFamily::Filter),
            enrichers: Registry::new(StageFamily::Enricher),
            urban_layers: Registry::new(StageFamily::UrbanLayer),
            visualisers: Registry::new(StageFamily::Visualiser),
        }
    }

    /// Registries holding every shipped stage.
    pub fn builtin() -> Result<Self> {
        let mut registries = Self::new();
        loader::register_builtin(&mut registries.loaders)?;
        imputer::register_builtin(&mut registries.imputers)?;
        filter::register_builtin(&mut registries.filters)?;
        enricher::register_builtin(&mut registries.enrichers)?;
        urban_layer::register_builtin(&mut registries.urban_layers)?;
        visualiser::register_builtin(&mut registries.visualisers)?;
        Ok(registries)
    }

    /// Process-wide builtin registries, built on first use.
    pub fn global() -> Result<&'static Registries> {
        BUILTIN.as_ref().map_err(|e| anyhow!("[registry] Failed to build builtin registries: {e}"))
    }

    /// Registered names of `family`; empty for [`StageFamily::Other`].
    pub fn names(&self, family: StageFamily) -> Vec<&str> {
        match family {
            StageFamily::Loader => self.loaders.names(),
            StageFamily::Imputer => self.imputers.names(),
            StageFamily::Filter => self.filters.names(),
            StageFamily::Enricher => self.enrichers.names(),
            StageFamily::UrbanLayer => self.urban_layers.names(),
            StageFamily::Visualiser => self.visualisers.names(),
            StageFamily::Other => Vec::new(),
        }
    }

    /// Rebuild a stage from `(family, type name, config)`.
    pub fn build_stage(&self, family: StageFamily, name: &str, config: &Value) -> Result<Stage> {
        Ok(match family {
            StageFamily::Loader => Stage::Loader(self.loaders.build(name, config)?),
            StageFamily::Imputer => Stage::Imputer(self.imputers.build(name, config)?),
            StageFamily::Filter => Stage::Filter(self.filters.build(name, config)?),
            StageFamily::Enricher => Stage::Enricher(self.enrichers.build(name, config)?),
            StageFamily::UrbanLayer => Stage::UrbanLayer(self.urban_layers.build(name, config)?),
            StageFamily::Visualiser => Stage::Visualiser(self.visualisers.build(name, config)?),
            StageFamily::Other => {
                return Err(anyhow!("[registry] Cannot rebuild unrecognised step of type {name}"));
            }
        })
    }
}

impl Default for Registries {
    fn default() -> Self { Self::new() }
}
