use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::{
    config::{Config, SchemaEntry},
    stage::StageFamily,
};

/// Allowed number of steps of one family; `max: None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: usize,
    pub max: Option<usize>,
}

impl Bounds {
    pub const fn new(min: usize, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {max}]", self.min),
            None => write!(f, "[{}, ∞)", self.min),
        }
    }
}

/// Which stage families a pipeline may contain, and how many of each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSchema {
    entries: Vec<(StageFamily, Bounds)>,
}

impl PipelineSchema {
    /// Families are unique; `Other` can never be declared.
    pub fn new(entries: impl IntoIterator<Item = (StageFamily, Bounds)>) -> Result<Self> {
        let mut schema = Self { entries: Vec::new() };
        for (family, bounds) in entries {
            if family == StageFamily::Other {
                bail!("[schema] The `other` family cannot be part of a pipeline schema");
            }
            if schema.bounds(family).is_some() {
                bail!("[schema] Family `{family}` is declared twice");
            }
            if bounds.max.is_some_and(|max| max < bounds.min) {
                bail!("[schema] Family `{family}` has max below min {bounds}");
            }
            schema.entries.push((family, bounds));
        }
        Ok(schema)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.pipeline.schema.iter()
            .map(|&SchemaEntry { family, min, max }| (family, Bounds::new(min, max))))
    }

    pub fn bounds(&self, family: StageFamily) -> Option<Bounds> {
        self.entries.iter().find(|(f, _)| *f == family).map(|(_, bounds)| *bounds)
    }

    pub fn entries(&self) -> &[(StageFamily, Bounds)] {
        &self.entries
    }
}

impl Default for PipelineSchema {
    /// UrbanLayer and Loader exactly once, at most one Visualiser, any number of the rest.
    fn default() -> Self {
        let one = Bounds::new(1, Some(1));
        let any = Bounds::new(0, None);
        Self {
            entries: vec![
                (StageFamily::UrbanLayer, one),
                (StageFamily::Loader, one),
                (StageFamily::Imputer, any),
                (StageFamily::Filter, any),
                (StageFamily::Enricher, any),
                (StageFamily::Visualiser, Bounds::new(0, Some(1))),
            ],
        }
    }
}
