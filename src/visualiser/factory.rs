use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::{error::PipelineError, registry::Registries, stage::Stage};

use super::{InteractiveVisualiser, StaticVisualiser, Style, Visualiser};

/// Fluent builder for visualisers.
#[derive(Debug, Clone, Default)]
pub struct VisualiserFactory {
    visualiser_type: Option<String>,
    style: Style,
}

impl VisualiserFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, visualiser_type: &str) -> Self {
        self.visualiser_type = Some(visualiser_type.to_string());
        self
    }

    /// Add style entries; later calls override earlier keys.
    pub fn with_style<K, I>(mut self, style: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.style.extend(style.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn build(self) -> Result<Box<dyn Visualiser>> {
        let visualiser_type = self.visualiser_type.as_deref().ok_or_else(|| {
            PipelineError::incomplete("VisualiserFactory", "visualiser type not set; call with_type()")
        })?;
        let registries = Registries::global()?;
        let visualiser: Box<dyn Visualiser> = match registries.visualisers.resolve(visualiser_type)? {
            StaticVisualiser::NAME => Box::new(StaticVisualiser::with_style(self.style)?),
            InteractiveVisualiser::NAME => Box::new(InteractiveVisualiser::with_style(self.style)?),
            other => return Err(registries.visualisers.unknown(other).into()),
        };
        debug!(visualiser = visualiser.type_name(), style = ?visualiser.style(), "visualiser built");
        Ok(visualiser)
    }
}

impl From<VisualiserFactory> for Stage {
    fn from(factory: VisualiserFactory) -> Self {
        Stage::other(factory)
    }
}
