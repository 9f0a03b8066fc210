//! Pipeline steps: the closed set of stage families and the step wrapper.

mod preview;

use std::{any::Any, fmt, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    enricher::Enricher, filter::Filter, imputer::Imputer, loader::Loader,
    urban_layer::UrbanLayer, visualiser::Visualiser,
};

pub use preview::{Preview, PreviewFormat};
pub(crate) use preview::config_preview;

/// The category a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFamily {
    UrbanLayer,
    Loader,
    Imputer,
    Filter,
    Enricher,
    Visualiser,
    /// Anything that is not a recognised stage; never executed.
    Other,
}

impl StageFamily {
    pub const ALL: [StageFamily; 6] = [
        StageFamily::UrbanLayer,
        StageFamily::Loader,
        StageFamily::Imputer,
        StageFamily::Filter,
        StageFamily::Enricher,
        StageFamily::Visualiser,
    ];

    /// Position in the composition order; the urban layer runs its mapping after filters.
    /// Visualisers only run on demand and `Other` never does.
    pub fn phase(self) -> Option<u8> {
        match self {
            StageFamily::Loader => Some(1),
            StageFamily::Imputer => Some(2),
            StageFamily::Filter => Some(3),
            StageFamily::UrbanLayer => Some(4),
            StageFamily::Enricher => Some(5),
            StageFamily::Visualiser => Some(6),
            StageFamily::Other => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageFamily::UrbanLayer => "urban_layer",
            StageFamily::Loader => "loader",
            StageFamily::Imputer => "imputer",
            StageFamily::Filter => "filter",
            StageFamily::Enricher => "enricher",
            StageFamily::Visualiser => "visualiser",
            StageFamily::Other => "other",
        }
    }
}

impl fmt::Display for StageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        StageFamily::ALL.into_iter()
            .chain([StageFamily::Other])
            .find(|family| family.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("[stage] Unknown stage family {s:?}"))
    }
}

/// A step's payload: one variant per family, plus an escape hatch for values that are
/// not stages at all (such as a factory whose `build()` was never called).
pub enum Stage {
    UrbanLayer(Box<dyn UrbanLayer>),
    Loader(Box<dyn Loader>),
    Imputer(Box<dyn Imputer>),
    Filter(Box<dyn Filter>),
    Enricher(Box<dyn Enricher>),
    Visualiser(Box<dyn Visualiser>),
    Other { type_name: String, value: Box<dyn Any + Send> },
}

impl Stage {
    /// Wrap an arbitrary value; the validator will reject it.
    pub fn other<T: Any + Send>(value: T) -> Self {
        let type_name = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or("unknown")
            .to_string();
        Stage::Other { type_name, value: Box::new(value) }
    }

    pub fn family(&self) -> StageFamily {
        match self {
            Stage::UrbanLayer(_) => StageFamily::UrbanLayer,
            Stage::Loader(_) => StageFamily::Loader,
            Stage::Imputer(_) => StageFamily::Imputer,
            Stage::Filter(_) => StageFamily::Filter,
            Stage::Enricher(_) => StageFamily::Enricher,
            Stage::Visualiser(_) => StageFamily::Visualiser,
            Stage::Other { .. } => StageFamily::Other,
        }
    }

    /// Registry name of the concrete stage.
    pub fn type_name(&self) -> &str {
        match self {
            Stage::UrbanLayer(s) => s.type_name(),
            Stage::Loader(s) => s.type_name(),
            Stage::Imputer(s) => s.type_name(),
            Stage::Filter(s) => s.type_name(),
            Stage::Enricher(s) => s.type_name(),
            Stage::Visualiser(s) => s.type_name(),
            Stage::Other { type_name, .. } => type_name,
        }
    }

    pub fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        match self {
            Stage::UrbanLayer(s) => s.preview(format),
            Stage::Loader(s) => s.preview(format),
            Stage::Imputer(s) => s.preview(format),
            Stage::Filter(s) => s.preview(format),
            Stage::Enricher(s) => s.preview(format),
            Stage::Visualiser(s) => s.preview(format),
            Stage::Other { type_name, .. } => Ok(match format {
                PreviewFormat::Ascii => Preview::Ascii(format!("Unrecognised step: {type_name}")),
                PreviewFormat::Json => Preview::Json(serde_json::json!({ "type": type_name })),
            }),
        }
    }

    /// Configuration used to persist and rebuild the stage through its registry.
    pub(crate) fn to_config(&self) -> Result<serde_json::Value> {
        match self {
            Stage::UrbanLayer(s) => s.to_config(),
            Stage::Loader(s) => s.to_config(),
            Stage::Imputer(s) => s.to_config(),
            Stage::Filter(s) => s.to_config(),
            Stage::Enricher(s) => s.to_config(),
            Stage::Visualiser(s) => s.to_config(),
            Stage::Other { type_name, .. } => {
                anyhow::bail!("[stage] Cannot persist unrecognised step of type {type_name}")
            }
        }
    }

    pub fn as_urban_layer(&self) -> Option<&dyn UrbanLayer> {
        match self { Stage::UrbanLayer(s) => Some(s.as_ref()), _ => None }
    }

    pub fn as_urban_layer_mut(&mut self) -> Option<&mut (dyn UrbanLayer + 'static)> {
        match self { Stage::UrbanLayer(s) => Some(s.as_mut()), _ => None }
    }

    pub fn as_loader(&self) -> Option<&dyn Loader> {
        match self { Stage::Loader(s) => Some(s.as_ref()), _ => None }
    }

    pub fn as_imputer(&self) -> Option<&dyn Imputer> {
        match self { Stage::Imputer(s) => Some(s.as_ref()), _ => None }
    }

    pub fn as_filter(&self) -> Option<&dyn Filter> {
        match self { Stage::Filter(s) => Some(s.as_ref()), _ => None }
    }

    pub fn as_enricher(&self) -> Option<&dyn Enricher> {
        match self { Stage::Enricher(s) => Some(s.as_ref()), _ => None }
    }

    pub fn as_visualiser(&self) -> Option<&dyn Visualiser> {
        match self { Stage::Visualiser(s) => Some(s.as_ref()), _ => None }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage::{}({})", self.family(), self.type_name())
    }
}

impl From<Box<dyn UrbanLayer>> for Stage {
    fn from(stage: Box<dyn UrbanLayer>) -> Self { Stage::UrbanLayer(stage) }
}

impl From<Box<dyn Loader>> for Stage {
    fn from(stage: Box<dyn Loader>) -> Self { Stage::Loader(stage) }
}

impl From<Box<dyn Imputer>> for Stage {
    fn from(stage: Box<dyn Imputer>) -> Self { Stage::Imputer(stage) }
}

impl From<Box<dyn Filter>> for Stage {
    fn from(stage: Box<dyn Filter>) -> Self { Stage::Filter(stage) }
}

impl From<Box<dyn Enricher>> for Stage {
    fn from(stage: Box<dyn Enricher>) -> Self { Stage::Enricher(stage) }
}

impl From<Box<dyn Visualiser>> for Stage {
    fn from(stage: Box<dyn Visualiser>) -> Self { Stage::Visualiser(stage) }
}

/// Implements `From<Concrete> for Stage` for concrete stage types.
macro_rules! impl_into_stage {
    ($variant:ident: $($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for $crate::stage::Stage {
                fn from(stage: $ty) -> Self { $crate::stage::Stage::$variant(Box::new(stage)) }
            }
        )+
    };
}
pub(crate) use impl_into_stage;

/// A named pipeline step.
#[derive(Debug)]
pub struct Step {
    name: String,
    stage: Stage,
}

impl Step {
    pub fn new(name: impl Into<String>, stage: impl Into<Stage>) -> Self {
        Self { name: name.into(), stage: stage.into() }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn stage(&self) -> &Stage { &self.stage }

    pub(crate) fn stage_mut(&mut self) -> &mut Stage { &mut self.stage }
}

impl<N: Into<String>, S: Into<Stage>> From<(N, S)> for Step {
    fn from((name, stage): (N, S)) -> Self {
        Step::new(name, stage)
    }
}
