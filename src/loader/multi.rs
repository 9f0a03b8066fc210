use anyhow::{Context, Result, anyhow, ensure};
use polars::prelude::*;
use serde_json::{Value, json};

use crate::{geo_frame::GeoFrame, registry::Registries};

use super::Loader;

/// Column tagging each row with the id of the loader it came from.
pub const DATA_ID_COLUMN: &str = "data_id";

/// Several loaders stacked into one table.
///
/// Every source's coordinate columns are renamed to the first source's names; columns
/// missing from a source are filled with nulls.
#[derive(Debug, Default)]
pub struct MultiLoader {
    sources: Vec<(String, Box<dyn Loader>)>,
}

impl MultiLoader {
    pub const NAME: &'static str = "MultiLoader";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source under a unique id.
    pub fn with_source(mut self, id: &str, loader: Box<dyn Loader>) -> Result<Self> {
        ensure!(!self.sources.iter().any(|(existing, _)| existing == id),
            "[loader::multi] Duplicate source id {id:?}");
        self.sources.push((id.to_string(), loader));
        Ok(self)
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let registries = Registries::global()?;
        let sources = config["sources"].as_array()
            .ok_or_else(|| anyhow!("[loader::multi] Config has no `sources` array"))?;
        let mut loader = Self::new();
        for source in sources {
            let id = source["id"].as_str()
                .ok_or_else(|| anyhow!("[loader::multi] Source without an id"))?;
            let type_name = source["type"].as_str()
                .ok_or_else(|| anyhow!("[loader::multi] Source {id:?} without a type"))?;
            let inner = registries.loaders.build(type_name, &source["config"])?;
            loader = loader.with_source(id, inner)?;
        }
        Ok(loader)
    }
}

impl Loader for MultiLoader {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn read(&self) -> Result<GeoFrame> {
        let ((first_id, first), rest) = self.sources.split_first()
            .ok_or_else(|| anyhow!("[loader::multi] No sources configured; call with_source()"))?;

        let first_data = first.load_data_from_file()
            .with_context(|| format!("[loader::multi] Source {first_id:?} failed"))?;
        let (longitude, latitude) = (first_data.longitude_column().to_string(), first_data.latitude_column().to_string());

        let mut frames = vec![tag(first_data.into_frame(), first_id)?];
        for (id, loader) in rest {
            let data = loader.load_data_from_file()
                .with_context(|| format!("[loader::multi] Source {id:?} failed"))?;
            let mut frame = tag(data.frame().clone(), id)?;
            if data.longitude_column() != longitude {
                frame.rename(data.longitude_column(), longitude.as_str().into())?;
            }
            if data.latitude_column() != latitude {
                frame.rename(data.latitude_column(), latitude.as_str().into())?;
            }
            frames.push(frame);
        }

        GeoFrame::new(stack(frames)?, &longitude, &latitude)
    }

    fn to_config(&self) -> Result<Value> {
        let sources = self.sources.iter()
            .map(|(id, loader)| Ok(json!({
                "id": id,
                "type": loader.type_name(),
                "config": loader.to_config()?,
            })))
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({ "sources": sources }))
    }
}

fn tag(mut frame: DataFrame, id: &str) -> Result<DataFrame> {
    let ids = Series::new(DATA_ID_COLUMN.into(), vec![id; frame.height()]);
    frame.replace_or_add(DATA_ID_COLUMN.into(), ids)?;
    Ok(frame)
}

/// Vertically stack frames over the union of their columns, in first-seen order.
fn stack(frames: Vec<DataFrame>) -> Result<DataFrame> {
    let mut columns: Vec<(PlSmallStr, DataType)> = Vec::new();
    for frame in &frames {
        for column in frame.get_columns() {
            if !columns.iter().any(|(name, _)| name == column.name()) {
                columns.push((column.name().clone(), column.dtype().clone()));
            }
        }
    }

    let mut stacked: Option<DataFrame> = None;
    for frame in frames {
        let aligned = columns.iter()
            .map(|(name, dtype)| match frame.column(name) {
                Ok(column) => column.cast(dtype)
                    .with_context(|| format!("[loader::multi] Column {name:?} has incompatible types across sources")),
                Err(_) => Ok(Column::full_null(name.clone(), frame.height(), dtype)),
            })
            .collect::<Result<Vec<_>>>()?;
        let aligned = DataFrame::new(aligned)?;
        match stacked.as_mut() {
            Some(acc) => { acc.vstack_mut(&aligned)?; }
            None => stacked = Some(aligned),
        }
    }
    stacked.ok_or_else(|| anyhow!("[loader::multi] Nothing to stack"))
}
