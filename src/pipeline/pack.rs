//! `.umpipe` archives: a zip holding `manifest.json` plus the tables a pipeline needs to
//! come back in the state it was saved in.
//!
//! - `layer/geometries.geojson` - urban layer geometries, when the layer is built
//! - `layer/attributes.csv` - urban layer feature table
//! - `data/data.csv` - composed data

use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use ::zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    common::{PendingWrite, sha256_bytes},
    geo_frame::GeoFrame,
    io::{
        csv::{frame_schema, read_csv_bytes, write_csv_bytes},
        geojson::{read_feature_collection, write_feature_collection},
    },
    registry::Registries,
    stage::{StageFamily, Step},
    urban_layer::Features,
};

use super::{
    UrbanPipeline,
    schema::{Bounds, PipelineSchema},
};

const FORMAT: &str = "umpipe";
const VERSION: u32 = 1;
const MANIFEST: &str = "manifest.json";
const GEOMETRIES: &str = "layer/geometries.geojson";
const ATTRIBUTES: &str = "layer/attributes.csv";
const DATA: &str = "data/data.csv";

#[derive(Debug, Serialize, Deserialize)]
struct FileHash {
    sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StepEntry {
    name: String,
    family: StageFamily,
    #[serde(rename = "type")]
    type_name: String,
    config: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerEntry {
    step: String,
    has_mapped: bool,
    features: usize,
    /// `(column, dtype)` pairs; empty when the layer has no attributes.
    attributes: Vec<(String, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataEntry {
    longitude_column: String,
    latitude_column: String,
    columns: Vec<(String, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format: String,
    version: u32,
    composed: bool,
    schema: Vec<(StageFamily, Bounds)>,
    steps: Vec<StepEntry>,
    layer: Option<LayerEntry>,
    data: Option<DataEntry>,
    files: BTreeMap<String, FileHash>,
}

/// Write `pipeline` to `path` through a temporary file.
pub(crate) fn save(pipeline: &UrbanPipeline, path: &Path) -> Result<()> {
    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    let steps = pipeline.steps().iter()
        .map(|step| Ok(StepEntry {
            name: step.name().to_string(),
            family: step.stage().family(),
            type_name: step.stage().type_name().to_string(),
            config: step.stage().to_config()
                .with_context(|| format!("[pack] Failed to save step `{}`", step.name()))?,
        }))
        .collect::<Result<Vec<_>>>()?;

    let mut layer = None;
    if let Some(step) = pipeline.steps().iter().find(|s| s.stage().family() == StageFamily::UrbanLayer)
        && let Some(urban_layer) = step.stage().as_urban_layer()
        && let Some(features) = urban_layer.state().features()
    {
        let bare = DataFrame::empty_with_height(features.len());
        let geometries = write_feature_collection(features.geometries(), &bare)?;
        files.insert(GEOMETRIES.into(), serde_json::to_vec(&geometries)?);
        let attributes = features.attributes();
        if attributes.width() > 0 {
            files.insert(ATTRIBUTES.into(), write_csv_bytes(attributes)?);
        }
        layer = Some(LayerEntry {
            step: step.name().to_string(),
            has_mapped: urban_layer.has_mapped(),
            features: features.len(),
            attributes: frame_schema(attributes),
        });
    }

    let data = pipeline.executor.data().map(|data| -> Result<DataEntry> {
        files.insert(DATA.into(), write_csv_bytes(data.frame())?);
        Ok(DataEntry {
            longitude_column: data.longitude_column().to_string(),
            latitude_column: data.latitude_column().to_string(),
            columns: frame_schema(data.frame()),
        })
    }).transpose()?;

    let manifest = Manifest {
        format: FORMAT.into(),
        version: VERSION,
        composed: pipeline.is_composed(),
        schema: pipeline.schema().entries().to_vec(),
        steps,
        layer,
        data,
        files: files.iter()
            .map(|(name, bytes)| (name.clone(), FileHash { sha256: sha256_bytes(bytes) }))
            .collect(),
    };

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(PendingWrite::open(path)?);
    zip.start_file(MANIFEST, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    for (name, bytes) in &files {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    zip.finish().context("[pack] Failed to finish archive")?.finalize()
        .with_context(|| format!("[pack] Failed to write {}", path.display()))?;

    info!(path = %path.display(), steps = manifest.steps.len(), composed = manifest.composed, "pipeline saved");
    Ok(())
}

/// Read a pipeline written by [`save`], verifying every member's checksum.
pub(crate) fn load(path: &Path) -> Result<UrbanPipeline> {
    let file = File::open(path).with_context(|| format!("[pack] Failed to open {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("[pack] {} is not a pipeline archive", path.display()))?;

    let manifest: Manifest = serde_json::from_slice(&read_member(&mut archive, MANIFEST)?)
        .context("[pack] Failed to parse manifest.json")?;
    ensure!(manifest.format == FORMAT && manifest.version == VERSION,
        "[pack] Unsupported archive {} version {}", manifest.format, manifest.version);

    let mut files = BTreeMap::new();
    for (name, hash) in &manifest.files {
        let bytes = read_member(&mut archive, name)?;
        if sha256_bytes(&bytes) != hash.sha256 {
            bail!("[pack] Checksum mismatch for {name}");
        }
        files.insert(name.as_str(), bytes);
    }

    let registries = Registries::global()?;
    let mut steps = manifest.steps.iter()
        .map(|entry| {
            let stage = registries.build_stage(entry.family, &entry.type_name, &entry.config)
                .with_context(|| format!("[pack] Failed to rebuild step `{}`", entry.name))?;
            Ok(Step::new(entry.name.clone(), stage))
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(entry) = &manifest.layer {
        let features = read_features(&files, entry)?;
        let layer = steps.iter_mut()
            .find(|step| step.name() == entry.step)
            .and_then(|step| step.stage_mut().as_urban_layer_mut())
            .ok_or_else(|| anyhow!("[pack] Manifest names unknown urban layer step `{}`", entry.step))?;
        layer.state_mut().restore(Some(features), entry.has_mapped);
    }

    let schema = PipelineSchema::new(manifest.schema.iter().copied())?;
    let mut pipeline = UrbanPipeline::with_schema(steps, schema)?;

    match (&manifest.data, manifest.composed) {
        (Some(entry), true) => {
            let bytes = files.get(DATA).ok_or_else(|| anyhow!("[pack] Archive lacks {DATA}"))?;
            let frame = read_csv_bytes(bytes, &entry.columns)?;
            let data = GeoFrame::new(frame, &entry.longitude_column, &entry.latitude_column)?;
            pipeline.executor.restore(&pipeline.steps, data)?;
        }
        (None, true) => bail!("[pack] Archive is marked composed but holds no data"),
        (_, false) => warn!(path = %path.display(), "loaded pipeline was saved before compose(); call compose() to run it"),
    }

    info!(path = %path.display(), steps = pipeline.steps().len(), composed = manifest.composed, "pipeline loaded");
    Ok(pipeline)
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut member = archive.by_name(name).with_context(|| format!("[pack] Archive lacks {name}"))?;
    let mut bytes = Vec::new();
    member.read_to_end(&mut bytes).with_context(|| format!("[pack] Failed to read {name}"))?;
    Ok(bytes)
}

fn read_features(files: &BTreeMap<&str, Vec<u8>>, entry: &LayerEntry) -> Result<Features> {
    let bytes = files.get(GEOMETRIES).ok_or_else(|| anyhow!("[pack] Archive lacks {GEOMETRIES}"))?;
    let (geometries, _) = read_feature_collection(&serde_json::from_slice(bytes)?)?;
    ensure!(geometries.len() == entry.features,
        "[pack] Expected {} layer features, found {}", entry.features, geometries.len());
    if entry.attributes.is_empty() {
        return Ok(Features::from_geometries(geometries));
    }
    let bytes = files.get(ATTRIBUTES).ok_or_else(|| anyhow!("[pack] Archive lacks {ATTRIBUTES}"))?;
    Features::new(geometries, read_csv_bytes(bytes, &entry.attributes)?)
}
