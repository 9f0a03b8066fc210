//! The pipeline: validated steps composed once into enriched data and an urban layer.

mod events;
mod executor;
mod pack;
mod schema;
mod validator;

use std::{ops::Index, path::Path, sync::Arc};

use anyhow::Result;
use serde_json::json;
use tracing::info;

use crate::{
    error::PipelineError,
    geo_frame::GeoFrame,
    stage::{Preview, PreviewFormat, Stage, StageFamily, Step},
    urban_layer::UrbanLayer,
    visualiser::{Rendered, Style},
};

pub use events::{PipelineEvent, ProgressSink, RecordingSink, TracingSink};
pub use executor::ComposeState;
pub use schema::{Bounds, PipelineSchema};

use executor::Executor;

/// An ordered list of named stages, validated on construction and composed at most once.
///
/// ```no_run
/// # use urban_mapper::{Stage, UrbanMapper, UrbanPipeline};
/// let mapper = UrbanMapper::new();
/// let mut pipeline = UrbanPipeline::new::<_, (&str, Stage)>([
///     ("streets", mapper.urban_layer().with_type("streets_roads").from_file("streets.json")
///         .with_default_mapping("longitude", "latitude").build()?.into()),
///     ("loader", mapper.loader().from_file("collisions.csv").with_columns("longitude", "latitude").build()?.into()),
///     ("count", mapper.enricher().with_data("nearest_element", None).count_by(Some("collisions")).build()?.into()),
/// ])?;
/// let (data, layer) = pipeline.compose_transform()?;
/// # let _ = (data, layer);
/// # anyhow::Ok(())
/// ```
#[derive(Debug)]
pub struct UrbanPipeline {
    steps: Vec<Step>,
    schema: PipelineSchema,
    executor: Executor,
}

impl UrbanPipeline {
    /// Validate `steps` against the default schema.
    pub fn new<I, S>(steps: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        Self::with_schema(steps, PipelineSchema::default())
    }

    pub fn with_schema<I, S>(steps: I, schema: PipelineSchema) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        let steps = steps.into_iter().map(Into::into).collect::<Vec<Step>>();
        validator::validate(&steps, &schema)?;
        info!(steps = steps.len(), "pipeline validated");
        Ok(Self { steps, schema, executor: Executor::default() })
    }

    /// Report composition progress to `sink` instead of `tracing`.
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.executor.set_sink(Arc::new(sink));
        self
    }

    /// Run every stage once, in family order. A second call fails with
    /// [`PipelineError::AlreadyComposed`].
    pub fn compose(&mut self) -> Result<()> {
        self.executor.compose(&mut self.steps)
    }

    /// Composed data and the enriched urban layer.
    pub fn transform(&self) -> Result<(&GeoFrame, &dyn UrbanLayer)> {
        let (Some(data), Some(index)) = (self.executor.data(), self.executor.layer_index()) else {
            return Err(PipelineError::NotComposed.into());
        };
        let layer = self.steps[index].stage().as_urban_layer()
            .ok_or_else(|| anyhow::anyhow!("[pipeline] Step {index} is not an urban layer"))?;
        Ok((data, layer))
    }

    pub fn compose_transform(&mut self) -> Result<(&GeoFrame, &dyn UrbanLayer)> {
        self.compose()?;
        self.transform()
    }

    /// Render `columns` of the enriched layer with the pipeline's visualiser step.
    pub fn visualise(&self, columns: &[&str], style: &Style) -> Result<Rendered> {
        let (_, layer) = self.transform()?;
        let visualiser = self.steps.iter()
            .find_map(|step| step.stage().as_visualiser())
            .ok_or(PipelineError::NoVisualiser)?;
        visualiser.render(layer.get_layer()?, columns, style)
    }

    /// Write a `.umpipe` archive.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        pack::save(self, path.as_ref())
    }

    /// Read a `.umpipe` archive written by [`UrbanPipeline::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        pack::load(path.as_ref())
    }

    pub fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(match format {
            PreviewFormat::Json => {
                let steps = self.steps.iter()
                    .map(|step| Ok(json!({ "name": step.name(), "preview": step.stage().preview(format)?.into_json() })))
                    .collect::<Result<Vec<_>>>()?;
                Preview::Json(json!({ "pipeline": { "steps": steps } }))
            }
            PreviewFormat::Ascii => {
                let mut lines = vec!["Urban Pipeline Preview:".to_string()];
                for (i, step) in self.steps.iter().enumerate() {
                    let preview = step.stage().preview(format)?.to_string().replace('\n', "\n    ");
                    lines.push(format!("Step {}: {}\n    {preview}", i + 1, step.name()));
                }
                Preview::Ascii(lines.join("\n"))
            }
        })
    }

    pub fn get_step(&self, name: &str) -> Option<&Stage> {
        self.steps.iter().find(|step| step.name() == name).map(Step::stage)
    }

    pub fn get_step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    /// `(name, stage)` pairs in step order.
    pub fn named_steps(&self) -> Vec<(&str, &Stage)> {
        self.steps.iter().map(|step| (step.name(), step.stage())).collect()
    }

    pub fn steps(&self) -> &[Step] { &self.steps }

    pub fn schema(&self) -> &PipelineSchema { &self.schema }

    pub fn state(&self) -> ComposeState { self.executor.state() }

    pub fn is_composed(&self) -> bool {
        self.executor.state() == ComposeState::Composed
    }

    /// Number of steps of `family`.
    pub fn count(&self, family: StageFamily) -> usize {
        self.steps.iter().filter(|step| step.stage().family() == family).count()
    }
}

impl Index<&str> for UrbanPipeline {
    type Output = Stage;

    /// Panics if no step has that name; see [`UrbanPipeline::get_step`].
    fn index(&self, name: &str) -> &Stage {
        match self.get_step(name) {
            Some(stage) => stage,
            None => panic!("no pipeline step named {name:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use geo::Point;
    use polars::prelude::*;

    use crate::{
        enricher::SingleAggregatorEnricher,
        loader::DataFrameLoader,
        urban_layer::{CustomUrbanLayer, Features, Mapping},
        visualiser::StaticVisualiser,
    };

    use super::*;

    fn steps() -> Vec<Step> {
        let mut layer = CustomUrbanLayer::from_features(Features::from_geometries(vec![
            Point::new(0.0, 0.0).into(),
            Point::new(1.0, 1.0).into(),
        ]));
        layer.add_mapping(Mapping::new("lon", "lat", "nearest")).unwrap();
        let df = df!("lon" => [0.1, 0.9, 0.8], "lat" => [0.0, 1.0, 0.9]).unwrap();
        vec![
            Step::new("layer", layer),
            Step::new("loader", DataFrameLoader::new(df, "lon", "lat")),
            Step::new("count", SingleAggregatorEnricher::count("nearest", "n")),
            Step::new("map", StaticVisualiser::new()),
        ]
    }

    #[test]
    fn transform_and_visualise_need_compose() {
        let mut pipeline = UrbanPipeline::new(steps()).unwrap();
        assert!(!pipeline.is_composed());
        let err = pipeline.transform().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::NotComposed)));
        let err = pipeline.visualise(&["n"], &Style::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::NotComposed)));

        let (data, layer) = pipeline.compose_transform().unwrap();
        assert_eq!(data.height(), 3);
        assert!(layer.has_mapped());
        assert!(pipeline.visualise(&["n"], &Style::new()).unwrap().as_str().contains("<svg"));
    }

    #[test]
    fn visualise_without_visualiser_step() {
        let mut all = steps();
        all.pop();
        let mut pipeline = UrbanPipeline::new(all).unwrap();
        pipeline.compose().unwrap();
        let err = pipeline.visualise(&["n"], &Style::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::NoVisualiser)));
    }

    #[test]
    fn step_introspection() {
        let pipeline = UrbanPipeline::new(steps()).unwrap();
        assert_eq!(pipeline.get_step_names(), vec!["layer", "loader", "count", "map"]);
        assert_eq!(pipeline["count"].family(), StageFamily::Enricher);
        assert!(pipeline.get_step("missing").is_none());
        assert_eq!(pipeline.named_steps()[1].1.type_name(), "DataFrameLoader");
        assert_eq!(pipeline.count(StageFamily::Visualiser), 1);
    }

    #[test]
    #[should_panic(expected = "no pipeline step named")]
    fn index_panics_on_unknown_name() {
        let pipeline = UrbanPipeline::new(steps()).unwrap();
        let _ = &pipeline["nope"];
    }

    #[test]
    fn preview_lists_numbered_steps() {
        let pipeline = UrbanPipeline::new(steps()).unwrap();
        let ascii = pipeline.preview(PreviewFormat::Ascii).unwrap().to_string();
        assert!(ascii.starts_with("Urban Pipeline Preview:\nStep 1: layer\n    Urban Layer: custom_urban_layer"));
        assert!(ascii.contains("Step 3: count\n    Enricher Workflow:"));
        let json = pipeline.preview(PreviewFormat::Json).unwrap().into_json();
        assert_eq!(json["pipeline"]["steps"][3]["name"], "map");
        assert_eq!(json["pipeline"]["steps"][3]["preview"]["visualiser"], "Static using SVG");
    }
}
