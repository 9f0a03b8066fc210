use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use polars::prelude::DataFrame;
use tracing::warn;

use crate::{
    error::PipelineError,
    geo_frame::GeoFrame,
    stage::{Stage, StageFamily, Step},
    urban_layer::UrbanLayer,
};

use super::events::{PipelineEvent, ProgressSink, TracingSink};

/// Where a pipeline is in its one-shot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeState {
    Uncomposed,
    Composing,
    Composed,
}

/// Runs the stages of a pipeline in phase order and holds the resulting data.
#[derive(Debug)]
pub(crate) struct Executor {
    state: ComposeState,
    data: Option<GeoFrame>,
    layer_index: Option<usize>,
    sink: Arc<dyn ProgressSink>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl Executor {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { state: ComposeState::Uncomposed, data: None, layer_index: None, sink }
    }

    pub(crate) fn set_sink(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sink = sink;
    }

    pub(crate) fn state(&self) -> ComposeState { self.state }

    pub(crate) fn data(&self) -> Option<&GeoFrame> { self.data.as_ref() }

    /// Position of the urban layer step once composed.
    pub(crate) fn layer_index(&self) -> Option<usize> { self.layer_index }

    /// Mark as composed with previously computed data, e.g. after loading a saved pipeline.
    pub(crate) fn restore(&mut self, steps: &[Step], data: GeoFrame) -> Result<()> {
        self.layer_index = Some(single_step(steps, StageFamily::UrbanLayer)?);
        self.data = Some(data);
        self.state = ComposeState::Composed;
        Ok(())
    }

    /// Run every executable stage once. On failure the working data is dropped, columns
    /// written onto the layer by enrichers are rolled back and the executor returns to
    /// [`ComposeState::Uncomposed`]. The layer itself stays mapped.
    pub(crate) fn compose(&mut self, steps: &mut [Step]) -> Result<()> {
        match self.state {
            ComposeState::Uncomposed => {}
            ComposeState::Composing | ComposeState::Composed => return Err(PipelineError::AlreadyComposed.into()),
        }
        self.state = ComposeState::Composing;
        self.sink.emit(&PipelineEvent::ComposeStarted { steps: steps.len() });

        let attributes = layer_attributes(steps);
        let mut current = None;
        match self.run(steps, &mut current) {
            Ok((data, layer_index)) => {
                self.sink.emit(&PipelineEvent::ComposeCompleted { rows: data.height() });
                self.data = Some(data);
                self.layer_index = Some(layer_index);
                self.state = ComposeState::Composed;
                Ok(())
            }
            Err(err) => {
                self.sink.emit(&PipelineEvent::ComposeFailed { step: current, error: format!("{err:#}") });
                if let Some(attributes) = attributes {
                    restore_layer_attributes(steps, attributes);
                }
                self.data = None;
                self.layer_index = None;
                self.state = ComposeState::Uncomposed;
                Err(err)
            }
        }
    }

    fn run(&self, steps: &mut [Step], current: &mut Option<String>) -> Result<(GeoFrame, usize)> {
        let layer_index = single_step(steps, StageFamily::UrbanLayer)?;
        single_step(steps, StageFamily::Loader)?;

        // stable sort: step order within a phase
        let mut order = (0..steps.len())
            .filter(|&i| is_composed_phase(steps[i].stage().family()))
            .collect::<Vec<_>>();
        order.sort_by_key(|&i| steps[i].stage().family().phase());

        let mut data: Option<GeoFrame> = None;
        for index in order {
            let name = steps[index].name().to_string();
            let family = steps[index].stage().family();
            *current = Some(name.clone());
            self.sink.emit(&PipelineEvent::StageStarted { step: name.clone(), family });

            let input = data.take();
            let output = run_stage(steps, index, layer_index, input)
                .with_context(|| format!("[executor] Step `{name}` ({family}) failed"))?;

            self.sink.emit(&PipelineEvent::StageCompleted { step: name, family, rows: output.height() });
            data = Some(output);
        }
        *current = None;

        let data = data.ok_or_else(|| anyhow!("[executor] No data was produced"))?;
        Ok((data, layer_index))
    }
}

/// Attribute table of the urban layer before composition, if it has features.
fn layer_attributes(steps: &[Step]) -> Option<DataFrame> {
    let layer = steps.iter().find_map(|step| step.stage().as_urban_layer())?;
    layer.state().features().map(|features| features.attributes().clone())
}

fn restore_layer_attributes(steps: &mut [Step], attributes: DataFrame) {
    let Some(layer) = steps.iter_mut().find_map(|step| step.stage_mut().as_urban_layer_mut()) else { return };
    if let Err(err) = layer.state_mut().restore_attributes(attributes) {
        warn!(layer = layer.type_name(), error = %err, "could not roll back enriched layer columns");
    }
}

/// Loader through enricher; visualisers run on demand and `Other` never.
fn is_composed_phase(family: StageFamily) -> bool {
    family.phase().is_some() && family != StageFamily::Visualiser
}

/// Index of the only step of `family`.
fn single_step(steps: &[Step], family: StageFamily) -> Result<usize> {
    let mut found = steps.iter().enumerate().filter(|(_, step)| step.stage().family() == family);
    match (found.next(), found.next()) {
        (Some((index, _)), None) => Ok(index),
        (None, _) => bail!("[executor] Pipeline must include exactly one {family} step; found none"),
        (Some(_), Some(_)) => bail!("[executor] Pipeline must include exactly one {family} step; found several"),
    }
}

fn run_stage(steps: &mut [Step], index: usize, layer_index: usize, data: Option<GeoFrame>) -> Result<GeoFrame> {
    let needs_data = || anyhow!("[executor] No data loaded before this stage");
    match steps[index].stage().family() {
        StageFamily::Loader => {
            let loader = steps[index].stage().as_loader().ok_or_else(|| wrong_stage(index))?;
            loader.load_data_from_file()
        }
        StageFamily::Imputer => {
            let data = data.ok_or_else(needs_data)?;
            let imputer = steps[index].stage().as_imputer().ok_or_else(|| wrong_stage(index))?;
            imputer.transform(data, layer(steps, layer_index)?)
        }
        StageFamily::Filter => {
            let data = data.ok_or_else(needs_data)?;
            let filter = steps[index].stage().as_filter().ok_or_else(|| wrong_stage(index))?;
            filter.transform(data, layer(steps, layer_index)?)
        }
        StageFamily::UrbanLayer => {
            let data = data.ok_or_else(needs_data)?;
            let layer = steps[index].stage_mut().as_urban_layer_mut().ok_or_else(|| wrong_stage(index))?;
            layer.map_nearest_layer(data, None)
        }
        StageFamily::Enricher => {
            let data = data.ok_or_else(needs_data)?;
            let (stage, layer) = stage_and_layer(steps, index, layer_index)?;
            let enricher = stage.as_enricher().ok_or_else(|| wrong_stage(index))?;
            enricher.enrich(&data, layer)?;
            Ok(data)
        }
        family @ (StageFamily::Visualiser | StageFamily::Other) => {
            bail!("[executor] {family} steps are not run during composition")
        }
    }
}

fn wrong_stage(index: usize) -> anyhow::Error {
    anyhow!("[executor] Step {index} does not hold the stage its family announces")
}

fn layer(steps: &[Step], layer_index: usize) -> Result<&dyn UrbanLayer> {
    steps[layer_index].stage().as_urban_layer().ok_or_else(|| wrong_stage(layer_index))
}

/// Shared access to step `index` alongside exclusive access to the urban layer.
fn stage_and_layer(steps: &mut [Step], index: usize, layer_index: usize) -> Result<(&Stage, &mut dyn UrbanLayer)> {
    let (stage, layer_step) = if index < layer_index {
        let (left, right) = steps.split_at_mut(layer_index);
        (&left[index], &mut right[0])
    } else if index > layer_index {
        let (left, right) = steps.split_at_mut(index);
        (&right[0], &mut left[layer_index])
    } else {
        bail!("[executor] Step {index} cannot be both a stage and the urban layer");
    };
    let layer = layer_step.stage_mut().as_urban_layer_mut().ok_or_else(|| wrong_stage(layer_index))?;
    Ok((stage.stage(), layer))
}

#[cfg(test)]
mod tests {
    use geo::Point;
    use polars::prelude::*;

    use crate::{
        enricher::SingleAggregatorEnricher,
        filter::BoundingBoxFilter,
        imputer::SimpleGeoImputer,
        loader::DataFrameLoader,
        pipeline::events::RecordingSink,
        urban_layer::{CustomUrbanLayer, Features, Mapping},
    };

    use super::*;

    fn layer_step() -> Step {
        let mut layer = CustomUrbanLayer::from_features(Features::from_geometries(vec![
            Point::new(0.0, 0.0).into(),
            Point::new(1.0, 1.0).into(),
        ]));
        layer.add_mapping(Mapping::new("lon", "lat", "nearest")).unwrap();
        Step::new("layer", layer)
    }

    fn loader_step() -> Step {
        let df = df!(
            "lon" => [Some(0.1), None, Some(0.9), Some(5.0)],
            "lat" => [Some(0.0), Some(0.5), Some(1.0), Some(5.0)],
        ).unwrap();
        Step::new("loader", DataFrameLoader::new(df, "lon", "lat"))
    }

    #[test]
    fn runs_phases_in_family_order() {
        // enricher first and layer last in step order; execution follows phases
        let mut steps = vec![
            Step::new("count", SingleAggregatorEnricher::count("nearest", "n")),
            Step::new("bbox", BoundingBoxFilter::new()),
            Step::new("impute", SimpleGeoImputer::new("lon", "lat")),
            loader_step(),
            layer_step(),
        ];
        let sink = RecordingSink::new();
        let mut executor = Executor::new(Arc::new(sink.clone()));
        executor.compose(&mut steps).unwrap();

        assert_eq!(sink.started_steps(), vec!["loader", "impute", "bbox", "layer", "count"]);
        assert_eq!(executor.state(), ComposeState::Composed);
        assert_eq!(executor.data().unwrap().height(), 2);
        assert_eq!(executor.layer_index(), Some(4));

        let layer = steps[4].stage().as_urban_layer().unwrap();
        let counts = layer.get_layer().unwrap().attributes().column("n").unwrap().clone();
        assert_eq!(counts.u32().unwrap().into_no_null_iter().collect::<Vec<_>>(), vec![1, 1]);
    }

    #[test]
    fn composes_once() {
        let mut steps = vec![layer_step(), loader_step()];
        let mut executor = Executor::default();
        executor.compose(&mut steps).unwrap();
        let err = executor.compose(&mut steps).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::AlreadyComposed)));
    }

    #[test]
    fn failure_drops_data_and_resets_state() {
        let mut steps = vec![
            layer_step(),
            loader_step(),
            Step::new("sum", SingleAggregatorEnricher::count("missing", "n")),
        ];
        let sink = RecordingSink::new();
        let mut executor = Executor::new(Arc::new(sink.clone()));
        let err = executor.compose(&mut steps).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingColumns { .. })));
        assert_eq!(executor.state(), ComposeState::Uncomposed);
        assert!(executor.data().is_none());
        assert!(matches!(sink.events().last(), Some(PipelineEvent::ComposeFailed { step: Some(step), .. }) if step == "sum"));

        // the layer was mapped before the failure
        let err = executor.compose(&mut steps).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::AlreadyMapped)));
    }

    #[test]
    fn failed_enricher_rolls_back_earlier_columns() {
        let mut steps = vec![
            layer_step(),
            loader_step(),
            Step::new("count", SingleAggregatorEnricher::count("nearest", "n")),
            Step::new("broken", SingleAggregatorEnricher::count("missing", "m")),
        ];
        let sink = RecordingSink::new();
        let mut executor = Executor::new(Arc::new(sink.clone()));
        assert!(executor.compose(&mut steps).is_err());
        assert_eq!(sink.started_steps(), vec!["loader", "layer", "count", "broken"]);

        let layer = steps[0].stage().as_urban_layer().unwrap();
        let attributes = layer.get_layer().unwrap().attributes();
        assert!(attributes.column("n").is_err());
        assert_eq!(attributes.width(), 0);
    }

    #[test]
    fn steps_of_one_family_keep_their_relative_order() {
        let mut steps = vec![
            Step::new("bbox_b", BoundingBoxFilter::new()),
            Step::new("impute_b", SimpleGeoImputer::new("lon", "lat")),
            layer_step(),
            Step::new("bbox_a", BoundingBoxFilter::new()),
            Step::new("count", SingleAggregatorEnricher::count("nearest", "n")),
            Step::new("impute_a", SimpleGeoImputer::new("lon", "lat")),
            loader_step(),
        ];
        let sink = RecordingSink::new();
        let mut executor = Executor::new(Arc::new(sink.clone()));
        executor.compose(&mut steps).unwrap();

        assert_eq!(
            sink.started_steps(),
            vec!["loader", "impute_b", "impute_a", "bbox_b", "bbox_a", "layer", "count"],
        );
        assert_eq!(executor.data().unwrap().height(), 2);
        assert_eq!(executor.layer_index(), Some(2));
    }

    #[test]
    fn missing_layer_is_reported() {
        let mut steps = vec![loader_step()];
        let err = Executor::default().compose(&mut steps).unwrap_err();
        assert!(err.to_string().contains("exactly one urban_layer step"));
    }
}
