use anyhow::Result;
use tracing::debug;

use crate::{
    error::PipelineError,
    registry::Registries,
    stage::{Preview, PreviewFormat, Stage},
};

use super::{
    Enricher, SingleAggregatorEnricher,
    aggregator::AggregationMethod,
    config::{Action, EnricherConfig},
};

const FACTORY: &str = "EnricherFactory";

#[derive(Debug, Clone, PartialEq)]
enum Requested {
    Count,
    Aggregate(String),
}

/// Fluent builder for enrichers.
///
/// ```no_run
/// # use urban_mapper::enricher::EnricherFactory;
/// let enricher = EnricherFactory::new()
///     .with_data("nearest_street", None)
///     .count_by(Some("collision_count"))
///     .build()?;
/// # anyhow::Ok(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnricherFactory {
    group_by: Option<String>,
    values_from: Option<String>,
    action: Option<Requested>,
    output_column: Option<String>,
    enricher_type: Option<String>,
}

impl EnricherFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column holding each row's feature index, and the value column for aggregations.
    pub fn with_data(mut self, group_by: &str, values_from: Option<&str>) -> Self {
        self.group_by = Some(group_by.to_string());
        self.values_from = values_from.map(str::to_string);
        self
    }

    /// Count rows per feature into `output_column` (`counted_value` by default).
    pub fn count_by(mut self, output_column: Option<&str>) -> Self {
        self.action = Some(Requested::Count);
        self.output_column = output_column.map(str::to_string);
        self
    }

    /// Reduce `values_from` per feature; the output defaults to `<method>_<values_from>`.
    pub fn aggregate_by(mut self, method: &str, output_column: Option<&str>) -> Self {
        self.action = Some(Requested::Aggregate(method.to_string()));
        self.output_column = output_column.map(str::to_string);
        self
    }

    pub fn with_type(mut self, enricher_type: &str) -> Self {
        self.enricher_type = Some(enricher_type.to_string());
        self
    }

    /// The enrichment described so far, plus problems the config itself cannot express.
    fn config(&self) -> (EnricherConfig, Vec<String>) {
        let mut extra = Vec::new();
        let action = match &self.action {
            None => None,
            Some(Requested::Count) => Some(Action::Count),
            Some(Requested::Aggregate(method)) => match method.parse::<AggregationMethod>() {
                Ok(method) => Some(Action::Aggregate { method }),
                Err(err) => {
                    extra.push(err.to_string());
                    None
                }
            },
        };
        let config = EnricherConfig {
            group_by: self.group_by.clone(),
            values_from: self.values_from.clone(),
            action,
            output_column: self.output_column.clone(),
            enricher_type: self.enricher_type.clone()
                .unwrap_or_else(|| SingleAggregatorEnricher::NAME.to_string()),
        };
        (config, extra)
    }

    pub fn preview(&self, format: PreviewFormat) -> Preview {
        self.config().0.preview(format)
    }

    pub fn build(self) -> Result<Box<dyn Enricher>> {
        let (config, mut problems) = self.config();
        if !problems.is_empty() {
            // an unknown method hides the action; report only that
            return Err(PipelineError::incomplete(FACTORY, problems.remove(0)).into());
        }
        if let Some(problem) = config.problems().into_iter().next() {
            return Err(PipelineError::incomplete(FACTORY, problem).into());
        }

        let registries = Registries::global()?;
        let enricher_type = registries.enrichers.resolve(&config.enricher_type)?;
        let (Some(group_by), Some(action), Some(output)) =
            (config.group_by.as_deref(), config.action, config.resolved_output_column())
        else {
            return Err(PipelineError::incomplete(FACTORY, "enrichment is not fully configured").into());
        };

        let enricher: Box<dyn Enricher> = match (enricher_type, action) {
            (SingleAggregatorEnricher::NAME, Action::Count) => {
                Box::new(SingleAggregatorEnricher::count(group_by, &output))
            }
            (SingleAggregatorEnricher::NAME, Action::Aggregate { method }) => {
                let values = config.values_from.as_deref().unwrap_or_default();
                Box::new(SingleAggregatorEnricher::aggregate(group_by, values, method, &output))
            }
            (other, _) => return Err(registries.enrichers.unknown(other).into()),
        };
        debug!(enricher = enricher_type, action = action.as_str(), group_by, output = %output, "enricher built");
        Ok(enricher)
    }
}

impl From<EnricherFactory> for Stage {
    fn from(factory: EnricherFactory) -> Self {
        Stage::other(factory)
    }
}
