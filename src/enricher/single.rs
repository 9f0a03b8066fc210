use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    geo_frame::GeoFrame,
    stage::{Preview, PreviewFormat},
    urban_layer::UrbanLayer,
};

use super::{
    Enricher,
    aggregator::{AggregationMethod, Aggregator, CountAggregator, SimpleAggregator},
    config::{Action, EnricherConfig},
};

/// Runs one aggregator over the rows mapped to each feature and stores the result as a
/// layer column. Features no row maps to get 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleAggregatorEnricher {
    group_by: String,
    #[serde(default)]
    values_from: Option<String>,
    #[serde(flatten)]
    action: Action,
    output_column: String,
}

impl SingleAggregatorEnricher {
    pub const NAME: &'static str = "SingleAggregatorEnricher";

    /// Count rows per feature.
    pub fn count(group_by: &str, output_column: &str) -> Self {
        Self {
            group_by: group_by.to_string(),
            values_from: None,
            action: Action::Count,
            output_column: output_column.to_string(),
        }
    }

    /// Reduce `values_from` per feature with `method`.
    pub fn aggregate(group_by: &str, values_from: &str, method: AggregationMethod, output_column: &str) -> Self {
        Self {
            group_by: group_by.to_string(),
            values_from: Some(values_from.to_string()),
            action: Action::Aggregate { method },
            output_column: output_column.to_string(),
        }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        let enricher: Self = serde_json::from_value(config.clone())
            .context("[enricher] Invalid SingleAggregatorEnricher configuration")?;
        enricher.config().validate()?;
        Ok(enricher)
    }

    pub fn action(&self) -> Action { self.action }

    fn config(&self) -> EnricherConfig {
        EnricherConfig {
            group_by: Some(self.group_by.clone()),
            values_from: self.values_from.clone(),
            action: Some(self.action),
            output_column: Some(self.output_column.clone()),
            enricher_type: Self::NAME.to_string(),
        }
    }

    fn aggregator(&self) -> Result<Box<dyn Aggregator>> {
        Ok(match self.action {
            Action::Count => Box::new(CountAggregator::new(&self.group_by)),
            Action::Aggregate { method } => {
                let values = self.values_from.as_deref()
                    .context("[enricher] Aggregation requires 'values_from'")?;
                Box::new(SimpleAggregator::new(&self.group_by, values, method))
            }
        })
    }
}

impl Enricher for SingleAggregatorEnricher {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn required_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.group_by.as_str()];
        columns.extend(self.values_from.as_deref());
        columns
    }

    fn output_column(&self) -> &str { &self.output_column }

    fn enrich_layer(&self, data: &GeoFrame, layer: &mut dyn UrbanLayer) -> Result<()> {
        let features = layer.get_layer()?.len();
        let aggregated = self.aggregator()?.aggregate(data.frame())
            .with_context(|| format!("[enricher] Failed to aggregate into {:?}", self.output_column))?;
        layer.set_layer_column(aggregated.into_series(&self.output_column, features)?)
    }

    fn to_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        Ok(self.config().preview(format))
    }
}

#[cfg(test)]
mod tests {
    use geo::Point;
    use polars::prelude::*;

    use crate::{
        error::PipelineError,
        urban_layer::{CustomUrbanLayer, Features},
    };

    use super::*;

    fn layer() -> CustomUrbanLayer {
        CustomUrbanLayer::from_features(Features::from_geometries(vec![
            Point::new(0.0, 0.0).into(),
            Point::new(1.0, 0.0).into(),
            Point::new(2.0, 0.0).into(),
        ]))
    }

    fn mapped() -> GeoFrame {
        let df = df!(
            "lon" => [0.0, 0.1, 2.0, 5.0],
            "lat" => [0.0, 0.0, 0.0, 5.0],
            "nearest" => [Some(0u32), Some(0), Some(2), None],
            "injured" => [1i64, 3, 4, 10],
        ).unwrap();
        GeoFrame::new(df, "lon", "lat").unwrap()
    }

    #[test]
    fn counts_rows_per_feature() {
        let mut layer = layer();
        SingleAggregatorEnricher::count("nearest", "collisions").enrich(&mapped(), &mut layer).unwrap();
        let column = layer.get_layer().unwrap().attributes().column("collisions").unwrap().clone();
        let counts: Vec<u32> = column.u32().unwrap().into_no_null_iter().collect();
        assert_eq!(counts, vec![2, 0, 1]);
    }

    #[test]
    fn aggregates_values_per_feature() {
        let mut layer = layer();
        SingleAggregatorEnricher::aggregate("nearest", "injured", AggregationMethod::Sum, "injured_sum")
            .enrich(&mapped(), &mut layer)
            .unwrap();
        let column = layer.get_layer().unwrap().attributes().column("injured_sum").unwrap().clone();
        let sums: Vec<f64> = column.f64().unwrap().into_no_null_iter().collect();
        assert_eq!(sums, vec![4.0, 0.0, 4.0]);
    }

    #[test]
    fn empty_input_is_rejected() {
        let empty = GeoFrame::new(mapped().frame().head(Some(0)), "lon", "lat").unwrap();
        let err = SingleAggregatorEnricher::count("nearest", "n").enrich(&empty, &mut layer()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::EmptyInput { .. })));
    }

    #[test]
    fn missing_group_column_is_named() {
        let err = SingleAggregatorEnricher::count("segment", "n").enrich(&mapped(), &mut layer()).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingColumns { columns, .. }) => assert_eq!(columns, &vec!["segment".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn config_round_trip() {
        let enricher = SingleAggregatorEnricher::aggregate("nearest", "injured", AggregationMethod::Median, "m");
        let config = enricher.to_config().unwrap();
        assert_eq!(config["action"], "aggregate");
        assert_eq!(config["method"], "median");
        assert_eq!(SingleAggregatorEnricher::from_config(&config).unwrap(), enricher);
    }

    #[test]
    fn inconsistent_config_is_rejected() {
        let config = serde_json::json!({ "group_by": "nearest", "action": "aggregate", "method": "sum", "output_column": "x" });
        assert!(SingleAggregatorEnricher::from_config(&config).is_err());
    }

    #[test]
    fn preview_is_ready_workflow() {
        let preview = SingleAggregatorEnricher::count("nearest", "n").preview(PreviewFormat::Ascii).unwrap();
        let text = preview.as_ascii().unwrap();
        assert!(text.starts_with("Enricher Workflow:"));
        assert!(text.contains("Aggregator: CountAggregator"));
        assert!(text.ends_with("Status: Ready"));
    }
}
