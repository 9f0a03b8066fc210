use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::stage::{Preview, PreviewFormat};

use super::aggregator::AggregationMethod;

const NOT_SET: &str = "<Not Set>";

/// What an enricher does with each feature's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Count,
    Aggregate { method: AggregationMethod },
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Count => "count",
            Action::Aggregate { .. } => "aggregate",
        }
    }

    fn aggregator_name(&self) -> &'static str {
        match self {
            Action::Count => "CountAggregator",
            Action::Aggregate { .. } => "SimpleAggregator",
        }
    }
}

/// An enrichment description, possibly incomplete while a factory is being configured.
#[derive(Debug, Clone, PartialEq)]
pub struct EnricherConfig {
    pub group_by: Option<String>,
    pub values_from: Option<String>,
    pub action: Option<Action>,
    pub output_column: Option<String>,
    pub enricher_type: String,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            group_by: None,
            values_from: None,
            action: None,
            output_column: None,
            enricher_type: super::SingleAggregatorEnricher::NAME.to_string(),
        }
    }
}

impl EnricherConfig {
    /// Every problem that prevents building, in the order a user would fix them.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.group_by.is_none() {
            problems.push("Missing group_by. Use with_data() to set it.".to_string());
        }
        match self.action {
            None => problems.push("No action specified. Use aggregate_by() or count_by().".to_string()),
            Some(Action::Aggregate { .. }) if self.values_from.is_none() => {
                problems.push("Aggregation requires 'values_from'. Use with_data(group_by, Some(column)).".to_string());
            }
            Some(Action::Count) if self.values_from.is_some() => {
                problems.push("Counting does not use 'values_from'. Use with_data(group_by, None).".to_string());
            }
            Some(_) => {}
        }
        problems
    }

    pub fn is_complete(&self) -> bool {
        self.problems().is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if !problems.is_empty() {
            bail!("[enricher] {}", problems.join(" "));
        }
        Ok(())
    }

    /// Output column, falling back to `<method>_<values_from>` or `counted_value`.
    pub fn resolved_output_column(&self) -> Option<String> {
        if let Some(column) = &self.output_column {
            return Some(column.clone());
        }
        match (self.action?, &self.values_from) {
            (Action::Count, _) => Some("counted_value".to_string()),
            (Action::Aggregate { method }, Some(values)) => Some(format!("{method}_{values}")),
            (Action::Aggregate { .. }, None) => None,
        }
    }

    /// The workflow tree shown by enricher and enricher-factory previews.
    pub fn preview(&self, format: PreviewFormat) -> Preview {
        match format {
            PreviewFormat::Ascii => Preview::Ascii(self.ascii_tree()),
            PreviewFormat::Json => Preview::Json(self.json_tree()),
        }
    }

    fn ascii_tree(&self) -> String {
        let output = self.resolved_output_column();
        let output = output.as_deref().unwrap_or(NOT_SET);
        let mut lines = vec![
            "Enricher Workflow:".to_string(),
            "├── Step 1: Data Input".to_string(),
            format!("│   ├── Group By: {}", self.group_by.as_deref().unwrap_or(NOT_SET)),
            format!("│   └── Values From: {}", self.values_from.as_deref().unwrap_or(NOT_SET)),
            "├── Step 2: Action".to_string(),
        ];
        match self.action {
            Some(action @ Action::Aggregate { method }) => lines.extend([
                "│   ├── Type: Aggregate".to_string(),
                format!("│   ├── Aggregator: {}", action.aggregator_name()),
                format!("│   ├── Method: {method}"),
                format!("│   └── Output Column: {output}"),
            ]),
            Some(action @ Action::Count) => lines.extend([
                "│   ├── Type: Count".to_string(),
                format!("│   ├── Aggregator: {}", action.aggregator_name()),
                format!("│   └── Output Column: {output}"),
            ]),
            None => lines.push(format!("│   └── Type: {NOT_SET}")),
        }
        lines.push("└── Step 3: Enricher".to_string());
        lines.push(format!("    ├── Type: {}", self.enricher_type));
        lines.push(format!("    └── Status: {}", if self.is_complete() { "Ready" } else { "Incomplete" }));
        lines.join("\n")
    }

    fn json_tree(&self) -> Value {
        let method = match self.action {
            Some(Action::Aggregate { method }) => Some(method),
            _ => None,
        };
        json!({
            "workflow": {
                "data_input": {
                    "group_by": self.group_by,
                    "values_from": self.values_from,
                },
                "action": {
                    "type": self.action.as_ref().map(Action::as_str),
                    "aggregator_config": { "method": method },
                    "enricher_config": { "output_column": self.resolved_output_column() },
                },
                "enricher": { "type": self.enricher_type },
            },
            "metadata": {
                "available_aggregation_methods": AggregationMethod::ALL.map(AggregationMethod::as_str),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_columns() {
        let mut config = EnricherConfig {
            group_by: Some("segment".into()),
            values_from: Some("speed".into()),
            action: Some(Action::Aggregate { method: AggregationMethod::Mean }),
            ..Default::default()
        };
        assert_eq!(config.resolved_output_column().as_deref(), Some("mean_speed"));
        config.action = Some(Action::Count);
        config.values_from = None;
        assert_eq!(config.resolved_output_column().as_deref(), Some("counted_value"));
    }

    #[test]
    fn incomplete_config_lists_problems() {
        let config = EnricherConfig::default();
        assert_eq!(config.problems().len(), 2);
        let tree = config.preview(PreviewFormat::Ascii);
        let text = tree.as_ascii().unwrap();
        assert!(text.contains("Group By: <Not Set>"));
        assert!(text.ends_with("Status: Incomplete"));
    }

    #[test]
    fn count_rejects_values_from() {
        let config = EnricherConfig {
            group_by: Some("segment".into()),
            values_from: Some("speed".into()),
            action: Some(Action::Count),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Counting does not use 'values_from'"));
    }

    #[test]
    fn json_tree_lists_methods() {
        let config = EnricherConfig {
            group_by: Some("segment".into()),
            action: Some(Action::Count),
            ..Default::default()
        };
        let preview = config.preview(PreviewFormat::Json).into_json();
        assert_eq!(preview["workflow"]["action"]["type"], "count");
        assert_eq!(preview["metadata"]["available_aggregation_methods"][2], "median");
    }
}
