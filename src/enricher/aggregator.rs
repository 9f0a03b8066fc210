//! Per-feature aggregation of mapped rows.

use std::{fmt, str::FromStr};

use ahash::AHashMap;
use anyhow::{Context, Result, anyhow, ensure};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Reduction applied to the values of one feature's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Mean,
    Sum,
    Median,
    Min,
    Max,
}

impl AggregationMethod {
    pub const ALL: [AggregationMethod; 5] = [
        AggregationMethod::Mean,
        AggregationMethod::Sum,
        AggregationMethod::Median,
        AggregationMethod::Min,
        AggregationMethod::Max,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::Mean => "mean",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Median => "median",
            AggregationMethod::Min => "min",
            AggregationMethod::Max => "max",
        }
    }

    /// `None` for an empty slice.
    fn apply(self, values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            AggregationMethod::Sum => values.iter().sum(),
            AggregationMethod::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggregationMethod::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregationMethod::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationMethod::Median => {
                values.sort_by(f64::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2.0 } else { values[mid] }
            }
        })
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        AggregationMethod::ALL.into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                let available = AggregationMethod::ALL.map(AggregationMethod::as_str).join(", ");
                anyhow!("Unknown aggregation method {s:?}. Available: {available}")
            })
    }
}

/// Aggregates keyed by feature index.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated {
    Counts(AHashMap<u32, u32>),
    Values(AHashMap<u32, f64>),
}

impl Aggregated {
    /// One value per feature, 0 for features no row mapped to.
    pub fn into_series(self, name: &str, features: usize) -> Result<Series> {
        let check = |key: u32| -> Result<()> {
            ensure!((key as usize) < features,
                "[enricher] Feature index {key} is outside the layer's {features} features");
            Ok(())
        };
        Ok(match self {
            Aggregated::Counts(counts) => {
                let mut values = vec![0u32; features];
                for (key, count) in counts {
                    check(key)?;
                    values[key as usize] = count;
                }
                Series::new(name.into(), values)
            }
            Aggregated::Values(aggregates) => {
                let mut values = vec![0f64; features];
                for (key, value) in aggregates {
                    check(key)?;
                    values[key as usize] = value;
                }
                Series::new(name.into(), values)
            }
        })
    }
}

/// Groups mapped rows by feature index and reduces each group.
pub trait Aggregator: Send + fmt::Debug {
    /// Columns the input must contain.
    fn required_columns(&self) -> Vec<&str>;

    fn aggregate(&self, data: &DataFrame) -> Result<Aggregated>;
}

fn feature_keys(data: &DataFrame, group_by: &str) -> Result<UInt32Chunked> {
    let column = data.column(group_by)?
        .cast(&DataType::UInt32)
        .with_context(|| format!("[enricher] Group column {group_by:?} does not hold feature indices"))?;
    Ok(column.u32()?.clone())
}

/// Number of rows per feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountAggregator {
    group_by: String,
}

impl CountAggregator {
    pub fn new(group_by: &str) -> Self {
        Self { group_by: group_by.to_string() }
    }
}

impl Aggregator for CountAggregator {
    fn required_columns(&self) -> Vec<&str> {
        vec![self.group_by.as_str()]
    }

    fn aggregate(&self, data: &DataFrame) -> Result<Aggregated> {
        let mut counts = AHashMap::new();
        for key in feature_keys(data, &self.group_by)?.into_iter().flatten() {
            *counts.entry(key).or_insert(0u32) += 1;
        }
        Ok(Aggregated::Counts(counts))
    }
}

/// A [`AggregationMethod`] over one numeric column; null values are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleAggregator {
    group_by: String,
    value_column: String,
    method: AggregationMethod,
}

impl SimpleAggregator {
    pub fn new(group_by: &str, value_column: &str, method: AggregationMethod) -> Self {
        Self { group_by: group_by.to_string(), value_column: value_column.to_string(), method }
    }
}

impl Aggregator for SimpleAggregator {
    fn required_columns(&self) -> Vec<&str> {
        vec![self.group_by.as_str(), self.value_column.as_str()]
    }

    fn aggregate(&self, data: &DataFrame) -> Result<Aggregated> {
        let keys = feature_keys(data, &self.group_by)?;
        let values = data.column(&self.value_column)?
            .cast(&DataType::Float64)
            .with_context(|| format!("[enricher] Column {:?} is not numeric", self.value_column))?;

        let mut groups: AHashMap<u32, Vec<f64>> = AHashMap::new();
        for (key, value) in keys.into_iter().zip(values.f64()?.into_iter()) {
            if let (Some(key), Some(value)) = (key, value) {
                groups.entry(key).or_default().push(value);
            }
        }
        Ok(Aggregated::Values(groups.into_iter()
            .filter_map(|(key, mut values)| self.method.apply(&mut values).map(|v| (key, v)))
            .collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped() -> DataFrame {
        df!(
            "feature" => [Some(0u32), Some(2), Some(2), None, Some(2)],
            "speed" => [Some(10.0), Some(1.0), Some(5.0), Some(7.0), None],
        ).unwrap()
    }

    #[test]
    fn counts_fill_missing_features_with_zero() {
        let counts = CountAggregator::new("feature").aggregate(&mapped()).unwrap();
        let series = counts.into_series("n", 4).unwrap();
        let values: Vec<u32> = series.u32().unwrap().into_no_null_iter().collect();
        assert_eq!(values, vec![1, 0, 2, 0]);
    }

    #[test]
    fn methods_skip_nulls() {
        let cases = [
            (AggregationMethod::Mean, 3.0),
            (AggregationMethod::Sum, 6.0),
            (AggregationMethod::Median, 3.0),
            (AggregationMethod::Min, 1.0),
            (AggregationMethod::Max, 5.0),
        ];
        for (method, expected) in cases {
            let agg = SimpleAggregator::new("feature", "speed", method).aggregate(&mapped()).unwrap();
            let series = agg.into_series("v", 3).unwrap();
            assert_eq!(series.f64().unwrap().get(2), Some(expected), "{method}");
            assert_eq!(series.f64().unwrap().get(1), Some(0.0));
        }
    }

    #[test]
    fn out_of_range_feature_is_an_error() {
        let counts = CountAggregator::new("feature").aggregate(&mapped()).unwrap();
        assert!(counts.into_series("n", 2).is_err());
    }

    #[test]
    fn parses_method_names() {
        assert_eq!("median".parse::<AggregationMethod>().unwrap(), AggregationMethod::Median);
        let err = "avg".parse::<AggregationMethod>().unwrap_err();
        assert!(err.to_string().contains("mean, sum, median, min, max"));
    }
}
