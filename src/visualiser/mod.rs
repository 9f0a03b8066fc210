//! Visualisers: render enriched layer columns as maps.

mod factory;
mod interactive;
mod static_map;

use std::{collections::BTreeMap, fmt, path::Path};

use anyhow::{Result, bail};
use polars::prelude::*;
use serde_json::{Value, json};

use crate::{
    common::write_atomic,
    error::PipelineError,
    registry::Registry,
    stage::{Preview, PreviewFormat, StageFamily},
    urban_layer::Features,
};

pub use factory::VisualiserFactory;
pub use interactive::InteractiveVisualiser;
pub use static_map::StaticVisualiser;

/// Rendering options by key; each visualiser accepts its own set of keys.
pub type Style = BTreeMap<String, Value>;

/// A rendered map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Svg(String),
    Html(String),
}

impl Rendered {
    pub fn as_str(&self) -> &str {
        match self {
            Rendered::Svg(text) | Rendered::Html(text) => text,
        }
    }

    /// Conventional file extension for the output.
    pub fn extension(&self) -> &'static str {
        match self {
            Rendered::Svg(_) => "svg",
            Rendered::Html(_) => "html",
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.as_str().as_bytes())
    }
}

/// Draws columns of an urban layer's feature table.
///
/// [`Visualiser::render`] checks the columns, the table and the style keys, merges the
/// call's style over the visualiser's own, and calls [`Visualiser::draw`].
pub trait Visualiser: Send + fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn allowed_style_keys(&self) -> &'static [&'static str];

    /// Style set when the visualiser was built.
    fn style(&self) -> &Style;

    fn draw(&self, features: &Features, columns: &[&str], style: &Style) -> Result<Rendered>;

    /// Short description of the rendering backend for previews.
    fn description(&self) -> &'static str;

    fn to_config(&self) -> Result<Value> {
        Ok(json!({ "style": self.style() }))
    }

    fn render(&self, features: &Features, columns: &[&str], style: &Style) -> Result<Rendered> {
        if columns.is_empty() {
            return Err(PipelineError::missing_attribute(self.type_name(), "columns").into());
        }
        let missing = columns.iter()
            .filter(|name| features.attributes().column(name).is_err())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(PipelineError::missing_columns(self.type_name(), &missing).into());
        }
        if features.is_empty() {
            return Err(PipelineError::EmptyInput { stage: self.type_name().to_string() }.into());
        }
        check_style_keys(self.type_name(), self.allowed_style_keys(), style)?;

        let mut merged = self.style().clone();
        merged.extend(style.iter().map(|(k, v)| (k.clone(), v.clone())));
        let rendered = self.draw(features, columns, &merged)?;
        tracing::debug!(visualiser = self.type_name(), ?columns, bytes = rendered.as_str().len(), "map rendered");
        Ok(rendered)
    }

    fn preview(&self, format: PreviewFormat) -> Result<Preview> {
        let label = format!("{} using {}", self.type_name(), self.description());
        Ok(match format {
            PreviewFormat::Ascii => Preview::Ascii(format!("Visualiser: {label}")),
            PreviewFormat::Json => Preview::Json(json!({ "visualiser": label, "style": self.style() })),
        })
    }
}

/// Error unless every key of `style` is in `allowed`.
pub(crate) fn check_style_keys(visualiser: &str, allowed: &[&str], style: &Style) -> Result<()> {
    let unknown = style.keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        bail!(
            "[visualiser] {visualiser} does not accept style key(s) {}; allowed: {}",
            unknown.join(", "),
            allowed.join(", "),
        );
    }
    Ok(())
}

/// Style from a persisted `{"style": {...}}` configuration.
pub(crate) fn style_from_config(config: &Value) -> Result<Style> {
    match config.get("style") {
        None | Some(Value::Null) => Ok(Style::new()),
        Some(style) => Ok(serde_json::from_value(style.clone())?),
    }
}

/// Numeric values of `column`, `None` for nulls and non-numeric cells.
pub(crate) fn column_values(features: &Features, column: &str) -> Result<Vec<Option<f64>>> {
    let values = features.attributes().column(column)?
        .cast(&DataType::Float64)
        .map_err(|_| anyhow::anyhow!("[visualiser] Column {column:?} is not numeric"))?;
    Ok(values.f64()?.into_iter().collect())
}

pub(crate) fn style_f64(style: &Style, key: &str) -> Result<Option<f64>> {
    match style.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("[visualiser] Style {key:?} must be a number, got {value}")),
    }
}

pub(crate) fn style_str<'a>(style: &'a Style, key: &str) -> Result<Option<&'a str>> {
    match style.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(value) => bail!("[visualiser] Style {key:?} must be a string, got {value}"),
    }
}

/// Clamp values into `[vmin, vmax]` when either bound is set.
pub(crate) fn clamp_values(values: &mut [Option<f64>], vmin: Option<f64>, vmax: Option<f64>) {
    for value in values.iter_mut().flatten() {
        if let Some(lo) = vmin { *value = value.max(lo); }
        if let Some(hi) = vmax { *value = value.min(hi); }
    }
}

/// Registers the shipped visualisers.
pub(crate) fn register_builtin(registry: &mut Registry<dyn Visualiser>) -> Result<()> {
    debug_assert_eq!(registry.family(), StageFamily::Visualiser);
    registry.register(StaticVisualiser::NAME, |config| Ok(Box::new(StaticVisualiser::from_config(config)?)))?;
    registry.register(InteractiveVisualiser::NAME, |config| Ok(Box::new(InteractiveVisualiser::from_config(config)?)))?;
    Ok(())
}

crate::stage::impl_into_stage!(Visualiser: StaticVisualiser, InteractiveVisualiser);

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;

    fn features() -> Features {
        let attributes = df!("count" => [1u32, 4]).unwrap();
        Features::new(vec![Point::new(0.0, 0.0).into(), Point::new(1.0, 1.0).into()], attributes).unwrap()
    }

    #[test]
    fn render_checks_columns() {
        let err = StaticVisualiser::new().render(&features(), &["speed"], &Style::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingColumns { .. })));
        let err = StaticVisualiser::new().render(&features(), &[], &Style::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingAttribute { .. })));
    }

    #[test]
    fn render_rejects_unknown_style_keys() {
        let style = Style::from([("figsize".to_string(), json!(3))]);
        let err = StaticVisualiser::new().render(&features(), &["count"], &style).unwrap_err();
        assert!(err.to_string().contains("figsize"));
    }

    #[test]
    fn empty_table_is_rejected() {
        let empty = Features::new(vec![], df!("count" => Vec::<u32>::new()).unwrap()).unwrap();
        let err = StaticVisualiser::new().render(&empty, &["count"], &Style::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::EmptyInput { .. })));
    }

    #[test]
    fn saves_rendered_output() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = StaticVisualiser::new().render(&features(), &["count"], &Style::new()).unwrap();
        let path = dir.path().join(format!("map.{}", rendered.extension()));
        rendered.save(&path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("<svg"));
    }

    #[test]
    fn clamps_to_bounds() {
        let mut values = vec![Some(-1.0), None, Some(5.0)];
        clamp_values(&mut values, Some(0.0), Some(4.0));
        assert_eq!(values, vec![Some(0.0), None, Some(4.0)]);
    }
}
