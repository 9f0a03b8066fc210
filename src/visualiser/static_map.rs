use anyhow::{Result, bail};
use geo::Coord;
use serde_json::Value;

use crate::{
    error::PipelineError,
    io::svg::{RAMP_HIGH, RAMP_LOW, Rgb, SvgStringWriter, ramp_colors},
    urban_layer::Features,
};

use super::{
    Rendered, Style, Visualiser, check_style_keys, clamp_values, column_values, style_f64, style_from_config,
    style_str,
};

const ALLOWED_STYLE_KEYS: &[&str] = &[
    "color_low", "color_high", "legend", "markersize", "stroke_width", "title", "vmin", "vmax", "width",
];

/// Choropleth of one column as an SVG document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticVisualiser {
    style: Style,
}

impl StaticVisualiser {
    pub const NAME: &'static str = "Static";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style(style: Style) -> Result<Self> {
        check_style_keys(Self::NAME, ALLOWED_STYLE_KEYS, &style)?;
        Ok(Self { style })
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Self::with_style(style_from_config(config)?)
    }
}

impl Visualiser for StaticVisualiser {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn allowed_style_keys(&self) -> &'static [&'static str] { ALLOWED_STYLE_KEYS }

    fn style(&self) -> &Style { &self.style }

    fn description(&self) -> &'static str { "SVG" }

    fn draw(&self, features: &Features, columns: &[&str], style: &Style) -> Result<Rendered> {
        let [column] = columns else {
            bail!("[visualiser] {} renders a single column, got {}", Self::NAME, columns.len());
        };
        let bounds = features.bounds()
            .ok_or_else(|| PipelineError::EmptyInput { stage: Self::NAME.to_string() })?;

        let width = style_f64(style, "width")?.unwrap_or(800.0);
        if !(width.is_finite() && width > 40.0) {
            bail!("[visualiser] Style \"width\" must be larger than 40, got {width}");
        }
        let radius = style_f64(style, "markersize")?.unwrap_or(3.0);
        let stroke_width = style_f64(style, "stroke_width")?.unwrap_or(0.5);
        let low = style_str(style, "color_low")?.map(Rgb::parse_hex).transpose()?.unwrap_or(RAMP_LOW);
        let high = style_str(style, "color_high")?.map(Rgb::parse_hex).transpose()?.unwrap_or(RAMP_HIGH);
        let legend = style.get("legend").and_then(Value::as_bool).unwrap_or(true);
        let title = style_str(style, "title")?.unwrap_or(column);

        let mut values = column_values(features, column)?;
        clamp_values(&mut values, style_f64(style, "vmin")?, style_f64(style, "vmax")?);
        let colors = ramp_colors(&values, low, high);
        let (min, max) = values.iter().flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        // title band on top, legend band at the bottom
        let margin = 10.0;
        let header = 24.0;
        let footer = if legend { 48.0 } else { 0.0 };
        let span_x = bounds.width().max(f64::EPSILON);
        let span_y = bounds.height().max(f64::EPSILON);
        let scale = (width - 2.0 * margin) / span_x.max(span_y);
        let height = span_y * scale + 2.0 * margin + header + footer;

        // lon/lat -> SVG coords (Y down)
        let project = move |coord: &Coord<f64>| -> (f64, f64) {
            let x = margin + (coord.x - bounds.min().x) * scale;
            let y = margin + header + (bounds.max().y - coord.y) * scale;
            (x, y)
        };

        let mut writer = SvgStringWriter::new();
        writer.write_header(width, height, &bounds)?;
        writer.write_styles(stroke_width)?;
        writer.write_title(title, margin, margin + 12.0)?;
        for (geometry, color) in features.geometries().iter().zip(colors) {
            writer.write_geometry(geometry, color, radius, &project)?;
        }
        if legend && min.is_finite() {
            writer.write_legend(margin, height - footer + 12.0, (low, min), (high, max), column)?;
        }
        writer.write_footer()?;
        Ok(Rendered::Svg(writer.into_string()?))
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Point};
    use polars::prelude::*;
    use serde_json::json;

    use super::*;

    fn features() -> Features {
        let attributes = df!("collisions" => [0u32, 10], "speed" => [1.0, 2.0]).unwrap();
        Features::new(vec![
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]).into(),
            Point::new(0.5, 1.0).into(),
        ], attributes).unwrap()
    }

    #[test]
    fn draws_ramp_colors_and_legend() {
        let rendered = StaticVisualiser::new().render(&features(), &["collisions"], &Style::new()).unwrap();
        let Rendered::Svg(svg) = rendered else { panic!("expected svg") };
        assert!(svg.contains(&format!(r#"stroke="{RAMP_LOW}""#)));
        assert!(svg.contains(&format!(r#"fill="{RAMP_HIGH}""#)));
        assert!(svg.contains("legend-ramp"));
        assert!(svg.contains(">collisions</text>"));
    }

    #[test]
    fn single_column_only() {
        let err = StaticVisualiser::new().render(&features(), &["collisions", "speed"], &Style::new()).unwrap_err();
        assert!(err.to_string().contains("single column"));
    }

    #[test]
    fn call_style_overrides_built_style() {
        let built = StaticVisualiser::with_style(Style::from([("title".to_string(), json!("Built"))])).unwrap();
        let call = Style::from([("title".to_string(), json!("Per call")), ("legend".to_string(), json!(false))]);
        let Rendered::Svg(svg) = built.render(&features(), &["speed"], &call).unwrap() else { panic!("expected svg") };
        assert!(svg.contains(">Per call</text>"));
        assert!(!svg.contains("legend-ramp"));
    }

    #[test]
    fn style_keys_are_checked_at_construction() {
        assert!(StaticVisualiser::with_style(Style::from([("tiles".to_string(), json!("osm"))])).is_err());
        let config = json!({ "style": { "width": 400 } });
        let visualiser = StaticVisualiser::from_config(&config).unwrap();
        assert_eq!(visualiser.to_config().unwrap(), config);
    }
}
