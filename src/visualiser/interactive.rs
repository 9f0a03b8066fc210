use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use crate::{
    io::{
        geojson::write_feature_collection,
        svg::{RAMP_HIGH, RAMP_LOW, Rgb, escape, ramp_colors},
    },
    urban_layer::Features,
};

use super::{
    Rendered, Style, Visualiser, check_style_keys, clamp_values, column_values, style_f64, style_from_config,
    style_str,
};

const ALLOWED_STYLE_KEYS: &[&str] = &[
    "attr", "color_low", "color_high", "height", "markersize", "tiles", "title", "vmin", "vmax", "width",
];

const DEFAULT_TILES: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
const DEFAULT_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors";

/// Standalone Leaflet page; several columns get a selector to switch between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractiveVisualiser {
    style: Style,
}

impl InteractiveVisualiser {
    pub const NAME: &'static str = "Interactive";

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

impl Visualiser for InteractiveVisualiser {
    fn type_name(&self) -> &'static str { Self::NAME }

    fn allowed_style_keys(&self) -> &'static [&'static str] { ALLOWED_STYLE_KEYS }

    fn style(&self) -> &Style { &self.style }

    fn description(&self) -> &'static str { "Leaflet" }

    fn draw(&self, features: &Features, columns: &[&str], style: &Style) -> Result<Rendered> {
        let low = style_str(style, "color_low")?.map(Rgb::parse_hex).transpose()?.unwrap_or(RAMP_LOW);
        let high = style_str(style, "color_high")?.map(Rgb::parse_hex).transpose()?.unwrap_or(RAMP_HIGH);
        let (vmin, vmax) = (style_f64(style, "vmin")?, style_f64(style, "vmax")?);

        let mut colors = Map::new();
        for column in columns {
            let mut values = column_values(features, column)?;
            clamp_values(&mut values, vmin, vmax);
            let ramp = ramp_colors(&values, low, high).iter().map(Rgb::to_string).collect::<Vec<_>>();
            colors.insert(column.to_string(), json!(ramp));
        }

        let attributes = features.attributes().select(columns.iter().copied())
            .context("[visualiser] Failed to select columns")?;
        let collection = write_feature_collection(features.geometries(), &attributes)?;

        let title = escape(style_str(style, "title")?.unwrap_or("Urban layer"));
        let tiles = script_json(&json!(style_str(style, "tiles")?.unwrap_or(DEFAULT_TILES)));
        let attr = script_json(&json!(style_str(style, "attr")?.unwrap_or(DEFAULT_ATTRIBUTION)));
        let radius = style_f64(style, "markersize")?.unwrap_or(4.0).to_string();
        let page = fill_placeholders(PAGE, &[
            ("title", title),
            ("width", css_size(style.get("width"), "100%")),
            ("height", css_size(style.get("height"), "600px")),
            ("tiles", tiles),
            ("attr", attr),
            ("radius", radius),
            ("columns", script_json(&json!(columns))),
            ("colors", script_json(&Value::Object(colors))),
            ("data", script_json(&collection)),
        ]);
        Ok(Rendered::Html(page))
    }
}

/// Replace each `{key}` in `template` in one pass. Substituted text is never scanned
/// again, so values may contain placeholder-like text. Unknown braces are kept.
fn fill_placeholders(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let value = tail.find('}').and_then(|end| {
            let key = &tail[..end];
            values.iter().find(|(k, _)| *k == key).map(|(_, v)| (v, end))
        });
        match value {
            Some((value, end)) => {
                out.push_str(value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// JSON safe to embed inside a `<script>` element.
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

/// Numbers become pixels, strings are used as given.
fn css_size(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::Number(n)) => format!("{n}px"),
        Some(Value::String(s)) => escape(s),
        _ => default.to_string(),
    }
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>{title}</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
  #map { width: {width}; height: {height}; }
  #column { margin: 6px 0; font-family: sans-serif; }
</style>
</head>
<body>
<select id="column"></select>
<div id="map"></div>
<script>
const columns = {columns};
const colors = {colors};
const data = {data};
const map = L.map("map");
L.tileLayer({tiles}, { attribution: {attr} }).addTo(map);
const select = document.getElementById("column");
columns.forEach(c => select.add(new Option(c, c)));
if (columns.length < 2) select.style.display = "none";
let layer = null;
function draw(column) {
  if (layer) map.removeLayer(layer);
  layer = L.geoJSON(data, {
    style: f => ({ color: colors[column][f.id], fillColor: colors[column][f.id], weight: 3, fillOpacity: 0.7 }),
    pointToLayer: (f, latlng) => L.circleMarker(latlng, { radius: {radius} }),
    onEachFeature: (f, l) => l.bindPopup(columns.map(c => c + ": " + f.properties[c]).join("<br>")),
  }).addTo(map);
}
draw(columns[0]);
map.fitBounds(layer.getBounds());
select.addEventListener("change", e => draw(e.target.value));
</script>
</body>
</html>
"#;
