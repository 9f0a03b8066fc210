//! SVG writing operations.

use std::io::Write;

use anyhow::{Context, Result};
use geo::{Coord, CoordsIter, Geometry, LineString, Polygon, Rect};

use super::Rgb;

/// Projection: lon/lat -> SVG coords (x, y).
pub(crate) type Projection<'a> = dyn Fn(&Coord<f64>) -> (f64, f64) + 'a;

/// In-memory SVG document.
pub(crate) struct SvgStringWriter {
    buffer: Vec<u8>,
}

/// Implement std::io::Write so `write!` / `writeln!` work.
impl Write for SvgStringWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

impl SvgStringWriter {
    pub(crate) fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub(crate) fn into_string(self) -> Result<String> {
        String::from_utf8(self.buffer).context("[io::svg] SVG output is not valid UTF-8")
    }

    /// XML declaration, opening <svg> tag and background.
    pub(crate) fn write_header(&mut self, width: f64, height: f64, bounds: &Rect<f64>) -> Result<()> {
        writeln!(self, r##"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"##)?;
        writeln!(self, r##"<svg xmlns="http://www.w3.org/2000/svg"
        width="{width:.0}" height="{height:.0}"
        viewBox="0 0 {width:.0} {height:.0}"
        data-lon-min="{lon_min}" data-lon-max="{lon_max}"
        data-lat-min="{lat_min}" data-lat-max="{lat_max}">"##,
            lon_min = bounds.min().x,
            lon_max = bounds.max().x,
            lat_min = bounds.min().y,
            lat_max = bounds.max().y,
        )?;
        writeln!(self, r##"<rect width="100%" height="100%" fill="#ffffff"/>"##)?;
        Ok(())
    }

    pub(crate) fn write_styles(&mut self, stroke_width: f64) -> Result<()> {
        writeln!(self, r##"<defs>
<style>
    .area {{ stroke: #111827; stroke-width: {stroke_width}; fill-opacity: 0.85; }}
    .line {{ fill: none; stroke-width: {line_width}; stroke-linecap: round; }}
    .dot {{ stroke: #111827; stroke-width: {stroke_width}; }}
    .label {{ font-family: sans-serif; font-size: 12px; fill: #111827; }}
</style>
</defs>"##, line_width = stroke_width * 3.0)?;
        Ok(())
    }

    pub(crate) fn write_title(&mut self, title: &str, x: f64, y: f64) -> Result<()> {
        writeln!(self, r#"<text class="label" x="{x:.1}" y="{y:.1}">{}</text>"#, escape(title))?;
        Ok(())
    }

    /// Two-stop legend: a gradient bar with the minimum and maximum labels.
    pub(crate) fn write_legend(&mut self, x: f64, y: f64, low: (Rgb, f64), high: (Rgb, f64), label: &str) -> Result<()> {
        writeln!(self, r#"<defs><linearGradient id="legend-ramp"><stop offset="0" stop-color="{}"/><stop offset="1" stop-color="{}"/></linearGradient></defs>"#, low.0, high.0)?;
        writeln!(self, r#"<rect x="{x:.1}" y="{y:.1}" width="160" height="10" fill="url(#legend-ramp)"/>"#)?;
        writeln!(self, r#"<text class="label" x="{x:.1}" y="{:.1}">{}</text>"#, y + 24.0, format_value(low.1))?;
        writeln!(self, r#"<text class="label" x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#, x + 160.0, y + 24.0, format_value(high.1))?;
        writeln!(self, r#"<text class="label" x="{x:.1}" y="{:.1}">{}</text>"#, y - 4.0, escape(label))?;
        Ok(())
    }

    /// Draw one geometry: areas filled, lines stroked, points as dots.
    pub(crate) fn write_geometry(&mut self, geometry: &Geometry<f64>, color: Rgb, radius: f64, project: &Projection) -> Result<()> {
        match geometry {
            Geometry::Point(p) => self.write_dot(&p.0, color, radius, project)?,
            Geometry::MultiPoint(mp) => for p in &mp.0 { self.write_dot(&p.0, color, radius, project)? },
            Geometry::LineString(ls) => self.write_line(ls, color, project)?,
            Geometry::MultiLineString(mls) => for ls in &mls.0 { self.write_line(ls, color, project)? },
            Geometry::Line(l) => self.write_line(&LineString::new(vec![l.start, l.end]), color, project)?,
            Geometry::Polygon(p) => self.write_area(std::slice::from_ref(p), color, project)?,
            Geometry::MultiPolygon(mp) => self.write_area(&mp.0, color, project)?,
            Geometry::Rect(r) => self.write_area(&[r.to_polygon()], color, project)?,
            Geometry::Triangle(t) => self.write_area(&[t.to_polygon()], color, project)?,
            Geometry::GeometryCollection(gc) => for g in &gc.0 { self.write_geometry(g, color, radius, project)? },
        }
        Ok(())
    }

    fn write_dot(&mut self, c: &Coord<f64>, color: Rgb, radius: f64, project: &Projection) -> Result<()> {
        let (x, y) = project(c);
        writeln!(self, r#"<circle class="dot" cx="{x:.3}" cy="{y:.3}" r="{radius}" fill="{color}"/>"#)?;
        Ok(())
    }

    fn write_line(&mut self, ls: &LineString<f64>, color: Rgb, project: &Projection) -> Result<()> {
        let points = ls.coords_iter()
            .map(|c| { let (x, y) = project(&c); format!("{x:.3},{y:.3}") })
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(self, r#"<polyline class="line" points="{points}" stroke="{color}"/>"#)?;
        Ok(())
    }

    fn write_area(&mut self, polygons: &[Polygon<f64>], color: Rgb, project: &Projection) -> Result<()> {
        let mut d = String::new();
        for polygon in polygons {
            d.push_str(&ring_to_path(polygon.exterior(), project));
            for interior in polygon.interiors() {
                d.push_str(&ring_to_path(interior, project));
            }
        }
        writeln!(self, r#"<path class="area" fill-rule="evenodd" d="{d}" fill="{color}"/>"#)?;
        Ok(())
    }

    pub(crate) fn write_footer(&mut self) -> Result<()> {
        writeln!(self, "</svg>")?;
        Ok(())
    }
}

/// Build a compact SVG path string for a LineString (ring).
fn ring_to_path(ring: &LineString<f64>, project: &Projection) -> String {
    let mut out = String::new();
    let mut coords = ring.coords_iter().map(|coord| project(&coord));
    if let Some((x, y)) = coords.next() {
        out.push_str(&format!(" M{x:.3},{y:.3}"));
        for (x, y) in coords {
            out.push_str(&format!(" L{x:.3},{y:.3}"));
        }
        out.push('Z');
    }
    out
}

/// Escape text for XML/HTML content.
pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e12 { format!("{v:.0}") } else { format!("{v:.2}") }
}

#[cfg(test)]
mod tests {
    use geo::Point;

    use super::*;

    #[test]
    fn document_has_header_and_footer() {
        let bounds = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 });
        let mut w = SvgStringWriter::new();
        w.write_header(100.0, 100.0, &bounds).unwrap();
        w.write_styles(0.5).unwrap();
        let project = |c: &Coord<f64>| (c.x * 100.0, (1.0 - c.y) * 100.0);
        w.write_geometry(&Point::new(0.5, 0.5).into(), Rgb { r: 0, g: 0, b: 0 }, 3.0, &project).unwrap();
        w.write_footer().unwrap();
        let svg = w.into_string().unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains(r#"cx="50.000""#));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
