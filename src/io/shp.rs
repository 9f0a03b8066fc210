//! Shapefile reading: geometries plus their dBase attribute table.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result, bail};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use polars::prelude::*;
use shapefile::{Reader, Shape, dbase::FieldValue};

/// Reads all shapes and attribute records from a `.shp` file.
pub(crate) fn read_shapefile(path: &Path) -> Result<(Vec<Geometry<f64>>, DataFrame)> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("[io::shp] Failed to open shapefile: {}", path.display()))?;

    let mut geometries = Vec::new();
    let mut fields: BTreeMap<String, Vec<FieldValue>> = BTreeMap::new();
    for (row, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item
            .with_context(|| format!("[io::shp] Error reading shape+record {row} of {}", path.display()))?;
        geometries.push(shape_to_geo(shape)
            .with_context(|| format!("[io::shp] Unsupported shape at record {row}"))?);
        for (name, value) in record {
            fields.entry(name).or_default().push(value);
        }
    }

    let columns = fields.into_iter()
        .map(|(name, values)| field_column(&name, values))
        .collect::<Vec<_>>();
    let attributes = if columns.is_empty() {
        DataFrame::empty_with_height(geometries.len())
    } else {
        DataFrame::new(columns).context("[io::shp] Failed to assemble attribute table")?
    };
    Ok((geometries, attributes))
}

fn shape_to_geo(shape: Shape) -> Result<Geometry<f64>> {
    let xy = |x: f64, y: f64| Coord { x, y };
    Ok(match shape {
        Shape::Point(p) => Point::new(p.x, p.y).into(),
        Shape::PointZ(p) => Point::new(p.x, p.y).into(),
        Shape::Multipoint(mp) => MultiPoint::from(
            mp.points().iter().map(|p| Point::new(p.x, p.y)).collect::<Vec<_>>()
        ).into(),
        Shape::Polyline(line) => MultiLineString::new(
            line.parts().iter()
                .map(|part| LineString::new(part.iter().map(|p| xy(p.x, p.y)).collect()))
                .collect()
        ).into(),
        Shape::Polygon(polygon) => rings_to_multipolygon(
            polygon.rings().iter()
                .map(|ring| ring.points().iter().map(|p| xy(p.x, p.y)).collect())
                .collect()
        ).into(),
        other => bail!("shape type {:?} is not supported", other.shapetype()),
    })
}

/// Group shapefile rings into polygons: clockwise rings are exteriors, the rest holes of
/// the preceding exterior.
fn rings_to_multipolygon(rings: Vec<Vec<Coord<f64>>>) -> MultiPolygon<f64> {
    fn signed_area(pts: &[Coord<f64>]) -> f64 {
        pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
    }

    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();
    for mut coords in rings {
        if coords.first() != coords.last() {
            if let Some(&first) = coords.first() { coords.push(first) }
        }
        let is_exterior = signed_area(&coords) < 0.0;
        let ring = LineString::new(coords);
        if is_exterior {
            if let Some(ext) = exterior.take() {
                polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(ring);
        } else {
            holes.push(ring);
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }
    MultiPolygon::new(polygons)
}

/// Turn one dBase field into a typed column, picking the type from the first non-null value.
fn field_column(name: &str, values: Vec<FieldValue>) -> Column {
    let name: PlSmallStr = name.into();
    let kind = values.iter().find_map(|value| match value {
        FieldValue::Numeric(Some(_)) | FieldValue::Float(Some(_)) | FieldValue::Double(_) => Some("f64"),
        FieldValue::Integer(_) => Some("i64"),
        FieldValue::Logical(Some(_)) => Some("bool"),
        FieldValue::Character(Some(_)) => Some("str"),
        _ => None,
    });

    match kind {
        Some("f64") => Series::new(name, values.iter().map(|value| match value {
            FieldValue::Numeric(v) => *v,
            FieldValue::Float(v) => v.map(f64::from),
            FieldValue::Double(v) => Some(*v),
            FieldValue::Integer(v) => Some(f64::from(*v)),
            _ => None,
        }).collect::<Vec<_>>()),
        Some("i64") => Series::new(name, values.iter().map(|value| match value {
            FieldValue::Integer(v) => Some(i64::from(*v)),
            _ => None,
        }).collect::<Vec<_>>()),
        Some("bool") => Series::new(name, values.iter().map(|value| match value {
            FieldValue::Logical(v) => *v,
            _ => None,
        }).collect::<Vec<_>>()),
        _ => Series::new(name, values.into_iter().map(|value| match value {
            FieldValue::Character(v) => v.map(|s| s.trim_end().to_string()),
            _ => None,
        }).collect::<Vec<_>>()),
    }.into_column()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hole_follows_its_exterior() {
        // exterior clockwise, hole counter-clockwise
        let exterior = vec![
            Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 4.0 },
            Coord { x: 4.0, y: 4.0 }, Coord { x: 4.0, y: 0.0 },
        ];
        let hole = vec![
            Coord { x: 1.0, y: 1.0 }, Coord { x: 2.0, y: 1.0 },
            Coord { x: 2.0, y: 2.0 }, Coord { x: 1.0, y: 2.0 },
        ];
        let mp = rings_to_multipolygon(vec![exterior, hole]);
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
        // rings get closed
        assert_eq!(mp.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn field_types_follow_first_value() {
        let col = field_column("pop", vec![FieldValue::Numeric(None), FieldValue::Numeric(Some(2.0))]);
        assert_eq!(col.dtype(), &DataType::Float64);
        assert_eq!(col.null_count(), 1);

        let col = field_column("name", vec![FieldValue::Character(Some("Main St  ".into()))]);
        assert_eq!(col.str().unwrap().get(0), Some("Main St"));
    }
}
