//! GeoJSON conversion for layer geometries and attribute tables.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail, ensure};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use polars::prelude::*;
use serde_json::{Map, Value, json};

fn coord_json(c: &Coord<f64>) -> Value {
    json!([c.x, c.y])
}

fn line_json(ls: &LineString<f64>) -> Value {
    Value::Array(ls.coords().map(coord_json).collect())
}

fn polygon_json(p: &Polygon<f64>) -> Value {
    Value::Array(std::iter::once(p.exterior()).chain(p.interiors()).map(line_json).collect())
}

/// GeoJSON geometry object for `geometry`.
pub(crate) fn geometry_to_json(geometry: &Geometry<f64>) -> Result<Value> {
    Ok(match geometry {
        Geometry::Point(p) => json!({ "type": "Point", "coordinates": coord_json(&p.0) }),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.0.iter().map(|p| coord_json(&p.0)).collect::<Vec<_>>(),
        }),
        Geometry::LineString(ls) => json!({ "type": "LineString", "coordinates": line_json(ls) }),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.0.iter().map(line_json).collect::<Vec<_>>(),
        }),
        Geometry::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_json(p) }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(polygon_json).collect::<Vec<_>>(),
        }),
        Geometry::Rect(r) => json!({ "type": "Polygon", "coordinates": polygon_json(&r.to_polygon()) }),
        Geometry::Triangle(t) => json!({ "type": "Polygon", "coordinates": polygon_json(&t.to_polygon()) }),
        Geometry::Line(l) => json!({ "type": "LineString", "coordinates": [coord_json(&l.start), coord_json(&l.end)] }),
        Geometry::GeometryCollection(_) => bail!("[io::geojson] Geometry collections are not supported"),
    })
}

fn parse_coord(value: &Value) -> Result<Coord<f64>> {
    let pair = value.as_array()
        .filter(|pair| pair.len() >= 2)
        .ok_or_else(|| anyhow!("[io::geojson] Invalid position: {value}"))?;
    let x = pair[0].as_f64().ok_or_else(|| anyhow!("[io::geojson] x must be a number"))?;
    let y = pair[1].as_f64().ok_or_else(|| anyhow!("[io::geojson] y must be a number"))?;
    Ok(Coord { x, y })
}

fn parse_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| anyhow!("[io::geojson] {what} must be an array"))
}

fn parse_line(value: &Value) -> Result<LineString<f64>> {
    parse_array(value, "line")?.iter().map(parse_coord).collect::<Result<Vec<_>>>().map(LineString::new)
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let mut rings = parse_array(value, "polygon")?.iter().map(parse_line).collect::<Result<Vec<_>>>()?;
    ensure!(!rings.is_empty(), "[io::geojson] Polygon without an exterior ring");
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

/// Parse a GeoJSON geometry object.
pub(crate) fn geometry_from_json(value: &Value) -> Result<Geometry<f64>> {
    let coords = &value["coordinates"];
    Ok(match value["type"].as_str() {
        Some("Point") => Point::from(parse_coord(coords)?).into(),
        Some("MultiPoint") => MultiPoint::new(
            parse_array(coords, "MultiPoint")?.iter().map(|c| parse_coord(c).map(Point::from)).collect::<Result<_>>()?
        ).into(),
        Some("LineString") => parse_line(coords)?.into(),
        Some("MultiLineString") => MultiLineString::new(
            parse_array(coords, "MultiLineString")?.iter().map(parse_line).collect::<Result<_>>()?
        ).into(),
        Some("Polygon") => parse_polygon(coords)?.into(),
        Some("MultiPolygon") => MultiPolygon::new(
            parse_array(coords, "MultiPolygon")?.iter().map(parse_polygon).collect::<Result<_>>()?
        ).into(),
        other => bail!("[io::geojson] Unsupported geometry type {other:?}"),
    })
}

fn any_value_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => json!(b),
        AnyValue::Int8(v) => json!(v),
        AnyValue::Int16(v) => json!(v),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt8(v) => json!(v),
        AnyValue::UInt16(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        AnyValue::Float32(v) => json!(v),
        AnyValue::Float64(v) => json!(v),
        AnyValue::String(s) => json!(s),
        AnyValue::StringOwned(s) => json!(s.as_str()),
        other => json!(other.to_string()),
    }
}

/// FeatureCollection with one feature per geometry, properties taken from the matching row.
pub(crate) fn write_feature_collection(geometries: &[Geometry<f64>], attributes: &DataFrame) -> Result<Value> {
    ensure!(geometries.len() == attributes.height(),
        "[io::geojson] {} geometries for {} attribute rows", geometries.len(), attributes.height());

    let features = geometries.iter().enumerate()
        .map(|(row, geometry)| {
            let mut properties = Map::new();
            for column in attributes.get_columns() {
                properties.insert(column.name().to_string(), any_value_json(column.get(row)?));
            }
            Ok(json!({
                "type": "Feature",
                "id": row,
                "geometry": geometry_to_json(geometry)?,
                "properties": properties,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(json!({ "type": "FeatureCollection", "features": features }))
}

/// Geometries and a property table from a FeatureCollection.
pub(crate) fn read_feature_collection(value: &Value) -> Result<(Vec<Geometry<f64>>, DataFrame)> {
    let features = value["features"].as_array()
        .ok_or_else(|| anyhow!("[io::geojson] Expected a FeatureCollection with a `features` array"))?;

    let mut geometries = Vec::with_capacity(features.len());
    let mut properties: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (row, feature) in features.iter().enumerate() {
        geometries.push(geometry_from_json(&feature["geometry"])
            .with_context(|| format!("[io::geojson] Invalid geometry in feature {row}"))?);
        if let Some(props) = feature["properties"].as_object() {
            for (key, value) in props {
                let column = properties.entry(key.clone()).or_default();
                column.resize(row, Value::Null);
                column.push(value.clone());
            }
        }
    }

    let columns = properties.into_iter()
        .map(|(name, mut values)| {
            values.resize(geometries.len(), Value::Null);
            json_column(&name, &values)
        })
        .collect::<Vec<_>>();
    let attributes = if columns.is_empty() {
        DataFrame::empty_with_height(geometries.len())
    } else {
        DataFrame::new(columns).context("[io::geojson] Failed to assemble property table")?
    };
    Ok((geometries, attributes))
}

/// Typed column from JSON values: integers, floats and booleans stay numeric, everything else is text.
fn json_column(name: &str, values: &[Value]) -> Column {
    let name: PlSmallStr = name.into();
    let present = || values.iter().filter(|v| !v.is_null());
    if present().all(|v| v.is_i64()) {
        Series::new(name, values.iter().map(Value::as_i64).collect::<Vec<_>>())
    } else if present().all(Value::is_number) {
        Series::new(name, values.iter().map(Value::as_f64).collect::<Vec<_>>())
    } else if present().all(Value::is_boolean) {
        Series::new(name, values.iter().map(Value::as_bool).collect::<Vec<_>>())
    } else {
        Series::new(name, values.iter().map(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }).collect::<Vec<_>>())
    }.into_column()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_json_round_trip() {
        let polygon: Geometry<f64> = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        ).into();
        let json = geometry_to_json(&polygon).unwrap();
        assert_eq!(json["type"], "Polygon");
        assert_eq!(geometry_from_json(&json).unwrap(), polygon);
    }

    #[test]
    fn feature_collection_keeps_properties() {
        let geoms: Vec<Geometry<f64>> = vec![Point::new(1.0, 2.0).into(), Point::new(3.0, 4.0).into()];
        let attrs = df!("name" => ["a", "b"], "count" => [1u32, 5]).unwrap();
        let fc = write_feature_collection(&geoms, &attrs).unwrap();
        assert_eq!(fc["features"][1]["properties"]["count"], 5);

        let (back_geoms, back_attrs) = read_feature_collection(&fc).unwrap();
        assert_eq!(back_geoms, geoms);
        assert_eq!(back_attrs.column("count").unwrap().dtype(), &DataType::Int64);
        assert_eq!(back_attrs.column("name").unwrap().str().unwrap().get(0), Some("a"));
    }

    #[test]
    fn sparse_properties_fill_with_nulls() {
        let fc = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }, "properties": {} },
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [1.0, 1.0] }, "properties": { "v": 1.5 } },
            ],
        });
        let (_, attrs) = read_feature_collection(&fc).unwrap();
        let v = attrs.column("v").unwrap();
        assert_eq!(v.null_count(), 1);
        assert_eq!(v.f64().unwrap().get(1), Some(1.5));
    }
}
