use anyhow::{Context, Result, anyhow, bail};
use geo::{Coord, Geometry, MapCoords, Rect};
use proj4rs::{proj::Proj, transform::transform};

const WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs +type=crs";
const NAD83: &str = "+proj=longlat +datum=NAD83 +no_defs +type=crs";
const WEB_MERCATOR: &str = "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs +type=crs";

/// PROJ.4 definition for a CRS given as `EPSG:<code>` or a raw PROJ.4 string.
pub(crate) fn proj4_definition(crs: &str) -> Result<String> {
    let trimmed = crs.trim();
    if trimmed.starts_with('+') {
        return Ok(trimmed.to_string());
    }
    let code = trimmed.to_ascii_uppercase();
    let code = code.strip_prefix("EPSG:")
        .ok_or_else(|| anyhow!("[proj] Unrecognised CRS {crs:?}; use EPSG:<code> or a PROJ.4 string"))?;
    match code {
        "4326" => Ok(WGS84.into()),
        "4269" | "4937" => Ok(NAD83.into()),
        "3857" | "900913" => Ok(WEB_MERCATOR.into()),
        other => match other.parse::<u32>() {
            // WGS84 / UTM zones
            Ok(n @ 32601..=32660) => Ok(format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs +type=crs", n - 32600)),
            Ok(n @ 32701..=32760) => Ok(format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs +type=crs", n - 32700)),
            _ => bail!("[proj] Unsupported EPSG code {other}; pass a PROJ.4 string instead"),
        },
    }
}

/// Whether `crs` is plain WGS84 lon/lat, so no reprojection is needed.
pub(crate) fn is_wgs84(crs: &str) -> bool {
    proj4_definition(crs).is_ok_and(|def| def == WGS84)
}

/// PROJ.4 string for the UTM zone containing `center` (lon/lat degrees).
pub(crate) fn utm_definition(center: Coord<f64>) -> String {
    let zone = (((center.x + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60);
    let south = if center.y >= 0.0 { "" } else { " +south" };
    format!("+proj=utm +zone={zone}{south} +datum=WGS84 +units=m +no_defs +type=crs")
}

/// Coordinate transform between two CRSs, taking and returning degrees for geographic ones.
pub(crate) struct Projector {
    from: Proj,
    to: Proj,
}

impl Projector {
    pub(crate) fn new(from: &str, to: &str) -> Result<Self> {
        let from = Proj::from_proj_string(from)
            .map_err(|e| anyhow!("{e:?}"))
            .with_context(|| format!("[proj] Failed to build source PROJ.4: {from}"))?;
        let to = Proj::from_proj_string(to)
            .map_err(|e| anyhow!("{e:?}"))
            .with_context(|| format!("[proj] Failed to build target PROJ.4: {to}"))?;
        Ok(Self { from, to })
    }

    /// Lon/lat (WGS84) into the metric UTM zone covering `bounds`.
    pub(crate) fn to_local_metric(bounds: &Rect<f64>) -> Result<Self> {
        Self::new(WGS84, &utm_definition(bounds.center()))
    }

    /// Any supported CRS into WGS84 lon/lat.
    pub(crate) fn to_wgs84(crs: &str) -> Result<Self> {
        Self::new(&proj4_definition(crs)?, WGS84)
    }

    pub(crate) fn project(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        project_with(&self.from, &self.to, coord)
    }

    pub(crate) fn project_geometry(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
        let (from, to) = (&self.from, &self.to);
        geometry.try_map_coords(|coord| project_with(from, to, coord))
    }
}

fn project_with(from: &Proj, to: &Proj, coord: Coord<f64>) -> Result<Coord<f64>> {
    let mut point = if from.is_latlong() {
        (coord.x.to_radians(), coord.y.to_radians(), 0.0)
    } else {
        (coord.x, coord.y, 0.0)
    };
    transform(from, to, &mut point)
        .map_err(|e| anyhow!("[proj] CRS transform failed for ({}, {}): {e:?}", coord.x, coord.y))?;
    Ok(if to.is_latlong() {
        Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
    } else {
        Coord { x: point.0, y: point.1 }
    })
}
