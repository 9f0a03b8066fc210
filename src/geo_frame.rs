use anyhow::{Context, Result};
use geo::{Coord, Rect};
use polars::prelude::*;

use crate::error::PipelineError;

/// CRS of every [`GeoFrame`] handed out by a loader.
pub const WGS84: &str = "EPSG:4326";

/// Tabular point data flowing through a pipeline: a DataFrame plus the names of its
/// longitude/latitude columns (WGS84 degrees).
#[derive(Debug, Clone)]
pub struct GeoFrame {
    frame: DataFrame,
    longitude_column: String,
    latitude_column: String,
}

impl GeoFrame {
    /// Wrap `frame`, casting the coordinate columns to `f64`.
    pub fn new(mut frame: DataFrame, longitude_column: &str, latitude_column: &str) -> Result<Self> {
        let missing = [longitude_column, latitude_column].into_iter()
            .filter(|name| frame.column(name).is_err())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(PipelineError::missing_columns("geo_frame", &missing).into());
        }
        for name in [longitude_column, latitude_column] {
            let column = frame.column(name)?;
            if column.dtype() != &DataType::Float64 {
                let cast = column.cast(&DataType::Float64)
                    .with_context(|| format!("[geo_frame] Column {name:?} is not numeric"))?;
                frame.replace_or_add(name.into(), cast.take_materialized_series())?;
            }
        }
        Ok(Self {
            frame,
            longitude_column: longitude_column.to_string(),
            latitude_column: latitude_column.to_string(),
        })
    }

    pub fn frame(&self) -> &DataFrame { &self.frame }

    pub fn into_frame(self) -> DataFrame { self.frame }

    pub fn longitude_column(&self) -> &str { &self.longitude_column }

    pub fn latitude_column(&self) -> &str { &self.latitude_column }

    pub fn crs(&self) -> &str { WGS84 }

    pub fn height(&self) -> usize { self.frame.height() }

    pub fn is_empty(&self) -> bool { self.frame.height() == 0 }

    /// Same coordinate columns over a new table.
    pub fn with_frame(&self, frame: DataFrame) -> Result<Self> {
        Self::new(frame, &self.longitude_column, &self.latitude_column)
    }

    /// Names from `columns` that the table lacks.
    pub fn missing_columns<'a>(&self, columns: &[&'a str]) -> Vec<&'a str> {
        columns.iter().copied().filter(|name| self.frame.column(name).is_err()).collect()
    }

    /// Fail with [`PipelineError::MissingColumns`] unless every column is present.
    pub fn require_columns(&self, stage: &str, columns: &[&str]) -> Result<()> {
        let missing = self.missing_columns(columns);
        if missing.is_empty() { Ok(()) } else { Err(PipelineError::missing_columns(stage, &missing).into()) }
    }

    /// `(longitude, latitude)` per row, `None` where either is null or not finite.
    pub fn coordinates(&self) -> Result<Vec<Option<Coord<f64>>>> {
        coordinates_of(&self.frame, &self.longitude_column, &self.latitude_column)
    }

    /// Bounding box of the non-null coordinates.
    pub fn bounds(&self) -> Result<Option<Rect<f64>>> {
        let coords = self.coordinates()?.into_iter().flatten().collect::<Vec<_>>();
        Ok(bounds_of(&coords))
    }

    /// Append or replace a column.
    pub fn with_column(mut self, series: Series) -> Result<Self> {
        self.frame.replace_or_add(series.name().clone(), series)
            .context("[geo_frame] Failed to add column")?;
        Ok(self)
    }

    /// Keep rows where `mask` is true.
    pub fn filter(&self, mask: &BooleanChunked) -> Result<Self> {
        let frame = self.frame.filter(mask).context("[geo_frame] Failed to filter rows")?;
        self.with_frame(frame)
    }
}

/// Coordinates from any table with the named longitude/latitude columns.
pub(crate) fn coordinates_of(frame: &DataFrame, longitude: &str, latitude: &str) -> Result<Vec<Option<Coord<f64>>>> {
    let lon = frame.column(longitude)?.cast(&DataType::Float64)?;
    let lat = frame.column(latitude)?.cast(&DataType::Float64)?;
    Ok(lon.f64()?.into_iter()
        .zip(lat.f64()?.into_iter())
        .map(|pair| match pair {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some(Coord { x, y }),
            _ => None,
        })
        .collect())
}

pub(crate) fn bounds_of(coords: &[Coord<f64>]) -> Option<Rect<f64>> {
    let first = coords.first()?;
    let (min, max) = coords.iter().fold((*first, *first), |(min, max), c| {
        (Coord { x: min.x.min(c.x), y: min.y.min(c.y) }, Coord { x: max.x.max(c.x), y: max.y.max(c.y) })
    });
    Some(Rect::new(min, max))
}
