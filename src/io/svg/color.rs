//! Color mapping utilities for SVG and HTML output.

use std::fmt;

use anyhow::{Result, bail};

/// Simple RGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Rgb {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
}

impl fmt::Display for Rgb {
    /// Format as CSS hex: #rrggbb
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Rgb {
    /// Parse `#rrggbb` or `rrggbb`.
    pub(crate) fn parse_hex(text: &str) -> Result<Self> {
        let hex = text.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            bail!("[io::svg::color] Expected a #rrggbb color, got {text:?}");
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        match (channel(0), channel(2), channel(4)) {
            (Ok(r), Ok(g), Ok(b)) => Ok(Self { r, g, b }),
            _ => bail!("[io::svg::color] Expected a #rrggbb color, got {text:?}"),
        }
    }

    /// Linear blend towards `other`, `t` in [0, 1].
    pub(crate) fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let mix = |a: u8, b: u8| -> u8 {
            (a as f64 + (b as f64 - a as f64) * t).round().clamp(0.0, 255.0) as u8
        };
        Rgb { r: mix(self.r, other.r), g: mix(self.g, other.g), b: mix(self.b, other.b) }
    }
}

/// Light (#deebf7) to dark (#08519c) blue ramp.
pub(crate) const RAMP_LOW: Rgb = Rgb { r: 0xde, g: 0xeb, b: 0xf7 };
pub(crate) const RAMP_HIGH: Rgb = Rgb { r: 0x08, g: 0x51, b: 0x9c };

/// Neutral gray for missing values.
pub(crate) const MISSING: Rgb = Rgb { r: 150, g: 150, b: 150 };

/// One color per value, scaled linearly between the column minimum and maximum.
pub(crate) fn ramp_colors(values: &[Option<f64>], low: Rgb, high: Rgb) -> Vec<Rgb> {
    let finite = values.iter().flatten().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let range = if max > min { max - min } else { 1.0 };

    values.iter()
        .map(|value| match value {
            Some(v) if v.is_finite() => low.lerp(high, ((v - min) / range).clamp(0.0, 1.0)),
            _ => MISSING,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let c = Rgb::parse_hex("#08519c").unwrap();
        assert_eq!(c, RAMP_HIGH);
        assert_eq!(c.to_string(), "#08519c");
        assert!(Rgb::parse_hex("blue").is_err());
        assert!(Rgb::parse_hex("#zzzzzz").is_err());
    }

    #[test]
    fn ramp_spans_low_to_high() {
        let colors = ramp_colors(&[Some(0.0), Some(10.0), None, Some(5.0)], RAMP_LOW, RAMP_HIGH);
        assert_eq!(colors[0], RAMP_LOW);
        assert_eq!(colors[1], RAMP_HIGH);
        assert_eq!(colors[2], MISSING);
        assert_eq!(colors[3], RAMP_LOW.lerp(RAMP_HIGH, 0.5));
    }

    #[test]
    fn constant_column_uses_low_end() {
        let colors = ramp_colors(&[Some(3.0), Some(3.0)], RAMP_LOW, RAMP_HIGH);
        assert!(colors.iter().all(|&c| c == RAMP_LOW));
    }
}
