//! SVG output for static maps.

mod color;
mod writer;

pub(crate) use color::*;
pub(crate) use writer::*;
