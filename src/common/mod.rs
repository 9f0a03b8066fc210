mod fs;
#[cfg(feature = "download")]
mod http;
mod proj;
mod text;

pub(crate) use fs::*;
#[cfg(feature = "download")]
pub(crate) use http::*;
pub(crate) use proj::*;
pub(crate) use text::*;
