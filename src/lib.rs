#![doc = "urban-mapper public API"]
mod common;
mod io;

pub mod config;
pub mod enricher;
pub mod error;
pub mod filter;
pub mod geo_frame;
pub mod imputer;
pub mod loader;
mod mapper;
pub mod pipeline;
pub mod registry;
pub mod stage;
pub mod urban_layer;
pub mod visualiser;

#[doc(inline)]
pub use config::Config;

#[doc(inline)]
pub use error::PipelineError;

#[doc(inline)]
pub use geo_frame::GeoFrame;

#[doc(inline)]
pub use mapper::UrbanMapper;

#[doc(inline)]
pub use pipeline::{PipelineSchema, UrbanPipeline};

#[doc(inline)]
pub use stage::{Preview, PreviewFormat, Stage, StageFamily, Step};
