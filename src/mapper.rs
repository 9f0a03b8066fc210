use std::path::Path;

use anyhow::Result;

use crate::{
    config::Config,
    enricher::EnricherFactory,
    filter::FilterFactory,
    imputer::ImputerFactory,
    loader::LoaderFactory,
    pipeline::PipelineSchema,
    urban_layer::UrbanLayerFactory,
    visualiser::VisualiserFactory,
};

/// Entry point handing out stage factories that share one [`Config`].
#[derive(Debug, Clone, Default)]
pub struct UrbanMapper {
    config: Config,
}

impl UrbanMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Settings from a YAML file; see `config.yaml` for the keys.
    pub fn from_config_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_config(Config::from_path(path.as_ref())?))
    }

    pub fn config(&self) -> &Config { &self.config }

    /// The pipeline schema the configuration declares.
    pub fn schema(&self) -> Result<PipelineSchema> {
        PipelineSchema::from_config(&self.config)
    }

    pub fn loader(&self) -> LoaderFactory {
        LoaderFactory::new().with_crs(&self.config.defaults.crs)
    }

    pub fn imputer(&self) -> ImputerFactory {
        ImputerFactory::new().with_config(self.config.clone())
    }

    pub fn filter(&self) -> FilterFactory {
        FilterFactory::new()
    }

    pub fn enricher(&self) -> EnricherFactory {
        EnricherFactory::new()
    }

    pub fn urban_layer(&self) -> UrbanLayerFactory {
        UrbanLayerFactory::new().with_config(self.config.clone())
    }

    pub fn visualiser(&self) -> VisualiserFactory {
        VisualiserFactory::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_share_configuration() {
        let config = Config::from_yaml_str("mapping:\n  default_output_column: nearest_cell\n").unwrap();
        let mapper = UrbanMapper::with_config(config);
        let layer = mapper.urban_layer()
            .with_type("region_grid")
            .with_cell_size(0.5)
            .from_bbox((0.0, 0.0, 1.0, 1.0))
            .with_default_mapping("lon", "lat")
            .build()
            .unwrap();
        assert_eq!(layer.mappings()[0].output_column, "nearest_cell");
        assert_eq!(mapper.schema().unwrap(), PipelineSchema::default());
    }
}
