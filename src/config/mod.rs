//! Configuration: layered loading, merging and the config service

mod loader;
mod merge;
mod service;

pub use loader::{
    config_from_layers, load_config, parse_layer, ConfigLayers, BUNDLED_DEFAULTS,
    COMPANY_CONFIG_ENV,
};
pub use merge::{merge_documents, merge_layers};
pub use service::ConfigService;
