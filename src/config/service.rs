//! Configuration service
//!
//! An explicit value handed to every component that needs configuration.
//! The merged config is loaded once and cached until `invalidate()`.

use std::sync::{Arc, RwLock};

use crate::errors::{GatekeeperError, Result};
use crate::schemas::Config;

use super::loader::{load_config, ConfigLayers};

enum Source {
    Layers(ConfigLayers),
    Fixed(Arc<Config>),
}

pub struct ConfigService {
    source: Source,
    cached: RwLock<Option<Arc<Config>>>,
}

impl ConfigService {
    /// Service that loads from the given layers on first use
    pub fn new(layers: ConfigLayers) -> Self {
        ConfigService {
            source: Source::Layers(layers),
            cached: RwLock::new(None),
        }
    }

    /// Service over an in-memory config; `invalidate` is a no-op
    pub fn fixed(config: Config) -> Self {
        let config = Arc::new(config);
        ConfigService {
            source: Source::Fixed(config.clone()),
            cached: RwLock::new(Some(config)),
        }
    }

    /// The current configuration, loading it if needed
    pub fn get(&self) -> Result<Arc<Config>> {
        if let Some(config) = self.read_cache()? {
            return Ok(config);
        }

        let loaded = match &self.source {
            Source::Layers(layers) => Arc::new(load_config(layers)?),
            Source::Fixed(config) => config.clone(),
        };

        let mut guard = self
            .cached
            .write()
            .map_err(|_| GatekeeperError::ConfigError("config cache poisoned".to_string()))?;
        Ok(guard.get_or_insert(loaded).clone())
    }

    /// Drop the cached config; the next `get` reloads from disk
    pub fn invalidate(&self) {
        if let Source::Fixed(_) = self.source {
            return;
        }
        if let Ok(mut guard) = self.cached.write() {
            *guard = None;
            tracing::debug!("configuration cache invalidated");
        }
    }

    /// Invalidate and load immediately, surfacing errors now
    pub fn reload(&self) -> Result<Arc<Config>> {
        self.invalidate();
        self.get()
    }

    fn read_cache(&self) -> Result<Option<Arc<Config>>> {
        let guard = self
            .cached
            .read()
            .map_err(|_| GatekeeperError::ConfigError("config cache poisoned".to_string()))?;
        Ok(guard.clone())
    }
}
