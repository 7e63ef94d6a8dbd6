//! Engine lookup with allow-list enforcement

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{GatekeeperError, Result};
use crate::schemas::{Config, EngineAllowList, EngineKind};

use super::cli::CliEngine;
use super::delegated::DelegatedEngine;
use super::ValidatorEngine;

#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn ValidatorEngine>>,
    allowed: EngineAllowList,
}

impl EngineRegistry {
    pub fn new(allowed: EngineAllowList) -> Self {
        EngineRegistry {
            engines: BTreeMap::new(),
            allowed,
        }
    }

    /// One engine per configured entry, honoring the configured allow-list
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new(config.validation.allowed_engines.clone());
        for (id, engine) in &config.engines {
            let built: Arc<dyn ValidatorEngine> = match engine.kind {
                EngineKind::Cli => Arc::new(CliEngine::new(id.clone(), engine.clone())),
                EngineKind::Delegated => Arc::new(DelegatedEngine::new(id.clone())),
            };
            registry.register(id.clone(), built);
        }
        registry
    }

    /// Add or replace an engine
    pub fn register(&mut self, id: impl Into<String>, engine: Arc<dyn ValidatorEngine>) -> &mut Self {
        self.engines.insert(id.into(), engine);
        self
    }

    pub fn allowed(&self) -> &EngineAllowList {
        &self.allowed
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    /// The engine for `engine_id`. The allow-list is checked before lookup.
    pub fn resolve(&self, engine_id: &str) -> Result<Arc<dyn ValidatorEngine>> {
        if !self.allowed.permits(engine_id) {
            return Err(GatekeeperError::EngineNotAllowed(engine_id.to_string()));
        }
        self.engines
            .get(engine_id)
            .cloned()
            .ok_or_else(|| GatekeeperError::EngineError(format!("Unknown engine '{}'", engine_id)))
    }
}
