//! Preset resolution and required-evidence policy

use crate::errors::{GatekeeperError, Result};
use crate::evidence::EvidenceStore;
use crate::schemas::{Config, Preset};

/// The preset named by the caller, or the configured default
pub fn resolve_preset<'a>(config: &'a Config, requested: Option<&'a str>) -> Result<(&'a str, Preset)> {
    let name = requested.unwrap_or(config.validation.default_preset.as_str());
    match config.preset(name) {
        Some(preset) => Ok((name, preset.clone())),
        // The default preset may be left undeclared; it then requires nothing.
        None if requested.is_none() => Ok((name, Preset::default())),
        None => Err(GatekeeperError::ConfigError(format!("Unknown preset '{}'", name))),
    }
}

/// Required evidence files absent from the round directory
pub fn missing_required_evidence(store: &EvidenceStore, preset: &Preset, round: u32) -> Result<Vec<String>> {
    if preset.required_evidence.is_empty() {
        return Ok(Vec::new());
    }
    let missing = store.missing_evidence(&preset.required_evidence, round)?;
    if !missing.is_empty() {
        tracing::warn!(task = %store.task_id(), round, missing = ?missing, "required evidence missing");
    }
    Ok(missing)
}
