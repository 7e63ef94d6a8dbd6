//! Configuration loading with layered overrides

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{GatekeeperError, Result};
use crate::fs::get_config_path;
use crate::schemas::Config;

use super::merge::merge_layers;

/// Bundled defaults, the lowest-precedence layer
pub const BUNDLED_DEFAULTS: &str = include_str!("defaults.yaml");

/// Environment variable naming the company-wide config file
pub const COMPANY_CONFIG_ENV: &str = "GATEKEEPER_COMPANY_CONFIG";

/// Config file locations, lowest precedence first after the bundled layer
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub company: Option<PathBuf>,
    pub user: Option<PathBuf>,
    pub project: Option<PathBuf>,
    /// Skip the bundled defaults (tests and fully custom setups)
    pub skip_bundled: bool,
}

impl ConfigLayers {
    /// Standard locations for a project root
    pub fn discover(root: &Path) -> Self {
        let company = std::env::var_os(COMPANY_CONFIG_ENV).map(PathBuf::from);
        let user = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
            .map(|dir| dir.join("gatekeeper").join("config.yaml"));

        ConfigLayers {
            company,
            user,
            project: Some(get_config_path(root)),
            skip_bundled: false,
        }
    }

    /// Only the given project file on top of the bundled defaults
    pub fn project_only(path: impl Into<PathBuf>) -> Self {
        ConfigLayers {
            project: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Parse one layer. JSON is valid YAML, so one parser handles both.
pub fn parse_layer(content: &str, origin: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_yaml::from_str(content)
        .map_err(|e| GatekeeperError::ConfigError(format!("{}: {}", origin, e)))?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Default::default())),
        _ => Err(GatekeeperError::ConfigError(format!(
            "{}: top level must be a mapping",
            origin
        ))),
    }
}

fn read_layer(path: &Path) -> Result<Option<Value>> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_layer(&content, &path.display().to_string()).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GatekeeperError::Io(e)),
    }
}

/// Build a typed config from already-parsed layers.
pub fn config_from_layers(layers: &[Value]) -> Result<Config> {
    let merged = merge_layers(layers.iter());
    let config: Config = serde_json::from_value(merged)
        .map_err(|e| GatekeeperError::ConfigError(format!("invalid configuration: {}", e)))?;

    let errors = config.consistency_errors();
    if !errors.is_empty() {
        return Err(GatekeeperError::ConfigError(errors.join("; ")));
    }
    Ok(config)
}

/// Load configuration, folding every existing layer over the defaults.
pub fn load_config(layers: &ConfigLayers) -> Result<Config> {
    let mut docs = Vec::new();
    if !layers.skip_bundled {
        docs.push(parse_layer(BUNDLED_DEFAULTS, "bundled defaults")?);
    }
    for path in [&layers.company, &layers.user, &layers.project]
        .into_iter()
        .flatten()
    {
        if let Some(doc) = read_layer(path)? {
            tracing::debug!(path = %path.display(), "loaded config layer");
            docs.push(doc);
        }
    }
    config_from_layers(&docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{EngineAllowList, Wave};
    use std::fs as std_fs;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_defaults_are_consistent() {
        let config = load_config(&ConfigLayers::default()).unwrap();
        assert_eq!(config.validation.max_rounds, 3);
        assert!(config.state_machine.get("task").is_some());
        assert!(config.state_machine.get("qa").is_some());
        assert!(config.state_machine.get("session").is_some());
        assert_eq!(config.validator("global-codex").unwrap().wave, Wave::Global);
        assert_eq!(config.engines["claude"].response_parser, "claude");
    }

    #[test]
    fn test_project_layer_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std_fs::write(
            &path,
            r#"
validation:
  max_rounds: 5
  allowed_engines: [codex]
validators:
  - "$remove"
  - performance
"#,
        )
        .unwrap();

        let config = load_config(&ConfigLayers::project_only(&path)).unwrap();
        assert_eq!(config.validation.max_rounds, 5);
        assert_eq!(config.validation.max_concurrent, 4);
        assert!(config.validator("performance").is_none());
        assert!(config.validator("security").is_some());
        assert!(matches!(config.validation.allowed_engines, EngineAllowList::Only(_)));
    }

    #[test]
    fn test_missing_layers_are_skipped() {
        let temp = TempDir::new().unwrap();
        let layers = ConfigLayers {
            company: Some(temp.path().join("nope.yaml")),
            user: None,
            project: Some(temp.path().join("also-nope.yaml")),
            skip_bundled: false,
        };
        assert!(load_config(&layers).is_ok());
    }

    #[test]
    fn test_inconsistent_config_is_rejected() {
        let doc = parse_layer(
            r#"{"validators": [{"id": "x", "engine": "missing", "wave": "global"}]}"#,
            "inline",
        )
        .unwrap();
        let err = config_from_layers(&[doc]).unwrap_err();
        assert!(err.to_string().contains("unknown engine 'missing'"));
    }

    #[test]
    fn test_non_mapping_layer_is_rejected() {
        assert!(parse_layer("- a\n- b\n", "inline").is_err());
        assert!(parse_layer("", "inline").unwrap().is_object());
    }
}
