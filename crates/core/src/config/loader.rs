use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{validate_config, ConfigError, OpsConfig};

/// Load configuration from file with environment variable overrides.
///
/// Environment variables use a `FREIGHTOPS_` prefix with `__` as the
/// section separator, e.g. `FREIGHTOPS_DECISION__CONFIDENCE_THRESHOLD=0.99`.
pub fn load_config(path: &Path) -> Result<OpsConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: OpsConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("FREIGHTOPS_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a TOML string (useful for testing).
pub fn load_config_from_str(toml_str: &str) -> Result<OpsConfig, ConfigError> {
    let config: OpsConfig =
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}
