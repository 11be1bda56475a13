//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{Environment, GateConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable that overrides `environment` from the file.
pub const ENVIRONMENT_VAR: &str = "FEEDVOTE_ENV";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GateConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GateConfig, ConfigError> {
    let mut config: GateConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, std::env::var(ENVIRONMENT_VAR).ok().as_deref());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the `FEEDVOTE_ENV` override. Unknown values are ignored.
pub fn apply_env_overrides(config: &mut GateConfig, environment: Option<&str>) {
    let Some(raw) = environment else {
        return;
    };
    match Environment::from_name(raw) {
        Some(env) => config.environment = env,
        None => tracing::warn!(
            value = %raw,
            "Ignoring unrecognised {}; keeping {:?}",
            ENVIRONMENT_VAR,
            config.environment
        ),
    }
}
