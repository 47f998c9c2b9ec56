//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse configuration from TOML text without validating it.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

/// Load configuration from a TOML file, or defaults when no path is given.
///
/// Validation is left to the caller so command-line overrides can be
/// applied first.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            parse_config(&content)
        }
        None => Ok(GatewayConfig::default()),
    }
}

/// Run semantic validation, wrapping failures as a [`ConfigError`].
pub fn validated(config: GatewayConfig) -> Result<GatewayConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
