//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use std::path::Path;

const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::load_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with an uppercase letter or underscore and
/// contain only uppercase letters, digits, and underscores.
pub fn expand_env_vars(s: &str) -> Result<String, ConfigError> {
    let re = regex_lite::Regex::new(ENV_VAR_PATTERN)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        match (std::env::var(var_name.as_str()), cap.get(2)) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default.as_str()),
            // No env var and no default. Keep the original placeholder.
            (Err(_), None) => result.push_str(full_match.as_str()),
        }

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    Ok(result)
}
