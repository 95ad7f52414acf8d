//! Library configuration.
//!
//! A small TOML file supplies the annotation-store base URL:
//!
//! ```toml
//! [annotations]
//! api_url = "https://annotations.example.org"
//! ```
//!
//! Lookup order: an explicit path, the `FLOWTRACE_CONFIG` environment
//! variable, then `flowtrace.toml` in the working directory. A missing
//! file yields the default configuration (no remote store).

use std::fmt;
use std::path::Path;

use toml_edit::DocumentMut;

/// Parsed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the remote annotation store.
    pub api_url: Option<String>,
}

/// Configuration failure: unreadable or unparsable file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "config: {error}"),
            Self::Parse(message) => write!(f, "config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

const DEFAULT_FILE: &str = "flowtrace.toml";
const ENV_VAR: &str = "FLOWTRACE_CONFIG";

impl Config {
    /// Loads configuration, following the lookup order.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    /// Parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parses configuration text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let document: DocumentMut = text
            .parse()
            .map_err(|error| ConfigError::Parse(format!("{error}")))?;
        let api_url = document
            .get("annotations")
            .and_then(|item| item.as_table_like())
            .and_then(|table| table.get("api_url"))
            .and_then(|item| item.as_str())
            .map(str::to_owned);
        Ok(Self { api_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_annotation_url() {
        let config = Config::from_toml("[annotations]\napi_url = \"http://localhost:5000\"\n")
            .unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:5000"));
    }

    #[test]
    fn missing_sections_default_to_none() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(Config::from_toml("annotations = [").is_err());
    }
}
