use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for a session. Every field has a default so a partial JSON file
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    /// New bytes pulled per search window (the window also carries
    /// `pattern length - 1` bytes over from the previous one)
    #[serde(default = "default_search_chunk_size")]
    pub search_chunk_size: usize,

    /// Longest accepted search pattern in bytes
    #[serde(default = "default_max_pattern_length")]
    pub max_pattern_length: usize,

    /// Largest viewport window in bytes
    #[serde(default = "default_max_viewport_capacity")]
    pub max_viewport_capacity: u64,

    /// Bytes written per chunk when saving a snapshot
    #[serde(default = "default_save_chunk_size")]
    pub save_chunk_size: usize,
}

fn default_search_chunk_size() -> usize {
    64 * 1024
}

fn default_max_pattern_length() -> usize {
    64 * 1024
}

fn default_max_viewport_capacity() -> u64 {
    1024 * 1024
}

fn default_save_chunk_size() -> usize {
    1024 * 1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            search_chunk_size: default_search_chunk_size(),
            max_pattern_length: default_max_pattern_length(),
            max_viewport_capacity: default_max_viewport_capacity(),
            save_chunk_size: default_save_chunk_size(),
        }
    }
}

impl SessionConfig {
    /// Load a JSON configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        tracing::debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Reject settings that would make the engine spin or refuse all work
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.search_chunk_size > 0, "search_chunk_size must be positive");
        anyhow::ensure!(self.max_pattern_length > 0, "max_pattern_length must be positive");
        anyhow::ensure!(
            self.max_viewport_capacity > 0,
            "max_viewport_capacity must be positive"
        );
        anyhow::ensure!(self.save_chunk_size > 0, "save_chunk_size must be positive");
        Ok(())
    }

    /// JSON Schema for the configuration file
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(SessionConfig)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"search_chunk_size": 128}"#).unwrap();
        assert_eq!(config.search_chunk_size, 128);
        assert_eq!(config.max_viewport_capacity, 1024 * 1024);
    }

    #[test]
    fn test_load_from_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"save_chunk_size": 0}}"#).unwrap();
        assert!(SessionConfig::load_from_file(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_pattern_length": 16}}"#).unwrap();
        let config = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.max_pattern_length, 16);
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = SessionConfig::json_schema();
        let properties = schema.get("properties").unwrap();
        assert!(properties.get("search_chunk_size").is_some());
        assert!(properties.get("max_viewport_capacity").is_some());
    }
}
