//! Configuration for the Origraph registry and its models
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! document is a valid configuration.
use crate::constants::{DEFAULT_MAX_FILE_SIZE_MB, DEFAULT_MODEL_NAME, DEFAULT_STORAGE_KEY};
use crate::error::{OrigraphError, OrigraphResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrigraphConfig {
    /// Soft in-memory size guard for file ingestion, in megabytes
    pub max_file_size_mb: u64,
    /// Key under which the registry persists its models
    pub storage_key: String,
    /// Name given to models created without one
    pub default_model_name: String,
    /// Default bounds for sample graph extraction
    pub sample_graph: SampleGraphConfig,
}

/// Default limits for [`crate::model::SampleGraphOptions`]
///
/// `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleGraphConfig {
    pub branch_limit: Option<usize>,
    pub node_limit: Option<usize>,
    pub edge_limit: Option<usize>,
    pub triple_limit: Option<usize>,
}

impl Default for OrigraphConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            default_model_name: DEFAULT_MODEL_NAME.to_string(),
            sample_graph: SampleGraphConfig::default(),
        }
    }
}

impl OrigraphConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> OrigraphResult<Self> {
        let config: OrigraphConfig =
            toml::from_str(content).map_err(|e| OrigraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> OrigraphResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> OrigraphResult<String> {
        toml::to_string(self).map_err(|e| OrigraphError::Config(e.to_string()))
    }

    pub fn validate(&self) -> OrigraphResult<()> {
        if self.max_file_size_mb == 0 {
            return Err(OrigraphError::Config(
                "max_file_size_mb must be greater than zero".to_string(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(OrigraphError::Config(
                "storage_key must not be empty".to_string(),
            ));
        }
        for (name, limit) in [
            ("branch_limit", self.sample_graph.branch_limit),
            ("node_limit", self.sample_graph.node_limit),
            ("edge_limit", self.sample_graph.edge_limit),
            ("triple_limit", self.sample_graph.triple_limit),
        ] {
            if limit == Some(0) {
                return Err(OrigraphError::Config(format!(
                    "sample_graph.{} must be greater than zero when set",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = OrigraphConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrigraphConfig::default());
        assert_eq!(config.max_file_size_mb, 30);
    }

    #[test]
    fn test_partial_document() {
        let config = OrigraphConfig::from_toml_str(
            r#"
            max_file_size_mb = 5
            [sample_graph]
            node_limit = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.max_file_size_mb, 5);
        assert_eq!(config.sample_graph.node_limit, Some(100));
        assert_eq!(config.sample_graph.edge_limit, None);
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        assert!(OrigraphConfig::from_toml_str("max_file_size_mb = 0").is_err());
        assert!(OrigraphConfig::from_toml_str("storage_key = \"  \"").is_err());
        assert!(OrigraphConfig::from_toml_str("[sample_graph]\ntriple_limit = 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("origraph.toml");
        let mut config = OrigraphConfig::default();
        config.default_model_name = "Scratch".to_string();
        fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = OrigraphConfig::load(&path).unwrap();
        assert_eq!(loaded.default_model_name, "Scratch");
    }
}
