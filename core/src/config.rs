use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine tunables.
///
/// ```yaml
/// cache_capacity: 512
/// cache_enabled: true
/// proximity_lines: 10
/// default_limit: 200
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of memoized query results.
    pub cache_capacity: usize,
    pub cache_enabled: bool,
    /// Line distance under which a source is assumed to reach a sink.
    pub proximity_lines: u32,
    /// Applied when a query runs without its own limit.
    pub default_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            cache_enabled: true,
            proximity_lines: 10,
            default_limit: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.cache_enabled && self.cache_capacity == 0 {
            return Err(CoreError::Config(
                "cache_capacity must be positive when the cache is enabled".to_string(),
            ));
        }
        if self.default_limit == Some(0) {
            return Err(CoreError::Config(
                "default_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml_str("proximity_lines: 25\n").unwrap();
        assert_eq!(config.proximity_lines, 25);
        assert_eq!(config.cache_capacity, 1024);
        assert!(config.cache_enabled);
        assert_eq!(config.default_limit, None);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_yaml_str("cache_capacity: 0"),
            Err(CoreError::Config(_))
        ));
        assert!(EngineConfig::from_yaml_str("cache_enabled: false\ncache_capacity: 0").is_ok());
        assert!(matches!(
            EngineConfig::from_yaml_str("proximity_lines: lots"),
            Err(CoreError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "default_limit: 50\ncache_enabled: false\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.default_limit, Some(50));
        assert!(!config.cache_enabled);
    }
}
