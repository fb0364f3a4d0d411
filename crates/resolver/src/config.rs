//! Resolver configuration via `partwire.toml`
//!
//! A resolution session reads its knobs from a small TOML file. Missing
//! fields fall back to defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ResolverError, Result};

/// Config file name conventionally placed next to a persisted composition.
pub const CONFIG_FILE_NAME: &str = "partwire.toml";

/// Default maximum nesting depth of generic type arguments.
pub const DEFAULT_MAX_GENERIC_DEPTH: usize = 8;

/// What to do with discovery errors carried by the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryErrorPolicy {
    /// Log each error and resolve the remaining parts
    #[default]
    Warn,
    /// Refuse to build a configuration
    Fatal,
}

/// Resolution session configuration loaded from `partwire.toml`.
///
/// # Example
///
/// ```toml
/// # Resolve part imports on the rayon thread pool
/// parallel = false
///
/// # Maximum nesting depth of generic arguments produced by specialization
/// max_generic_depth = 8
///
/// # "warn" (default) or "fatal"
/// discovery_errors = "warn"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Match imports in parallel. Results are identical to sequential runs.
    #[serde(default)]
    pub parallel: bool,
    /// Maximum nesting depth of generic type arguments.
    #[serde(default = "default_max_generic_depth")]
    pub max_generic_depth: usize,
    /// Policy for discovery errors carried by the catalog.
    #[serde(default)]
    pub discovery_errors: DiscoveryErrorPolicy,
}

fn default_max_generic_depth() -> usize {
    DEFAULT_MAX_GENERIC_DEPTH
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_generic_depth: DEFAULT_MAX_GENERIC_DEPTH,
            discovery_errors: DiscoveryErrorPolicy::Warn,
        }
    }
}

impl ResolverConfig {
    /// Enable or disable parallel matching
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the maximum generic nesting depth
    pub fn max_generic_depth(mut self, depth: usize) -> Self {
        self.max_generic_depth = depth;
        self
    }

    /// Set the discovery error policy
    pub fn discovery_errors(mut self, policy: DiscoveryErrorPolicy) -> Self {
        self.discovery_errors = policy;
        self
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# partwire resolver configuration
#
# Resolve part imports on the rayon thread pool (default: false).
# Results are identical to sequential resolution.
parallel = false

# Maximum nesting depth of generic arguments produced when specializing
# open-generic parts (default: 8). Deeper requests become composition errors.
max_generic_depth = 8

# Discovery errors carried by the catalog: "warn" (default) or "fatal"
#   "warn"  = log each error and resolve the remaining parts
#   "fatal" = refuse to build a configuration
discovery_errors = "warn"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ResolverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ResolverError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ResolverError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ResolverError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ResolverError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = ResolverConfig::default();
        assert!(!config.parallel);
        assert_eq!(config.max_generic_depth, DEFAULT_MAX_GENERIC_DEPTH);
        assert_eq!(config.discovery_errors, DiscoveryErrorPolicy::Warn);
    }

    #[test]
    fn default_toml_parses_correctly() {
        let config: ResolverConfig = toml::from_str(ResolverConfig::default_toml()).unwrap();
        assert_eq!(config, ResolverConfig::default());
    }

    #[test]
    fn parse_fatal_policy() {
        let config: ResolverConfig = toml::from_str("discovery_errors = \"fatal\"").unwrap();
        assert_eq!(config.discovery_errors, DiscoveryErrorPolicy::Fatal);
        assert_eq!(config.max_generic_depth, DEFAULT_MAX_GENERIC_DEPTH);
    }

    #[test]
    fn parse_invalid_policy_fails() {
        assert!(toml::from_str::<ResolverConfig>("discovery_errors = \"ignore\"").is_err());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        ResolverConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());

        let config = ResolverConfig::from_file(&path).unwrap();
        assert_eq!(config, ResolverConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "parallel = true\n").unwrap();

        ResolverConfig::write_default_if_missing(&path).unwrap();

        let config = ResolverConfig::from_file(&path).unwrap();
        assert!(config.parallel);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();

        let config = ResolverConfig::from_file(&path).unwrap();
        assert_eq!(config, ResolverConfig::default());
    }

    #[test]
    fn builder_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = ResolverConfig::default()
            .parallel(true)
            .max_generic_depth(3)
            .discovery_errors(DiscoveryErrorPolicy::Fatal);

        config.write_to_file(&path).unwrap();
        assert_eq!(ResolverConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = ResolverConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ResolverError::Io { .. }));
    }
}
