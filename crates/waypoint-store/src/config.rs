//! Store configuration

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Checkpoint store configuration
///
/// Every key is optional when loaded from TOML; missing keys take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Checkpoints kept per execution by automatic retention
    pub retention_count: usize,
    /// Compress every checkpoint as soon as it is created
    pub compression_enabled: bool,
    /// gzip level, 0 (store) to 9 (best)
    pub compression_level: u32,
    /// Enforce `retention_count` after every create
    pub auto_cleanup: bool,
    /// Default age limit for expiry sweeps
    pub max_age_days: u32,
}

impl StoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With retention count
    #[inline]
    #[must_use]
    pub fn with_retention(mut self, count: usize) -> Self {
        self.retention_count = count;
        self
    }

    /// With compression on or off
    #[inline]
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }

    /// With gzip level
    #[inline]
    #[must_use]
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// With automatic retention on or off
    #[inline]
    #[must_use]
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    /// With default expiry age
    #[inline]
    #[must_use]
    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = days;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`StoreError::Config`] for a zero retention count or a gzip
    /// level above 9.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.retention_count == 0 {
            return Err(StoreError::Config(
                "retention_count must be at least 1".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(StoreError::Config(format!(
                "compression_level must be 0..=9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Fails on malformed TOML or out-of-range values.
    pub fn from_toml_str(s: &str) -> Result<Self, StoreError> {
        let config: Self =
            toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Fails if the file cannot be read or does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_count: 5,
            compression_enabled: true,
            compression_level: 6,
            auto_cleanup: true,
            max_age_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = StoreConfig::new();
        assert_eq!(config.retention_count, 5);
        assert!(config.compression_enabled);
        assert_eq!(config.compression_level, 6);
        assert!(config.auto_cleanup);
        assert_eq!(config.max_age_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = StoreConfig::from_toml_str("retention_count = 3\ncompression_enabled = false\n")
            .unwrap();
        assert_eq!(config.retention_count, 3);
        assert!(!config.compression_enabled);
        assert_eq!(config.compression_level, 6);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            StoreConfig::from_toml_str("retention_count = 0"),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("compression_level = 12"),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_age_days = 30").unwrap();
        let config = StoreConfig::load(file.path()).unwrap();
        assert_eq!(config.max_age_days, 30);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = StoreConfig::load("/nonexistent/waypoint.toml").unwrap_err();
        assert!(err.to_string().contains("configuration error"));
    }
}
