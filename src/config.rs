//! Library settings read from a TOML file

use crate::core::{streaming::DEFAULT_CHUNK_SIZE, CacheConfig};
use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub chunk_size: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Top-level settings. Every section is optional in the file.
///
/// ```toml
/// [cache]
/// enabled = true
/// location = ".llamadatasets_cache"
/// expiration = 3600
///
/// [streaming]
/// chunk_size = 500
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheConfig,
    pub streaming: StreamingSettings,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(s).context("Invalid settings")?;
        if settings.streaming.chunk_size == 0 {
            anyhow::bail!("streaming.chunk_size must be positive");
        }
        Ok(settings)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        debug!("Loaded settings from {}: {settings:?}", path.display());
        Ok(settings)
    }

    /// Reads `path` when given, otherwise falls back to defaults.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_toml_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rstest::*;
    use std::{io::Write, path::PathBuf, time::Duration};
    use tempfile::NamedTempFile;

    #[rstest]
    fn test_defaults_when_sections_missing() -> Result<()> {
        let settings = Settings::from_toml_str("")?;
        assert_eq!(settings, Settings::default());
        assert!(!settings.cache.enabled);
        assert_eq!(settings.streaming.chunk_size, DEFAULT_CHUNK_SIZE);
        Ok(())
    }

    #[rstest]
    fn test_load_from_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "[cache]\nenabled = true\nlocation = \"/tmp/ld\"\nexpiration = 60\n\n[streaming]\nchunk_size = 250"
        )?;
        let settings = Settings::load(Some(file.path()))?;
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.location, PathBuf::from("/tmp/ld"));
        assert_eq!(settings.cache.expiration, Some(Duration::from_secs(60)));
        assert_eq!(settings.streaming.chunk_size, 250);
        Ok(())
    }

    #[rstest]
    #[case("[streaming]\nchunk_size = 0")]
    #[case("[cache]\nenabled = \"yes\"")]
    fn test_invalid_settings(#[case] contents: &str) {
        assert!(Settings::from_toml_str(contents).is_err());
    }

    #[rstest]
    fn test_missing_file_errors() {
        assert!(Settings::load(Some("/nonexistent/settings.toml")).is_err());
        assert!(Settings::load(None::<&str>).is_ok());
    }
}
