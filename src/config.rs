use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::io::RecordFormat;
use crate::utils::uid::UidGenerator;

/// Optional TOML settings file.
///
/// ```toml
/// uid_root = "1.2.826.0.1.3680043.8.498"
/// format = "dicom"
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Organisation root for generated UIDs; UUID-derived `2.25` when unset.
    pub uid_root: Option<String>,
    pub format: RecordFormat,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `rtstructreg=debug`.
    pub level: Option<String>,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn uid_generator(&self) -> Result<UidGenerator, ConfigError> {
        match &self.uid_root {
            Some(root) => UidGenerator::new(root),
            None => Ok(UidGenerator::default()),
        }
    }
}
