//! Layered transmitter configuration
//!
//! Command-line flags override the JSON file, which overrides the built-in
//! defaults.

use crate::error::CliError;
use fmwave_core::{BackendKind, ReferenceClock, TransmitterConfig};
use serde::Deserialize;
use std::path::Path;

/// On-disk configuration; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub frequency_hz: Option<u32>,
    pub deviation_hz: Option<u32>,
    pub reference_hz: Option<u32>,
    pub low_revision: Option<bool>,
    pub sample_rate: Option<u32>,
    pub backend: Option<String>,
    pub volume_percent: Option<u8>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill unset fields from `other`
    pub fn or(self, other: ConfigFile) -> ConfigFile {
        ConfigFile {
            frequency_hz: self.frequency_hz.or(other.frequency_hz),
            deviation_hz: self.deviation_hz.or(other.deviation_hz),
            reference_hz: self.reference_hz.or(other.reference_hz),
            low_revision: self.low_revision.or(other.low_revision),
            sample_rate: self.sample_rate.or(other.sample_rate),
            backend: self.backend.or(other.backend),
            volume_percent: self.volume_percent.or(other.volume_percent),
        }
    }

    /// Resolve against the defaults and validate
    pub fn resolve(&self) -> Result<TransmitterConfig, CliError> {
        let defaults = TransmitterConfig::default();

        let backend = match &self.backend {
            Some(name) => name.parse::<BackendKind>()?,
            None => defaults.backend,
        };
        let reference_hz = self.reference_hz.unwrap_or(defaults.reference.frequency_hz);
        let low_revision = self.low_revision.unwrap_or(defaults.reference.low_revision);
        let reference = ReferenceClock::new(reference_hz).with_low_revision(low_revision);

        let config = TransmitterConfig {
            carrier_hz: self.frequency_hz.unwrap_or(defaults.carrier_hz),
            max_deviation_hz: self.deviation_hz.unwrap_or(defaults.max_deviation_hz),
            reference,
            sample_rate: self.sample_rate.unwrap_or(defaults.sample_rate),
            backend,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn volume_percent(&self) -> u8 {
        self.volume_percent.unwrap_or(100).min(100)
    }
}
