// src/config/mod.rs
//! Configuration for the streaming core

pub mod constants;

use crate::config::constants::{stream, timing};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Tunable parameters of the streaming core.
///
/// Every field has a conservative default, so an empty file (or no file at
/// all) yields a working configuration. Values can be overridden from TOML
/// and from `DAQ_CORE_*` environment variables.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CoreSettings {
    /// Host-side buffer capacity, expressed in read batches
    #[serde(default = "defaults::buffer_batches")]
    pub buffer_batches: usize,

    /// Fraction of one batch period the transport worker sleeps between polls
    #[serde(default = "defaults::worker_poll_divisor")]
    pub worker_poll_divisor: u32,

    /// Ceiling on the scan count a single burst may collect
    #[serde(default = "defaults::max_burst_scans")]
    pub max_burst_scans: usize,
}

mod defaults {
    use super::{stream, timing};

    pub fn buffer_batches() -> usize {
        stream::DEFAULT_BUFFER_BATCHES
    }

    pub fn worker_poll_divisor() -> u32 {
        timing::DEFAULT_WORKER_POLL_DIVISOR
    }

    pub fn max_burst_scans() -> usize {
        stream::DEFAULT_MAX_BURST_SCANS
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            buffer_batches: defaults::buffer_batches(),
            worker_poll_divisor: defaults::worker_poll_divisor(),
            max_burst_scans: defaults::max_burst_scans(),
        }
    }
}

impl CoreSettings {
    /// Load settings from a TOML file, with `DAQ_CORE_*` environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let merged = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("DAQ_CORE"))
            .build()
            .map_err(|e| SettingsError::Parse {
                reason: e.to_string(),
            })?;

        let settings: CoreSettings =
            merged
                .try_deserialize()
                .map_err(|e| SettingsError::Parse {
                    reason: e.to_string(),
                })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would starve or wedge the data path
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.buffer_batches < 2 {
            return Err(SettingsError::Invalid {
                field: "buffer_batches",
                reason: "at least 2 batches are required for double buffering".to_string(),
            });
        }
        if self.worker_poll_divisor == 0 {
            return Err(SettingsError::Invalid {
                field: "worker_poll_divisor",
                reason: "divisor must be positive".to_string(),
            });
        }
        if self.max_burst_scans == 0 {
            return Err(SettingsError::Invalid {
                field: "max_burst_scans",
                reason: "burst ceiling must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file was unreadable or not valid TOML
    #[error("configuration parse error: {reason}")]
    Parse {
        /// Parser-reported cause
        reason: String,
    },

    /// A field value fails core invariants
    #[error("invalid setting '{field}': {reason}")]
    Invalid {
        /// Offending field name
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_valid() {
        let settings = CoreSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.buffer_batches, stream::DEFAULT_BUFFER_BATCHES);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "buffer_batches = 16\nmax_burst_scans = 5000").unwrap();

        let settings = CoreSettings::load_from_path(file.path()).unwrap();
        assert_eq!(settings.buffer_batches, 16);
        assert_eq!(settings.max_burst_scans, 5000);
        // Unspecified fields fall back to defaults
        assert_eq!(
            settings.worker_poll_divisor,
            timing::DEFAULT_WORKER_POLL_DIVISOR
        );
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let settings = CoreSettings {
            buffer_batches: 1,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "buffer_batches",
                ..
            })
        ));
    }
}
