//! JSON configuration for reclaim and pressure handling.

use crate::util::PSI_MEMORY_PATH;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading an ashmem configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

/// Runtime configuration for reclaim and pressure handling.
///
/// Loaded from JSON files; missing fields take their [`Default`] values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AshmemConfig {
    /// Pressure stall information file polled by the pressure monitor
    pub psi_path: String,
    /// `some avg10` percentage at or above which memory counts as under pressure
    pub psi_threshold: f64,
    /// Interval between pressure checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Whether narrowing the protection mask to readable keeps it executable
    pub read_implies_exec: bool,
}

impl Default for AshmemConfig {
    fn default() -> Self {
        Self {
            psi_path: PSI_MEMORY_PATH.to_owned(),
            psi_threshold: 10.0,
            poll_interval_ms: 1000,
            read_implies_exec: false,
        }
    }
}

impl AshmemConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_jsonfile(filepath: impl AsRef<Path>) -> Result<AshmemConfig, ConfigError> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: AshmemConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// The pressure poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
