//! Federate configuration
//!
//! Mirrors the properties file a federate is launched with: the federation to
//! join, the object model describing it, and the federate's own identity.
//! Timing knobs bound every blocking wait in the federation client.

use crate::federation::object_model::ObjectModel;
use crate::federation::FederationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_link_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationConfig {
    pub federation_name: String,

    /// JSON object model; an inline model passed to the ambassador wins
    #[serde(default)]
    pub object_model_path: Option<PathBuf>,

    pub federate_name: String,

    pub federate_type: String,

    /// Longest single wait for callbacks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for handshake waits; `None` waits until cancelled
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,

    /// How long to keep polling for link partners before giving up
    #[serde(default = "default_link_timeout_ms")]
    pub link_timeout_ms: u64,
}

impl FederationConfig {
    pub fn new(
        federation_name: impl Into<String>,
        federate_name: impl Into<String>,
        federate_type: impl Into<String>,
    ) -> Self {
        Self {
            federation_name: federation_name.into(),
            object_model_path: None,
            federate_name: federate_name.into(),
            federate_type: federate_type.into(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_ms: None,
            link_timeout_ms: default_link_timeout_ms(),
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, FederationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FederationError::Config(format!("federate config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FederationError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| FederationError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), FederationError> {
        if self.federation_name.trim().is_empty() {
            return Err(FederationError::Config("federation_name is empty".to_string()));
        }
        if self.federate_name.trim().is_empty() {
            return Err(FederationError::Config("federate_name is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(FederationError::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Load the object model named by `object_model_path`
    pub fn load_object_model(&self) -> Result<ObjectModel, FederationError> {
        match &self.object_model_path {
            Some(path) => ObjectModel::load(path),
            None => Err(FederationError::Config(
                "no object model configured".to_string(),
            )),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }
}
