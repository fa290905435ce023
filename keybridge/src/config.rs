use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories_next::BaseDirs;
use serde::Deserialize;
use serde_yml::Value;
use yaml_merge_keys::merge_keys_serde_yml;

use crate::error::{BridgeError, BridgeResult};
use crate::framework::prelude::*;

pub const CONFIG_FILE: &str = "config.yaml";

/// Everything is optional; missing keys take the defaults below. Anchors and
/// `<<` merge keys are resolved before decoding.
///
/// ```yaml
/// midi:
///   client_name: keybridge
/// websocket:
///   read_poll_ms: 10
/// pubsub:
///   default_subject: keykit.>
///   listen_port: 2346
///   bind_host: 0.0.0.0
/// log_filter: keybridge=debug
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub midi: MidiConfig,
    pub websocket: WebSocketConfig,
    pub pubsub: PubSubConfig,
    pub log_filter: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MidiConfig {
    pub client_name: String,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: "keybridge".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    pub read_poll_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self { read_poll_ms: 10 }
    }
}

impl WebSocketConfig {
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PubSubConfig {
    pub default_subject: String,
    pub listen_port: u16,
    pub bind_host: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            default_subject: "keykit.>".to_string(),
            listen_port: 2346,
            bind_host: "0.0.0.0".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_yaml(source: &str) -> BridgeResult<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: Value = serde_yml::from_str(source).map_err(|err| {
            BridgeError::Config(format!("failed to parse YAML: {}", err))
        })?;

        let merged = merge_keys_serde_yml(raw).map_err(|err| {
            BridgeError::Config(format!(
                "failed to process YAML merge keys: {}",
                err
            ))
        })?;

        serde_yml::from_value(merged).map_err(|err| {
            BridgeError::Config(format!("failed to decode config: {}", err))
        })
    }

    pub fn load(path: &Path) -> BridgeResult<Self> {
        let source = fs::read_to_string(path).map_err(|err| {
            BridgeError::Config(format!(
                "failed to read '{}': {}",
                path.display(),
                err
            ))
        })?;

        Self::from_yaml(&source).map_err(|err| match err {
            BridgeError::Config(message) => {
                BridgeError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new()
            .map(|base| base.config_dir().join("Keybridge").join(CONFIG_FILE))
    }

    /// Reads [`default_path`](Self::default_path) when it exists. A missing
    /// file is not an error; a malformed one is.
    pub fn load_or_default() -> BridgeResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => {
                debug!("No config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .unwrap_or(crate::framework::logging::DEFAULT_FILTER)
    }
}
