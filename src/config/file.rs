//! Configuration file support for Flowscope
//!
//! ## Example Configuration
//!
//! ```toml
//! # flowscope.toml
//!
//! [server]
//! http_addr = "0.0.0.0:41234"
//! log_level = "info"
//! default_brokers = "kafka-1:9092,kafka-2:9092"
//!
//! [checkpoint]
//! url = "http://bookie.internal:9000"
//! timeout_ms = 5000
//!
//! [playback]
//! priming_ms = 5000
//! tick_ms = 100
//! max_per_tick = 1000
//!
//! [heartbeat]
//! timeout_ms = 10000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, FlowError, Result};

/// Root configuration structure for TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub checkpoint: CheckpointSection,
    pub playback: PlaybackSection,
    pub heartbeat: HeartbeatSection,
}

/// Server section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub http_addr: Option<String>,
    pub log_level: Option<String>,
    pub default_brokers: Option<String>,
    pub channel_capacity: Option<usize>,
}

/// Checkpoint Service section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Playback section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    pub priming_ms: Option<u64>,
    pub tick_ms: Option<u64>,
    pub max_per_tick: Option<usize>,
}

/// Heartbeat section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub timeout_ms: Option<u64>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(ConfigError::Message(format!(
                "Failed to read config file {:?}: {}",
                path, e
            )))
        })?;

        toml::from_str(&contents).map_err(|e| {
            FlowError::Config(ConfigError::Message(format!(
                "Failed to parse config file {:?}: {}",
                path, e
            )))
        })
    }

    /// Try to load `flowscope.toml` from the working directory
    pub fn load_default() -> Option<Self> {
        let path = PathBuf::from("flowscope.toml");
        if !path.exists() {
            return None;
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to load config from {:?}: {}", path, e);
                None
            }
        }
    }
}
