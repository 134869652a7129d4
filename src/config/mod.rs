//! Configuration module for Flowscope
//!
//! Server-wide settings come from (highest priority first) CLI flags and
//! environment variables, a TOML file, then built-in defaults. Per-session
//! settings arrive on the WebSocket and live in [`crate::session::document`].
//!
//! - `defaults` - Default constants and values
//! - `args` - CLI argument definitions
//! - `file` - TOML configuration file
//! - `merge` - File/CLI precedence

mod args;
mod defaults;
pub mod file;
mod merge;

pub use args::ServerArgs;
pub use defaults::*;
pub use file::ConfigFile;
pub use merge::merge_config_with_args;

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{FlowError, Result};

/// Tuning of the reorder buffer and playback clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Real time spent buffering before the first tick
    pub priming: Duration,
    /// Tick period and virtual clock increment
    pub tick: Duration,
    /// Maximum messages dispatched per tick
    pub max_per_tick: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            priming: Duration::from_millis(DEFAULT_PRIMING_MS),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            max_per_tick: DEFAULT_MAX_PER_TICK,
        }
    }
}

/// Checkpoint Service location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Complete server configuration for Flowscope.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP/WebSocket listen address
    pub http_addr: SocketAddr,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Checkpoint Service, if one is configured
    pub checkpoint: Option<CheckpointConfig>,
    /// Brokers used when a session document names none
    pub default_brokers: Option<String>,
    /// Playback tuning
    pub playback: PlaybackConfig,
    /// Heartbeat window
    pub heartbeat_timeout: Duration,
    /// Capacity of per-partition and fan-in channels
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 41234)),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            checkpoint: None,
            default_brokers: None,
            playback: PlaybackConfig::default(),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from parsed CLI arguments
    pub fn from_args(args: ServerArgs) -> Result<Self> {
        let http_addr: SocketAddr = args
            .http_addr
            .parse()
            .map_err(|e| FlowError::config("http_addr", format!("{}: {}", args.http_addr, e)))?;

        let checkpoint = args
            .checkpoint_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| CheckpointConfig {
                url: url.trim_end_matches('/').to_string(),
                timeout: Duration::from_millis(args.checkpoint_timeout_ms),
            });

        Ok(Self {
            http_addr,
            log_level: args.log_level,
            checkpoint,
            default_brokers: args.default_brokers.filter(|b| !b.trim().is_empty()),
            playback: PlaybackConfig {
                priming: Duration::from_millis(args.priming_ms),
                tick: Duration::from_millis(args.tick_ms),
                max_per_tick: args.max_per_tick,
            },
            heartbeat_timeout: Duration::from_millis(args.heartbeat_timeout_ms),
            channel_capacity: args.channel_capacity,
        })
    }

    /// Reject settings that would stall or spin the playback loop
    pub fn validate(&self) -> Result<()> {
        if self.playback.tick.is_zero() {
            return Err(FlowError::config("tick_ms", "must be greater than zero"));
        }
        if self.playback.max_per_tick == 0 {
            return Err(FlowError::config("max_per_tick", "must be greater than zero"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(FlowError::config(
                "heartbeat_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(FlowError::config(
                "channel_capacity",
                "must be greater than zero",
            ));
        }
        if let Some(ref checkpoint) = self.checkpoint {
            if checkpoint.timeout.is_zero() {
                return Err(FlowError::config(
                    "checkpoint_timeout_ms",
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}
