//! Command-line arguments for the Flowscope server
//!
//! This module defines the CLI arguments structure using clap.

use clap::Parser;
use std::path::PathBuf;

use super::defaults::*;

/// Command-line arguments for the Flowscope server
#[derive(Parser, Debug, Clone)]
#[command(name = "flowscope")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turns Kafka records into live visualization events")]
pub struct ServerArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, env = "FLOWSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on for HTTP and WebSocket connections
    #[arg(long, env = "FLOWSCOPE_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLOWSCOPE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Base URL of the Checkpoint Service (disabled when unset)
    #[arg(long, env = "FLOWSCOPE_CHECKPOINT_URL")]
    pub checkpoint_url: Option<String>,

    /// Checkpoint Service request timeout in milliseconds
    #[arg(long, env = "FLOWSCOPE_CHECKPOINT_TIMEOUT_MS", default_value_t = DEFAULT_CHECKPOINT_TIMEOUT_MS)]
    pub checkpoint_timeout_ms: u64,

    /// Comma-separated brokers used when a session document names none
    #[arg(long, env = "FLOWSCOPE_DEFAULT_BROKERS")]
    pub default_brokers: Option<String>,

    /// Real time spent buffering before playback starts
    #[arg(long, env = "FLOWSCOPE_PRIMING_MS", default_value_t = DEFAULT_PRIMING_MS)]
    pub priming_ms: u64,

    /// Playback tick period in milliseconds
    #[arg(long, env = "FLOWSCOPE_TICK_MS", default_value_t = DEFAULT_TICK_MS)]
    pub tick_ms: u64,

    /// Maximum messages dispatched per tick
    #[arg(long, env = "FLOWSCOPE_MAX_PER_TICK", default_value_t = DEFAULT_MAX_PER_TICK)]
    pub max_per_tick: usize,

    /// Heartbeat timeout in milliseconds
    #[arg(long, env = "FLOWSCOPE_HEARTBEAT_TIMEOUT_MS", default_value_t = DEFAULT_HEARTBEAT_TIMEOUT_MS)]
    pub heartbeat_timeout_ms: u64,

    /// Capacity of per-partition channels
    #[arg(long, env = "FLOWSCOPE_CHANNEL_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ServerArgs::parse_from(["flowscope"]);
        assert_eq!(args.http_addr, DEFAULT_HTTP_ADDR);
        assert_eq!(args.tick_ms, DEFAULT_TICK_MS);
        assert!(args.checkpoint_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = ServerArgs::parse_from([
            "flowscope",
            "--http-addr",
            "0.0.0.0:8080",
            "--checkpoint-url",
            "http://bookie:9000",
            "--max-per-tick",
            "50",
        ]);
        assert_eq!(args.http_addr, "0.0.0.0:8080");
        assert_eq!(args.checkpoint_url.as_deref(), Some("http://bookie:9000"));
        assert_eq!(args.max_per_tick, 50);
    }
}
