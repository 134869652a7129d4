//! Default constants for Flowscope configuration
//!
//! These constants define the default values used throughout the configuration
//! system when no explicit value is provided.

/// Default listen address for the HTTP/WebSocket server
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:41234";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default timeout for Checkpoint Service requests in milliseconds
pub const DEFAULT_CHECKPOINT_TIMEOUT_MS: u64 = 5_000;

/// Real time spent buffering before playback starts
pub const DEFAULT_PRIMING_MS: u64 = 5_000;

/// Playback tick period; the virtual clock advances by this much per tick
pub const DEFAULT_TICK_MS: u64 = 100;

/// Maximum messages dispatched per tick
pub const DEFAULT_MAX_PER_TICK: usize = 1_000;

/// Heartbeat window; a session without a matching ping for this long ends
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Capacity of each per-partition and fan-in channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Offset descriptor used when neither the consumer nor the document sets one
pub const DEFAULT_OFFSET: &str = "newest";
