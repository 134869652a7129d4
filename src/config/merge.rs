//! Configuration merging utilities
//!
//! Config file values are applied only where the CLI is still at its default,
//! so explicit flags and environment variables always win.

use super::args::ServerArgs;
use super::defaults::*;
use super::file::ConfigFile;

/// Merge configuration file values with CLI arguments.
pub fn merge_config_with_args(mut args: ServerArgs, config: &ConfigFile) -> ServerArgs {
    macro_rules! apply_if_default {
        ($field:ident, $config_val:expr, $default:expr) => {
            if let Some(val) = $config_val {
                if args.$field == $default {
                    args.$field = val;
                }
            }
        };
    }

    macro_rules! apply_if_default_string {
        ($field:ident, $config_val:expr, $default:expr) => {
            if let Some(ref val) = $config_val {
                if args.$field == $default {
                    args.$field = val.clone();
                }
            }
        };
    }

    macro_rules! apply_option {
        ($field:ident, $config_val:expr) => {
            if args.$field.is_none() {
                if let Some(ref val) = $config_val {
                    args.$field = Some(val.clone());
                }
            }
        };
    }

    apply_if_default_string!(http_addr, config.server.http_addr, DEFAULT_HTTP_ADDR);
    apply_if_default_string!(log_level, config.server.log_level, DEFAULT_LOG_LEVEL);
    apply_option!(default_brokers, config.server.default_brokers);
    apply_if_default!(
        channel_capacity,
        config.server.channel_capacity,
        DEFAULT_CHANNEL_CAPACITY
    );

    apply_option!(checkpoint_url, config.checkpoint.url);
    apply_if_default!(
        checkpoint_timeout_ms,
        config.checkpoint.timeout_ms,
        DEFAULT_CHECKPOINT_TIMEOUT_MS
    );

    apply_if_default!(priming_ms, config.playback.priming_ms, DEFAULT_PRIMING_MS);
    apply_if_default!(tick_ms, config.playback.tick_ms, DEFAULT_TICK_MS);
    apply_if_default!(
        max_per_tick,
        config.playback.max_per_tick,
        DEFAULT_MAX_PER_TICK
    );

    apply_if_default!(
        heartbeat_timeout_ms,
        config.heartbeat.timeout_ms,
        DEFAULT_HEARTBEAT_TIMEOUT_MS
    );

    args
}
