//! Error types for Flowscope
//!
//! Every failure a session can hit is classified into one of a handful of
//! kinds. Setup-time kinds (`Config`, `Connection`, `OffsetResolution`) end the
//! session; `Template` errors are recovered per message; `Transport` errors end
//! the session as soon as the client cannot be reached.

use std::fmt;
use thiserror::Error;

mod domain;

pub use domain::{ConfigError, TemplateError};

/// Result type alias for Flowscope operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for Flowscope
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Offset resolution error: {0}")]
    OffsetResolution(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Checkpoint service error: {0}")]
    Checkpoint(String),

    #[error("Setup failed: {0}")]
    Setup(SetupErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Create a configuration error for a specific setting
    pub fn config(setting: &str, reason: impl Into<String>) -> Self {
        FlowError::Config(ConfigError::invalid_setting(setting, reason))
    }

    /// Create a connection error with broker context
    pub fn connection(brokers: &str, detail: impl fmt::Display) -> Self {
        FlowError::Connection(format!("{}: {}", brokers, detail))
    }

    /// Create an offset resolution error for a topic/partition
    pub fn offset_resolution(topic: &str, partition: i32, detail: impl fmt::Display) -> Self {
        FlowError::OffsetResolution(format!("{}/{}: {}", topic, partition, detail))
    }

    /// Create a transport error
    pub fn transport(detail: impl fmt::Display) -> Self {
        FlowError::Transport(detail.to_string())
    }

    /// Stable taxonomy name, used to prefix client-visible diagnostics
    pub fn classifier(&self) -> &'static str {
        match self {
            FlowError::Config(_) | FlowError::Serialization(_) => "ConfigError",
            FlowError::Connection(_) => "ConnectionError",
            FlowError::OffsetResolution(_) => "OffsetResolutionError",
            FlowError::Template(_) => "TemplateError",
            FlowError::Transport(_) | FlowError::Io(_) => "TransportError",
            FlowError::Checkpoint(_) => "CheckpointError",
            FlowError::Setup(_) => "SetupError",
            FlowError::Internal(_) => "InternalError",
        }
    }

    /// Whether this error ends the session it occurred in
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlowError::Template(_) | FlowError::Checkpoint(_))
    }
}

/// Errors accumulated while setting up a session's clusters.
///
/// Consumer registration runs concurrently, so every failure is collected
/// before the session decides whether it can proceed.
#[derive(Debug, Default)]
pub struct SetupErrors(Vec<FlowError>);

impl SetupErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: FlowError) {
        self.0.push(err);
    }

    pub fn extend(&mut self, other: SetupErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowError> {
        self.0.iter()
    }

    /// Convert into a result: `Ok(())` when nothing was recorded
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Setup(self))
        }
    }
}

impl fmt::Display for SetupErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_matches_taxonomy() {
        assert_eq!(
            FlowError::config("offset", "bad").classifier(),
            "ConfigError"
        );
        assert_eq!(
            FlowError::connection("localhost:9092", "refused").classifier(),
            "ConnectionError"
        );
        assert_eq!(
            FlowError::offset_resolution("t", 0, "nope").classifier(),
            "OffsetResolutionError"
        );
        assert_eq!(
            FlowError::from(TemplateError::unterminated("{{")).classifier(),
            "TemplateError"
        );
        assert_eq!(FlowError::transport("closed").classifier(), "TransportError");
    }

    #[test]
    fn test_fatality() {
        assert!(!FlowError::from(TemplateError::unterminated("{{")).is_fatal());
        assert!(!FlowError::Checkpoint("down".into()).is_fatal());
        assert!(FlowError::transport("closed").is_fatal());
        assert!(FlowError::connection("b", "x").is_fatal());
    }

    #[test]
    fn test_setup_errors_aggregate() {
        let mut errors = SetupErrors::new();
        assert!(errors.is_empty());
        errors.push(FlowError::connection("a:9092", "refused"));
        errors.push(FlowError::offset_resolution("t", 1, "no offset"));
        assert_eq!(errors.len(), 2);

        let err = errors.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("a:9092: refused"));
        assert!(text.contains("t/1: no offset"));
    }
}
