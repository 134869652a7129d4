//! Domain-specific error types for Flowscope

use thiserror::Error;

/// Structured configuration error domain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{setting}: {reason}")]
    InvalidSetting { setting: String, reason: String },
    #[error("missing {0}")]
    Missing(String),
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    pub fn invalid_setting(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(what: impl Into<String>) -> Self {
        Self::Missing(what.into())
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for ConfigError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

/// Structured template/rule error domain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated action in template {template:?}")]
    Unterminated { template: String },
    #[error("unsupported action {action:?} in template {template:?}")]
    UnsupportedAction { template: String, action: String },
    #[error("malformed index expression {action:?}: {reason}")]
    MalformedIndex { action: String, reason: String },
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl TemplateError {
    pub fn unterminated(template: impl Into<String>) -> Self {
        Self::Unterminated {
            template: template.into(),
        }
    }

    pub fn unsupported_action(template: impl Into<String>, action: impl Into<String>) -> Self {
        Self::UnsupportedAction {
            template: template.into(),
            action: action.into(),
        }
    }

    pub fn malformed_index(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIndex {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid_setting("tick_ms", "must be positive");
        assert_eq!(err.to_string(), "tick_ms: must be positive");
        assert_eq!(ConfigError::missing("topic").to_string(), "missing topic");
    }

    #[test]
    fn test_template_error_display() {
        let err = TemplateError::unterminated("{{.Topic");
        assert!(err.to_string().contains("unterminated"));
    }
}
