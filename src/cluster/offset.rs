//! Start offset policy

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::{ConfigError, FlowError, Result};

/// Broker sentinel for "earliest available"
pub const OFFSET_BEGINNING: i64 = -2;
/// Broker sentinel for "next message produced"
pub const OFFSET_END: i64 = -1;

/// Requested start position, parsed once from the session document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetDescriptor {
    Oldest,
    #[default]
    Newest,
    /// A literal offset; `-2` and `-1` are the broker sentinels
    Absolute(i64),
    /// A distance back from the newest offset, always below `-2`
    RelativeFromNewest(i64),
}

impl OffsetDescriptor {
    /// Parse `"oldest"`, `"newest"` or an integer
    pub fn parse(text: &str) -> std::result::Result<Self, ConfigError> {
        match text.trim() {
            "oldest" => Ok(Self::Oldest),
            "newest" => Ok(Self::Newest),
            other => {
                let n: i64 = other.parse().map_err(|_| {
                    ConfigError::invalid_setting(
                        "offset",
                        format!("{:?} is not \"oldest\", \"newest\" or an integer", text),
                    )
                })?;
                if n >= OFFSET_BEGINNING {
                    Ok(Self::Absolute(n))
                } else {
                    Ok(Self::RelativeFromNewest(n))
                }
            }
        }
    }
}

impl FromStr for OffsetDescriptor {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OffsetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oldest => write!(f, "oldest"),
            Self::Newest => write!(f, "newest"),
            Self::Absolute(n) | Self::RelativeFromNewest(n) => write!(f, "{}", n),
        }
    }
}

/// Accepts `"oldest"`, `"newest"`, a numeric string, or a JSON integer
impl<'de> Deserialize<'de> for OffsetDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Number(n) => n.to_string(),
        };
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Offsets currently available on a partition.
///
/// `newest` is the high watermark, the offset the next record will get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBounds {
    pub earliest: i64,
    pub newest: i64,
}

/// Pick the offset a partition consumer starts from.
///
/// A checkpoint wins over the descriptor, clamped up to the earliest offset
/// still held by the broker.
pub fn resolve_start_offset(
    topic: &str,
    partition: i32,
    checkpoint: Option<i64>,
    descriptor: OffsetDescriptor,
    bounds: OffsetBounds,
) -> Result<i64> {
    if let Some(offset) = checkpoint {
        if offset >= bounds.earliest {
            return Ok(offset);
        }
        warn!(
            topic,
            partition,
            checkpoint = offset,
            earliest = bounds.earliest,
            "checkpoint offset is older than the earliest available offset, clamping"
        );
        return Ok(bounds.earliest);
    }

    match descriptor {
        OffsetDescriptor::Oldest => Ok(OFFSET_BEGINNING),
        OffsetDescriptor::Newest => Ok(OFFSET_END),
        OffsetDescriptor::Absolute(n) if n >= OFFSET_BEGINNING => Ok(n),
        OffsetDescriptor::RelativeFromNewest(n) if n < OFFSET_BEGINNING => {
            Ok(bounds.earliest.max(bounds.newest.saturating_add(n)))
        }
        other => Err(FlowError::offset_resolution(
            topic,
            partition,
            format!("invalid offset {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BOUNDS: OffsetBounds = OffsetBounds {
        earliest: 100,
        newest: 200,
    };

    fn resolve(checkpoint: Option<i64>, descriptor: OffsetDescriptor, bounds: OffsetBounds) -> Result<i64> {
        resolve_start_offset("t", 0, checkpoint, descriptor, bounds)
    }

    #[test]
    fn test_parse() {
        assert_eq!(OffsetDescriptor::parse("oldest").unwrap(), OffsetDescriptor::Oldest);
        assert_eq!(OffsetDescriptor::parse("newest").unwrap(), OffsetDescriptor::Newest);
        assert_eq!(OffsetDescriptor::parse("-2").unwrap(), OffsetDescriptor::Absolute(-2));
        assert_eq!(OffsetDescriptor::parse("42").unwrap(), OffsetDescriptor::Absolute(42));
        assert_eq!(
            OffsetDescriptor::parse("-10").unwrap(),
            OffsetDescriptor::RelativeFromNewest(-10)
        );
        assert!(OffsetDescriptor::parse("latest").is_err());
        assert!(OffsetDescriptor::parse("").is_err());
    }

    #[test]
    fn test_deserialize_string_or_number() {
        let d: OffsetDescriptor = serde_json::from_str(r#""oldest""#).unwrap();
        assert_eq!(d, OffsetDescriptor::Oldest);
        let d: OffsetDescriptor = serde_json::from_str("-5").unwrap();
        assert_eq!(d, OffsetDescriptor::RelativeFromNewest(-5));
        assert!(serde_json::from_str::<OffsetDescriptor>(r#""soon""#).is_err());
    }

    #[test]
    fn test_checkpoint_wins() {
        assert_eq!(resolve(Some(150), OffsetDescriptor::Oldest, BOUNDS).unwrap(), 150);
        assert_eq!(resolve(Some(100), OffsetDescriptor::Newest, BOUNDS).unwrap(), 100);
    }

    #[test]
    fn test_checkpoint_clamped_to_earliest() {
        assert_eq!(resolve(Some(10), OffsetDescriptor::Newest, BOUNDS).unwrap(), 100);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(resolve(None, OffsetDescriptor::Oldest, BOUNDS).unwrap(), OFFSET_BEGINNING);
        assert_eq!(resolve(None, OffsetDescriptor::Newest, BOUNDS).unwrap(), OFFSET_END);
        assert_eq!(resolve(None, OffsetDescriptor::Absolute(-1), BOUNDS).unwrap(), -1);
        assert_eq!(resolve(None, OffsetDescriptor::Absolute(5), BOUNDS).unwrap(), 5);
    }

    #[test]
    fn test_relative_from_newest() {
        assert_eq!(
            resolve(None, OffsetDescriptor::RelativeFromNewest(-10), BOUNDS).unwrap(),
            190
        );
        let narrow = OffsetBounds {
            earliest: 100,
            newest: 105,
        };
        assert_eq!(
            resolve(None, OffsetDescriptor::RelativeFromNewest(-10), narrow).unwrap(),
            100
        );
    }

    #[test]
    fn test_inconsistent_descriptor_fails() {
        assert!(matches!(
            resolve(None, OffsetDescriptor::RelativeFromNewest(5), BOUNDS),
            Err(FlowError::OffsetResolution(_))
        ));
        assert!(resolve(None, OffsetDescriptor::Absolute(-3), BOUNDS).is_err());
    }

    proptest! {
        #[test]
        fn prop_checkpoint_never_before_earliest(
            earliest in 0i64..1_000_000,
            span in 0i64..1_000_000,
            checkpoint in -1_000i64..2_000_000,
        ) {
            let bounds = OffsetBounds { earliest, newest: earliest + span };
            let offset = resolve(Some(checkpoint), OffsetDescriptor::Newest, bounds).unwrap();
            prop_assert!(offset >= earliest);
            prop_assert_eq!(offset, checkpoint.max(earliest));
        }

        #[test]
        fn prop_relative_within_bounds(
            earliest in 0i64..1_000_000,
            span in 0i64..1_000_000,
            back in 3i64..2_000_000,
        ) {
            let bounds = OffsetBounds { earliest, newest: earliest + span };
            let offset = resolve(None, OffsetDescriptor::RelativeFromNewest(-back), bounds).unwrap();
            prop_assert!(offset >= bounds.earliest);
            prop_assert!(offset <= bounds.newest);
        }
    }
}
