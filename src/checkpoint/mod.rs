//! Checkpoint Service client
//!
//! The Checkpoint Service tracks, per FSM id, where each topic partition's
//! relevant records start and how many there are. Sessions query it once
//! at start-up; any failure just means consumers fall back to their
//! configured offsets.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CheckpointConfig;
use crate::error::{FlowError, Result};

/// Offsets recorded for one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCheckpoint {
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    #[serde(default)]
    pub last_scraped: i64,
    #[serde(default)]
    pub count: i64,
}

/// Per-topic record, partitions keyed by their decimal id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCheckpoint {
    #[serde(default)]
    pub partitions: HashMap<String, PartitionCheckpoint>,
    #[serde(default)]
    pub count: i64,
}

/// Everything the service knows about one FSM id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmCheckpoint {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub topics: HashMap<String, TopicCheckpoint>,
}

impl FsmCheckpoint {
    /// Start offset recorded for a partition
    pub fn offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.topics
            .get(topic)?
            .partitions
            .get(&partition.to_string())
            .map(|p| p.start)
    }

    /// Message count recorded for a topic
    pub fn count(&self, topic: &str) -> Option<i64> {
        self.topics.get(topic).map(|t| t.count)
    }
}

/// HTTP client for the Checkpoint Service
#[derive(Debug, Clone)]
pub struct CheckpointClient {
    base_url: String,
    client: reqwest::Client,
}

impl CheckpointClient {
    pub fn new(config: &CheckpointConfig) -> Result<Self> {
        Self::with_timeout(&config.url, config.timeout)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlowError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the checkpoint for `fsm_id`
    pub async fn fsm(&self, fsm_id: &str) -> Result<FsmCheckpoint> {
        let url = format!("{}/fsm", self.base_url);
        debug!(%url, fsm_id, "fetching checkpoint");

        let response = self
            .client
            .get(&url)
            .query(&[("id", fsm_id)])
            .send()
            .await
            .map_err(|e| FlowError::Checkpoint(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FlowError::Checkpoint(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FlowError::Checkpoint(format!("invalid checkpoint document: {}", e)))
    }
}
