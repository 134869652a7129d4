//! Broker seam
//!
//! The cluster pool talks to brokers only through these traits, so the Kafka
//! adapter and the in-memory broker used in tests are interchangeable.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::offset::OffsetBounds;
use crate::error::{ConfigError, Result};
use crate::model::Message;

/// Canonical set of broker addresses: trimmed, sorted, deduplicated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrokerSet {
    addrs: Vec<String>,
}

impl BrokerSet {
    /// Parse a comma separated address list
    pub fn parse(list: &str) -> std::result::Result<Self, ConfigError> {
        Self::from_addrs(list.split(','))
    }

    pub fn from_addrs<I, S>(addrs: I) -> std::result::Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addrs: Vec<String> = addrs
            .into_iter()
            .map(|a| a.as_ref().trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if addrs.is_empty() {
            return Err(ConfigError::missing("brokers"));
        }
        addrs.sort();
        addrs.dedup();
        Ok(Self { addrs })
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    /// Key identifying the cluster within a session
    pub fn key(&self) -> String {
        self.addrs.join(",")
    }
}

impl fmt::Display for BrokerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addrs.join(","))
    }
}

/// Metadata side of a cluster connection
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// All partitions of `topic`
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    /// Earliest and newest offsets of a partition
    async fn bounds(&self, topic: &str, partition: i32) -> Result<OffsetBounds>;

    async fn close(&self) -> Result<()>;
}

/// Consuming side of a cluster connection
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Start reading `topic`/`partition` at `offset` (sentinels allowed)
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        capacity: usize,
    ) -> Result<PartitionConsumer>;

    async fn close(&self) -> Result<()>;
}

/// A connected client/consumer pair
#[derive(Clone)]
pub struct BrokerConnection {
    pub client: Arc<dyn BrokerClient>,
    pub consumer: Arc<dyn BrokerConsumer>,
}

/// Opens connections to broker sets
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, brokers: &BrokerSet) -> Result<BrokerConnection>;
}

/// Handle on one partition being consumed.
///
/// Messages arrive on the channel returned by [`take_messages`]; the channel
/// closes once the consumer is closed.
///
/// [`take_messages`]: PartitionConsumer::take_messages
#[derive(Debug)]
pub struct PartitionConsumer {
    topic: String,
    partition: i32,
    offset: i64,
    messages: Option<mpsc::Receiver<Message>>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PartitionConsumer {
    /// Wrap a reader task. The task must stop once `stop` is cancelled and
    /// must drop its sender when it does.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        messages: mpsc::Receiver<Message>,
        stop: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            messages: Some(messages),
            stop,
            task: Some(task),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// The offset consumption started from
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The message channel; `None` once taken
    pub fn take_messages(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.messages.take()
    }

    /// Stop the reader and wait for it to exit
    pub async fn close(&mut self) -> Result<()> {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(topic = %self.topic, partition = self.partition, error = %e, "partition reader ended abnormally");
            }
        }
        debug!(topic = %self.topic, partition = self.partition, "closed partition consumer");
        Ok(())
    }
}

impl Drop for PartitionConsumer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
