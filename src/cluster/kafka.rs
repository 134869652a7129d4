//! Kafka adapter backed by librdkafka
//!
//! Each broker set gets two `BaseConsumer`s: one answers metadata and
//! watermark queries, the other carries the manual partition assignments.
//! Every partition has its queue split off before it is assigned, so none of
//! its records can land on the main queue, and each split queue is drained by
//! its own blocking reader. The main queue is polled by a separate reader so
//! librdkafka keeps serving events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::base_consumer::PartitionQueue;
use rdkafka::consumer::{BaseConsumer, Consumer, DefaultConsumerContext};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message as _};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::broker::{
    BrokerClient, BrokerConnection, BrokerConnector, BrokerConsumer, BrokerSet, PartitionConsumer,
};
use super::offset::{OffsetBounds, OFFSET_BEGINNING, OFFSET_END};
use crate::error::{FlowError, Result};
use crate::model::Message;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connects to Kafka clusters
#[derive(Debug, Clone, Default)]
pub struct KafkaConnector {
    /// Extra librdkafka properties applied to every connection
    pub properties: Vec<(String, String)>,
}

impl KafkaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn base_config(&self, brokers: &BrokerSet) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers.key())
            .set("group.id", format!("flowscope-{}", std::process::id()))
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }
}

fn to_rdkafka_offset(offset: i64) -> Offset {
    match offset {
        OFFSET_BEGINNING => Offset::Beginning,
        OFFSET_END => Offset::End,
        n => Offset::Offset(n),
    }
}

fn normalize(msg: &BorrowedMessage<'_>) -> Message {
    let timestamp = msg
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis);
    Message::from_record(
        msg.topic(),
        msg.partition(),
        msg.offset(),
        msg.key(),
        msg.payload(),
        timestamp,
    )
}

async fn blocking<T, F>(brokers: &BrokerSet, f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, KafkaError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FlowError::Internal(format!("kafka worker failed: {}", e)))?
        .map_err(|e| FlowError::connection(&brokers.key(), e))
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, brokers: &BrokerSet) -> Result<BrokerConnection> {
        let config = self.base_config(brokers);
        let client: Arc<BaseConsumer> = Arc::new(
            config
                .create()
                .map_err(|e| FlowError::connection(&brokers.key(), e))?,
        );
        let consumer: Arc<BaseConsumer> = Arc::new(
            config
                .create()
                .map_err(|e| FlowError::connection(&brokers.key(), e))?,
        );

        // librdkafka connects lazily; a metadata round trip surfaces
        // unreachable brokers now instead of on first read.
        let metadata = client.clone();
        blocking(brokers, move || {
            metadata.fetch_metadata(None, METADATA_TIMEOUT).map(|_| ())
        })
        .await?;

        let stop = CancellationToken::new();
        let poller = spawn_main_poller(consumer.clone(), stop.clone(), brokers.clone());

        Ok(BrokerConnection {
            client: Arc::new(KafkaClient {
                brokers: brokers.clone(),
                client: Mutex::new(Some(client)),
            }),
            consumer: Arc::new(KafkaConsumer {
                brokers: brokers.clone(),
                consumer,
                stop,
                poller: Mutex::new(Some(poller)),
            }),
        })
    }
}

fn spawn_main_poller(
    consumer: Arc<BaseConsumer>,
    stop: CancellationToken,
    brokers: BrokerSet,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !stop.is_cancelled() {
            match consumer.poll(POLL_INTERVAL) {
                Some(Err(e)) => warn!(brokers = %brokers, error = %e, "kafka consumer error"),
                Some(Ok(msg)) => warn!(
                    brokers = %brokers,
                    topic = msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "record delivered on main queue was dropped"
                ),
                None => {}
            }
        }
    })
}

/// Split off the partition's queue, then assign it at `offset`
fn attach_partition(
    consumer: &Arc<BaseConsumer>,
    brokers: &BrokerSet,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Result<PartitionQueue<DefaultConsumerContext>> {
    let queue = consumer
        .split_partition_queue(topic, partition)
        .ok_or_else(|| {
            FlowError::connection(&brokers.key(), format!("no queue for {}/{}", topic, partition))
        })?;

    let mut assignment = TopicPartitionList::new();
    assignment
        .add_partition_offset(topic, partition, to_rdkafka_offset(offset))
        .map_err(|e| FlowError::offset_resolution(topic, partition, e))?;
    consumer
        .incremental_assign(&assignment)
        .map_err(|e| FlowError::connection(&brokers.key(), e))?;
    Ok(queue)
}

/// Metadata side of a connection. The underlying consumer is released by
/// `close`; queries after that fail.
struct KafkaClient {
    brokers: BrokerSet,
    client: Mutex<Option<Arc<BaseConsumer>>>,
}

impl KafkaClient {
    fn handle(&self) -> Result<Arc<BaseConsumer>> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| FlowError::connection(&self.brokers.key(), "client closed"))
    }
}

#[async_trait]
impl BrokerClient for KafkaClient {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let client = self.handle()?;
        let name = topic.to_string();
        let partitions = blocking(&self.brokers, move || {
            let metadata = client.fetch_metadata(Some(&name), METADATA_TIMEOUT)?;
            Ok(metadata
                .topics()
                .iter()
                .filter(|t| t.name() == name)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect::<Vec<i32>>())
        })
        .await?;

        if partitions.is_empty() {
            return Err(FlowError::connection(
                &self.brokers.key(),
                format!("topic {} has no partitions", topic),
            ));
        }
        Ok(partitions)
    }

    async fn bounds(&self, topic: &str, partition: i32) -> Result<OffsetBounds> {
        let client = self.handle()?;
        let name = topic.to_string();
        let (earliest, newest) = tokio::task::spawn_blocking(move || {
            client.fetch_watermarks(&name, partition, METADATA_TIMEOUT)
        })
        .await
        .map_err(|e| FlowError::Internal(format!("kafka worker failed: {}", e)))?
        .map_err(|e| FlowError::offset_resolution(topic, partition, e))?;
        Ok(OffsetBounds { earliest, newest })
    }

    async fn close(&self) -> Result<()> {
        let client = self.client.lock().take();
        if let Some(client) = client {
            // In-flight queries hold their own reference; the handle is
            // destroyed once the last of them returns.
            tokio::task::spawn_blocking(move || drop(client))
                .await
                .map_err(|e| FlowError::Internal(format!("kafka worker failed: {}", e)))?;
            debug!(brokers = %self.brokers, "released kafka client");
        }
        Ok(())
    }
}

struct KafkaConsumer {
    brokers: BrokerSet,
    consumer: Arc<BaseConsumer>,
    stop: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        capacity: usize,
    ) -> Result<PartitionConsumer> {
        let queue = attach_partition(&self.consumer, &self.brokers, topic, partition, offset)?;

        let (tx, rx) = mpsc::channel(capacity);
        let stop = self.stop.child_token();
        let reader_stop = stop.clone();
        let label = format!("{}/{}", topic, partition);

        let task = tokio::task::spawn_blocking(move || {
            while !reader_stop.is_cancelled() {
                match queue.poll(POLL_INTERVAL) {
                    Some(Ok(record)) => {
                        if tx.blocking_send(normalize(&record)).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => warn!(partition = %label, error = %e, "kafka read error"),
                    None => {}
                }
            }
        });

        Ok(PartitionConsumer::new(topic, partition, offset, rx, stop, task))
    }

    async fn close(&self) -> Result<()> {
        self.stop.cancel();
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller
                .await
                .map_err(|e| FlowError::Internal(format!("kafka poller failed: {}", e)))?;
        }
        self.consumer
            .unassign()
            .map_err(|e| FlowError::connection(&self.brokers.key(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_sentinels() {
        assert_eq!(to_rdkafka_offset(-2), Offset::Beginning);
        assert_eq!(to_rdkafka_offset(-1), Offset::End);
        assert_eq!(to_rdkafka_offset(42), Offset::Offset(42));
    }

    fn offline_consumer() -> Arc<BaseConsumer> {
        let brokers = BrokerSet::parse("127.0.0.1:1").unwrap();
        Arc::new(KafkaConnector::new().base_config(&brokers).create().unwrap())
    }

    #[test]
    fn test_partition_queue_split_before_assignment() {
        let consumer = offline_consumer();
        let brokers = BrokerSet::parse("127.0.0.1:1").unwrap();
        assert_eq!(consumer.assignment().unwrap().count(), 0);

        let _queue = attach_partition(&consumer, &brokers, "orders", 3, OFFSET_BEGINNING).unwrap();
        let assignment = consumer.assignment().unwrap();
        assert_eq!(assignment.count(), 1);
        let element = assignment.find_partition("orders", 3).unwrap();
        assert_eq!(element.offset(), Offset::Beginning);
    }

    #[tokio::test]
    async fn test_client_close_releases_consumer() {
        let consumer = offline_consumer();
        let client = KafkaClient {
            brokers: BrokerSet::parse("127.0.0.1:1").unwrap(),
            client: Mutex::new(Some(consumer.clone())),
        };
        assert_eq!(Arc::strong_count(&consumer), 2);

        client.close().await.unwrap();
        assert_eq!(Arc::strong_count(&consumer), 1);
        let err = client.partitions("orders").await.unwrap_err();
        assert!(err.to_string().contains("client closed"));
        client.close().await.unwrap();
    }

    #[test]
    fn test_base_config_uses_canonical_brokers() {
        let connector = KafkaConnector {
            properties: vec![("client.id".into(), "tests".into())],
        };
        let config = connector.base_config(&BrokerSet::parse("b:9092,a:9092").unwrap());
        assert_eq!(config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(config.get("client.id"), Some("tests"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
    }
}
