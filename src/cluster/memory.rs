//! In-process broker
//!
//! Keeps topics as vectors of messages and serves them through the same
//! traits as the Kafka adapter. Used by the test suites and handy for
//! driving a session without a real cluster.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::broker::{
    BrokerClient, BrokerConnection, BrokerConnector, BrokerConsumer, BrokerSet, PartitionConsumer,
};
use super::offset::{OffsetBounds, OFFSET_BEGINNING, OFFSET_END};
use crate::error::{FlowError, Result};
use crate::model::Message;

#[derive(Default)]
struct Shared {
    topics: Mutex<HashMap<String, Vec<Vec<Message>>>>,
    refused: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    produced: Notify,
    connects: AtomicUsize,
    closed: AtomicUsize,
    running: AtomicUsize,
}

/// Broker whose data lives in memory
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` empty partitions
    pub fn add_topic(&self, topic: &str, partitions: usize) {
        self.shared
            .topics
            .lock()
            .insert(topic.to_string(), vec![Vec::new(); partitions]);
    }

    /// Make connections to any set containing `addr` fail
    pub fn refuse(&self, addr: &str) {
        self.shared.refused.lock().insert(addr.to_string());
    }

    /// Delay every metadata and offset query by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = Some(latency);
    }

    async fn lag(&self) {
        let latency = *self.shared.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Append a JSON payload without a timestamp
    pub fn produce(&self, topic: &str, partition: i32, payload: &str) -> i64 {
        self.produce_at(topic, partition, None, payload, None)
    }

    /// Append a record; returns its offset, or `-1` if the partition is unknown
    pub fn produce_at(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&str>,
        payload: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> i64 {
        let offset = {
            let mut topics = self.shared.topics.lock();
            let Some(log) = topics
                .get_mut(topic)
                .and_then(|parts| parts.get_mut(partition as usize))
            else {
                return OFFSET_END;
            };
            let offset = log.len() as i64;
            log.push(Message::from_record(
                topic,
                partition,
                offset,
                key.map(str::as_bytes),
                Some(payload.as_bytes()),
                timestamp,
            ));
            offset
        };
        self.shared.produced.notify_waiters();
        offset
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of connections whose consumer was closed
    pub fn closed_connections(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of partition readers still running
    pub fn open_partitions(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn partition_len(&self, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .topics
            .lock()
            .get(topic)
            .and_then(|parts| parts.get(usize::try_from(partition).ok()?))
            .map(|log| log.len() as i64)
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, brokers: &BrokerSet) -> Result<BrokerConnection> {
        {
            let refused = self.shared.refused.lock();
            if brokers.addrs().iter().any(|a| refused.contains(a)) {
                return Err(FlowError::connection(&brokers.key(), "connection refused"));
            }
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(MemorySession {
            broker: self.clone(),
            brokers: brokers.clone(),
        });
        Ok(BrokerConnection {
            client: session.clone(),
            consumer: session,
        })
    }
}

struct MemorySession {
    broker: MemoryBroker,
    brokers: BrokerSet,
}

#[async_trait]
impl BrokerClient for MemorySession {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        self.broker.lag().await;
        let topics = self.broker.shared.topics.lock();
        let parts = topics.get(topic).ok_or_else(|| {
            FlowError::connection(&self.brokers.key(), format!("unknown topic {}", topic))
        })?;
        Ok((0..parts.len() as i32).collect())
    }

    async fn bounds(&self, topic: &str, partition: i32) -> Result<OffsetBounds> {
        self.broker.lag().await;
        let newest = self
            .broker
            .partition_len(topic, partition)
            .ok_or_else(|| FlowError::offset_resolution(topic, partition, "unknown partition"))?;
        Ok(OffsetBounds {
            earliest: 0,
            newest,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BrokerConsumer for MemorySession {
    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        capacity: usize,
    ) -> Result<PartitionConsumer> {
        let len = self
            .broker
            .partition_len(topic, partition)
            .ok_or_else(|| FlowError::offset_resolution(topic, partition, "unknown partition"))?;
        let start = match offset {
            OFFSET_BEGINNING => 0,
            OFFSET_END => len,
            n => n,
        };

        let (tx, rx) = mpsc::channel(capacity);
        let stop = CancellationToken::new();
        let shared = self.broker.shared.clone();
        let task_stop = stop.clone();
        let owned_topic = topic.to_string();

        shared.running.fetch_add(1, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            read_partition(&shared, &owned_topic, partition, start, tx, task_stop).await;
            shared.running.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(PartitionConsumer::new(topic, partition, start, rx, stop, task))
    }

    async fn close(&self) -> Result<()> {
        self.broker.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn read_partition(
    shared: &Shared,
    topic: &str,
    partition: i32,
    mut next: i64,
    tx: mpsc::Sender<Message>,
    stop: CancellationToken,
) {
    loop {
        let produced = shared.produced.notified();
        let batch: Vec<Message> = {
            let topics = shared.topics.lock();
            topics
                .get(topic)
                .and_then(|parts| parts.get(partition as usize))
                .map(|log| log.iter().skip(next.max(0) as usize).cloned().collect())
                .unwrap_or_default()
        };

        for msg in batch {
            next += 1;
            tokio::select! {
                _ = stop.cancelled() => return,
                sent = tx.send(msg) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = stop.cancelled() => return,
            _ = produced => {}
        }
    }
}
