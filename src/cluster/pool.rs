//! Per-session cluster arena

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::broker::{BrokerConnection, BrokerConnector, BrokerSet, PartitionConsumer};
use super::offset::{resolve_start_offset, OffsetDescriptor};
use crate::checkpoint::FsmCheckpoint;
use crate::error::{FlowError, Result, SetupErrors};
use crate::model::Message;

/// One topic (or topic partition) to consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub topic: String,
    /// `None` consumes every partition of the topic
    pub partition: Option<i32>,
    pub offset: OffsetDescriptor,
    pub brokers: BrokerSet,
}

/// A connected broker set and everything opened on it
pub struct ClusterHandle {
    brokers: BrokerSet,
    connection: BrokerConnection,
    consumers: Mutex<Vec<PartitionConsumer>>,
    channels: Mutex<Vec<mpsc::Receiver<Message>>>,
    errors: Mutex<SetupErrors>,
    closed: AtomicBool,
}

impl ClusterHandle {
    fn new(brokers: BrokerSet, connection: BrokerConnection) -> Self {
        Self {
            brokers,
            connection,
            consumers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            errors: Mutex::new(SetupErrors::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn brokers(&self) -> &BrokerSet {
        &self.brokers
    }

    /// Number of partition consumers opened so far
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    fn record_error(&self, err: FlowError) {
        warn!(brokers = %self.brokers, error = %err, "consumer setup failed");
        self.errors.lock().push(err);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Keep `consumer` unless the handle was closed while it was opening,
    /// in which case it is dropped and its reader stops.
    fn register(&self, mut consumer: PartitionConsumer) {
        let mut consumers = self.consumers.lock();
        if self.is_closed() {
            debug!(
                topic = consumer.topic(),
                partition = consumer.partition(),
                "cluster closed during setup; dropping partition consumer"
            );
            return;
        }
        if let Some(channel) = consumer.take_messages() {
            self.channels.lock().push(channel);
        }
        consumers.push(consumer);
    }

    /// Resolve the spec's partitions and open a partition consumer for each.
    ///
    /// Failures are recorded on the handle; the first one stops this spec.
    pub async fn add_consumer(
        &self,
        spec: &ConsumerSpec,
        checkpoint: Option<&FsmCheckpoint>,
        capacity: usize,
    ) {
        let client = &self.connection.client;
        let topic = spec.topic.as_str();

        let partitions = match spec.partition {
            Some(p) => vec![p],
            None => match client.partitions(topic).await {
                Ok(partitions) => partitions,
                Err(e) => {
                    self.record_error(e);
                    return;
                }
            },
        };

        for partition in partitions {
            if self.is_closed() {
                return;
            }
            let offset = match client.bounds(topic, partition).await.and_then(|bounds| {
                let saved = checkpoint.and_then(|c| c.offset(topic, partition));
                resolve_start_offset(topic, partition, saved, spec.offset, bounds)
            }) {
                Ok(offset) => offset,
                Err(e) => {
                    self.record_error(e);
                    return;
                }
            };

            match self
                .connection
                .consumer
                .consume_partition(topic, partition, offset, capacity)
                .await
            {
                Ok(consumer) => {
                    info!(topic, partition, offset, brokers = %self.brokers, "consuming partition");
                    self.register(consumer);
                }
                Err(e) => {
                    self.record_error(e);
                    return;
                }
            }
        }
    }

    fn take_errors(&self) -> SetupErrors {
        std::mem::take(&mut *self.errors.lock())
    }

    fn take_channels(&self) -> Vec<mpsc::Receiver<Message>> {
        std::mem::take(&mut *self.channels.lock())
    }

    /// Close partition consumers, then the consumer, then the client.
    /// Failures are logged and do not stop the remaining steps.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.lock().clear();
        let consumers = std::mem::take(&mut *self.consumers.lock());
        debug!(brokers = %self.brokers, count = consumers.len(), "closing partition consumers");
        for mut consumer in consumers {
            if let Err(e) = consumer.close().await {
                warn!(
                    brokers = %self.brokers,
                    topic = consumer.topic(),
                    partition = consumer.partition(),
                    error = %e,
                    "failed to close partition consumer"
                );
            }
        }

        if let Err(e) = self.connection.consumer.close().await {
            warn!(brokers = %self.brokers, error = %e, "failed to close consumer");
        }
        if let Err(e) = self.connection.client.close().await {
            warn!(brokers = %self.brokers, error = %e, "failed to close client");
        }
        info!(brokers = %self.brokers, "closed cluster");
    }
}

/// All clusters opened by one session, keyed by canonical broker set
pub struct ClusterPool {
    connector: Arc<dyn BrokerConnector>,
    clusters: HashMap<String, Arc<ClusterHandle>>,
    order: Vec<String>,
    capacity: usize,
}

impl ClusterPool {
    pub fn new(connector: Arc<dyn BrokerConnector>, capacity: usize) -> Self {
        Self {
            connector,
            clusters: HashMap::new(),
            order: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, brokers: &BrokerSet) -> Option<Arc<ClusterHandle>> {
        self.clusters.get(&brokers.key()).cloned()
    }

    /// Connect to `brokers`, reusing the handle if the set is already open
    pub async fn open_cluster(&mut self, brokers: &BrokerSet) -> Result<Arc<ClusterHandle>> {
        let key = brokers.key();
        if let Some(handle) = self.clusters.get(&key) {
            return Ok(handle.clone());
        }

        let connection = self.connector.connect(brokers).await?;
        let handle = Arc::new(ClusterHandle::new(brokers.clone(), connection));
        info!(brokers = %brokers, "opened cluster");
        self.clusters.insert(key.clone(), handle.clone());
        self.order.push(key);
        Ok(handle)
    }

    /// Open every cluster the specs reference and start their consumers.
    ///
    /// Clusters are opened one at a time; the specs of a cluster register
    /// concurrently. Any failure closes everything opened so far and the
    /// collected errors are returned together.
    pub async fn setup(
        &mut self,
        specs: &[ConsumerSpec],
        checkpoint: Option<Arc<FsmCheckpoint>>,
    ) -> Result<Vec<mpsc::Receiver<Message>>> {
        let mut groups: Vec<(BrokerSet, Vec<ConsumerSpec>)> = Vec::new();
        for spec in specs {
            match groups.iter_mut().find(|(b, _)| *b == spec.brokers) {
                Some((_, group)) => group.push(spec.clone()),
                None => groups.push((spec.brokers.clone(), vec![spec.clone()])),
            }
        }

        let mut errors = SetupErrors::new();
        for (brokers, group) in groups {
            let handle = match self.open_cluster(&brokers).await {
                Ok(handle) => handle,
                Err(e) => {
                    errors.push(e);
                    break;
                }
            };

            let tasks = group.into_iter().map(|spec| {
                let handle = handle.clone();
                let checkpoint = checkpoint.clone();
                let capacity = self.capacity;
                tokio::spawn(async move {
                    handle
                        .add_consumer(&spec, checkpoint.as_deref(), capacity)
                        .await
                })
            });
            for joined in join_all(tasks).await {
                if let Err(e) = joined {
                    handle.record_error(FlowError::Internal(format!(
                        "consumer setup task failed: {}",
                        e
                    )));
                }
            }

            let cluster_errors = handle.take_errors();
            if !cluster_errors.is_empty() {
                errors.extend(cluster_errors);
                break;
            }
        }

        if !errors.is_empty() {
            self.close().await;
            return Err(FlowError::Setup(errors));
        }

        Ok(self
            .order
            .iter()
            .filter_map(|key| self.clusters.get(key))
            .flat_map(|handle| handle.take_channels())
            .collect())
    }

    /// Tear down every cluster, in the order they were opened
    pub async fn close(&mut self) {
        for key in std::mem::take(&mut self.order) {
            if let Some(handle) = self.clusters.remove(&key) {
                handle.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryBroker;

    fn spec(topic: &str, partition: Option<i32>, offset: OffsetDescriptor, brokers: &str) -> ConsumerSpec {
        ConsumerSpec {
            topic: topic.into(),
            partition,
            offset,
            brokers: BrokerSet::parse(brokers).unwrap(),
        }
    }

    fn broker() -> Arc<MemoryBroker> {
        let broker = MemoryBroker::new();
        broker.add_topic("orders", 3);
        broker.add_topic("payments", 1);
        Arc::new(broker)
    }

    #[tokio::test]
    async fn test_one_cluster_per_broker_set() {
        let broker = broker();
        let mut pool = ClusterPool::new(broker.clone(), 16);
        let specs = vec![
            spec("orders", None, OffsetDescriptor::Oldest, "b:1,a:1"),
            spec("payments", Some(0), OffsetDescriptor::Newest, "a:1, b:1"),
        ];

        let channels = pool.setup(&specs, None).await.unwrap();
        assert_eq!(channels.len(), 4);
        assert_eq!(pool.len(), 1);
        assert_eq!(broker.connect_count(), 1);

        let handle = pool.get(&BrokerSet::parse("a:1,b:1").unwrap()).unwrap();
        assert_eq!(handle.consumer_count(), 4);

        pool.close().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_separate_broker_sets() {
        let broker = broker();
        let mut pool = ClusterPool::new(broker.clone(), 16);
        let specs = vec![
            spec("payments", None, OffsetDescriptor::Oldest, "a:1"),
            spec("payments", None, OffsetDescriptor::Oldest, "b:1"),
        ];
        let channels = pool.setup(&specs, None).await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(pool.len(), 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_failure_tears_down_everything() {
        let broker = broker();
        let mut pool = ClusterPool::new(broker.clone(), 16);
        let specs = vec![
            spec("orders", None, OffsetDescriptor::Oldest, "a:1"),
            spec("missing", None, OffsetDescriptor::Oldest, "a:1"),
            spec("also-missing", Some(0), OffsetDescriptor::Oldest, "a:1"),
        ];

        let err = pool.setup(&specs, None).await.unwrap_err();
        match err {
            FlowError::Setup(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
        assert!(pool.is_empty());
        assert_eq!(broker.open_partitions(), 0);
        assert_eq!(broker.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let broker = broker();
        broker.refuse("down:1");
        let mut pool = ClusterPool::new(broker.clone(), 16);
        let specs = vec![
            spec("orders", None, OffsetDescriptor::Oldest, "a:1"),
            spec("orders", None, OffsetDescriptor::Oldest, "down:1"),
        ];
        let err = pool.setup(&specs, None).await.unwrap_err();
        assert_eq!(err.classifier(), "SetupError");
        assert!(err.to_string().contains("down:1"));
        assert!(pool.is_empty());
        assert_eq!(broker.open_partitions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_setup_leaves_nothing_open() {
        let broker = broker();
        broker.set_latency(std::time::Duration::from_secs(30));
        let mut pool = ClusterPool::new(broker.clone(), 16);
        let specs = vec![spec("orders", None, OffsetDescriptor::Oldest, "a:1")];

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            pool.setup(&specs, None),
        )
        .await;
        assert!(abandoned.is_err());
        let handle = pool.get(&BrokerSet::parse("a:1").unwrap()).unwrap();
        pool.close().await;
        assert!(handle.is_closed());

        // Registration tasks outlive the abandoned setup and must not
        // leave readers behind once they finish.
        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert_eq!(handle.consumer_count(), 0);
        assert_eq!(broker.open_partitions(), 0);
        assert_eq!(broker.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_offset_used() {
        let broker = broker();
        for i in 0..5 {
            broker.produce("payments", 0, &format!(r#"{{"n":{}}}"#, i));
        }
        let checkpoint: FsmCheckpoint = serde_json::from_value(serde_json::json!({
            "id": "fsm-1",
            "topics": {"payments": {"count": 5, "partitions": {"0": {"start": 3, "end": 5, "count": 2}}}}
        }))
        .unwrap();

        let mut pool = ClusterPool::new(broker.clone(), 16);
        let specs = vec![spec("payments", None, OffsetDescriptor::Oldest, "a:1")];
        let mut channels = pool.setup(&specs, Some(Arc::new(checkpoint))).await.unwrap();
        let first = channels[0].recv().await.unwrap();
        assert_eq!(first.offset, 3);
        pool.close().await;
    }
}
