//! Broker clusters
//!
//! A session opens one [`ClusterHandle`] per distinct broker set, resolves
//! where each partition starts with [`resolve_start_offset`], and merges the
//! resulting partition channels with [`join_messages`].
//!
//! - `offset` - Start offset policy
//! - `broker` - Broker traits and partition consumers
//! - `pool` - Per-session cluster arena with setup and teardown
//! - `ingest` - Partition fan-in
//! - `memory` - In-process broker
//! - `kafka` - librdkafka adapter (feature `kafka`)

mod broker;
mod ingest;
#[cfg(feature = "kafka")]
mod kafka;
pub mod memory;
mod offset;
mod pool;

pub use broker::{
    BrokerClient, BrokerConnection, BrokerConnector, BrokerConsumer, BrokerSet, PartitionConsumer,
};
pub use ingest::join_messages;
#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
pub use memory::MemoryBroker;
pub use offset::{
    resolve_start_offset, OffsetBounds, OffsetDescriptor, OFFSET_BEGINNING, OFFSET_END,
};
pub use pool::{ClusterHandle, ClusterPool, ConsumerSpec};
