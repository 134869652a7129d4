#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Flowscope
//!
//! Flowscope consumes records from Kafka, puts them back into approximate
//! chronological order across partitions and topics, and turns each one into
//! visualization events using a rule set the client supplies. Every
//! WebSocket connection is an independent session.
//!
//! ## Running the Server
//!
//! ```bash
//! # Listen on 127.0.0.1:41234
//! $ ./flowscope
//!
//! # With a Checkpoint Service and a fallback cluster
//! $ ./flowscope --checkpoint-url http://bookie:9000 --default-brokers kafka:9092
//! ```
//!
//! ## Session Protocol
//!
//! The client opens `/ws` and sends one configuration document:
//!
//! ```json
//! {
//!   "brokers": "kafka:9092",
//!   "offset": "newest",
//!   "consumers": [{"topic": "orders"}, {"topic": "payments", "partition": 0, "offset": "-100"}],
//!   "rules": [{
//!     "patterns": [{"field": "{{.Topic}}", "pattern": "orders"}],
//!     "events": [{"eventType": "message", "sourceId": "shop", "targetId": "orders",
//!                 "fsmId": "{{index .Value \"orderId\"}}", "text": "new order"}]
//!   }],
//!   "heartbeatUUID": "3f1c"
//! }
//! ```
//!
//! After a five second priming window the server sends a JSON array of
//! events every 100ms tick that has any. The client keeps the session alive
//! by sending `{"uuid": "3f1c"}` at least every ten seconds.
//!
//! ## Library Usage
//!
//! Sessions run over any [`session::EventSink`] / [`session::ClientStream`]
//! pair and any [`cluster::BrokerConnector`]; [`cluster::MemoryBroker`] and
//! [`session::ChannelClient`] run a session entirely in process.

pub mod checkpoint;
pub mod cluster;
pub mod config;
pub mod error;
pub mod model;
pub mod playback;
pub mod rules;
pub mod server;
pub mod session;
pub mod template;

pub use config::{ServerArgs, ServerConfig};
pub use error::{FlowError, Result};
pub use model::{Event, Message};
pub use rules::{Rule, RuleEngine};
pub use server::Server;
pub use session::{run_session, SessionContext, SessionDocument};
