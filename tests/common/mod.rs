//! Shared fixtures for Flowscope integration tests
//!
//! Sessions run entirely in process: a [`MemoryBroker`] stands in for Kafka
//! and a [`ChannelClient`] for the WebSocket. Run tests that use these with
//! `#[tokio::test(start_paused = true)]` so priming and ticks take no real
//! time.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowscope::cluster::MemoryBroker;
use flowscope::session::{ChannelClient, ChannelStream, EventSink};
use flowscope::{run_session, Result, ServerConfig, SessionContext};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A session running against a memory broker
pub struct TestSession {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub received: mpsc::UnboundedReceiver<String>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<()>>,
}

impl TestSession {
    /// Start a session and send `document` as its first frame
    pub fn start(broker: &MemoryBroker, document: Value) -> Self {
        Self::start_with(broker, ServerConfig::default(), document)
    }

    pub fn start_with(broker: &MemoryBroker, config: ServerConfig, document: Value) -> Self {
        let ctx = SessionContext::new(Arc::new(config), Arc::new(broker.clone()))
            .expect("session context");
        let client = ChannelClient::new();
        let cancel = CancellationToken::new();

        client
            .outgoing
            .send(document.to_string())
            .expect("send document");

        let session_cancel = cancel.clone();
        let sink = client.sink;
        let stream = client.stream;
        let task = tokio::spawn(async move {
            run_session(&ctx, Box::new(sink), Box::new(stream), session_cancel).await
        });

        Self {
            outgoing: client.outgoing,
            received: client.received,
            cancel,
            task,
        }
    }

    /// Next batch the session sent, or `None` once it closed the connection
    pub async fn next_batch(&mut self) -> Option<Vec<Value>> {
        let text = self.received.recv().await?;
        Some(serde_json::from_str(&text).expect("batch is a JSON array"))
    }

    /// Events from batches until `pred` matches one; returns all of them
    pub async fn events_until(&mut self, pred: impl Fn(&Value) -> bool) -> Vec<Value> {
        let mut seen = Vec::new();
        while let Some(batch) = self.next_batch().await {
            let done = batch.iter().any(&pred);
            seen.extend(batch);
            if done {
                return seen;
            }
        }
        panic!("session closed before the expected event; saw {:?}", seen);
    }

    /// Send a heartbeat; returns false once the session stopped listening
    pub fn ping(&self, token: &str) -> bool {
        self.outgoing
            .send(serde_json::json!({ "uuid": token }).to_string())
            .is_ok()
    }

    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await.expect("session task")
    }
}

/// A client that never reads what the session sends
pub struct StalledSink;

#[async_trait]
impl EventSink for StalledSink {
    async fn send(&mut self, _text: String) -> Result<()> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Start a session whose client sends `document` and then stops reading.
/// Keep the returned sender alive to keep the connection open.
pub fn start_stalled(
    broker: &MemoryBroker,
    document: Value,
) -> (mpsc::UnboundedSender<String>, JoinHandle<Result<()>>) {
    let ctx = SessionContext::new(Arc::new(ServerConfig::default()), Arc::new(broker.clone()))
        .expect("session context");
    let (outgoing, incoming) = mpsc::unbounded_channel();
    outgoing.send(document.to_string()).expect("send document");

    let task = tokio::spawn(async move {
        run_session(
            &ctx,
            Box::new(StalledSink),
            Box::new(ChannelStream::new(incoming)),
            CancellationToken::new(),
        )
        .await
    });
    (outgoing, task)
}

/// A fixed point well in the past, so message timestamps never race the
/// wall clock
pub fn base_time() -> DateTime<Utc> {
    Utc::now() - Duration::hours(1)
}

pub fn at(base: DateTime<Utc>, millis: i64) -> DateTime<Utc> {
    base + Duration::milliseconds(millis)
}

pub fn message_rule(pattern_field: &str, pattern: &str, event: Value) -> Value {
    serde_json::json!({
        "patterns": [{"field": pattern_field, "pattern": pattern}],
        "events": [event]
    })
}
