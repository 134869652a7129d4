//! Client connection seams

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FlowError, Result};
use crate::model::Event;

/// Outbound half of a client connection
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a client connection
#[async_trait]
pub trait ClientStream: Send {
    /// Next text frame; `Ok(None)` once the client has gone away
    async fn next_text(&mut self) -> Result<Option<String>>;
}

/// Sink shared by the dispatcher, the watchdog and the coordinator
pub type SharedSink = Arc<Mutex<Box<dyn EventSink>>>;

pub fn shared_sink(sink: Box<dyn EventSink>) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Send `events` as one JSON array. Empty batches are skipped.
pub async fn send_events(sink: &SharedSink, events: &[Event]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let text = serde_json::to_string(events)?;
    sink.lock().await.send(text).await
}

/// How long a best-effort notice may wait on the client
pub const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort send for diagnostics on the way out. Gives up after
/// [`NOTICE_TIMEOUT`]; failures are only logged.
pub async fn send_notice(sink: &SharedSink, events: &[Event]) {
    match tokio::time::timeout(NOTICE_TIMEOUT, send_events(sink, events)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "could not deliver notice"),
        Err(_) => debug!("client not reading; notice dropped"),
    }
}

/// Send `events` unless `cancel` fires first.
///
/// Returns `Ok(false)` when the session was cancelled. A send abandoned this
/// way releases the sink, so teardown never waits on a client that stopped
/// reading.
pub async fn deliver(
    sink: &SharedSink,
    events: &[Event],
    cancel: &CancellationToken,
) -> Result<bool> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(false),
        sent = send_events(sink, events) => sent.map(|_| true),
    }
}

/// Sink backed by an unbounded channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FlowError::transport("sink closed"))?;
        tx.send(text)
            .map_err(|_| FlowError::transport("client went away"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Client stream backed by an unbounded channel
#[derive(Debug)]
pub struct ChannelStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelStream {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl ClientStream for ChannelStream {
    async fn next_text(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

/// A connected in-process client: the session's sink and stream, and the
/// client's ends of both
pub struct ChannelClient {
    pub sink: ChannelSink,
    pub stream: ChannelStream,
    /// Messages the session sent
    pub received: mpsc::UnboundedReceiver<String>,
    /// Send a message to the session
    pub outgoing: mpsc::UnboundedSender<String>,
}

impl ChannelClient {
    pub fn new() -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        Self {
            sink: ChannelSink::new(out_tx),
            stream: ChannelStream::new(in_rx),
            received: out_rx,
            outgoing: in_tx,
        }
    }
}

impl Default for ChannelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_events_skips_empty_batches() {
        let mut client = ChannelClient::new();
        let sink = shared_sink(Box::new(client.sink));

        send_events(&sink, &[]).await.unwrap();
        send_events(&sink, &[Event::happy("hello")]).await.unwrap();
        drop(sink);

        assert_eq!(
            client.received.recv().await.unwrap(),
            r#"[{"eventType":"log","text":"hello","color":"happy"}]"#
        );
        assert!(client.received.recv().await.is_none());
    }

    /// A client that never reads
    struct StalledSink;

    #[async_trait]
    impl EventSink for StalledSink {
        async fn send(&mut self, _text: String) -> Result<()> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_gives_up_on_cancel() {
        let sink = shared_sink(Box::new(StalledSink));
        let cancel = CancellationToken::new();

        let pending = {
            let sink = sink.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { deliver(&sink, &[Event::happy("x")], &cancel).await })
        };
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(sink.try_lock().is_err());

        cancel.cancel();
        assert!(!pending.await.unwrap().unwrap());
        assert!(sink.try_lock().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_to_stalled_client_times_out() {
        let sink = shared_sink(Box::new(StalledSink));
        send_notice(&sink, &[Event::error("bye")]).await;
        assert!(sink.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_send_after_client_left_is_transport_error() {
        let client = ChannelClient::new();
        let sink = shared_sink(Box::new(client.sink));
        drop(client.received);
        let err = send_events(&sink, &[Event::happy("x")]).await.unwrap_err();
        assert_eq!(err.classifier(), "TransportError");
    }
}
