//! Client liveness
//!
//! After configuration, everything the client sends is a heartbeat. The
//! reader forwards matching pings to the watchdog and cancels the session
//! when the client disconnects; the watchdog cancels it when pings stop.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{send_notice, ClientStream, SharedSink};
use crate::model::Event;

#[derive(Debug, Deserialize)]
struct Heartbeat {
    #[serde(default)]
    uuid: String,
}

/// Whether `text` is a heartbeat carrying `token`
pub fn is_ping(text: &str, token: &str) -> bool {
    serde_json::from_str::<Heartbeat>(text)
        .map(|hb| hb.uuid == token)
        .unwrap_or(false)
}

/// Read client frames until the client leaves or the session is cancelled
pub async fn read_heartbeats(
    mut stream: Box<dyn ClientStream>,
    token: Option<String>,
    pings: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next_text() => frame,
        };
        match frame {
            Ok(Some(text)) => {
                if token.as_deref().is_some_and(|t| is_ping(&text, t)) {
                    // A full channel already holds a pending ping.
                    let _ = pings.try_send(());
                } else {
                    debug!("ignoring client frame");
                }
            }
            Ok(None) => {
                info!("client disconnected");
                cancel.cancel();
                return;
            }
            Err(e) => {
                warn!(error = %e, "error reading from client");
                cancel.cancel();
                return;
            }
        }
    }
}

/// Cancel the session if no ping arrives within `timeout` of the last one.
///
/// The session is cancelled before the timeout notice is attempted, so a
/// client that stopped reading cannot hold teardown up.
pub async fn watchdog(
    timeout: Duration,
    mut pings: mpsc::Receiver<()>,
    sink: SharedSink,
    cancel: CancellationToken,
) {
    let mut pings_open = true;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            ping = pings.recv(), if pings_open => {
                if ping.is_none() {
                    pings_open = false;
                }
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "heartbeat timeout");
                cancel.cancel();
                let notice = Event::error(format!(
                    "Closing session: no heartbeat received for {}s (timeout)",
                    timeout.as_secs()
                ));
                send_notice(&sink, &[notice]).await;
                return;
            }
        }
    }
}
