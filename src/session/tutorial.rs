//! Canned message source used when no broker is configured

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::Message;

/// Topic every tutorial message is published on
pub const TUTORIAL_TOPIC: &str = "one";

pub const TUTORIAL_NOTICE: &str =
    "Starting tutorial. Not connected to a Kafka broker; messages are being mocked.";

const ROUNDS: usize = 3;
const MESSAGES_PER_ROUND: usize = 3;
const PAUSE: Duration = Duration::from_secs(1);

/// Publish the tutorial script on a new channel.
///
/// Each round sends one message per second; the channel closes after the
/// last round or when `cancel` fires.
pub fn spawn_tutorial(capacity: usize, cancel: CancellationToken) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        let mut offset = 0;
        for _ in 0..ROUNDS {
            for _ in 0..MESSAGES_PER_ROUND {
                let msg = Message::from_record(TUTORIAL_TOPIC, 0, offset, None, Some(b"{}"), None);
                offset += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(msg) => if sent.is_err() { return },
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(PAUSE) => {}
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_script_length_and_pacing() {
        let start = tokio::time::Instant::now();
        let mut rx = spawn_tutorial(16, CancellationToken::new());
        let mut count = 0;
        while let Some(msg) = rx.recv().await {
            assert_eq!(msg.topic, TUTORIAL_TOPIC);
            assert_eq!(msg.value, serde_json::json!({}));
            count += 1;
        }
        assert_eq!(count, ROUNDS * MESSAGES_PER_ROUND);
        assert!(start.elapsed() >= PAUSE * (count as u32 - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_script() {
        let cancel = CancellationToken::new();
        let mut rx = spawn_tutorial(16, cancel.clone());
        assert!(rx.recv().await.is_some());
        cancel.cancel();
        while rx.recv().await.is_some() {}
    }
}
