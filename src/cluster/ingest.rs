//! Partition fan-in

use tokio::sync::mpsc;

use crate::model::Message;

/// Merge partition channels into one.
///
/// One forwarding task runs per input; it ends when its input closes or the
/// output receiver is dropped. The output closes once every input has.
pub fn join_messages(
    channels: Vec<mpsc::Receiver<Message>>,
    capacity: usize,
) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    for mut channel in channels {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = channel.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
    }
    rx
}
