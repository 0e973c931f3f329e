use tokio::sync::mpsc;

/// Receiver of items produced by background tasks (stream frames, poll results).
pub trait EventSink<T>: Send + Sync {
    fn emit(&self, item: T);
}

/// Forwards items into an unbounded channel; items sent after the receiver
/// is dropped are discarded.
pub struct ChannelSink<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

impl<T: Send> EventSink<T> for ChannelSink<T> {
    fn emit(&self, item: T) {
        let _ = self.tx.send(item);
    }
}
