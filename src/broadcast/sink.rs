use crate::error::SinkError;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Push channel to one dashboard subscriber
///
/// `write` must not block: the broadcaster calls it for every subscriber in
/// turn during a publish pass.
pub trait SubscriberSink: Send + Sync + 'static {
    fn write(&self, frame: &str) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel drained by the subscriber's socket task
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(depth: usize) -> (ChannelSink, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (ChannelSink { tx }, rx)
    }
}

impl SubscriberSink for ChannelSink {
    fn write(&self, frame: &str) -> Result<(), SinkError> {
        self.tx
            .try_send(Bytes::copy_from_slice(frame.as_bytes()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SinkError::Full,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.write("a").unwrap();
        sink.write("b").unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn test_channel_sink_full_and_closed() {
        let (sink, rx) = ChannelSink::new(1);
        sink.write("a").unwrap();
        assert_eq!(sink.write("b"), Err(SinkError::Full));
        drop(rx);
        assert_eq!(sink.write("c"), Err(SinkError::Closed));
    }
}
