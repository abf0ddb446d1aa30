//! Outbound transport seam.

use chunkwire_core::Outbound;
use tokio::sync::mpsc;

#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&self, message: Outbound) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// Transport that queues outbound messages on an mpsc channel.
/// The connection's writer task owns the receiving end.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// A transport plus the receiver its messages land on.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Transport for ChannelTransport {
    async fn send(&self, message: Outbound) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}
