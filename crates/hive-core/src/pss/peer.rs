//! Transport abstraction for delivering envelopes to connected peers.
//!
//! The router does not own connections. Whatever manages them registers a
//! [`PeerSender`] per overlay address with [`Router::add_peer`] and removes
//! it when the connection closes.
//!
//! [`Router::add_peer`]: super::Router::add_peer

use crate::message::Envelope;
use async_trait::async_trait;
use std::borrow::Cow;
use tokio::sync::mpsc;

/// Transport errors
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection is closed
    #[error("connection closed")]
    Closed,

    /// Peer cannot accept more envelopes right now
    #[error("peer busy")]
    Busy,

    /// Transport-specific failure
    #[error("transport error: {0}")]
    Other(Cow<'static, str>),
}

/// Sends envelopes to one connected peer.
#[async_trait]
pub trait PeerSender: Send + Sync {
    /// Deliver `envelope` to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the envelope could not be handed to the
    /// connection.
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// In-process [`PeerSender`] backed by a bounded channel.
///
/// Used by simulations: the receiving side feeds envelopes into another
/// router's [`handle`](super::Router::handle).
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelSender {
    /// Create a sender and its receiving end.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PeerSender for ChannelSender {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.tx.try_send(envelope.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Busy,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}
