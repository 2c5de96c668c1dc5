//! Transport abstraction
//!
//! The sync protocol needs a duplex, ordered, message-oriented channel to the
//! remote authority and nothing else. Opening a connection is the "open"
//! event, every `recv` result is a "message" event, and `recv` returning
//! `None` is the "close" event.

use quire_model::PubKey;
use std::fmt;
use std::future::Future;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// One open connection. Frames arrive in the order they were sent.
pub trait Connection: Send + 'static {
    fn remote_public_key(&self) -> PubKey;

    fn send(&mut self, frame: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound frame, or `None` once the connection is closed.
    ///
    /// Must be cancel-safe: it is polled inside `select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;

    /// Close both directions. The peer's `recv` yields `None`.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens outbound connections and accepts inbound ones.
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    type Connection: Connection;

    fn public_key(&self) -> PubKey;

    fn connect(
        &self,
        peer: &PubKey,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Next inbound connection, or `None` on shutdown.
    fn accept(&self) -> impl Future<Output = Option<Self::Connection>> + Send;
}
