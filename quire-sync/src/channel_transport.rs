//! ChannelTransport: in-memory Transport implementation
//!
//! Frames travel over bounded `mpsc` channels. A shared [`ChannelNetwork`]
//! routes `connect` calls to the accept queue of the target public key.

use crate::transport::{Connection, Transport, TransportError};
use quire_model::PubKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const FRAME_QUEUE: usize = 256;

/// Shared broker, routes connections between ChannelTransport instances.
#[derive(Clone, Debug, Default)]
pub struct ChannelNetwork {
    peers: Arc<Mutex<HashMap<PubKey, mpsc::Sender<ChannelConnection>>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, pubkey: PubKey, accept_tx: mpsc::Sender<ChannelConnection>) {
        self.peers.lock().await.insert(pubkey, accept_tx);
    }
}

#[derive(Clone, Debug)]
pub struct ChannelTransport {
    pubkey: PubKey,
    network: ChannelNetwork,
    accept_rx: Arc<Mutex<mpsc::Receiver<ChannelConnection>>>,
}

impl ChannelTransport {
    pub async fn new(pubkey: PubKey, network: &ChannelNetwork) -> Self {
        let (accept_tx, accept_rx) = mpsc::channel(16);
        network.register(pubkey, accept_tx).await;
        Self {
            pubkey,
            network: network.clone(),
            accept_rx: Arc::new(Mutex::new(accept_rx)),
        }
    }
}

impl Transport for ChannelTransport {
    type Connection = ChannelConnection;

    fn public_key(&self) -> PubKey {
        self.pubkey
    }

    async fn connect(&self, peer: &PubKey) -> Result<ChannelConnection, TransportError> {
        let accept_tx = self
            .network
            .peers
            .lock()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("peer {peer} not found in network")))?;

        let (local, remote) = ChannelConnection::pair(self.pubkey, *peer);
        accept_tx
            .send(remote)
            .await
            .map_err(|_| TransportError::Connect(format!("peer {peer} is not accepting")))?;
        Ok(local)
    }

    async fn accept(&self) -> Option<ChannelConnection> {
        self.accept_rx.lock().await.recv().await
    }
}

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct ChannelConnection {
    remote: PubKey,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelConnection {
    /// Two connected ends: the first belongs to `a` and talks to `b`.
    pub fn pair(a: PubKey, b: PubKey) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(FRAME_QUEUE);
        let (b_tx, a_rx) = mpsc::channel(FRAME_QUEUE);
        (
            Self {
                remote: b,
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                remote: a,
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

impl Connection for ChannelConnection {
    fn remote_public_key(&self) -> PubKey {
        self.remote
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}
