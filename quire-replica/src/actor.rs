//! ReplicaController - actor that owns the sync protocol and the live connection
//!
//! Local writes, inbound frames and outbound sends for one device all go
//! through this loop, so handling a message, reading watermarks and sending
//! never interleave.

use crate::error::ReplicaError;
use quire_model::{Entry, EntryId, MetaPatch, Metadata, Scope, Watermark};
use quire_store::{AddOutcome, LogStore};
use quire_sync::{ConnectionStatus, Connection, SyncEvent, SyncMessage, SyncProtocol};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for a local add through the replica.
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub scope: Option<Scope>,
    /// Push the new entry (and any unsent backlog) if connected.
    pub sync: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            scope: None,
            sync: true,
        }
    }
}

impl AddOptions {
    pub fn scoped(scope: Scope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            sync: false,
            ..Self::default()
        }
    }
}

/// `lastAdded` and `lastSynced` as the actor currently sees them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermarks {
    pub last_added: Option<Watermark>,
    pub last_synced: Option<Watermark>,
}

impl Watermarks {
    /// Own entries not yet acknowledged by the authority.
    pub fn pending(&self) -> u64 {
        let added = self.last_added.as_ref().map_or(0, |w| w.local_seq + 1);
        let synced = self.last_synced.as_ref().map_or(0, |w| w.local_seq + 1);
        added.saturating_sub(synced)
    }
}

/// Committed changes, local and remote.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    /// Added on this device.
    Added(Entry),
    /// Arrived from the peer.
    Received(Entry),
    Removed(EntryId),
    Synced(Watermark),
}

/// Commands sent to the ReplicaController actor
pub enum ReplicaCmd<C> {
    Add {
        content: Value,
        options: AddOptions,
        resp: oneshot::Sender<Result<Metadata, ReplicaError>>,
    },
    Remove {
        id: EntryId,
        sync: bool,
        resp: oneshot::Sender<Result<Option<Entry>, ReplicaError>>,
    },
    ChangeMeta {
        id: EntryId,
        patch: MetaPatch,
        resp: oneshot::Sender<Result<bool, ReplicaError>>,
    },
    /// An outbound connection attempt started.
    Connecting,
    /// Take over a freshly opened connection and run the handshake.
    Attach {
        connection: C,
        resp: oneshot::Sender<Result<(), ReplicaError>>,
    },
    Disconnect {
        resp: oneshot::Sender<()>,
    },
    Resync {
        resp: oneshot::Sender<Result<(), ReplicaError>>,
    },
    Watermarks {
        resp: oneshot::Sender<Result<Watermarks, ReplicaError>>,
    },
    RejectedAcks {
        resp: oneshot::Sender<u64>,
    },
    /// Shutdown the actor
    Shutdown,
}

pub struct ReplicaController<C: Connection> {
    store: Arc<LogStore>,
    protocol: SyncProtocol,
    connection: Option<C>,

    rx: mpsc::Receiver<ReplicaCmd<C>>,
    event_tx: broadcast::Sender<ReplicaEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl<C: Connection> ReplicaController<C> {
    pub fn new(
        store: Arc<LogStore>,
        protocol: SyncProtocol,
        rx: mpsc::Receiver<ReplicaCmd<C>>,
        event_tx: broadcast::Sender<ReplicaEvent>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            store,
            protocol,
            connection: None,
            rx,
            event_tx,
            status_tx,
        }
    }

    /// Run the actor loop until `Shutdown`, the last handle dropping, or cancellation.
    pub async fn run(mut self, shutdown_token: CancellationToken) {
        debug!(device = %self.store.device(), "replica actor started");
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,

                cmd = self.rx.recv() => match cmd {
                    Some(ReplicaCmd::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },

                frame = next_frame(&mut self.connection) => match frame {
                    Some(frame) => self.on_frame(&frame).await,
                    None => {
                        info!("connection closed by peer");
                        self.drop_connection().await;
                    }
                },
            }
        }
        self.drop_connection().await;
        debug!(device = %self.store.device(), "replica actor stopped");
    }

    async fn handle_command(&mut self, cmd: ReplicaCmd<C>) {
        match cmd {
            ReplicaCmd::Add {
                content,
                options,
                resp,
            } => {
                let _ = resp.send(self.add(content, options).await);
            }
            ReplicaCmd::Remove { id, sync, resp } => {
                let _ = resp.send(self.remove(id, sync).await);
            }
            ReplicaCmd::ChangeMeta { id, patch, resp } => {
                let result = self.store.change_meta(&id, &patch).map_err(Into::into);
                let _ = resp.send(result);
            }
            ReplicaCmd::Connecting => {
                self.drop_connection().await;
                self.protocol.connecting();
                self.publish_status();
            }
            ReplicaCmd::Attach { connection, resp } => {
                let _ = resp.send(self.attach(connection).await);
            }
            ReplicaCmd::Disconnect { resp } => {
                self.drop_connection().await;
                let _ = resp.send(());
            }
            ReplicaCmd::Resync { resp } => {
                let _ = resp.send(self.handshake().await);
            }
            ReplicaCmd::Watermarks { resp } => {
                let _ = resp.send(self.watermarks());
            }
            ReplicaCmd::RejectedAcks { resp } => {
                let _ = resp.send(self.protocol.session().rejected_acks());
            }
            ReplicaCmd::Shutdown => {
                // Handled in select! above
            }
        }
    }

    async fn add(&mut self, content: Value, options: AddOptions) -> Result<Metadata, ReplicaError> {
        let store_options = match options.scope {
            Some(scope) => quire_store::AddOptions::scoped(scope),
            None => quire_store::AddOptions::default(),
        };
        let metadata = match self.store.add(content.clone(), store_options)? {
            AddOutcome::Added(metadata) => metadata,
            AddOutcome::AlreadyExists(conflict) => {
                return Err(ReplicaError::AlreadyExists(conflict))
            }
        };
        self.protocol.local_added(&metadata);
        let _ = self
            .event_tx
            .send(ReplicaEvent::Added(Entry::new(metadata.clone(), content)));

        if options.sync && self.connection.is_some() {
            if let Err(err) = self.push_backlog().await {
                warn!(error = %err, local_seq = metadata.local_seq(), "push after add failed");
                return Err(ReplicaError::NotPropagated {
                    id: metadata.id,
                    source: Box::new(err),
                });
            }
        }
        Ok(metadata)
    }

    async fn remove(&mut self, id: EntryId, sync: bool) -> Result<Option<Entry>, ReplicaError> {
        let removed = self.store.remove(&id)?;
        if removed.is_some() {
            let _ = self.event_tx.send(ReplicaEvent::Removed(id));
            if sync && self.connection.is_some() {
                let message = SyncMessage::Remove(quire_sync::Remove { id });
                if let Err(err) = self.send_all(vec![message]).await {
                    warn!(error = %err, %id, "remove not propagated");
                    return Err(ReplicaError::NotPropagated {
                        id,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(removed)
    }

    async fn attach(&mut self, connection: C) -> Result<(), ReplicaError> {
        if self.connection.is_some() {
            self.drop_connection().await;
        }
        info!(remote = %connection.remote_public_key(), "connection attached");
        self.connection = Some(connection);
        self.handshake().await
    }

    /// Send `hello` on the live connection. Everything after `lastSynced`
    /// rides along, so no separate backlog push follows.
    async fn handshake(&mut self) -> Result<(), ReplicaError> {
        if self.connection.is_none() {
            return Err(ReplicaError::NotConnected);
        }
        let hello = self.protocol.open(&self.store)?;
        self.publish_status();
        self.send_all(vec![hello]).await
    }

    async fn push_backlog(&mut self) -> Result<(), ReplicaError> {
        let messages = self.protocol.outgoing(&self.store)?;
        self.send_all(messages).await
    }

    async fn on_frame(&mut self, frame: &[u8]) {
        let reaction = match self.protocol.handle_frame(&self.store, frame) {
            Ok(reaction) => reaction,
            Err(err) => {
                warn!(error = %err, "failed to handle frame");
                return;
            }
        };
        for event in reaction.events {
            let event = match event {
                SyncEvent::Received(entry) => ReplicaEvent::Received(entry),
                SyncEvent::Removed(id) => ReplicaEvent::Removed(id),
                SyncEvent::Synced(watermark) => {
                    debug!(local_seq = watermark.local_seq, "lastSynced advanced");
                    ReplicaEvent::Synced(watermark)
                }
            };
            let _ = self.event_tx.send(event);
        }
        if let Err(err) = self.send_all(reaction.replies).await {
            warn!(error = %err, "failed to send replies");
        }
        self.publish_status();
    }

    /// Send in order, recording each message once it is on the wire.
    /// A failed send drops the connection.
    async fn send_all(&mut self, messages: Vec<SyncMessage>) -> Result<(), ReplicaError> {
        for message in messages {
            let frame = message.encode()?;
            let Some(connection) = self.connection.as_mut() else {
                return Err(ReplicaError::NotConnected);
            };
            if let Err(err) = connection.send(frame).await {
                self.drop_connection().await;
                return Err(err.into());
            }
            self.protocol.sent(&message);
        }
        self.publish_status();
        Ok(())
    }

    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.protocol.closed();
        self.publish_status();
    }

    fn watermarks(&mut self) -> Result<Watermarks, ReplicaError> {
        let cache = self.protocol.cache();
        Ok(Watermarks {
            last_added: cache.last_added(&self.store)?,
            last_synced: cache.last_synced(&self.store)?,
        })
    }

    fn publish_status(&self) {
        let status = self.protocol.session().status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

/// Next inbound frame, or pending forever while there is no connection.
async fn next_frame<C: Connection>(connection: &mut Option<C>) -> Option<Vec<u8>> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}
