//! Replica - Handle to a device's log and its sync connection

use crate::actor::{AddOptions, ReplicaCmd, ReplicaController, ReplicaEvent, Watermarks};
use crate::config::ReplicaConfig;
use crate::error::ReplicaError;
use quire_model::{Entry, EntryId, MetaPatch, Metadata, PubKey, Scope};
use quire_store::{LogStore, Page, PageQuery, StoreError};
use quire_sync::{Connection, ConnectionStatus, SyncProtocol, Transport, WatermarkCache};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A handle to a running replica.
///
/// Writes and connection changes go through the actor; reads go straight to
/// the store.
pub struct Replica<C: Connection> {
    store: Arc<LogStore>,
    tx: mpsc::Sender<ReplicaCmd<C>>,
    event_tx: broadcast::Sender<ReplicaEvent>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_token: CancellationToken,
}

impl<C: Connection> Clone for Replica<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tx: self.tx.clone(),
            event_tx: self.event_tx.clone(),
            status_rx: self.status_rx.clone(),
            shutdown_token: self.shutdown_token.clone(),
        }
    }
}

impl<C: Connection> std::fmt::Debug for Replica<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("device", self.store.device())
            .finish_non_exhaustive()
    }
}

/// Runner for the replica actor. Must be spawned as a tokio task.
pub struct ReplicaRunner<C: Connection> {
    actor: ReplicaController<C>,
    shutdown_token: CancellationToken,
}

impl<C: Connection> ReplicaRunner<C> {
    pub async fn run(self) {
        self.actor.run(self.shutdown_token).await;
    }
}

impl<C: Connection> Replica<C> {
    /// Build the actor around an opened store. The watermark cache is loaded
    /// here, so a replica taking over a store starts from its persisted state.
    pub fn new(
        store: Arc<LogStore>,
        config: &ReplicaConfig,
    ) -> Result<(Self, ReplicaRunner<C>), StoreError> {
        let (tx, rx) = mpsc::channel(config.command_queue);
        let (event_tx, _event_rx) = broadcast::channel(config.event_capacity);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let shutdown_token = CancellationToken::new();

        let protocol = SyncProtocol::new(store.device().clone(), config.sync.clone())
            .with_cache(WatermarkCache::load(&store)?);
        let actor =
            ReplicaController::new(store.clone(), protocol, rx, event_tx.clone(), status_tx);

        let runner = ReplicaRunner {
            actor,
            shutdown_token: shutdown_token.clone(),
        };
        let handle = Self {
            store,
            tx,
            event_tx,
            status_rx,
            shutdown_token,
        };
        Ok((handle, runner))
    }

    /// `new` plus `tokio::spawn` of the runner.
    pub fn spawn(
        store: Arc<LogStore>,
        config: &ReplicaConfig,
    ) -> Result<(Self, JoinHandle<()>), StoreError> {
        let (handle, runner) = Self::new(store, config)?;
        let join = tokio::spawn(runner.run());
        Ok((handle, join))
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Request actor shutdown (non-blocking).
    ///
    /// Queues a `Shutdown` behind pending commands; if the queue is full the
    /// actor is cancelled outright.
    pub fn shutdown(&self) {
        use tokio::sync::mpsc::error::TrySendError;

        match self.tx.try_send(ReplicaCmd::Shutdown) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.shutdown_token.cancel(),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Shut down and wait until the actor has closed its connection and exited.
    pub async fn close(&self) {
        self.shutdown();
        self.tx.closed().await;
    }

    // ==================== Writes ====================

    pub async fn add(&self, content: Value, options: AddOptions) -> Result<Metadata, ReplicaError> {
        self.request(|resp| ReplicaCmd::Add {
            content,
            options,
            resp,
        })
        .await?
    }

    /// Delete locally; with `sync`, also tell the peer.
    pub async fn remove(&self, id: EntryId, sync: bool) -> Result<Option<Entry>, ReplicaError> {
        self.request(|resp| ReplicaCmd::Remove { id, sync, resp })
            .await?
    }

    /// Local scope override. Never synced.
    pub async fn rescope(&self, id: EntryId, scope: Scope) -> Result<bool, ReplicaError> {
        self.change_meta(id, MetaPatch::rescope(scope)).await
    }

    pub async fn change_meta(&self, id: EntryId, patch: MetaPatch) -> Result<bool, ReplicaError> {
        self.request(|resp| ReplicaCmd::ChangeMeta { id, patch, resp })
            .await?
    }

    // ==================== Connection ====================

    /// Hand an open connection to the actor and run the handshake on it.
    pub async fn attach(&self, connection: C) -> Result<(), ReplicaError> {
        self.request(|resp| ReplicaCmd::Attach { connection, resp })
            .await?
    }

    /// Open a connection to `peer` and attach it.
    pub async fn connect<T>(&self, transport: &T, peer: &PubKey) -> Result<(), ReplicaError>
    where
        T: Transport<Connection = C>,
    {
        self.tx
            .send(ReplicaCmd::Connecting)
            .await
            .map_err(|_| ReplicaError::ChannelClosed)?;
        match transport.connect(peer).await {
            Ok(connection) => self.attach(connection).await,
            Err(err) => {
                warn!(%peer, error = %err, "connect failed");
                self.disconnect().await?;
                Err(err.into())
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), ReplicaError> {
        self.request(|resp| ReplicaCmd::Disconnect { resp }).await
    }

    /// Run the handshake again on the live connection.
    pub async fn resync(&self) -> Result<(), ReplicaError> {
        self.request(|resp| ReplicaCmd::Resync { resp }).await?
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Wait until the status satisfies `pred`.
    pub async fn wait_for_status(
        &self,
        pred: impl FnMut(&ConnectionStatus) -> bool,
    ) -> Result<ConnectionStatus, ReplicaError> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(pred)
            .await
            .map_err(|_| ReplicaError::ChannelClosed)?;
        Ok(*status)
    }

    /// Acks refused for moving `lastSynced` backwards or past `lastAdded`.
    pub async fn rejected_acks(&self) -> Result<u64, ReplicaError> {
        self.request(|resp| ReplicaCmd::RejectedAcks { resp }).await
    }

    // ==================== Reads ====================

    /// Subscribe to committed changes, local and remote.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.event_tx.subscribe()
    }

    pub async fn watermarks(&self) -> Result<Watermarks, ReplicaError> {
        self.request(|resp| ReplicaCmd::Watermarks { resp }).await?
    }

    pub fn by_id(&self, id: &EntryId) -> Result<Option<Entry>, ReplicaError> {
        Ok(self.store.by_id(id)?)
    }

    pub fn page(&self, query: &PageQuery) -> Result<Page, ReplicaError> {
        Ok(self.store.page(query)?)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> ReplicaCmd<C>,
    ) -> Result<R, ReplicaError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(make(resp_tx))
            .await
            .map_err(|_| ReplicaError::ChannelClosed)?;
        resp_rx.await.map_err(|_| ReplicaError::ChannelClosed)
    }
}
