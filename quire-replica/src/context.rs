//! DeviceContext - one participant among several sharing a device.
//!
//! Every context competes for the device lock. The winner opens the store,
//! runs the replica actor and connects to the authority; it also serves add
//! requests from the bus and republishes every committed entry there.
//! Losers forward their adds over the bus and keep waiting for the lock, so
//! one of them takes over when the leader resigns.

use crate::actor::{AddOptions, ReplicaEvent};
use crate::bus::{Broadcast, BusMessage};
use crate::config::ReplicaConfig;
use crate::error::ReplicaError;
use crate::handle::Replica;
use crate::leader::{LeaderGuard, LeaderLock};
use quire_model::{DeviceName, Metadata, PubKey};
use quire_store::{LogStore, StoreError};
use quire_sync::{Connection, Transport};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Opens the device's store when this context becomes leader.
pub trait StoreOpener: Send + Sync + 'static {
    fn open(&self) -> Result<LogStore, StoreError>;
}

impl<F> StoreOpener for F
where
    F: Fn() -> Result<LogStore, StoreError> + Send + Sync + 'static,
{
    fn open(&self) -> Result<LogStore, StoreError> {
        self()
    }
}

/// The authority a leader connects to.
#[derive(Debug)]
pub struct Uplink<T> {
    pub transport: Arc<T>,
    pub peer: PubKey,
}

impl<T> Clone for Uplink<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            peer: self.peer,
        }
    }
}

pub struct DeviceContext<C: Connection, B: Broadcast> {
    device: DeviceName,
    namespace: String,
    bus: Arc<B>,
    config: ReplicaConfig,
    leader_rx: watch::Receiver<Option<Replica<C>>>,
    resign: CancellationToken,
    campaign: Option<JoinHandle<()>>,
}

impl<C: Connection, B: Broadcast> DeviceContext<C, B> {
    /// Join the device. If the lock is free this context leads right away and
    /// store or connect errors are returned; otherwise it follows and keeps
    /// waiting for the lock in the background.
    pub async fn join<L, O, T>(
        device: DeviceName,
        locks: Arc<L>,
        bus: Arc<B>,
        opener: O,
        uplink: Option<Uplink<T>>,
        config: ReplicaConfig,
    ) -> Result<Self, ReplicaError>
    where
        L: LeaderLock,
        O: StoreOpener,
        T: Transport<Connection = C>,
    {
        let namespace = format!("quire/{device}");
        let (leader_tx, leader_rx) = watch::channel(None);
        let resign = CancellationToken::new();

        let leading = Leading {
            namespace: namespace.clone(),
            bus: bus.clone(),
            leader_tx,
            resign: resign.clone(),
        };

        let campaign = match locks.try_acquire(&namespace) {
            Some(guard) => {
                let leadership = Leadership::start(&opener, uplink.as_ref(), &config).await?;
                info!(%device, "leading");
                let requests = leading.announce(&leadership);
                tokio::spawn(leading.serve(leadership, guard, requests))
            }
            None => {
                info!(%device, "following");
                tokio::spawn(leading.campaign(locks, opener, uplink, config.clone()))
            }
        };

        Ok(Self {
            device,
            namespace,
            bus,
            config,
            leader_rx,
            resign,
            campaign: Some(campaign),
        })
    }

    pub fn device(&self) -> &DeviceName {
        &self.device
    }

    pub fn is_leader(&self) -> bool {
        self.leader_rx.borrow().is_some()
    }

    /// The running replica while this context leads.
    pub fn replica(&self) -> Option<Replica<C>> {
        self.leader_rx.borrow().clone()
    }

    /// Wait until this context leads.
    pub async fn wait_for_leadership(&self) -> Result<Replica<C>, ReplicaError> {
        let mut rx = self.leader_rx.clone();
        let current = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ReplicaError::ChannelClosed)?;
        current.clone().ok_or(ReplicaError::ChannelClosed)
    }

    /// Entries committed by whichever context leads, plus forwarding traffic.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe(&self.namespace)
    }

    /// Add through the local replica when leading, through the leader otherwise.
    pub async fn add(&self, content: Value, options: AddOptions) -> Result<Metadata, ReplicaError> {
        let leader = self.replica();
        match leader {
            Some(replica) => replica.add(content, options).await,
            None => self.forward(content, options).await,
        }
    }

    async fn forward(&self, content: Value, options: AddOptions) -> Result<Metadata, ReplicaError> {
        let request_id = Uuid::new_v4();
        let mut replies = self.bus.subscribe(&self.namespace);
        self.bus.publish(
            &self.namespace,
            BusMessage::AddRequest {
                request_id,
                content,
                scope: options.scope,
                sync: options.sync,
            },
        );
        debug!(%request_id, "add forwarded to leader");

        let answer = async {
            loop {
                match replies.recv().await {
                    Ok(BusMessage::Added { request_id: id, metadata }) if id == request_id => {
                        return Ok(metadata);
                    }
                    Ok(BusMessage::AddFailed { request_id: id, reason }) if id == request_id => {
                        return Err(ReplicaError::Forwarded(reason));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus lagged while waiting for leader");
                    }
                    Err(RecvError::Closed) => return Err(ReplicaError::ChannelClosed),
                }
            }
        };
        let timeout = self.config.forward_timeout;
        tokio::time::timeout(timeout, answer)
            .await
            .map_err(|_| ReplicaError::ForwardTimeout(timeout))?
    }

    /// Stop leading or campaigning. A leader closes its connection and store
    /// before the lock is released.
    pub async fn resign(mut self) {
        self.resign.cancel();
        if let Some(campaign) = self.campaign.take() {
            let _ = campaign.await;
        }
        info!(device = %self.device, "resigned");
    }
}

impl<C: Connection, B: Broadcast> Drop for DeviceContext<C, B> {
    fn drop(&mut self) {
        self.resign.cancel();
    }
}

/// The actor and store owned by the leading context.
struct Leadership<C: Connection> {
    store: Arc<LogStore>,
    replica: Replica<C>,
    events: broadcast::Receiver<ReplicaEvent>,
    actor: JoinHandle<()>,
}

impl<C: Connection> Leadership<C> {
    async fn start<O, T>(
        opener: &O,
        uplink: Option<&Uplink<T>>,
        config: &ReplicaConfig,
    ) -> Result<Self, ReplicaError>
    where
        O: StoreOpener,
        T: Transport<Connection = C>,
    {
        let store = Arc::new(opener.open()?.with_diff_batch(config.diff_batch));
        let (replica, actor) = Replica::spawn(store.clone(), config)?;
        let events = replica.subscribe();

        if let Some(uplink) = uplink {
            // Offline is a normal state: the next connect catches up.
            if let Err(err) = replica.connect(uplink.transport.as_ref(), &uplink.peer).await {
                warn!(peer = %uplink.peer, error = %err, "leader starting offline");
            }
        }
        Ok(Self {
            store,
            replica,
            events,
            actor,
        })
    }

    /// A follower's add counts as done once it is durable here.
    fn reply_to_add(
        &self,
        request_id: Uuid,
        result: Result<Metadata, ReplicaError>,
    ) -> BusMessage {
        let failed = |reason: String| BusMessage::AddFailed { request_id, reason };
        match result {
            Ok(metadata) => BusMessage::Added {
                request_id,
                metadata,
            },
            Err(ReplicaError::NotPropagated { id, source }) => match self.store.by_id(&id) {
                Ok(Some(entry)) => {
                    debug!(%id, error = %source, "forwarded add stored, push deferred");
                    BusMessage::Added {
                        request_id,
                        metadata: entry.metadata,
                    }
                }
                Ok(None) => failed(format!("{id} vanished before reply")),
                Err(err) => failed(err.to_string()),
            },
            Err(err) => failed(err.to_string()),
        }
    }

    async fn stop(self) {
        self.replica.close().await;
        let _ = self.actor.await;
        self.store.close();
    }
}

/// What the background task needs to lead.
struct Leading<C: Connection, B: Broadcast> {
    namespace: String,
    bus: Arc<B>,
    leader_tx: watch::Sender<Option<Replica<C>>>,
    resign: CancellationToken,
}

impl<C: Connection, B: Broadcast> Leading<C, B> {
    async fn campaign<L, O, T>(
        self,
        locks: Arc<L>,
        opener: O,
        uplink: Option<Uplink<T>>,
        config: ReplicaConfig,
    ) where
        L: LeaderLock,
        O: StoreOpener,
        T: Transport<Connection = C>,
    {
        let guard = tokio::select! {
            biased;
            _ = self.resign.cancelled() => return,
            guard = locks.acquire(&self.namespace) => guard,
        };
        match Leadership::start(&opener, uplink.as_ref(), &config).await {
            Ok(leadership) => {
                info!(namespace = %self.namespace, "took over leadership");
                let requests = self.announce(&leadership);
                self.serve(leadership, guard, requests).await;
            }
            Err(err) => {
                error!(namespace = %self.namespace, error = %err, "could not take over");
            }
        }
    }

    /// Start listening for add requests, then make the replica visible.
    fn announce(&self, leadership: &Leadership<C>) -> broadcast::Receiver<BusMessage> {
        let requests = self.bus.subscribe(&self.namespace);
        self.leader_tx.send_replace(Some(leadership.replica.clone()));
        requests
    }

    async fn serve(
        self,
        mut leadership: Leadership<C>,
        guard: LeaderGuard,
        mut requests: broadcast::Receiver<BusMessage>,
    ) {
        loop {
            tokio::select! {
                _ = self.resign.cancelled() => break,

                message = requests.recv() => match message {
                    Ok(BusMessage::AddRequest { request_id, content, scope, sync }) => {
                        let options = AddOptions { scope, sync };
                        let result = leadership.replica.add(content, options).await;
                        let reply = leadership.reply_to_add(request_id, result);
                        self.bus.publish(&self.namespace, reply);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus lagged, add requests dropped")
                    }
                    Err(RecvError::Closed) => break,
                },

                event = leadership.events.recv() => match event {
                    Ok(ReplicaEvent::Added(entry) | ReplicaEvent::Received(entry)) => {
                        self.bus.publish(&self.namespace, BusMessage::Committed { entry });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "replica events lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.leader_tx.send_replace(None);
        leadership.stop().await;
        drop(guard);
        debug!(namespace = %self.namespace, "leadership ended");
    }
}
