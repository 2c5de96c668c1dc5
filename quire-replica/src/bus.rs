//! Pub/sub between contexts of one device.

use quire_model::{Entry, Metadata, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BusMessage {
    /// A follower asks the leader to add an entry.
    #[serde(rename_all = "camelCase")]
    AddRequest {
        request_id: Uuid,
        content: Value,
        scope: Option<Scope>,
        sync: bool,
    },
    #[serde(rename_all = "camelCase")]
    Added { request_id: Uuid, metadata: Metadata },
    #[serde(rename_all = "camelCase")]
    AddFailed { request_id: Uuid, reason: String },
    /// An entry the leader committed, local or remote.
    Committed { entry: Entry },
}

/// Publish/subscribe scoped per namespace. Publishers also receive their own messages.
pub trait Broadcast: Send + Sync + 'static {
    fn publish(&self, namespace: &str, message: BusMessage);

    fn subscribe(&self, namespace: &str) -> broadcast::Receiver<BusMessage>;
}

/// In-process bus: one tokio broadcast channel per namespace.
#[derive(Clone, Debug, Default)]
pub struct LocalBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<BusMessage>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, namespace: &str) -> broadcast::Sender<BusMessage> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(namespace.to_string())
            .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
            .clone()
    }
}

impl Broadcast for LocalBus {
    fn publish(&self, namespace: &str, message: BusMessage) {
        // No subscribers is not an error
        let _ = self.sender(namespace).send(message);
    }

    fn subscribe(&self, namespace: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(namespace).subscribe()
    }
}
