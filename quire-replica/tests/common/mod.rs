#![allow(dead_code)]

use quire_model::{DeviceName, NodeIdentity, StorageConfig};
use quire_replica::{Replica, ReplicaConfig};
use quire_store::{LogIdentity, LogStore, StoreError};
use quire_sync::ChannelConnection;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type ChannelReplica = Replica<ChannelConnection>;

const PATIENCE: Duration = Duration::from_secs(5);

pub fn device(name: &str) -> DeviceName {
    DeviceName::new(name).unwrap()
}

pub fn identity(name: &str, seed: u8) -> LogIdentity {
    LogIdentity::signing(device(name), NodeIdentity::from_seed([seed; 32]))
}

pub fn memory_store(name: &str, seed: u8) -> Arc<LogStore> {
    Arc::new(LogStore::open(&StorageConfig::InMemory, identity(name, seed)).unwrap())
}

/// Opener for a file store under `dir`, as a leader would call it.
pub fn file_opener(
    dir: &Path,
    name: &str,
    seed: u8,
) -> impl Fn() -> Result<LogStore, StoreError> + Send + Sync + 'static {
    let config = StorageConfig::File(PathBuf::from(dir));
    let identity = identity(name, seed);
    move || LogStore::open(&config, identity.clone())
}

pub fn spawn_replica(store: Arc<LogStore>) -> ChannelReplica {
    let (replica, _actor) = Replica::spawn(store, &ReplicaConfig::default()).unwrap();
    replica
}

pub fn note(n: u64) -> Value {
    json!({ "note": n })
}

/// Connect two replicas over an in-memory pair and run both handshakes.
pub async fn link(a: &ChannelReplica, b: &ChannelReplica) {
    let (a_end, b_end) = ChannelConnection::pair(
        a.store().identity().author(),
        b.store().identity().author(),
    );
    b.attach(b_end).await.unwrap();
    a.attach(a_end).await.unwrap();
}

/// Wait until `replica`'s `lastSynced` reaches `local_seq`.
pub async fn wait_synced(replica: &ChannelReplica, local_seq: u64) {
    tokio::time::timeout(PATIENCE, async {
        loop {
            let watermarks = replica.watermarks().await.unwrap();
            if watermarks.last_synced.is_some_and(|w| w.local_seq >= local_seq) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("lastSynced never caught up");
}

/// Wait until `store` holds exactly `len` entries.
pub async fn wait_len(store: &LogStore, len: u64) {
    tokio::time::timeout(PATIENCE, async {
        loop {
            if store.len().unwrap() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("store never reached the expected size");
}
