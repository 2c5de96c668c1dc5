use quire_model::EntryId;
use quire_store::{Conflict, StoreError};
use quire_sync::{SyncError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in Replica operations
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Entry already exists: {0:?}")]
    AlreadyExists(Conflict),

    #[error("Not connected")]
    NotConnected,

    /// The write is durable here but could not be sent; it goes out with the
    /// next `hello`.
    #[error("{id} stored locally but not sent: {source}")]
    NotPropagated {
        id: EntryId,
        #[source]
        source: Box<ReplicaError>,
    },

    #[error("No leader answered within {0:?}")]
    ForwardTimeout(Duration),

    #[error("Leader refused the add: {0}")]
    Forwarded(String),
}
