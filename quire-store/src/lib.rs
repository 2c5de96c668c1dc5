//! Quire log store
//!
//! One [`LogStore`] per device. It is the only writer of `localSeq`, `seq`,
//! `id` and `prev` for its device, keeps the `lastAdded`/`lastSynced`
//! watermarks, and admits verified entries from other devices.

mod diff;
mod error;
mod keys;
mod log_store;
mod query;

pub use diff::DiffIter;
pub use error::StoreError;
pub use log_store::{
    AddOptions, AddOutcome, Conflict, IngestOutcome, LogIdentity, LogStore, PendingAdd, Prepared,
    Rejection, SyncedUpdate,
};
pub use query::{Cursor, Direction, IndexSelector, Page, PageQuery};
