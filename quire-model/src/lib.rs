//! Quire model: the leaf types shared by every other crate.
//!
//! - [`types`]: fixed-size byte newtypes (hashes, keys, signatures)
//! - [`seq`]: device names, sequence tuples and their total order
//! - [`canonical`]: deterministic JSON used for hashing and signing
//! - [`metadata`]: entry metadata, the two-phase builder, watermarks
//! - [`node_identity`]: the device's Ed25519 keypair
//! - [`clock`]: injectable wall clock

pub mod canonical;
pub mod clock;
pub mod metadata;
pub mod node_identity;
pub mod seq;
pub mod storage_config;
pub mod types;

pub use canonical::canonical_json;
pub use clock::{Clock, MockClock, SystemClock};
pub use metadata::{
    compute_id, AdminMeta, Entry, EntryId, MetaError, MetaPatch, Metadata, MetadataBuilder, Scope,
    UnsignedMeta, Watermark,
};
pub use node_identity::{NodeError, NodeIdentity};
pub use seq::{is_first_older, DeviceName, Seq, SeqError, Sequenced};
pub use storage_config::StorageConfig;
pub use types::{Hash, PubKey, Signature};
