//! Quire Replica - the per-device coordinator
//!
//! - [`Replica`]: handle to the actor that owns the sync connection
//! - [`ReplicaController`]: the actor itself
//! - [`DeviceContext`]: leader election and follower forwarding across contexts
//!   sharing one device
//! - [`LeaderLock`] / [`Broadcast`]: the seams to the host's mutual exclusion
//!   and pub/sub, with in-process implementations

pub mod actor;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod leader;

pub use actor::{AddOptions, ReplicaCmd, ReplicaController, ReplicaEvent, Watermarks};
pub use bus::{Broadcast, BusMessage, LocalBus};
pub use config::ReplicaConfig;
pub use context::{DeviceContext, StoreOpener, Uplink};
pub use error::ReplicaError;
pub use handle::{Replica, ReplicaRunner};
pub use leader::{LeaderGuard, LeaderLock, LocalLocks};
