//! Quire sync protocol
//!
//! - [`message`]: the four wire messages and their `[tag, body]` JSON framing
//! - [`session`]: per-connection status and in-flight accounting
//! - [`protocol`]: what to send on open, how to react to each inbound message
//! - [`transport`]: the duplex message channel the protocol runs over
//! - [`channel_transport`]: in-memory transport for tests and local replication

pub mod cache;
pub mod channel_transport;
pub mod error;
pub mod message;
pub mod protocol;
pub mod session;
pub mod transport;

pub use cache::WatermarkCache;
pub use channel_transport::{ChannelConnection, ChannelNetwork, ChannelTransport};
pub use error::SyncError;
pub use message::{Ack, EntryPayload, Hello, Remove, SyncMessage};
pub use protocol::{Reaction, SyncEvent, SyncOptions, SyncProtocol};
pub use session::{AckSlot, ConnectionStatus, SyncSession};
pub use transport::{Connection, Transport, TransportError};
