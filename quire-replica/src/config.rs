//! Tunables for the replica actor and device context.

use quire_sync::SyncOptions;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Capacity of the command channel between handles and the actor.
    pub command_queue: usize,
    /// Capacity of the committed-entry broadcast. Slow subscribers lag.
    pub event_capacity: usize,
    /// How long a follower waits for the leader to answer a forwarded add.
    pub forward_timeout: Duration,
    /// Entries per range scan when streaming diffs.
    pub diff_batch: usize,
    pub sync: SyncOptions,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            command_queue: 32,
            event_capacity: 256,
            forward_timeout: Duration::from_secs(5),
            diff_batch: 64,
            sync: SyncOptions::default(),
        }
    }
}
