//! Per-connection sync state.

use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// At least one message is waiting for an ack.
    Sending,
    /// Everything sent so far has been acknowledged.
    Synchronized,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::Sending | ConnectionStatus::Synchronized
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Sending => "sending",
            ConnectionStatus::Synchronized => "synchronized",
        };
        f.write_str(s)
    }
}

/// What an outstanding ack answers for. Acks arrive in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSlot {
    /// An entry of another device. Its ack only balances the count.
    Foreign,
    /// Own entries up to localSeq `covers`. A held-back slot was sent behind
    /// an own entry the peer refused, so its ack must not move `lastSynced`.
    Own { covers: u64, held_back: bool },
}

impl AckSlot {
    pub fn own(covers: u64) -> Self {
        AckSlot::Own {
            covers,
            held_back: false,
        }
    }
}

/// Status, outstanding acks and send position of one connection.
///
/// ```text
/// Disconnected → Connecting → Connected → Sending ⇄ Synchronized
///       ↑______________________ close from any state ___________|
/// ```
#[derive(Debug, Clone)]
pub struct SyncSession {
    status: ConnectionStatus,
    awaiting: VecDeque<AckSlot>,
    /// Highest own localSeq put on the wire on this connection.
    last_sent: Option<u64>,
    /// An own entry was refused and no `hello` has been sent since.
    gap: bool,
    rejected_acks: u64,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            awaiting: VecDeque::new(),
            last_sent: None,
            gap: false,
            rejected_acks: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn in_flight(&self) -> usize {
        self.awaiting.len()
    }

    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    pub fn has_gap(&self) -> bool {
        self.gap
    }

    /// Acks that were refused because they would have moved `lastSynced` backwards
    /// or past `lastAdded`.
    pub fn rejected_acks(&self) -> u64 {
        self.rejected_acks
    }

    pub fn connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// Transport is open. A fresh connection starts with nothing outstanding;
    /// reopening a live one (resync) keeps the acks it is still owed.
    pub fn opened(&mut self) {
        if self.status.is_connected() {
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.awaiting.clear();
        self.last_sent = None;
        self.gap = false;
    }

    /// Record a message that made it onto the wire, with the ack it expects.
    pub fn sent(&mut self, slot: Option<AckSlot>) {
        if !self.status.is_connected() {
            return;
        }
        match slot {
            Some(slot) => {
                let slot = match slot {
                    AckSlot::Own { covers, .. } => AckSlot::Own {
                        covers,
                        held_back: self.gap,
                    },
                    foreign => foreign,
                };
                self.awaiting.push_back(slot);
                self.status = ConnectionStatus::Sending;
            }
            None if self.awaiting.is_empty() => self.status = ConnectionStatus::Synchronized,
            None => {}
        }
    }

    pub fn sent_own(&mut self, local_seq: u64) {
        self.last_sent = Some(self.last_sent.map_or(local_seq, |s| s.max(local_seq)));
    }

    /// The slot this ack answers, or `None` for an ack nothing was waiting for.
    pub fn acked(&mut self) -> Option<AckSlot> {
        let slot = self.awaiting.pop_front()?;
        if self.awaiting.is_empty() && self.status == ConnectionStatus::Sending {
            self.status = ConnectionStatus::Synchronized;
        }
        Some(slot)
    }

    /// The peer refused an own entry. Every own slot still outstanding, and
    /// every one sent until the next `hello`, is held back.
    pub fn open_gap(&mut self) {
        self.gap = true;
        for slot in &mut self.awaiting {
            if let AckSlot::Own { held_back, .. } = slot {
                *held_back = true;
            }
        }
    }

    /// A `hello` restarts from `lastSynced`, so slots sent after it are trusted again.
    pub fn close_gap(&mut self) {
        self.gap = false;
    }

    pub fn reject_ack(&mut self) {
        self.rejected_acks += 1;
    }

    /// Transport closed, from any state. Counters reset; watermarks live in the store.
    pub fn closed(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.awaiting.clear();
        self.last_sent = None;
        self.gap = false;
    }
}
