//! The hello/ack protocol, independent of any I/O.
//!
//! [`SyncProtocol`] decides what to send and how to react; the caller moves
//! frames over a [`Connection`](crate::transport::Connection) and reports back
//! with [`SyncProtocol::sent`] once a message is on the wire.
//!
//! On open each side sends one `hello` carrying its `lastAdded`, the entries
//! after its `lastSynced`, and its per-device heads. The receiver admits the
//! carried entries, acks the highest one it now holds, and pushes back every
//! entry the sender's heads show it is missing.

use crate::cache::WatermarkCache;
use crate::error::SyncError;
use crate::message::{Ack, EntryPayload, Hello, Remove, SyncMessage};
use crate::session::{AckSlot, SyncSession};
use quire_model::{DeviceName, Entry, EntryId, Metadata, Watermark};
use quire_store::{IngestOutcome, LogStore, StoreError, SyncedUpdate};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Send per-device heads in `hello` so the peer can push back what we lack.
    pub advertise_heads: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            advertise_heads: true,
        }
    }
}

/// Something the local side should know about after handling a message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A remote entry was stored.
    Received(Entry),
    Removed(EntryId),
    /// `lastSynced` advanced.
    Synced(Watermark),
}

/// Messages to send back and events to publish.
#[derive(Debug, Default)]
pub struct Reaction {
    pub replies: Vec<SyncMessage>,
    pub events: Vec<SyncEvent>,
}

pub struct SyncProtocol {
    device: DeviceName,
    session: SyncSession,
    cache: WatermarkCache,
    options: SyncOptions,
}

impl SyncProtocol {
    pub fn new(device: DeviceName, options: SyncOptions) -> Self {
        Self {
            device,
            session: SyncSession::new(),
            cache: WatermarkCache::default(),
            options,
        }
    }

    pub fn with_cache(mut self, cache: WatermarkCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn cache(&mut self) -> &mut WatermarkCache {
        &mut self.cache
    }

    pub fn connecting(&mut self) {
        self.session.connecting();
    }

    /// The transport just opened, or a live one is being resynced. Returns the
    /// opening `hello`.
    pub fn open(&mut self, store: &LogStore) -> Result<SyncMessage, SyncError> {
        self.session.opened();
        Ok(SyncMessage::Hello(self.hello(store)?))
    }

    pub fn closed(&mut self) {
        self.session.closed();
    }

    /// `hello` for the current watermarks.
    ///
    /// Carries exactly the entries after `lastSynced` when `lastAdded` is
    /// ahead of it, and no entries otherwise.
    pub fn hello(&mut self, store: &LogStore) -> Result<Hello, SyncError> {
        let last_added = self.cache.last_added(store)?;
        let last_synced = self.cache.last_synced(store)?;

        let behind = match (&last_added, &last_synced) {
            (Some(added), Some(synced)) => added.local_seq > synced.local_seq,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let messages = if behind {
            let since = last_synced.map(|w| w.local_seq);
            let entries = store
                .get_diff(since)
                .map(|entry| entry.map(EntryPayload::from))
                .collect::<Result<Vec<_>, StoreError>>()?;
            (!entries.is_empty()).then_some(entries)
        } else {
            None
        };
        let heads = if self.options.advertise_heads {
            Some(store.heads()?)
        } else {
            None
        };

        Ok(Hello {
            seq: last_added,
            messages,
            heads,
        })
    }

    /// Own entries not yet put on the wire on this connection, as `add`s.
    pub fn outgoing(&mut self, store: &LogStore) -> Result<Vec<SyncMessage>, SyncError> {
        if !self.session.status().is_connected() {
            return Ok(Vec::new());
        }
        let since = match self.session.last_sent() {
            Some(sent) => Some(sent),
            None => self.cache.last_synced(store)?.map(|w| w.local_seq),
        };
        store
            .get_diff(since)
            .map(|entry| Ok(SyncMessage::Add(entry?.into())))
            .collect()
    }

    /// Record that `message` is on the wire.
    pub fn sent(&mut self, message: &SyncMessage) {
        let slot = match message {
            SyncMessage::Hello(hello) => {
                self.session.close_gap();
                if let Some(seq) = &hello.seq {
                    self.session.sent_own(seq.local_seq);
                }
                hello
                    .messages
                    .as_ref()
                    .and_then(|m| m.last())
                    .map(|last| AckSlot::own(last.metadata.local_seq()))
            }
            SyncMessage::Add(payload) if *payload.metadata.device() == self.device => {
                let local_seq = payload.metadata.local_seq();
                self.session.sent_own(local_seq);
                Some(AckSlot::own(local_seq))
            }
            SyncMessage::Add(_) => Some(AckSlot::Foreign),
            SyncMessage::Remove(_) | SyncMessage::Ack(_) => None,
        };
        self.session.sent(slot);
    }

    /// A local add committed.
    pub fn local_added(&mut self, metadata: &Metadata) {
        self.cache.set_last_added(metadata.watermark());
    }

    /// Decode and handle one inbound frame. Malformed frames are logged and dropped.
    pub fn handle_frame(&mut self, store: &LogStore, frame: &[u8]) -> Result<Reaction, SyncError> {
        match SyncMessage::decode(frame) {
            Ok(message) => self.handle(store, message),
            Err(err) => {
                warn!(error = %err, len = frame.len(), "dropping malformed frame");
                Ok(Reaction::default())
            }
        }
    }

    pub fn handle(
        &mut self,
        store: &LogStore,
        message: SyncMessage,
    ) -> Result<Reaction, SyncError> {
        match message {
            SyncMessage::Hello(hello) => self.on_hello(store, hello),
            SyncMessage::Add(payload) => self.on_add(store, payload),
            SyncMessage::Remove(Remove { id }) => {
                let mut reaction = Reaction::default();
                if store.remove(&id)?.is_some() {
                    debug!(%id, "removed by peer");
                    reaction.events.push(SyncEvent::Removed(id));
                }
                Ok(reaction)
            }
            SyncMessage::Ack(ack) => self.on_ack(store, ack),
        }
    }

    fn on_hello(&mut self, store: &LogStore, hello: Hello) -> Result<Reaction, SyncError> {
        let mut reaction = Reaction::default();
        debug!(
            peer_last_added = ?hello.seq.as_ref().map(|w| w.local_seq),
            carried = hello.messages.as_ref().map_or(0, Vec::len),
            "hello received"
        );

        if let Some(messages) = hello.messages.filter(|m| !m.is_empty()) {
            let mut acked = None;
            let mut contiguous = true;
            for payload in messages {
                let outcome = self.admit(store, payload, &mut reaction)?;
                match outcome.held() {
                    Some(watermark) if contiguous => acked = Some(watermark.clone()),
                    Some(_) => {}
                    None => contiguous = false,
                }
            }
            reaction.replies.push(SyncMessage::Ack(Ack { seq: acked }));
        }

        if let Some(mut heads) = hello.heads {
            // Own entries already sent on this connection are not pushed again.
            if let Some(sent) = self.session.last_sent() {
                let known = heads.entry(self.device.clone()).or_insert(sent);
                *known = (*known).max(sent);
            }
            for entry in missing_from(store, &heads)? {
                reaction.replies.push(SyncMessage::Add(entry.into()));
            }
        }
        Ok(reaction)
    }

    fn on_add(&mut self, store: &LogStore, payload: EntryPayload) -> Result<Reaction, SyncError> {
        let mut reaction = Reaction::default();
        let outcome = self.admit(store, payload, &mut reaction)?;
        reaction.replies.push(SyncMessage::Ack(Ack {
            seq: outcome.held().cloned(),
        }));
        Ok(reaction)
    }

    fn admit(
        &mut self,
        store: &LogStore,
        payload: EntryPayload,
        reaction: &mut Reaction,
    ) -> Result<IngestOutcome, SyncError> {
        let entry = payload.into_entry();
        let own = *entry.metadata.device() == self.device;
        let outcome = store.ingest(entry.clone())?;
        if let IngestOutcome::Applied(_) = outcome {
            if own {
                self.cache.invalidate();
            }
            reaction.events.push(SyncEvent::Received(entry));
        }
        Ok(outcome)
    }

    fn on_ack(&mut self, store: &LogStore, ack: Ack) -> Result<Reaction, SyncError> {
        let mut reaction = Reaction::default();
        let slot = self.session.acked();
        let own_slot = match slot {
            Some(AckSlot::Own { covers, held_back }) => Some((covers, held_back)),
            Some(AckSlot::Foreign) => None,
            None => {
                debug!("ack with nothing in flight");
                None
            }
        };

        let watermark = match ack.seq {
            Some(watermark) if watermark.seq.device == self.device => watermark,
            // Receipts for entries of other devices only balance the in-flight count.
            seq => {
                if let Some((covers, _)) = own_slot {
                    warn!(local_seq = covers, ack = ?seq, "peer refused own entry");
                    self.session.open_gap();
                }
                return Ok(reaction);
            }
        };

        if let Some((covers, held_back)) = own_slot {
            if held_back {
                debug!(
                    local_seq = watermark.local_seq,
                    "ack behind a refused entry, lastSynced held"
                );
                return Ok(reaction);
            }
            if watermark.local_seq < covers {
                // Only a prefix was admitted; what follows it is not synced.
                self.session.open_gap();
            }
        }

        match store.set_last_synced(&watermark) {
            Ok(SyncedUpdate::Advanced) => {
                self.cache.set_last_synced(watermark.clone());
                reaction.events.push(SyncEvent::Synced(watermark));
            }
            Ok(SyncedUpdate::Unchanged) => {}
            Err(
                err @ (StoreError::WatermarkRegression { .. }
                | StoreError::WatermarkAhead { .. }
                | StoreError::InvalidData(_)),
            ) => {
                self.session.reject_ack();
                warn!(error = %err, "rejected ack");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(reaction)
    }
}

/// Every entry held here that `remote_heads` shows the peer lacks, ascending per device.
fn missing_from(
    store: &LogStore,
    remote_heads: &BTreeMap<DeviceName, u64>,
) -> Result<Vec<Entry>, SyncError> {
    let mut missing = Vec::new();
    for (device, ours) in store.heads()? {
        let theirs = remote_heads.get(&device).copied();
        if theirs.is_some_and(|t| t >= ours) {
            continue;
        }
        for entry in store.device_diff(&device, theirs) {
            missing.push(entry?);
        }
    }
    Ok(missing)
}
