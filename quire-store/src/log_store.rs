//! LogStore: manages `log.db` for one device.
//!
//! Tables:
//! - `log`: id → entry JSON (metadata, content, admin fields)
//! - `by_seq`: seq key → id (global causal order)
//! - `by_device_seq`: device ‖ 0 ‖ localSeq → id (per-device chains, diffs)
//! - `by_scope`: effective scope ‖ 0 ‖ seq key → id
//! - `by_time`: timestamp ‖ id → id
//! - `heads`: device → highest localSeq ever held
//! - `extra`: `lastAdded`, `lastSynced` watermarks and the owning device
//!
//! Every mutation is one redb write transaction, so an entry and all of its
//! index rows appear and disappear together.

use crate::diff::DiffIter;
use crate::error::StoreError;
use crate::keys::{device_key, scope_key, time_key};
use quire_model::{
    AdminMeta, Clock, DeviceName, Entry, EntryId, Hash, MetaError, MetaPatch, Metadata,
    MetadataBuilder, NodeIdentity, PubKey, Scope, StorageConfig, SystemClock, Watermark,
};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

pub(crate) const TABLE_LOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("log");
pub(crate) const TABLE_BY_SEQ: TableDefinition<&[u8], &[u8]> = TableDefinition::new("by_seq");
pub(crate) const TABLE_BY_DEVICE_SEQ: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("by_device_seq");
pub(crate) const TABLE_BY_SCOPE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("by_scope");
pub(crate) const TABLE_BY_TIME: TableDefinition<&[u8], &[u8]> = TableDefinition::new("by_time");
const TABLE_HEADS: TableDefinition<&str, u64> = TableDefinition::new("heads");
const TABLE_EXTRA: TableDefinition<&str, &[u8]> = TableDefinition::new("extra");

const KEY_LAST_ADDED: &str = "lastAdded";
const KEY_LAST_SYNCED: &str = "lastSynced";
const KEY_DEVICE: &str = "device";

const DEFAULT_DIFF_BATCH: usize = 64;

/// Who this store writes as.
#[derive(Clone, Debug)]
pub struct LogIdentity {
    device: DeviceName,
    author: PubKey,
    signer: Option<NodeIdentity>,
}

impl LogIdentity {
    /// Entries are signed with `node`.
    pub fn signing(device: DeviceName, node: NodeIdentity) -> Self {
        Self {
            device,
            author: node.public_key(),
            signer: Some(node),
        }
    }

    /// Entries carry `author` but no signature.
    pub fn unsigned(device: DeviceName, author: PubKey) -> Self {
        Self {
            device,
            author,
            signer: None,
        }
    }

    pub fn device(&self) -> &DeviceName {
        &self.device
    }

    pub fn author(&self) -> PubKey {
        self.author
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub scope: Scope,
    /// Explicit predecessor. Defaults to the current `lastAdded`.
    pub prev: Option<EntryId>,
    pub proof: Option<Hash>,
}

impl AddOptions {
    pub fn scoped(scope: Scope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }
}

/// Why an add did not happen. The caller may retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Another add already holds this localSeq.
    LocalSeqInFlight(u64),
    /// `lastAdded` changed between prepare and commit.
    WatermarkMoved {
        expected: Option<u64>,
        found: Option<u64>,
    },
    DuplicateId(EntryId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(Metadata),
    AlreadyExists(Conflict),
}

impl AddOutcome {
    pub fn added(self) -> Option<Metadata> {
        match self {
            AddOutcome::Added(meta) => Some(meta),
            AddOutcome::AlreadyExists(_) => None,
        }
    }
}

/// Result of the first phase of an add.
pub enum Prepared<'a> {
    Ready(PendingAdd<'a>),
    AlreadyExists(Conflict),
}

/// Why a remote entry was refused.
#[derive(Debug)]
pub enum Rejection {
    Invalid(MetaError),
    /// The device already has a different entry at this localSeq.
    SlotTaken {
        device: DeviceName,
        local_seq: u64,
        existing: EntryId,
    },
}

#[derive(Debug)]
pub enum IngestOutcome {
    Applied(Watermark),
    Duplicate(Watermark),
    Rejected(Rejection),
}

impl IngestOutcome {
    /// Watermark of the entry if the store now holds it.
    pub fn held(&self) -> Option<&Watermark> {
        match self {
            IngestOutcome::Applied(w) | IngestOutcome::Duplicate(w) => Some(w),
            IngestOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncedUpdate {
    Advanced,
    Unchanged,
}

pub struct LogStore {
    db: RwLock<Option<Database>>,
    identity: LogIdentity,
    clock: Arc<dyn Clock>,
    /// localSeqs claimed by prepared-but-uncommitted adds.
    reserved: Mutex<HashSet<u64>>,
    diff_batch: usize,
}

impl LogStore {
    /// Open or create the store described by `config`.
    ///
    /// A file store remembers the device that created it and refuses to open
    /// under a different device name.
    pub fn open(config: &StorageConfig, identity: LogIdentity) -> Result<Self, StoreError> {
        let db = match config {
            StorageConfig::File(dir) => {
                std::fs::create_dir_all(dir)?;
                Database::builder().create(dir.join("log.db"))?
            }
            StorageConfig::InMemory => {
                Database::builder().create_with_backend(InMemoryBackend::new())?
            }
        };

        {
            let txn = db.begin_write()?;
            let _ = txn.open_table(TABLE_LOG)?;
            let _ = txn.open_table(TABLE_BY_SEQ)?;
            let _ = txn.open_table(TABLE_BY_DEVICE_SEQ)?;
            let _ = txn.open_table(TABLE_BY_SCOPE)?;
            let _ = txn.open_table(TABLE_BY_TIME)?;
            let _ = txn.open_table(TABLE_HEADS)?;
            {
                let mut extra = txn.open_table(TABLE_EXTRA)?;
                let owner = extra
                    .get(KEY_DEVICE)?
                    .map(|g| String::from_utf8_lossy(g.value()).into_owned());
                match owner {
                    Some(owner) if owner != identity.device.as_str() => {
                        return Err(StoreError::InvalidData(format!(
                            "store belongs to device {owner:?}, not {:?}",
                            identity.device.as_str()
                        )));
                    }
                    Some(_) => {}
                    None => {
                        extra.insert(KEY_DEVICE, identity.device.as_str().as_bytes())?;
                    }
                }
            }
            txn.commit()?;
        }

        info!(device = %identity.device, persistent = config.is_persistent(), "log store opened");

        Ok(Self {
            db: RwLock::new(Some(db)),
            identity,
            clock: Arc::new(SystemClock),
            reserved: Mutex::new(HashSet::new()),
            diff_batch: DEFAULT_DIFF_BATCH,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rows fetched per range scan by [`LogStore::get_diff`].
    pub fn with_diff_batch(mut self, batch: usize) -> Self {
        self.diff_batch = batch.max(1);
        self
    }

    pub fn identity(&self) -> &LogIdentity {
        &self.identity
    }

    pub fn device(&self) -> &DeviceName {
        &self.identity.device
    }

    /// Release the engine. Every later call fails with [`StoreError::Unavailable`].
    pub fn close(&self) {
        let db = self.db.write().unwrap_or_else(PoisonError::into_inner).take();
        if db.is_some() {
            info!(device = %self.identity.device, "log store closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.db.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub(crate) fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(StoreError::Unavailable)?;
        f(db)
    }

    pub(crate) fn diff_batch(&self) -> usize {
        self.diff_batch
    }

    // ==================== Adding ====================

    /// Create, identify and persist a new entry of this device.
    pub fn add(&self, content: Value, options: AddOptions) -> Result<AddOutcome, StoreError> {
        match self.prepare(content, options)? {
            Prepared::Ready(pending) => pending.commit(),
            Prepared::AlreadyExists(conflict) => Ok(AddOutcome::AlreadyExists(conflict)),
        }
    }

    /// First phase of an add: claim the next localSeq and seal the metadata.
    ///
    /// The claim is released when the returned [`PendingAdd`] is committed or
    /// dropped.
    pub fn prepare(&self, content: Value, options: AddOptions) -> Result<Prepared<'_>, StoreError> {
        let last = self.last_added()?;
        let local_seq = last.as_ref().map_or(0, |w| w.local_seq + 1);

        if !lock(&self.reserved).insert(local_seq) {
            debug!(local_seq, "localSeq already in flight");
            return Ok(Prepared::AlreadyExists(Conflict::LocalSeqInFlight(local_seq)));
        }
        let reservation = Reservation {
            store: self,
            local_seq,
        };

        let prev = match options.prev {
            Some(id) => {
                if !self.contains(&id)? {
                    return Err(StoreError::UnknownPrev(id));
                }
                Some(id)
            }
            None => last.as_ref().map(|w| w.id),
        };
        let floor = last.as_ref().map_or(0, |w| w.seq.timestamp);
        let timestamp = self.clock.now_ms().max(floor);

        let metadata = MetadataBuilder::new(self.identity.device.clone(), self.identity.author)
            .local_seq(local_seq)
            .timestamp(timestamp)
            .prev(prev)
            .scope(options.scope)
            .proof(options.proof)
            .build()
            .seal(self.identity.signer.as_ref())?;

        Ok(Prepared::Ready(PendingAdd {
            reservation,
            expected_last: last.map(|w| w.local_seq),
            entry: Entry::new(metadata, content),
        }))
    }

    // ==================== Remote admission ====================

    /// Admit an entry produced elsewhere, verbatim.
    ///
    /// The id and signature are verified first. Local admin fields of the
    /// incoming entry are discarded. An entry of this store's own device that
    /// is newer than `lastAdded` advances `lastAdded`.
    pub fn ingest(&self, entry: Entry) -> Result<IngestOutcome, StoreError> {
        if let Err(err) = entry.metadata.verify() {
            warn!(id = %entry.id(), error = %err, "rejecting unverifiable entry");
            return Ok(IngestOutcome::Rejected(Rejection::Invalid(err)));
        }
        let entry = Entry {
            admin: AdminMeta::default(),
            ..entry
        };
        let watermark = entry.metadata.watermark();
        let device = entry.metadata.device().clone();

        self.with_db(|db| {
            let txn = db.begin_write()?;

            let existing = {
                let log = txn.open_table(TABLE_LOG)?;
                let found = log.get(watermark.id.as_bytes().as_slice())?.is_some();
                found
            };
            if existing {
                txn.abort()?;
                return Ok(IngestOutcome::Duplicate(watermark));
            }

            let occupant = {
                let by_device = txn.open_table(TABLE_BY_DEVICE_SEQ)?;
                get_id(&by_device, &device_key(&device, watermark.local_seq))?
            };
            if let Some(existing) = occupant {
                txn.abort()?;
                warn!(
                    %device,
                    local_seq = watermark.local_seq,
                    %existing,
                    "conflicting entry for occupied slot"
                );
                return Ok(IngestOutcome::Rejected(Rejection::SlotTaken {
                    device,
                    local_seq: watermark.local_seq,
                    existing,
                }));
            }

            insert_rows(&txn, &entry)?;

            if device == self.identity.device {
                let mut extra = txn.open_table(TABLE_EXTRA)?;
                let last = read_watermark(&extra, KEY_LAST_ADDED)?;
                if last.map_or(true, |w| watermark.local_seq > w.local_seq) {
                    write_watermark(&mut extra, KEY_LAST_ADDED, &watermark)?;
                    info!(
                        local_seq = watermark.local_seq,
                        "recovered own entry, lastAdded advanced"
                    );
                }
            }
            txn.commit()?;

            debug!(id = %watermark.id, seq = %watermark.seq, "ingested entry");
            Ok(IngestOutcome::Applied(watermark))
        })
    }

    // ==================== Reading ====================

    pub fn by_id(&self, id: &EntryId) -> Result<Option<Entry>, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let log = txn.open_table(TABLE_LOG)?;
            read_entry(&log, id)
        })
    }

    pub fn contains(&self, id: &EntryId) -> Result<bool, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let log = txn.open_table(TABLE_LOG)?;
            Ok(log.get(id.as_bytes().as_slice())?.is_some())
        })
    }

    pub fn len(&self) -> Result<u64, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            Ok(txn.open_table(TABLE_LOG)?.len()?)
        })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Own entries with localSeq strictly greater than `since`, ascending.
    pub fn get_diff(&self, since: Option<u64>) -> DiffIter<'_> {
        DiffIter::new(self, self.identity.device.clone(), since)
    }

    /// Like [`LogStore::get_diff`], for any device's chain.
    pub fn device_diff(&self, device: &DeviceName, since: Option<u64>) -> DiffIter<'_> {
        DiffIter::new(self, device.clone(), since)
    }

    /// Highest localSeq ever held, per device. Not lowered by removals.
    pub fn heads(&self) -> Result<BTreeMap<DeviceName, u64>, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(TABLE_HEADS)?;
            let mut heads = BTreeMap::new();
            for row in table.iter()? {
                let (k, v) = row?;
                let device = DeviceName::new(k.value())
                    .map_err(|e| StoreError::InvalidData(format!("bad head key: {e}")))?;
                heads.insert(device, v.value());
            }
            Ok(heads)
        })
    }

    // ==================== Watermarks ====================

    pub fn last_added(&self) -> Result<Option<Watermark>, StoreError> {
        self.read_extra_watermark(KEY_LAST_ADDED)
    }

    pub fn last_synced(&self) -> Result<Option<Watermark>, StoreError> {
        self.read_extra_watermark(KEY_LAST_SYNCED)
    }

    /// Record that the remote holds everything up to `proposed`.
    ///
    /// Idempotent for the current value. Never moves backwards and never
    /// passes `lastAdded`; both are errors and nothing is written.
    pub fn set_last_synced(&self, proposed: &Watermark) -> Result<SyncedUpdate, StoreError> {
        if proposed.seq.device != self.identity.device {
            return Err(StoreError::InvalidData(format!(
                "lastSynced must name an entry of {}, got {}",
                self.identity.device, proposed.seq.device
            )));
        }
        self.with_db(|db| {
            let txn = db.begin_write()?;
            {
                let mut extra = txn.open_table(TABLE_EXTRA)?;
                let last_added = read_watermark(&extra, KEY_LAST_ADDED)?;
                if last_added.map_or(true, |w| proposed.local_seq > w.local_seq) {
                    return Err(StoreError::WatermarkAhead {
                        proposed: proposed.clone(),
                    });
                }
                if let Some(current) = read_watermark(&extra, KEY_LAST_SYNCED)? {
                    if current == *proposed {
                        return Ok(SyncedUpdate::Unchanged);
                    }
                    if proposed.local_seq < current.local_seq {
                        return Err(StoreError::WatermarkRegression {
                            current,
                            proposed: proposed.clone(),
                        });
                    }
                    if proposed.local_seq == current.local_seq {
                        return Err(StoreError::InvalidData(format!(
                            "conflicting lastSynced at localSeq {}",
                            current.local_seq
                        )));
                    }
                }
                write_watermark(&mut extra, KEY_LAST_SYNCED, proposed)?;
            }
            txn.commit()?;
            debug!(watermark = %proposed, "lastSynced advanced");
            Ok(SyncedUpdate::Advanced)
        })
    }

    fn read_extra_watermark(&self, key: &str) -> Result<Option<Watermark>, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let extra = txn.open_table(TABLE_EXTRA)?;
            read_watermark(&extra, key)
        })
    }

    // ==================== Local changes ====================

    /// Apply an admin-field patch. Returns false if the id is unknown.
    pub fn change_meta(&self, id: &EntryId, patch: &MetaPatch) -> Result<bool, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_write()?;
            let before = {
                let log = txn.open_table(TABLE_LOG)?;
                read_entry(&log, id)?
            };
            let Some(before) = before else {
                txn.abort()?;
                return Ok(false);
            };

            let mut after = before.clone();
            if !patch.apply(&mut after.admin) {
                txn.abort()?;
                return Ok(true);
            }

            if after.effective_scope() != before.effective_scope() {
                let seq = &before.metadata.body.seq;
                let mut by_scope = txn.open_table(TABLE_BY_SCOPE)?;
                by_scope.remove(scope_key(before.effective_scope(), seq).as_slice())?;
                by_scope.insert(
                    scope_key(after.effective_scope(), seq).as_slice(),
                    id.as_bytes().as_slice(),
                )?;
            }
            {
                let mut log = txn.open_table(TABLE_LOG)?;
                log.insert(id.as_bytes().as_slice(), serde_json::to_vec(&after)?.as_slice())?;
            }
            txn.commit()?;
            debug!(%id, scope = %after.effective_scope(), "entry admin fields changed");
            Ok(true)
        })
    }

    /// Hard-delete an entry and all of its index rows.
    ///
    /// Watermarks and heads stay where they are; localSeq values are never reused.
    pub fn remove(&self, id: &EntryId) -> Result<Option<Entry>, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_write()?;
            let entry = {
                let log = txn.open_table(TABLE_LOG)?;
                read_entry(&log, id)?
            };
            let Some(entry) = entry else {
                txn.abort()?;
                return Ok(None);
            };
            delete_rows(&txn, &entry)?;
            txn.commit()?;
            debug!(%id, "entry removed");
            Ok(Some(entry))
        })
    }
}

/// Second phase of an add. Holds the localSeq claim until committed or dropped.
pub struct PendingAdd<'a> {
    reservation: Reservation<'a>,
    expected_last: Option<u64>,
    entry: Entry,
}

impl<'a> PendingAdd<'a> {
    pub fn metadata(&self) -> &Metadata {
        &self.entry.metadata
    }

    /// Write the entry if `lastAdded` is still what it was at prepare time.
    pub fn commit(self) -> Result<AddOutcome, StoreError> {
        let store = self.reservation.store;
        let entry = self.entry;
        let expected = self.expected_last;

        let outcome = store.with_db(|db| {
            let txn = db.begin_write()?;
            let found = {
                let extra = txn.open_table(TABLE_EXTRA)?;
                read_watermark(&extra, KEY_LAST_ADDED)?.map(|w| w.local_seq)
            };
            if found != expected {
                txn.abort()?;
                return Ok(AddOutcome::AlreadyExists(Conflict::WatermarkMoved {
                    expected,
                    found,
                }));
            }
            let duplicate = {
                let log = txn.open_table(TABLE_LOG)?;
                let found = log.get(entry.id().as_bytes().as_slice())?.is_some();
                found
            };
            if duplicate {
                txn.abort()?;
                return Ok(AddOutcome::AlreadyExists(Conflict::DuplicateId(entry.id())));
            }

            insert_rows(&txn, &entry)?;
            {
                let mut extra = txn.open_table(TABLE_EXTRA)?;
                write_watermark(&mut extra, KEY_LAST_ADDED, &entry.metadata.watermark())?;
            }
            txn.commit()?;
            Ok(AddOutcome::Added(entry.metadata))
        })?;

        match &outcome {
            AddOutcome::Added(meta) => {
                debug!(id = %meta.id, local_seq = meta.local_seq(), "entry added")
            }
            AddOutcome::AlreadyExists(conflict) => debug!(?conflict, "add lost a race"),
        }
        drop(self.reservation);
        Ok(outcome)
    }
}

struct Reservation<'a> {
    store: &'a LogStore,
    local_seq: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(&self.store.reserved).remove(&self.local_seq);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==================== Row helpers ====================

fn insert_rows(txn: &WriteTransaction, entry: &Entry) -> Result<(), StoreError> {
    let meta = &entry.metadata;
    let id = meta.id.as_bytes().as_slice();
    let device = meta.device();

    txn.open_table(TABLE_LOG)?
        .insert(id, serde_json::to_vec(entry)?.as_slice())?;
    txn.open_table(TABLE_BY_SEQ)?
        .insert(meta.body.seq.to_key().as_slice(), id)?;
    txn.open_table(TABLE_BY_DEVICE_SEQ)?
        .insert(device_key(device, meta.local_seq()).as_slice(), id)?;
    txn.open_table(TABLE_BY_SCOPE)?
        .insert(scope_key(entry.effective_scope(), &meta.body.seq).as_slice(), id)?;
    txn.open_table(TABLE_BY_TIME)?
        .insert(time_key(meta.timestamp(), &meta.id).as_slice(), id)?;

    let mut heads = txn.open_table(TABLE_HEADS)?;
    let head = heads.get(device.as_str())?.map(|g| g.value());
    if head.map_or(true, |h| meta.local_seq() > h) {
        heads.insert(device.as_str(), meta.local_seq())?;
    }
    Ok(())
}

fn delete_rows(txn: &WriteTransaction, entry: &Entry) -> Result<(), StoreError> {
    let meta = &entry.metadata;
    txn.open_table(TABLE_LOG)?
        .remove(meta.id.as_bytes().as_slice())?;
    txn.open_table(TABLE_BY_SEQ)?
        .remove(meta.body.seq.to_key().as_slice())?;
    txn.open_table(TABLE_BY_DEVICE_SEQ)?
        .remove(device_key(meta.device(), meta.local_seq()).as_slice())?;
    txn.open_table(TABLE_BY_SCOPE)?
        .remove(scope_key(entry.effective_scope(), &meta.body.seq).as_slice())?;
    txn.open_table(TABLE_BY_TIME)?
        .remove(time_key(meta.timestamp(), &meta.id).as_slice())?;
    Ok(())
}

pub(crate) fn read_entry(
    log: &impl ReadableTable<&'static [u8], &'static [u8]>,
    id: &EntryId,
) -> Result<Option<Entry>, StoreError> {
    match log.get(id.as_bytes().as_slice())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn get_id(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    key: &[u8],
) -> Result<Option<EntryId>, StoreError> {
    match table.get(key)? {
        Some(bytes) => Ok(Some(decode_id(bytes.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn decode_id(bytes: &[u8]) -> Result<EntryId, StoreError> {
    EntryId::try_from(bytes).map_err(|_| StoreError::InvalidData("bad id in index".into()))
}

fn read_watermark(
    extra: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<Watermark>, StoreError> {
    match extra.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
        None => Ok(None),
    }
}

fn write_watermark(
    extra: &mut redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    watermark: &Watermark,
) -> Result<(), StoreError> {
    extra.insert(key, serde_json::to_vec(watermark)?.as_slice())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_model::MockClock;
    use serde_json::json;

    fn open_store() -> LogStore {
        let node = NodeIdentity::from_seed([1u8; 32]);
        let identity = LogIdentity::signing(DeviceName::new("laptop").unwrap(), node);
        LogStore::open(&StorageConfig::InMemory, identity)
            .unwrap()
            .with_clock(Arc::new(MockClock::new(1_000)))
    }

    #[test]
    fn reservation_is_released_on_drop() {
        let store = open_store();
        let pending = match store.prepare(json!(1), AddOptions::default()).unwrap() {
            Prepared::Ready(p) => p,
            Prepared::AlreadyExists(c) => panic!("unexpected conflict {c:?}"),
        };
        assert_eq!(pending.metadata().local_seq(), 0);
        drop(pending);
        assert!(lock(&store.reserved).is_empty());

        let meta = store.add(json!(1), AddOptions::default()).unwrap().added().unwrap();
        assert_eq!(meta.local_seq(), 0);
        assert!(lock(&store.reserved).is_empty());
    }

    #[test]
    fn closed_store_is_unavailable() {
        let store = open_store();
        store.add(json!(1), AddOptions::default()).unwrap();
        store.close();
        assert!(!store.is_open());
        assert!(matches!(store.len(), Err(StoreError::Unavailable)));
        assert!(matches!(
            store.add(json!(2), AddOptions::default()),
            Err(StoreError::Unavailable)
        ));
    }

    #[test]
    fn unknown_prev_is_an_error() {
        let store = open_store();
        let bogus = EntryId(Hash::digest(b"nope"));
        let options = AddOptions {
            prev: Some(bogus),
            ..AddOptions::default()
        };
        assert!(matches!(
            store.add(json!(1), options),
            Err(StoreError::UnknownPrev(id)) if id == bogus
        ));
        assert!(store.last_added().unwrap().is_none());
        assert!(lock(&store.reserved).is_empty());
    }
}
