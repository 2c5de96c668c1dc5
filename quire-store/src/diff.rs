//! Lazy, batched walk over one device's chain.

use crate::error::StoreError;
use crate::keys::{device_key, local_seq_of};
use crate::log_store::{decode_id, read_entry, LogStore, TABLE_BY_DEVICE_SEQ, TABLE_LOG};
use quire_model::{DeviceName, Entry};
use std::collections::VecDeque;

/// Entries of one device with localSeq strictly after a watermark, ascending.
///
/// Rows are fetched in batches, each in its own read transaction, so a long
/// diff never pins a snapshot. The walk is finite: it stops at the first short
/// batch or after yielding an error. To resume, start a new diff from the last
/// localSeq seen.
pub struct DiffIter<'a> {
    store: &'a LogStore,
    device: DeviceName,
    /// Next localSeq to scan from, inclusive. `None` once the chain is exhausted.
    next: Option<u64>,
    buffer: VecDeque<Entry>,
}

impl<'a> DiffIter<'a> {
    pub(crate) fn new(store: &'a LogStore, device: DeviceName, since: Option<u64>) -> Self {
        let next = match since {
            Some(seq) => seq.checked_add(1),
            None => Some(0),
        };
        Self {
            store,
            device,
            next,
            buffer: VecDeque::new(),
        }
    }

    fn refill(&mut self) -> Result<(), StoreError> {
        let Some(from) = self.next else {
            return Ok(());
        };
        let batch = self.store.diff_batch();
        let start = device_key(&self.device, from);
        let end = device_key(&self.device, u64::MAX);

        let mut last_seen = None;
        let mut rows = 0;
        self.store.with_db(|db| {
            let txn = db.begin_read()?;
            let index = txn.open_table(TABLE_BY_DEVICE_SEQ)?;
            let log = txn.open_table(TABLE_LOG)?;
            for row in index.range(start.as_slice()..=end.as_slice())?.take(batch) {
                let (key, id) = row?;
                rows += 1;
                last_seen = local_seq_of(key.value());
                if let Some(entry) = read_entry(&log, &decode_id(id.value())?)? {
                    self.buffer.push_back(entry);
                }
            }
            Ok(())
        })?;

        self.next = if rows < batch {
            None
        } else {
            last_seen.and_then(|seq| seq.checked_add(1))
        };
        Ok(())
    }
}

impl Iterator for DiffIter<'_> {
    type Item = Result<Entry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && self.next.is_some() {
            if let Err(err) = self.refill() {
                self.next = None;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
