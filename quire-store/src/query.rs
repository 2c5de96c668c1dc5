//! Paged and callback-driven reads over the secondary indexes.

use crate::error::StoreError;
use crate::keys::prefix_bounds;
use crate::log_store::{
    decode_id, read_entry, LogStore, TABLE_BY_DEVICE_SEQ, TABLE_BY_SCOPE, TABLE_BY_SEQ,
    TABLE_BY_TIME, TABLE_LOG,
};
use quire_model::{DeviceName, Entry, Scope};
use redb::{ReadOnlyTable, StorageError, TableDefinition};
use std::ops::{Bound, ControlFlow};

const DEFAULT_PAGE_LIMIT: usize = 50;

/// Which index to walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSelector {
    /// Global causal order.
    Seq,
    /// Entries whose effective scope is this one, in causal order.
    Scope(Scope),
    /// Entries with `from <= timestamp <= to`.
    Time { from: Option<u64>, to: Option<u64> },
    /// One device's chain, by localSeq.
    Device(DeviceName),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    #[default]
    Descending,
}

/// Opaque resume point: the index key of the last entry returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct PageQuery {
    pub index: IndexSelector,
    pub direction: Direction,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

impl PageQuery {
    pub fn new(index: IndexSelector) -> Self {
        Self {
            index,
            direction: Direction::default(),
            limit: DEFAULT_PAGE_LIMIT,
            cursor: None,
        }
    }

    pub fn ascending(mut self) -> Self {
        self.direction = Direction::Ascending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Continue strictly after `cursor` in the query's direction.
    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub entries: Vec<Entry>,
    /// Present when more entries follow.
    pub next: Option<Cursor>,
}

impl LogStore {
    /// One page of up to `query.limit` entries.
    pub fn page(&self, query: &PageQuery) -> Result<Page, StoreError> {
        let mut entries = Vec::with_capacity(query.limit.min(256));
        let mut last_key = None;
        let mut more = false;
        if query.limit > 0 {
            self.walk(query, |key, entry| {
                if entries.len() == query.limit {
                    more = true;
                    return ControlFlow::Break(());
                }
                entries.push(entry);
                last_key = Some(key.to_vec());
                ControlFlow::Continue(())
            })?;
        }
        let next = if more { last_key.map(Cursor) } else { None };
        Ok(Page { entries, next })
    }

    /// Visit matching entries in order until `visit` breaks. Ignores `limit`.
    /// Returns the number of entries visited.
    pub fn scan(
        &self,
        query: &PageQuery,
        mut visit: impl FnMut(&Entry) -> ControlFlow<()>,
    ) -> Result<usize, StoreError> {
        let mut count = 0;
        self.walk(query, |_, entry| {
            count += 1;
            visit(&entry)
        })?;
        Ok(count)
    }

    fn walk(
        &self,
        query: &PageQuery,
        mut visit: impl FnMut(&[u8], Entry) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let (table, mut lower, mut upper) = bounds(&query.index);
        // The cursor narrows the selector's range and never widens it.
        if let Some(cursor) = &query.cursor {
            match query.direction {
                Direction::Ascending => lower = after_cursor(lower, cursor.as_bytes()),
                Direction::Descending => upper = before_cursor(upper, cursor.as_bytes()),
            }
        }
        if is_empty(&lower, &upper) {
            return Ok(());
        }
        let range = (as_slice(&lower), as_slice(&upper));

        self.with_db(|db| {
            let txn = db.begin_read()?;
            let index = txn.open_table(table)?;
            let log = txn.open_table(TABLE_LOG)?;
            let rows = index.range::<&[u8]>(range)?;
            match query.direction {
                Direction::Ascending => drive(rows, &log, &mut visit),
                Direction::Descending => drive(rows.rev(), &log, &mut visit),
            }
        })
    }
}

type Guard<'a> = redb::AccessGuard<'a, &'static [u8]>;
type Row<'a> = Result<(Guard<'a>, Guard<'a>), StorageError>;

fn drive<'a>(
    rows: impl Iterator<Item = Row<'a>>,
    log: &ReadOnlyTable<&'static [u8], &'static [u8]>,
    visit: &mut impl FnMut(&[u8], Entry) -> ControlFlow<()>,
) -> Result<(), StoreError> {
    for row in rows {
        let (key, id) = row?;
        let Some(entry) = read_entry(log, &decode_id(id.value())?)? else {
            continue;
        };
        if visit(key.value(), entry).is_break() {
            break;
        }
    }
    Ok(())
}

type Bounds = (
    TableDefinition<'static, &'static [u8], &'static [u8]>,
    Bound<Vec<u8>>,
    Bound<Vec<u8>>,
);

fn bounds(index: &IndexSelector) -> Bounds {
    match index {
        IndexSelector::Seq => (TABLE_BY_SEQ, Bound::Unbounded, Bound::Unbounded),
        IndexSelector::Scope(scope) => {
            let (start, end) = prefix_bounds(scope.as_str());
            (TABLE_BY_SCOPE, Bound::Included(start), Bound::Excluded(end))
        }
        IndexSelector::Device(device) => {
            let (start, end) = prefix_bounds(device.as_str());
            (TABLE_BY_DEVICE_SEQ, Bound::Included(start), Bound::Excluded(end))
        }
        IndexSelector::Time { from, to } => {
            let lower = match from {
                Some(ts) => Bound::Included(ts.to_be_bytes().to_vec()),
                None => Bound::Unbounded,
            };
            let upper = match to.and_then(|ts| ts.checked_add(1)) {
                Some(ts) => Bound::Excluded(ts.to_be_bytes().to_vec()),
                None => Bound::Unbounded,
            };
            (TABLE_BY_TIME, lower, upper)
        }
    }
}

fn after_cursor(lower: Bound<Vec<u8>>, cursor: &[u8]) -> Bound<Vec<u8>> {
    match &lower {
        Bound::Included(key) | Bound::Excluded(key) if key.as_slice() > cursor => lower,
        _ => Bound::Excluded(cursor.to_vec()),
    }
}

fn before_cursor(upper: Bound<Vec<u8>>, cursor: &[u8]) -> Bound<Vec<u8>> {
    match &upper {
        Bound::Included(key) | Bound::Excluded(key) if key.as_slice() < cursor => upper,
        _ => Bound::Excluded(cursor.to_vec()),
    }
}

fn is_empty(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) => {
            lo >= hi
        }
        _ => false,
    }
}

fn as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
