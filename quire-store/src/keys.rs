//! Index key layouts.
//!
//! Every composite key separates its variable-length text part with a NUL
//! byte. Device names and scopes cannot contain NUL, so prefix scans are exact
//! and byte order agrees with string order.

use quire_model::{DeviceName, EntryId, Scope, Seq};

/// `device ‖ 0x00 ‖ local_seq_be`
pub(crate) fn device_key(device: &DeviceName, local_seq: u64) -> Vec<u8> {
    let mut key = prefix(device.as_str());
    key.extend_from_slice(&local_seq.to_be_bytes());
    key
}

/// `scope ‖ 0x00 ‖ seq key`
pub(crate) fn scope_key(scope: &Scope, seq: &Seq) -> Vec<u8> {
    let mut key = prefix(scope.as_str());
    key.extend_from_slice(&seq.to_key());
    key
}

/// `timestamp_be ‖ id`
pub(crate) fn time_key(timestamp: u64, id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

/// Half-open `[text ‖ 0x00, text ‖ 0x01)`: every key under one text prefix.
pub(crate) fn prefix_bounds(text: &str) -> (Vec<u8>, Vec<u8>) {
    let start = prefix(text);
    let mut end = start.clone();
    if let Some(last) = end.last_mut() {
        *last = 1;
    }
    (start, end)
}

pub(crate) fn local_seq_of(device_key: &[u8]) -> Option<u64> {
    let tail = device_key.len().checked_sub(8)?;
    Some(u64::from_be_bytes(device_key[tail..].try_into().ok()?))
}

fn prefix(text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(text.len() + 9);
    key.extend_from_slice(text.as_bytes());
    key.push(0);
    key
}
