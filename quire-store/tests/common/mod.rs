#![allow(dead_code)]

use quire_model::{DeviceName, MockClock, NodeIdentity, StorageConfig};
use quire_store::{AddOptions, LogIdentity, LogStore};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

pub const T0: u64 = 1_700_000_000_000;

pub fn device(name: &str) -> DeviceName {
    DeviceName::new(name).unwrap()
}

pub fn identity(name: &str, seed: u8) -> LogIdentity {
    LogIdentity::signing(device(name), NodeIdentity::from_seed([seed; 32]))
}

pub fn memory_store(name: &str, seed: u8, clock: &MockClock) -> LogStore {
    LogStore::open(&StorageConfig::InMemory, identity(name, seed))
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
}

pub fn file_store(dir: &Path, name: &str, seed: u8, clock: &MockClock) -> LogStore {
    LogStore::open(&StorageConfig::File(dir.to_path_buf()), identity(name, seed))
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
}

pub fn note(n: u64) -> Value {
    json!({ "note": n })
}

/// Add `count` entries, advancing the clock by 1 ms each time.
pub fn fill(store: &LogStore, clock: &MockClock, count: u64) {
    for n in 0..count {
        store
            .add(note(n), AddOptions::default())
            .unwrap()
            .added()
            .unwrap();
        clock.advance(1);
    }
}
