#![allow(dead_code)]

use quire_model::{DeviceName, MockClock, NodeIdentity, StorageConfig};
use quire_store::{AddOptions, LogIdentity, LogStore};
use quire_sync::{SyncMessage, SyncOptions, SyncProtocol};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

pub const T0: u64 = 1_700_000_000_000;

pub struct Side {
    pub store: LogStore,
    pub protocol: SyncProtocol,
}

impl Side {
    pub fn new(name: &str, seed: u8, clock: &MockClock) -> Self {
        let device = DeviceName::new(name).unwrap();
        let identity = LogIdentity::signing(device.clone(), NodeIdentity::from_seed([seed; 32]));
        let store = LogStore::open(&StorageConfig::InMemory, identity)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        Self {
            store,
            protocol: SyncProtocol::new(device, SyncOptions::default()),
        }
    }

    pub fn fill(&self, clock: &MockClock, count: u64) {
        for n in 0..count {
            self.store
                .add(json!({ "n": n }), AddOptions::default())
                .unwrap();
            clock.advance(1);
        }
    }
}

/// Open both ends and deliver frames until neither side has anything to say.
/// Returns the number of frames delivered.
pub fn exchange(a: &mut Side, b: &mut Side) -> usize {
    let mut to_b = VecDeque::new();
    let mut to_a = VecDeque::new();

    let hello = a.protocol.open(&a.store).unwrap();
    a.protocol.sent(&hello);
    to_b.push_back(hello.encode().unwrap());
    let hello = b.protocol.open(&b.store).unwrap();
    b.protocol.sent(&hello);
    to_a.push_back(hello.encode().unwrap());

    pump(a, b, to_a, to_b)
}

pub fn pump(
    a: &mut Side,
    b: &mut Side,
    mut to_a: VecDeque<Vec<u8>>,
    mut to_b: VecDeque<Vec<u8>>,
) -> usize {
    let mut delivered = 0;
    loop {
        if let Some(frame) = to_b.pop_front() {
            deliver(b, &frame, &mut to_a);
        } else if let Some(frame) = to_a.pop_front() {
            deliver(a, &frame, &mut to_b);
        } else {
            return delivered;
        }
        delivered += 1;
    }
}

fn deliver(side: &mut Side, frame: &[u8], replies: &mut VecDeque<Vec<u8>>) {
    let reaction = side.protocol.handle_frame(&side.store, frame).unwrap();
    for reply in reaction.replies {
        side.protocol.sent(&reply);
        replies.push_back(reply.encode().unwrap());
    }
}

pub fn local_seqs(messages: &[quire_sync::EntryPayload]) -> Vec<u64> {
    messages.iter().map(|m| m.metadata.local_seq()).collect()
}

pub fn outgoing_frames(side: &mut Side) -> VecDeque<Vec<u8>> {
    let messages: Vec<SyncMessage> = side.protocol.outgoing(&side.store).unwrap();
    messages
        .into_iter()
        .map(|m| {
            side.protocol.sent(&m);
            m.encode().unwrap()
        })
        .collect()
}
