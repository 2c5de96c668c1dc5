//! Sequence tuples and their total order.
//!
//! A [`Seq`] is `(timestamp_ms, local_seq, device)`. Ordering is by timestamp,
//! then device name, then local counter. The composite byte key produced by
//! [`Seq::to_key`] sorts exactly like `Ord`, so it can be used directly as an
//! index key in the ordered store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeqError {
    #[error("device name must not be empty")]
    EmptyDevice,
    #[error("device name must not contain NUL")]
    NulInDevice,
    #[error("seq key too short: {0} bytes")]
    KeyTooShort(usize),
    #[error("seq key is missing the device terminator")]
    MissingTerminator,
    #[error("seq key device is not UTF-8")]
    DeviceNotUtf8,
}

/// Name of the device that authored an entry.
///
/// Non-empty, no NUL bytes. NUL is the separator in composite index keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceName(String);

impl DeviceName {
    pub fn new(name: impl Into<String>) -> Result<Self, SeqError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SeqError::EmptyDevice);
        }
        if name.contains('\0') {
            return Err(SeqError::NulInDevice);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceName {
    type Err = SeqError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for DeviceName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// `(timestamp_ms, local_seq, device)`. Serialized as a 3-element JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, u64, DeviceName)", into = "(u64, u64, DeviceName)")]
pub struct Seq {
    pub timestamp: u64,
    pub local_seq: u64,
    pub device: DeviceName,
}

impl Seq {
    pub fn new(timestamp: u64, local_seq: u64, device: DeviceName) -> Self {
        Self {
            timestamp,
            local_seq,
            device,
        }
    }

    /// Composite key: `timestamp_be ‖ device ‖ 0x00 ‖ local_seq_be`.
    pub fn to_key(&self) -> Vec<u8> {
        let device = self.device.as_str().as_bytes();
        let mut key = Vec::with_capacity(17 + device.len());
        key.extend_from_slice(&self.timestamp.to_be_bytes());
        key.extend_from_slice(device);
        key.push(0);
        key.extend_from_slice(&self.local_seq.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Result<Self, SeqError> {
        if key.len() < 8 + 1 + 1 + 8 {
            return Err(SeqError::KeyTooShort(key.len()));
        }
        let (ts, rest) = key.split_at(8);
        let (device, local) = rest.split_at(rest.len() - 8);
        let device = device
            .strip_suffix(&[0])
            .ok_or(SeqError::MissingTerminator)?;
        let device = std::str::from_utf8(device).map_err(|_| SeqError::DeviceNotUtf8)?;
        let short = |_| SeqError::KeyTooShort(key.len());
        Ok(Self {
            timestamp: u64::from_be_bytes(ts.try_into().map_err(short)?),
            local_seq: u64::from_be_bytes(local.try_into().map_err(short)?),
            device: DeviceName::new(device)?,
        })
    }
}

impl Ord for Seq {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.device.cmp(&other.device))
            .then_with(|| self.local_seq.cmp(&other.local_seq))
    }
}

impl PartialOrd for Seq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.device, self.local_seq, self.timestamp)
    }
}

impl From<(u64, u64, DeviceName)> for Seq {
    fn from((timestamp, local_seq, device): (u64, u64, DeviceName)) -> Self {
        Self::new(timestamp, local_seq, device)
    }
}

impl From<Seq> for (u64, u64, DeviceName) {
    fn from(seq: Seq) -> Self {
        (seq.timestamp, seq.local_seq, seq.device)
    }
}

/// Anything that carries a [`Seq`].
pub trait Sequenced {
    fn seq(&self) -> &Seq;
}

impl Sequenced for Seq {
    fn seq(&self) -> &Seq {
        self
    }
}

/// Strict "older than" over sequenced values.
pub fn is_first_older<A: Sequenced + ?Sized, B: Sequenced + ?Sized>(a: &A, b: &B) -> bool {
    a.seq() < b.seq()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(name: &str) -> DeviceName {
        DeviceName::new(name).unwrap()
    }

    fn sample() -> Vec<Seq> {
        let mut out = Vec::new();
        for ts in [0u64, 1, 1_700_000_000_000, u64::MAX] {
            for d in ["a", "ab", "ab5", "b", "laptop:2", "z"] {
                for local in [0u64, 1, 255, 256, u64::MAX] {
                    out.push(Seq::new(ts, local, dev(d)));
                }
            }
        }
        out
    }

    #[test]
    fn key_round_trip() {
        for seq in sample() {
            assert_eq!(Seq::from_key(&seq.to_key()).unwrap(), seq);
        }
    }

    #[test]
    fn key_order_matches_seq_order() {
        let seqs = sample();
        for a in &seqs {
            for b in &seqs {
                assert_eq!(a.to_key().cmp(&b.to_key()), a.cmp(b), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn older_is_a_strict_order() {
        let seqs = sample();
        for a in &seqs {
            assert!(!is_first_older(a, a));
            for b in &seqs {
                if is_first_older(a, b) {
                    assert!(!is_first_older(b, a));
                }
                for c in seqs.iter().step_by(7) {
                    if is_first_older(a, b) && is_first_older(b, c) {
                        assert!(is_first_older(a, c));
                    }
                }
            }
        }
    }

    #[test]
    fn tie_break_is_timestamp_then_device_then_counter() {
        let a = Seq::new(5, 9, dev("alpha"));
        let b = Seq::new(5, 1, dev("beta"));
        assert!(is_first_older(&a, &b));
        let c = Seq::new(4, 100, dev("zulu"));
        assert!(is_first_older(&c, &a));
        let d = Seq::new(5, 10, dev("alpha"));
        assert!(is_first_older(&a, &d));
    }

    #[test]
    fn serializes_as_triple() {
        let seq = Seq::new(1000, 3, dev("phone"));
        let json = serde_json::to_string(&seq).unwrap();
        assert_eq!(json, r#"[1000,3,"phone"]"#);
        assert_eq!(serde_json::from_str::<Seq>(&json).unwrap(), seq);
    }

    #[test]
    fn device_name_validation() {
        assert_eq!(DeviceName::new(""), Err(SeqError::EmptyDevice));
        assert_eq!(DeviceName::new("a\0b"), Err(SeqError::NulInDevice));
        assert!(serde_json::from_str::<DeviceName>(r#""""#).is_err());
    }

    #[test]
    fn malformed_keys_rejected() {
        assert!(Seq::from_key(&[0u8; 4]).is_err());
        let mut key = Seq::new(1, 1, dev("x")).to_key();
        key[8 + 1] = 1; // clobber the terminator
        assert_eq!(Seq::from_key(&key), Err(SeqError::MissingTerminator));
    }
}
