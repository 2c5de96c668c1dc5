//! Entry metadata, identity computation and watermarks.
//!
//! Metadata is built in two phases. [`MetadataBuilder`] produces an
//! [`UnsignedMeta`]; [`UnsignedMeta::seal`] optionally signs its canonical
//! bytes and then hashes the signed record into the [`EntryId`]. The id
//! therefore commits to the signature, and the signature commits to every
//! other field.
//!
//! Local bookkeeping ([`AdminMeta`]) lives beside the metadata, never inside
//! it, so nothing that touches it can change an entry's identity.

use crate::canonical::canonical_json;
use crate::node_identity::NodeIdentity;
use crate::seq::{DeviceName, Seq, Sequenced};
use crate::types::{Hash, PubKey, Signature};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("id mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch { claimed: EntryId, computed: EntryId },
    #[error("signature does not verify against author {0}")]
    BadSignature(PubKey),
    #[error("inconsistent metadata: {0}")]
    Inconsistent(&'static str),
    #[error("invalid scope: {0:?}")]
    InvalidScope(String),
}

/// Content-addressed entry identifier. Text form is unpadded URL-safe base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Hash);

impl EntryId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        Hash::from_base64(text).map(EntryId)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_base64())
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self)
    }
}

impl std::str::FromStr for EntryId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&[u8]> for EntryId {
    type Error = std::array::TryFromSliceError;
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Hash::try_from(slice).map(EntryId)
    }
}

/// Coarse visibility tag, e.g. `"private"`. Non-empty, no NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub const PRIVATE: &'static str = "private";

    pub fn new(scope: impl Into<String>) -> Result<Self, MetaError> {
        let scope = scope.into();
        if scope.is_empty() || scope.contains('\0') {
            return Err(MetaError::InvalidScope(scope));
        }
        Ok(Self(scope))
    }

    pub fn private() -> Self {
        Self(Self::PRIVATE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::private()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Scope {
    type Err = MetaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Every hashed metadata field except `id` and `signature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedMeta {
    pub seq: Seq,
    pub local_seq: u64,
    pub prev: Option<EntryId>,
    pub timestamp: u64,
    pub author: PubKey,
    pub scope: Scope,
    /// Hash of the plaintext when the stored content is ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Hash>,
}

impl UnsignedMeta {
    /// The bytes a signature covers.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, MetaError> {
        Ok(canonical_json(self)?)
    }

    /// Sign (when a signer is given), then compute the id over the result.
    pub fn seal(self, signer: Option<&NodeIdentity>) -> Result<Metadata, MetaError> {
        let signature = match signer {
            Some(node) => Some(node.sign(&self.signing_bytes()?)),
            None => None,
        };
        let id = compute_id(&self, signature.as_ref())?;
        Ok(Metadata {
            id,
            body: self,
            signature,
        })
    }
}

/// Hash the canonical form of `body`, with `signature` folded in when present.
pub fn compute_id(
    body: &UnsignedMeta,
    signature: Option<&Signature>,
) -> Result<EntryId, MetaError> {
    let mut value = serde_json::to_value(body)?;
    if let (Some(sig), Value::Object(map)) = (signature, &mut value) {
        map.insert("signature".to_string(), serde_json::to_value(sig)?);
    }
    Ok(EntryId(Hash::digest(&canonical_json(&value)?)))
}

/// Complete, sealed metadata of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: EntryId,
    #[serde(flatten)]
    pub body: UnsignedMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl Metadata {
    pub fn local_seq(&self) -> u64 {
        self.body.local_seq
    }

    pub fn device(&self) -> &DeviceName {
        &self.body.seq.device
    }

    pub fn timestamp(&self) -> u64 {
        self.body.timestamp
    }

    pub fn watermark(&self) -> Watermark {
        Watermark {
            local_seq: self.body.local_seq,
            seq: self.body.seq.clone(),
            id: self.id,
        }
    }

    /// Check internal consistency, recompute the id and verify the signature.
    pub fn verify(&self) -> Result<(), MetaError> {
        if self.body.seq.local_seq != self.body.local_seq {
            return Err(MetaError::Inconsistent("seq counter differs from localSeq"));
        }
        if self.body.seq.timestamp != self.body.timestamp {
            return Err(MetaError::Inconsistent("seq timestamp differs from timestamp"));
        }
        let computed = compute_id(&self.body, self.signature.as_ref())?;
        if computed != self.id {
            return Err(MetaError::IdMismatch {
                claimed: self.id,
                computed,
            });
        }
        if let Some(sig) = &self.signature {
            NodeIdentity::verify_with_key(&self.body.author, &self.body.signing_bytes()?, sig)
                .map_err(|_| MetaError::BadSignature(self.body.author))?;
        }
        Ok(())
    }
}

impl Sequenced for Metadata {
    fn seq(&self) -> &Seq {
        &self.body.seq
    }
}

/// Fluent construction of [`UnsignedMeta`].
///
/// ```
/// # use quire_model::*;
/// let node = NodeIdentity::generate();
/// let device = DeviceName::new("laptop").unwrap();
/// let meta = MetadataBuilder::new(device, node.public_key())
///     .local_seq(0)
///     .timestamp(1_000)
///     .build()
///     .seal(Some(&node))
///     .unwrap();
/// assert!(meta.verify().is_ok());
/// ```
pub struct MetadataBuilder {
    device: DeviceName,
    author: PubKey,
    local_seq: u64,
    timestamp: u64,
    prev: Option<EntryId>,
    scope: Scope,
    proof: Option<Hash>,
}

impl MetadataBuilder {
    pub fn new(device: DeviceName, author: PubKey) -> Self {
        Self {
            device,
            author,
            local_seq: 0,
            timestamp: 0,
            prev: None,
            scope: Scope::private(),
            proof: None,
        }
    }

    /// Continue the chain after `prev`: next counter, same-or-later time.
    pub fn after(self, prev: &Watermark) -> Self {
        Self {
            local_seq: prev.local_seq + 1,
            timestamp: self.timestamp.max(prev.seq.timestamp),
            prev: Some(prev.id),
            ..self
        }
    }

    pub fn local_seq(mut self, local_seq: u64) -> Self {
        self.local_seq = local_seq;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn prev(mut self, prev: Option<EntryId>) -> Self {
        self.prev = prev;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn proof(mut self, proof: Option<Hash>) -> Self {
        self.proof = proof;
        self
    }

    pub fn build(self) -> UnsignedMeta {
        UnsignedMeta {
            seq: Seq::new(self.timestamp, self.local_seq, self.device),
            local_seq: self.local_seq,
            prev: self.prev,
            timestamp: self.timestamp,
            author: self.author,
            scope: self.scope,
            proof: self.proof,
        }
    }
}

/// Local-only administrative fields. Never hashed, never replicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminMeta {
    /// Re-scope override; wins over the hashed scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub synced: bool,
}

impl AdminMeta {
    pub fn is_default(&self) -> bool {
        *self == AdminMeta::default()
    }
}

/// A change to [`AdminMeta`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaPatch {
    pub scope: Option<Option<Scope>>,
    pub synced: Option<bool>,
}

impl MetaPatch {
    pub fn rescope(scope: Scope) -> Self {
        Self {
            scope: Some(Some(scope)),
            ..Self::default()
        }
    }

    pub fn clear_scope() -> Self {
        Self {
            scope: Some(None),
            ..Self::default()
        }
    }

    pub fn synced(mut self, synced: bool) -> Self {
        self.synced = Some(synced);
        self
    }

    /// Returns true if anything changed.
    pub fn apply(&self, admin: &mut AdminMeta) -> bool {
        let before = admin.clone();
        if let Some(scope) = &self.scope {
            admin.scope = scope.clone();
        }
        if let Some(synced) = self.synced {
            admin.synced = synced;
        }
        *admin != before
    }
}

/// A stored entry: sealed metadata, opaque content, local admin fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub metadata: Metadata,
    pub content: Value,
    #[serde(default, skip_serializing_if = "AdminMeta::is_default")]
    pub admin: AdminMeta,
}

impl Entry {
    pub fn new(metadata: Metadata, content: Value) -> Self {
        Self {
            metadata,
            content,
            admin: AdminMeta::default(),
        }
    }

    pub fn id(&self) -> EntryId {
        self.metadata.id
    }

    pub fn effective_scope(&self) -> &Scope {
        self.admin.scope.as_ref().unwrap_or(&self.metadata.body.scope)
    }
}

impl Sequenced for Entry {
    fn seq(&self) -> &Seq {
        &self.metadata.body.seq
    }
}

/// `{ localSeq, seq, id }` of one entry. `Option<Watermark>::None` is "empty".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub local_seq: u64,
    pub seq: Seq,
    pub id: EntryId,
}

impl Sequenced for Watermark {
    fn seq(&self) -> &Seq {
        &self.seq
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.seq, self.id)
    }
}
