//! Device identity and signing keys
//!
//! Each device has an Ed25519 keypair:
//! - Private key: stored locally in `identity.key` (never replicated)
//! - Public key: the `author` of every entry the device creates

use crate::types::{PubKey, Signature};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// The keypair a device signs its entries with.
#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl NodeIdentity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Deterministic identity from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    /// Load the identity from a key file, or generate and save one.
    /// Returns `(identity, is_new)`.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<(Self, bool), NodeError> {
        let path = path.as_ref();
        if path.exists() {
            Ok((Self::load(path)?, false))
        } else {
            let node = Self::generate();
            node.save(path)?;
            Ok((node, true))
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        use zeroize::Zeroizing;

        let bytes = Zeroizing::new(fs::read(path)?);
        if bytes.len() != 32 {
            return Err(NodeError::InvalidKeyLength(bytes.len()));
        }
        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes);

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), NodeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(self.signing_key.as_bytes())?;
        Ok(())
    }

    pub fn public_key(&self) -> PubKey {
        PubKey::from(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Verify `signature` over `message` against a raw public key.
    pub fn verify_with_key(
        public_key: &PubKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), NodeError> {
        let key = VerifyingKey::from_bytes(public_key.as_bytes())
            .map_err(|_| NodeError::InvalidPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        key.verify(message, &sig)
            .map_err(|_| NodeError::InvalidSignature)
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let node = NodeIdentity::generate();
        let sig = node.sign(b"hello");
        assert!(NodeIdentity::verify_with_key(&node.public_key(), b"hello", &sig).is_ok());
        assert!(NodeIdentity::verify_with_key(&node.public_key(), b"hellO", &sig).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.key");

        let (first, is_new) = NodeIdentity::load_or_generate(&path).unwrap();
        assert!(is_new);
        let (second, is_new) = NodeIdentity::load_or_generate(&path).unwrap();
        assert!(!is_new);
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_bad_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        fs::write(&path, [1u8; 7]).unwrap();
        assert!(matches!(
            NodeIdentity::load(&path),
            Err(NodeError::InvalidKeyLength(7))
        ));
    }
}
