//! Data directory management
//!
//! Layout of one device's data directory:
//! - `identity.key`: Ed25519 private key
//! - `device`: the device name, written by `quire init`
//! - `log/`: the redb log store

use std::path::{Path, PathBuf};

const APP_NAME: &str = "quire";

#[derive(Debug, Clone)]
pub struct DataDir {
    base: PathBuf,
}

impl DataDir {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The platform data directory, e.g. `~/.local/share/quire/` on Linux.
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|d| Self::new(d.join(APP_NAME)))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn identity_key(&self) -> PathBuf {
        self.base.join("identity.key")
    }

    pub fn device_file(&self) -> PathBuf {
        self.base.join("device")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base.join("log")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

impl Default for DataDir {
    fn default() -> Self {
        Self::default_location().unwrap_or_else(|| Self::new("./quire-data"))
    }
}
