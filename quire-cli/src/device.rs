//! The device a data directory belongs to.

use crate::data_dir::DataDir;
use anyhow::{bail, Context};
use quire_model::{DeviceName, NodeIdentity, StorageConfig};
use quire_store::{LogIdentity, LogStore, StoreError};

pub struct LocalDevice {
    pub data_dir: DataDir,
    pub name: DeviceName,
    pub identity: NodeIdentity,
}

impl LocalDevice {
    /// Create (or confirm) the data directory for `name`. Returns whether a
    /// new identity key was generated.
    pub fn init(data_dir: DataDir, name: Option<DeviceName>) -> anyhow::Result<(Self, bool)> {
        data_dir
            .ensure_dirs()
            .with_context(|| format!("creating {}", data_dir.base().display()))?;

        let name = match (read_device_name(&data_dir)?, name) {
            (Some(existing), Some(requested)) if existing != requested => {
                bail!(
                    "{} already belongs to device {existing:?}",
                    data_dir.base().display()
                )
            }
            (Some(existing), _) => existing,
            (None, Some(requested)) => {
                std::fs::write(data_dir.device_file(), requested.as_str())
                    .context("writing device file")?;
                requested
            }
            (None, None) => bail!("--device is required to initialize a new data directory"),
        };

        let (identity, created) = NodeIdentity::load_or_generate(data_dir.identity_key())
            .context("loading identity key")?;
        let device = Self {
            data_dir,
            name,
            identity,
        };
        // Claims the store for this device.
        device.open_store()?;
        Ok((device, created))
    }

    /// Load an initialized data directory. `expected`, when given, must match
    /// the recorded device name.
    pub fn load(data_dir: DataDir, expected: Option<&DeviceName>) -> anyhow::Result<Self> {
        let Some(name) = read_device_name(&data_dir)? else {
            bail!(
                "{} is not initialized, run `quire init --device <name>`",
                data_dir.base().display()
            );
        };
        if let Some(expected) = expected {
            if *expected != name {
                bail!("{} belongs to device {name:?}, not {expected:?}", data_dir.base().display());
            }
        }
        let identity = NodeIdentity::load(data_dir.identity_key()).context("loading identity key")?;
        Ok(Self {
            data_dir,
            name,
            identity,
        })
    }

    pub fn open_store(&self) -> Result<LogStore, StoreError> {
        LogStore::open(
            &StorageConfig::File(self.data_dir.log_dir()),
            LogIdentity::signing(self.name.clone(), self.identity.clone()),
        )
    }
}

fn read_device_name(data_dir: &DataDir) -> anyhow::Result<Option<DeviceName>> {
    let path = data_dir.device_file();
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let name = DeviceName::new(text.trim()).context("invalid device file")?;
    Ok(Some(name))
}
