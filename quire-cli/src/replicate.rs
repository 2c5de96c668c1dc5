//! `quire replicate`: sync two data directories in-process.
//!
//! Each side runs a replica actor; the two are linked by an in-memory
//! connection and left to exchange hellos until both are synchronized and
//! hold the same heads.

use crate::device::LocalDevice;
use anyhow::{bail, Context};
use quire_replica::{Replica, ReplicaConfig, ReplicaError};
use quire_store::LogStore;
use quire_sync::{ChannelConnection, ConnectionStatus};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL: Duration = Duration::from_millis(10);

pub async fn replicate(
    local: &LocalDevice,
    other: &LocalDevice,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if local.name == other.name {
        bail!("both data directories belong to device {}", local.name);
    }
    let ours = Arc::new(local.open_store().context("opening local store")?);
    let theirs = Arc::new(other.open_store().context("opening other store")?);
    let before = (ours.len()?, theirs.len()?);

    let result = link_and_settle(&ours, &theirs, local, other).await;
    ours.close();
    theirs.close();
    result?;

    let reopened = (local.open_store()?, other.open_store()?);
    writeln!(
        out,
        "{}: {} -> {} entries",
        local.name,
        before.0,
        reopened.0.len()?
    )?;
    writeln!(
        out,
        "{}: {} -> {} entries",
        other.name,
        before.1,
        reopened.1.len()?
    )?;
    Ok(())
}

async fn link_and_settle(
    ours: &Arc<LogStore>,
    theirs: &Arc<LogStore>,
    local: &LocalDevice,
    other: &LocalDevice,
) -> anyhow::Result<()> {
    let config = ReplicaConfig::default();
    let (a, a_actor) = Replica::<ChannelConnection>::spawn(ours.clone(), &config)?;
    let (b, b_actor) = Replica::<ChannelConnection>::spawn(theirs.clone(), &config)?;

    let (a_end, b_end) =
        ChannelConnection::pair(local.identity.public_key(), other.identity.public_key());
    b.attach(b_end).await?;
    a.attach(a_end).await?;

    let settled = tokio::time::timeout(SETTLE_TIMEOUT, settle(&a, &b)).await;

    a.close().await;
    b.close().await;
    a_actor.await?;
    b_actor.await?;

    settled.context("replication did not settle")??;
    Ok(())
}

async fn settle(
    a: &Replica<ChannelConnection>,
    b: &Replica<ChannelConnection>,
) -> Result<(), ReplicaError> {
    loop {
        let quiet = a.status() == ConnectionStatus::Synchronized
            && b.status() == ConnectionStatus::Synchronized
            && a.watermarks().await?.pending() == 0
            && b.watermarks().await?.pending() == 0;
        if quiet && a.store().heads()? == b.store().heads()? {
            tracing::debug!("replication settled");
            return Ok(());
        }
        tokio::time::sleep(POLL).await;
    }
}
