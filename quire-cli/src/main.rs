//! Quire CLI (`quire`)
//!
//! Inspect and edit one device's log, and sync two data directories.

mod commands;
mod data_dir;
mod device;
mod replicate;

use clap::{Parser, Subcommand};
use commands::ListArgs;
use data_dir::DataDir;
use device::LocalDevice;
use quire_model::{DeviceName, EntryId, Scope};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quire", version, about = "Offline-first causal log")]
struct Args {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, env = "QUIRE_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Device name; required by `init`, checked by every other command
    #[arg(long, env = "QUIRE_DEVICE", global = true)]
    device: Option<DeviceName>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the data directory, identity key and log
    Init,
    /// Append an entry; CONTENT is JSON
    Add {
        content: String,
        #[arg(long)]
        scope: Option<Scope>,
    },
    /// Print one entry
    Show { id: EntryId },
    /// List entries, newest first
    List {
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Oldest first
        #[arg(long)]
        asc: bool,
        /// Cursor printed by the previous page
        #[arg(long)]
        after: Option<String>,
    },
    /// Delete an entry locally
    Remove { id: EntryId },
    /// Override an entry's scope locally
    Rescope { id: EntryId, scope: Scope },
    /// Watermarks, pending count and per-device heads
    Status,
    /// Sync with another data directory, both directions
    Replicate { other: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let data_dir = args
        .data_dir
        .map(DataDir::new)
        .unwrap_or_default();
    let mut out = std::io::stdout().lock();

    if let Command::Init = args.command {
        let (device, created) = LocalDevice::init(data_dir, args.device)?;
        writeln!(
            out,
            "{} device {} ({}) at {}",
            if created { "initialized" } else { "already initialized:" },
            device.name,
            device.identity.public_key(),
            device.data_dir.base().display()
        )?;
        return Ok(());
    }

    let device = LocalDevice::load(data_dir, args.device.as_ref())?;
    tracing::debug!(device = %device.name, "data directory loaded");

    match args.command {
        Command::Init => {}
        Command::Add { content, scope } => {
            let store = device.open_store()?;
            commands::add(&store, &content, scope, &mut out)?;
        }
        Command::Show { id } => commands::show(&device.open_store()?, &id, &mut out)?,
        Command::List {
            scope,
            limit,
            asc,
            after,
        } => {
            let args = ListArgs {
                scope,
                limit,
                ascending: asc,
                after,
            };
            commands::list(&device.open_store()?, args, &mut out)?;
        }
        Command::Remove { id } => commands::remove(&device.open_store()?, &id, &mut out)?,
        Command::Rescope { id, scope } => {
            commands::rescope(&device.open_store()?, &id, scope, &mut out)?;
        }
        Command::Status => commands::status(&device.open_store()?, &mut out)?,
        Command::Replicate { other } => {
            let other = LocalDevice::load(DataDir::new(other), None)?;
            replicate::replicate(&device, &other, &mut out).await?;
        }
    }
    Ok(())
}

fn init_tracing(verbosity: u8) -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}
