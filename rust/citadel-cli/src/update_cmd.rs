//! `citadel update` — root trust, metadata refresh, and installs.

use std::path::PathBuf;

use citadel_core::Role;
use citadel_update::{HttpTransport, MetadataTransport, RootInit, UpdateClient};
use clap::Subcommand;

use crate::{CliResult, Context};

#[derive(Subcommand)]
pub enum UpdateCommand {
    /// Initialize or rotate root trust, from a local file or the server
    Init {
        /// Out-of-band root metadata file; omitted means fetch from server
        root_file: Option<PathBuf>,
    },
    /// Fetch and verify the full metadata chain
    Refresh,
    /// List available updates
    List,
    /// Download, verify, and install a target
    Install {
        /// Target name as listed in the targets metadata
        target: String,
        /// Install path (defaults to the staging directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub fn run(context: &Context, command: UpdateCommand) -> CliResult {
    let transport = HttpTransport::new(&context.server)?;

    match command {
        UpdateCommand::Init { root_file } => {
            let from_file = root_file.is_some();
            let bytes = match &root_file {
                Some(path) => std::fs::read(path)?,
                None => transport.fetch_metadata(Role::Root)?,
            };
            let mut client = UpdateClient::open(transport, &context.cache_dir)?;

            let mode = match client.trusted_root() {
                Some(_) if !from_file => RootInit::SelfUpgrade,
                _ => RootInit::Bootstrap,
            };
            // A server round-trip that returns the already-trusted version
            // is a no-op, not a failed rotation.
            if mode == RootInit::SelfUpgrade {
                let candidate: serde_json::Value = serde_json::from_slice(&bytes)?;
                let current = client.trusted_root().map(|root| root.version);
                if candidate.pointer("/signed/version").and_then(|v| v.as_u64()) == current {
                    println!("Root trust unchanged (version {})", current.unwrap_or(0));
                    return Ok(());
                }
            }

            client.initialize_root(&bytes, mode)?;
            let root = client.trusted_root().expect("root just initialized");
            println!(
                "Initialized root trust: version {}, {} keys",
                root.version,
                root.keys.len()
            );
        }
        UpdateCommand::Refresh => {
            let mut client = UpdateClient::open(transport, &context.cache_dir)?;
            client.refresh_metadata()?;
            println!("Metadata updated and verified successfully");
        }
        UpdateCommand::List => {
            let mut client = UpdateClient::open(transport, &context.cache_dir)?;
            client.refresh_metadata()?;
            let targets = client.available_targets()?;
            println!("Available updates ({}):", targets.len());
            for (name, spec) in targets {
                let created = spec
                    .custom
                    .as_ref()
                    .and_then(|custom| custom.get("created_at"))
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                println!("  {name} ({} bytes, created: {created})", spec.length);
            }
        }
        UpdateCommand::Install { target, output } => {
            let mut client = UpdateClient::open(transport, &context.cache_dir)?;
            client.refresh_metadata()?;
            let dest = output
                .unwrap_or_else(|| PathBuf::from("/var/lib/citadel/updates").join(&target));
            client.fetch_target(&target, &dest)?;
            println!("Update installed: {}", dest.display());
        }
    }
    Ok(())
}
