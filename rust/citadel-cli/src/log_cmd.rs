//! `citadel log` — transparency log inspection and manual entries.

use std::path::PathBuf;

use citadel_transparency::{EntryType, TransparencyLog};
use clap::Subcommand;
use serde_json::Value;

use crate::{CliResult, Context};

#[derive(Subcommand)]
pub enum LogCommand {
    /// Show log identity, size, and root hash
    Info,
    /// Record an update release from a metadata file
    AddUpdate { metadata_file: PathBuf },
    /// Record a rollout event from inline JSON
    AddRollout { event_json: String },
    /// Print an entry by index
    Get { index: u64 },
    /// Verify an entry's inclusion proof
    Verify { index: u64 },
    /// Search entries by type and/or update id
    Search {
        entry_type: Option<String>,
        update_id: Option<String>,
    },
    /// List entries
    List {
        #[arg(default_value_t = 0)]
        start: u64,
        #[arg(default_value_t = 10)]
        count: usize,
    },
}

pub fn run(context: &Context, command: LogCommand) -> CliResult {
    let mut log = TransparencyLog::open(&context.log_dir)?;

    match command {
        LogCommand::Info => {
            let info = log.log_info();
            println!("Transparency Log Information:");
            println!("  log_id: {}", info.log_id);
            println!("  description: {}", info.description);
            println!("  created_at: {}", info.created_at.to_rfc3339());
            println!("  tree_size: {}", info.tree_size);
            println!(
                "  root_hash: {}",
                info.root_hash.as_deref().unwrap_or("empty")
            );
        }
        LogCommand::AddUpdate { metadata_file } => {
            let metadata: Value = serde_json::from_slice(&std::fs::read(&metadata_file)?)?;
            let update_id = metadata
                .get("update_id")
                .and_then(Value::as_str)
                .ok_or("metadata file has no update_id")?
                .to_string();
            let version = metadata
                .get("version")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let targets = metadata.get("targets").cloned().unwrap_or(Value::Null);
            let signatures = metadata.get("signatures").cloned().unwrap_or(Value::Null);

            let entry = log.record_update_release(&update_id, version, targets, signatures)?;
            println!("Logged update release: index {}", entry.log_index);
        }
        LogCommand::AddRollout { event_json } => {
            let event: Value = serde_json::from_str(&event_json)?;
            let update_id = event
                .get("update_id")
                .and_then(Value::as_str)
                .ok_or("event has no update_id")?
                .to_string();
            let event_type = event
                .get("event_type")
                .and_then(Value::as_str)
                .ok_or("event has no event_type")?
                .to_string();
            let stage = event.get("stage").and_then(Value::as_str);
            let percentage = event
                .get("percentage")
                .and_then(Value::as_u64)
                .map(|value| value as u32);
            let health_status = event.get("health_status").and_then(Value::as_str);

            let entry =
                log.record_rollout_event(&update_id, &event_type, stage, percentage, health_status)?;
            println!("Logged rollout event: index {}", entry.log_index);
        }
        LogCommand::Get { index } => {
            println!("{}", serde_json::to_string_pretty(log.entry(index)?)?);
        }
        LogCommand::Verify { index } => {
            let verified = log.verify_entry(index)?;
            let proof = log.prove(index)?;
            println!("Entry {index} verification:");
            println!("  Verified: {verified}");
            println!("  Tree size: {}", proof.tree_size);
            println!("  Root hash: {}", proof.root_hash);
        }
        LogCommand::Search {
            entry_type,
            update_id,
        } => {
            let entry_type = entry_type
                .map(|value| value.parse::<EntryType>())
                .transpose()?;
            let results = log.search(entry_type, update_id.as_deref(), 100);
            println!("Found {} entries:", results.len());
            for entry in results {
                println!(
                    "  {}: {} at {}",
                    entry.log_index,
                    entry.entry_type,
                    entry.timestamp.to_rfc3339()
                );
            }
        }
        LogCommand::List { start, count } => {
            let entries = log.entries(start, count);
            for entry in entries {
                println!(
                    "  {}: {} at {}",
                    entry.log_index,
                    entry.entry_type,
                    entry.timestamp.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}
