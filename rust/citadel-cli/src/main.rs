//! Citadel CLI — secure update and audit tooling for fleet nodes.

mod log_cmd;
mod probes;
mod rollout_cmd;
mod update_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::log_cmd::LogCommand;
use crate::rollout_cmd::RolloutCommand;
use crate::update_cmd::UpdateCommand;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    name = "citadel",
    version,
    about = "Secure update and audit backbone for hardened OS fleets",
    help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}

Examples:
  citadel update init root.json    Establish root trust
  citadel update install pkg.bin   Verify and install an update
  citadel rollout check U1         Check rollout eligibility
  citadel rollout health U1        Report node health
  citadel log verify 3             Verify a transparency log entry
"
)]
struct Cli {
    /// Update server base URL.
    #[arg(long, global = true, default_value = "http://localhost:8080")]
    server: String,

    /// Metadata cache directory.
    #[arg(long, global = true, default_value = "/var/cache/citadel/metadata")]
    cache_dir: PathBuf,

    /// Rollout state directory.
    #[arg(long, global = true, default_value = "/etc/citadel/rollout")]
    rollout_dir: PathBuf,

    /// Transparency log directory.
    #[arg(long, global = true, default_value = "/var/lib/citadel/transparency-log")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify and install signed updates
    #[command(subcommand)]
    Update(UpdateCommand),
    /// Manage staged rollouts and node health
    #[command(subcommand)]
    Rollout(RolloutCommand),
    /// Inspect and extend the transparency log
    #[command(subcommand)]
    Log(LogCommand),
}

/// Shared paths and endpoints for command handlers.
pub struct Context {
    pub server: String,
    pub cache_dir: PathBuf,
    pub rollout_dir: PathBuf,
    pub log_dir: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let context = Context {
        server: cli.server,
        cache_dir: cli.cache_dir,
        rollout_dir: cli.rollout_dir,
        log_dir: cli.log_dir,
    };

    let result = match cli.command {
        Commands::Update(command) => update_cmd::run(&context, command),
        Commands::Rollout(command) => rollout_cmd::run(&context, command),
        Commands::Log(command) => log_cmd::run(&context, command),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
