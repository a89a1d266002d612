//! CLI definition using clap derive.

use std::path::PathBuf;

use carryover_core::SessionId;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "carryover", about = "Carry runtime state across a forced restart")]
pub struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(long, short = 'c', global = true, env = "CARRYOVER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one update -> restart -> startup cycle against in-memory collaborators
    Simulate(SimulateOpts),
    /// Compare two version strings
    Compare(CompareOpts),
}

#[derive(clap::Args)]
pub struct SimulateOpts {
    /// Live policy as JSON
    #[arg(long, default_value = "\"P1\"")]
    pub policy: String,

    /// Session marker as ID=MARKER (repeatable)
    #[arg(long = "seen", value_parser = parse_seen)]
    pub seen: Vec<(SessionId, String)>,

    /// Unrestricted session id (repeatable)
    #[arg(long = "unrestricted")]
    pub unrestricted: Vec<SessionId>,

    /// Version running before the update
    #[arg(long, default_value = "1.0")]
    pub from: String,

    /// Version staged by the update
    #[arg(long, default_value = "1.1")]
    pub to: String,

    /// Session that refuses its restored marker (repeatable)
    #[arg(long = "fail-session")]
    pub fail_session: Vec<SessionId>,

    /// Register a marking migration with this threshold (repeatable)
    #[arg(long = "migrate-at")]
    pub migrate_at: Vec<String>,
}

#[derive(clap::Args)]
pub struct CompareOpts {
    pub left: String,
    pub right: String,
}

fn parse_seen(raw: &str) -> Result<(SessionId, String), String> {
    let (id, marker) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=MARKER, got {raw:?}"))?;
    let id = id
        .parse::<SessionId>()
        .map_err(|e| format!("invalid session id {id:?}: {e}"))?;
    Ok((id, marker.to_string()))
}
