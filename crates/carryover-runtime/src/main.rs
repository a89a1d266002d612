//! carryover: drive survival events from the command line.

use std::cmp::Ordering;

use carryover_core::VersionTag;
use carryover_runtime::SurvivalConfig;
use clap::Parser;

mod cli;
mod simulate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("CARRYOVER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => SurvivalConfig::from_json_file(path)?,
        None => SurvivalConfig::default(),
    };

    match args.command {
        cli::Command::Simulate(opts) => {
            let report = simulate::run(&opts, config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        cli::Command::Compare(opts) => {
            let left = VersionTag::parse(&opts.left)?;
            let right = VersionTag::parse(&opts.right)?;
            let sign = match left.cmp(&right) {
                Ordering::Less => "<",
                Ordering::Equal => "=",
                Ordering::Greater => ">",
            };
            println!("{left} {sign} {right}");
        }
    }

    Ok(())
}
