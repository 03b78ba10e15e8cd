// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ifc-bridge` command line: STEP assemblies to IFC.

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{auto::AutoArgs, convert::ConvertArgs};
use config::Config;

#[derive(Parser)]
#[command(name = "ifc-bridge", version, about = "Convert STEP assemblies to IFC")]
struct Cli {
    /// Print the run summary as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Infer classes and units, write a rule file, then convert.
    Auto(AutoArgs),
    /// Convert using a rule file and explicit settings.
    Convert(ConvertArgs),
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_logging(&config);

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads)
        .build_global()
        .context("Failed to configure worker threads")?;
    tracing::debug!(threads = config.worker_threads, "worker pool ready");

    let summary = match &cli.command {
        Command::Auto(args) => commands::auto::run(args, &config)?,
        Command::Convert(args) => commands::convert::run(args, &config)?,
    };
    commands::print_summary(&summary, cli.json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ifc_bridge_processing::Schema;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_auto_args() {
        let cli = Cli::try_parse_from(["ifc-bridge", "auto", "--in", "skid.stp", "--out", "skid.ifc", "--schema", "IFC4X3"]).unwrap();
        match cli.command {
            Command::Auto(args) => {
                assert_eq!(args.io.schema, Schema::Ifc4x3);
                assert_eq!(args.io.output, std::path::PathBuf::from("skid.ifc"));
            }
            Command::Convert(_) => panic!("expected auto"),
        }
    }

    #[test]
    fn test_missing_input_is_rejected() {
        assert!(Cli::try_parse_from(["ifc-bridge", "convert", "--out", "skid.ifc"]).is_err());
    }
}
