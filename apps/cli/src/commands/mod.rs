// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use clap::Args;
use ifc_bridge_processing::{ConversionSummary, Schema};

pub mod auto;
pub mod convert;

/// Source and destination shared by every subcommand.
#[derive(Debug, Args)]
pub struct IoArgs {
    /// STEP assembly to convert.
    #[arg(long = "in", value_name = "FILE")]
    pub input: PathBuf,
    /// IFC file to write; report, rule and log files are placed beside it.
    #[arg(long = "out", value_name = "FILE")]
    pub output: PathBuf,
    /// Target schema: IFC2X3, IFC4 or IFC4X3.
    #[arg(long, default_value_t = Schema::Ifc4)]
    pub schema: Schema,
}

/// Print what a run produced. Part failures do not change the exit code;
/// they are listed here and in the QC report.
pub fn print_summary(summary: &ConversionSummary, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!(
        "Converted {} of {} parts ({} failed) to {}",
        summary.converted_parts(),
        summary.total_parts(),
        summary.failed_parts(),
        summary.output.display()
    );
    if let Some(rules) = &summary.rules {
        println!("Rules:     {}", rules.display());
    }
    println!("QC report: {}", summary.qc_text.display());
    println!("Event log: {}", summary.log.display());
    for part in summary.report.parts.iter().filter(|p| !p.converted) {
        if let Some(reason) = &part.reason {
            println!("  not converted: {} ({})", part.assembly_path, reason);
        }
    }
    Ok(())
}
