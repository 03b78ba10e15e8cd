// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use clap::Args;
use ifc_bridge_processing::{auto_convert, ConversionConfig, ConversionSummary};

use super::IoArgs;
use crate::config::Config;

/// Infer classes and units, write the rule file, then convert.
#[derive(Debug, Args)]
pub struct AutoArgs {
    #[command(flatten)]
    pub io: IoArgs,
}

pub fn run(args: &AutoArgs, env: &Config) -> Result<ConversionSummary> {
    let mut config = ConversionConfig::auto(args.io.schema);
    config.validator = env.validator.clone();

    auto_convert(&args.io.input, &args.io.output, &config).with_context(|| {
        format!(
            "Failed to convert {} to {}",
            args.io.input.display(),
            args.io.output.display()
        )
    })
}
