// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ifc_bridge_core::LengthUnit;
use ifc_bridge_processing::{convert, ConversionConfig, ConversionSummary, GeometryMode};

use super::IoArgs;
use crate::config::Config;

/// Convert with a rule file and explicit settings.
#[derive(Debug, Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub io: IoArgs,
    /// Output length unit: mm, m or in.
    #[arg(long, default_value_t = LengthUnit::Millimeter)]
    pub unit: LengthUnit,
    #[arg(long, default_value = "Project")]
    pub project: String,
    #[arg(long, default_value = "Site")]
    pub site: String,
    #[arg(long, default_value = "Building")]
    pub building: String,
    #[arg(long, default_value = "Storey")]
    pub storey: String,
    /// Faceted B-rep where possible, or always a triangulated mesh.
    #[arg(long, default_value_t = GeometryMode::Brep)]
    pub geom: GeometryMode,
    /// Chord deflection for curved edges, in model units.
    #[arg(long, default_value_t = 0.5)]
    pub mesh_deflection: f64,
    /// Maximum angle per curved-edge segment, in radians.
    #[arg(long, default_value_t = 0.5)]
    pub mesh_angle: f64,
    /// Keep only the first part of each normalized name.
    #[arg(long)]
    pub merge_by_name: bool,
    /// Group parts under an element assembly per parent path.
    #[arg(long)]
    pub split_by_assembly: bool,
    /// Class for parts no rule matches; defaults to the rule file's.
    #[arg(long, value_name = "IFC_CLASS")]
    pub default_class: Option<String>,
    /// Rule file (TOML), e.g. one written by `auto`.
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,
    /// Event log path; defaults to `<out>.log.jsonl`.
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

impl ConvertArgs {
    fn to_config(&self, env: &Config) -> ConversionConfig {
        ConversionConfig {
            schema: self.io.schema,
            unit: self.unit,
            project: self.project.clone(),
            site: self.site.clone(),
            building: self.building.clone(),
            storey: self.storey.clone(),
            geom: self.geom,
            mesh_deflection: self.mesh_deflection,
            mesh_angle: self.mesh_angle,
            merge_by_name: self.merge_by_name,
            split_by_assembly: self.split_by_assembly,
            default_class: self.default_class.clone(),
            validator: env.validator.clone(),
            rules: self.rules.clone(),
            log_path: self.log.clone(),
            ..ConversionConfig::default()
        }
    }
}

pub fn run(args: &ConvertArgs, env: &Config) -> Result<ConversionSummary> {
    let config = args.to_config(env);
    convert(&args.io.input, &args.io.output, &config).with_context(|| {
        format!(
            "Failed to convert {} to {}",
            args.io.input.display(),
            args.io.output.display()
        )
    })
}
