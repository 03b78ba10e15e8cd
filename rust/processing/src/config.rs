// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion settings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ifc_bridge_core::LengthUnit;
use serde::{Deserialize, Serialize};

use crate::heuristics::Vocabulary;
use crate::units::UnitBands;

/// Target IFC schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Schema {
    #[serde(rename = "IFC2X3")]
    Ifc2x3,
    #[default]
    #[serde(rename = "IFC4")]
    Ifc4,
    #[serde(rename = "IFC4X3")]
    Ifc4x3,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Ifc2x3 => "IFC2X3",
            Schema::Ifc4 => "IFC4",
            Schema::Ifc4x3 => "IFC4X3",
        }
    }

    /// `IfcTriangulatedFaceSet` exists from IFC4 on
    pub fn has_tessellation(&self) -> bool {
        !matches!(self, Schema::Ifc2x3)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "").as_str() {
            "IFC2X3" => Ok(Schema::Ifc2x3),
            "IFC4" => Ok(Schema::Ifc4),
            "IFC4X3" | "IFC4X3ADD2" => Ok(Schema::Ifc4x3),
            other => Err(format!("unsupported IFC schema '{}'", other)),
        }
    }
}

/// Which representation elements get
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryMode {
    /// Faceted B-rep where possible, mesh otherwise
    #[default]
    Brep,
    /// Always a triangulated mesh
    Mesh,
}

impl fmt::Display for GeometryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeometryMode::Brep => "brep",
            GeometryMode::Mesh => "mesh",
        })
    }
}

impl FromStr for GeometryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brep" => Ok(GeometryMode::Brep),
            "mesh" => Ok(GeometryMode::Mesh),
            other => Err(format!("unknown geometry mode '{}' (expected brep or mesh)", other)),
        }
    }
}

/// Settings of one conversion run.
///
/// `auto` runs override `unit` with the inferred unit and use the default
/// container names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub schema: Schema,
    /// Length unit of the output model
    pub unit: LengthUnit,
    pub project: String,
    pub site: String,
    pub building: String,
    pub storey: String,
    pub geom: GeometryMode,
    /// Chord deflection for curved edges, model units
    pub mesh_deflection: f64,
    /// Maximum angle per curved-edge segment, radians
    pub mesh_angle: f64,
    pub merge_by_name: bool,
    pub split_by_assembly: bool,
    /// Class used when no rule matches; unset defers to the rule file's
    /// default rule
    pub default_class: Option<String>,
    /// External schema checker command, run as `<cmd> <file.ifc>`
    pub validator: Option<String>,
    /// Rule file for `convert`; `None` maps everything to the default class
    pub rules: Option<PathBuf>,
    /// Event log location, `<output>.log.jsonl` when unset
    pub log_path: Option<PathBuf>,
    /// Run timestamp, now when unset
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub vocabulary: Vocabulary,
    #[serde(skip)]
    pub unit_bands: UnitBands,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            schema: Schema::Ifc4,
            unit: LengthUnit::Millimeter,
            project: "Project".to_string(),
            site: "Site".to_string(),
            building: "Building".to_string(),
            storey: "Storey".to_string(),
            geom: GeometryMode::Brep,
            mesh_deflection: 0.5,
            mesh_angle: 0.5,
            merge_by_name: false,
            split_by_assembly: false,
            default_class: None,
            validator: None,
            rules: None,
            log_path: None,
            timestamp: None,
            vocabulary: Vocabulary::default(),
            unit_bands: UnitBands::default(),
        }
    }
}

impl ConversionConfig {
    /// Defaults for an unattended run targeting `schema`
    pub fn auto(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }
}
