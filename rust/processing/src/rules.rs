// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declarative rule file (TOML).
//!
//! Written by the rule synthesizer and read back by `convert --rules`, so the
//! layout stays hand-editable: an ordered `[[rules]]` list with `match` and
//! `assign` tables, a `default_rule`, and the unit inference that produced
//! the file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Schema;
use crate::error::{Error, Result};
use crate::heuristics::Archetype;
use crate::units::UnitInference;

/// Match block of a rule. Every present field must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Case-insensitive regex on the normalized name, then the assembly path
    #[serde(default, alias = "name_regex", skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
    #[serde(default, alias = "assembly_prefix", skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, alias = "path_regex", skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_archetype: Option<Archetype>,
}

impl RuleMatch {
    /// Number of constraints present
    pub fn specificity(&self) -> usize {
        [
            self.name_pattern.is_some(),
            self.path_prefix.is_some(),
            self.path_pattern.is_some(),
            self.layer.is_some(),
            self.color.is_some(),
            self.geometry_archetype.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub system: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Property value template; `${Token}` placeholders are substituted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyTemplate {
    pub name: String,
    pub value: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
}

fn default_data_type() -> String {
    "IfcLabel".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAssign {
    #[serde(alias = "ifc_class")]
    pub target_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Synthesis confidence; absent on hand-written rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(rename = "match", default)]
    pub matcher: RuleMatch,
    pub assign: RuleAssign,
}

/// Ordered regex replacement applied to raw part names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameNormalization {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRule {
    #[serde(alias = "ifc_class")]
    pub target_class: String,
}

impl Default for DefaultRule {
    fn default() -> Self {
        Self {
            target_class: "IfcBuildingElementProxy".to_string(),
        }
    }
}

/// A whole rule file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(alias = "source_hash", skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_inference: Option<UnitInference>,
    pub default_rule: DefaultRule,
    /// Values for `${Token}` placeholders not provided by the part
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub property_defaults: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub name_normalization: Vec<NameNormalization>,
    pub rules: Vec<Rule>,
}

impl RuleFile {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text).map_err(|e| Error::RuleFile(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_toml_string()?;
        std::fs::write(path, text).map_err(|e| Error::io(path, e))?;
        tracing::info!(path = %path.display(), rules = self.rules.len(), "Rule file written");
        Ok(())
    }
}
