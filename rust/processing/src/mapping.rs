// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping engine: rule selection, name normalization, deterministic tags
//! and property templates.

use std::collections::BTreeMap;

use ifc_bridge_core::Part;
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, FailureReason, Result};
use crate::heuristics::Archetype;
use crate::rules::{Classification, Rule, RuleFile};

/// Length of the short element tag, hex characters
pub const TAG_LENGTH: usize = 12;

/// What the mapping engine needs to know about one part
#[derive(Debug, Clone, Copy)]
pub struct PartContext<'a> {
    pub part: &'a Part,
    /// SHA-256 of the source file
    pub fingerprint: &'a str,
    /// Substituted for `${ProjectKey}`
    pub project_key: &'a str,
    pub archetype: Archetype,
}

impl PartContext<'_> {
    fn color(&self) -> Option<String> {
        self.part.color.map(|c| c.to_string())
    }
}

/// A resolved property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedProperty {
    pub name: String,
    pub value: String,
    pub data_type: String,
}

/// Everything the writer needs to create one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub target_class: String,
    pub object_type: Option<String>,
    pub normalized_name: String,
    /// Short content-derived tag
    pub tag: String,
    /// Full digest the element GUID is derived from
    pub guid_seed: String,
    pub properties: Vec<MappedProperty>,
    pub classification: Option<Classification>,
    /// Index of the matching rule, `None` for the default class
    pub rule_index: Option<usize>,
}

/// Hex SHA-256 of `fingerprint|path|name`
pub fn guid_seed(fingerprint: &str, assembly_path: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(b"|");
    hasher.update(assembly_path.as_bytes());
    hasher.update(b"|");
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// First [`TAG_LENGTH`] characters of [`guid_seed`]
pub fn short_tag(fingerprint: &str, assembly_path: &str, name: &str) -> String {
    let mut seed = guid_seed(fingerprint, assembly_path, name);
    seed.truncate(TAG_LENGTH);
    seed
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

struct CompiledRule {
    rule: Rule,
    name: Option<Regex>,
    path: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, name: &str, ctx: &PartContext<'_>) -> bool {
        let part = ctx.part;
        let m = &self.rule.matcher;

        if let Some(re) = &self.name {
            if !re.is_match(name) && !re.is_match(&part.assembly_path) {
                return false;
            }
        }
        if let Some(prefix) = &m.path_prefix {
            if !part.assembly_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.path {
            if !re.is_match(&part.assembly_path) {
                return false;
            }
        }
        if m.layer.is_some() && m.layer != part.layer {
            return false;
        }
        if m.color.is_some() && m.color != ctx.color() {
            return false;
        }
        if m.geometry_archetype.is_some_and(|a| a != ctx.archetype) {
            return false;
        }
        true
    }
}

/// Applies a rule file to parts. Patterns are compiled once, up front.
pub struct MappingEngine {
    normalization: Vec<(Regex, String)>,
    rules: Vec<CompiledRule>,
    default_class: String,
    property_defaults: BTreeMap<String, String>,
    placeholder: Regex,
}

impl MappingEngine {
    /// Compile a rule file. Invalid patterns are a configuration error.
    pub fn new(file: &RuleFile, default_class: &str) -> Result<Self> {
        let normalization = file
            .name_normalization
            .iter()
            .map(|n| Ok((compile(&n.pattern)?, n.replacement.clone())))
            .collect::<Result<Vec<_>>>()?;
        let rules = file
            .rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    name: rule.matcher.name_pattern.as_deref().map(compile).transpose()?,
                    path: rule.matcher.path_pattern.as_deref().map(compile).transpose()?,
                    rule: rule.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            normalization,
            rules,
            default_class: default_class.to_string(),
            property_defaults: file.property_defaults.clone(),
            placeholder: compile(r"\$\{([A-Za-z0-9_]+)\}")?,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn default_class(&self) -> &str {
        &self.default_class
    }

    /// Apply the replacement list in order, then trim
    pub fn normalize_name(&self, name: &str) -> String {
        let mut normalized = name.to_string();
        for (re, replacement) in &self.normalization {
            normalized = re.replace_all(&normalized, replacement.as_str()).into_owned();
        }
        normalized.trim().to_string()
    }

    /// First rule, in file order, whose constraints all hold
    pub fn select_rule(&self, normalized_name: &str, ctx: &PartContext<'_>) -> Option<(usize, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.matches(normalized_name, ctx))
            .map(|(i, r)| (i, &r.rule))
    }

    pub fn map_part(&self, ctx: &PartContext<'_>) -> std::result::Result<MappingResult, FailureReason> {
        let part = ctx.part;
        let normalized_name = self.normalize_name(&part.name);
        let selected = self.select_rule(&normalized_name, ctx);

        let (target_class, object_type) = match selected {
            Some((_, rule)) => (rule.assign.target_class.clone(), rule.assign.object_type.clone()),
            None => (self.default_class.clone(), None),
        };
        if !is_class_name(&target_class) {
            return Err(FailureReason::Mapping(format!(
                "'{}' is not an IFC class name",
                target_class
            )));
        }

        let tokens = self.tokens(ctx);
        let properties = selected
            .map(|(_, rule)| {
                rule.assign
                    .properties
                    .iter()
                    .map(|p| MappedProperty {
                        name: p.name.clone(),
                        value: self.substitute(&p.value, &tokens),
                        data_type: p.data_type.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let classification = selected
            .and_then(|(_, rule)| rule.assign.classification.as_ref())
            .map(|c| Classification {
                system: c.system.clone(),
                code: c.code.clone(),
                title: Some(c.title.clone().unwrap_or_else(|| c.code.clone())),
            });

        let seed = guid_seed(ctx.fingerprint, &part.assembly_path, &normalized_name);
        Ok(MappingResult {
            target_class,
            object_type,
            tag: seed[..TAG_LENGTH].to_string(),
            guid_seed: seed,
            normalized_name,
            properties,
            classification,
            rule_index: selected.map(|(i, _)| i),
        })
    }

    /// Placeholder values: rule-file defaults first, part values on top
    fn tokens(&self, ctx: &PartContext<'_>) -> BTreeMap<String, String> {
        let mut tokens = self.property_defaults.clone();
        let part = ctx.part;
        for (key, value) in [
            ("ProjectKey", ctx.project_key.to_string()),
            ("AssemblyPath", part.assembly_path.clone()),
            ("OriginalName", part.name.clone()),
            ("Layer", part.layer.clone().unwrap_or_default()),
            ("Color", ctx.color().unwrap_or_default()),
            ("GeometryArchetype", ctx.archetype.to_string()),
        ] {
            tokens.insert(key.to_string(), value);
        }
        tokens
    }

    /// Replace known `${Token}`s; unknown ones stay as written
    fn substitute(&self, template: &str, tokens: &BTreeMap<String, String>) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures<'_>| match tokens.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn is_class_name(class: &str) -> bool {
    class.len() > 3 && class.starts_with("Ifc") && class.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{NameNormalization, PropertyTemplate, RuleAssign, RuleMatch};
    use ifc_bridge_core::{Rgb, ShapeHandle};

    fn part(name: &str, path: &str) -> Part {
        Part {
            name: name.to_string(),
            assembly_path: path.to_string(),
            shape: ShapeHandle::new(vec![1]),
            layer: Some("MEP".to_string()),
            color: Some(Rgb::new(1.0, 0.0, 0.0)),
        }
    }

    fn rule(matcher: RuleMatch, class: &str) -> Rule {
        Rule {
            confidence: None,
            matcher,
            assign: RuleAssign {
                target_class: class.to_string(),
                object_type: None,
                classification: None,
                properties: Vec::new(),
            },
        }
    }

    fn ctx<'a>(part: &'a Part) -> PartContext<'a> {
        PartContext {
            part,
            fingerprint: "f00d",
            project_key: "P-1",
            archetype: Archetype::Pipe,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let file = RuleFile {
            rules: vec![
                rule(
                    RuleMatch {
                        name_pattern: Some("valve".to_string()),
                        ..Default::default()
                    },
                    "IfcValve",
                ),
                rule(RuleMatch::default(), "IfcPipeSegment"),
            ],
            ..Default::default()
        };
        let engine = MappingEngine::new(&file, "IfcBuildingElementProxy").unwrap();

        let valve = part("Valve-200mm", "Skid/Valve-200mm");
        assert_eq!(engine.map_part(&ctx(&valve)).unwrap().target_class, "IfcValve");

        let other = part("Spool", "Skid/Spool");
        let result = engine.map_part(&ctx(&other)).unwrap();
        assert_eq!(result.target_class, "IfcPipeSegment");
        assert_eq!(result.rule_index, Some(1));
    }

    #[test]
    fn test_name_pattern_falls_back_to_path() {
        let file = RuleFile {
            rules: vec![rule(
                RuleMatch {
                    name_pattern: Some(".*(VALVE).*".to_string()),
                    ..Default::default()
                },
                "IfcValve",
            )],
            ..Default::default()
        };
        let engine = MappingEngine::new(&file, "IfcBuildingElementProxy").unwrap();
        let body = part("Body", "Valve-200mm/Body");
        assert_eq!(engine.map_part(&ctx(&body)).unwrap().target_class, "IfcValve");
    }

    #[test]
    fn test_constraints_must_all_hold() {
        let file = RuleFile {
            rules: vec![rule(
                RuleMatch {
                    path_prefix: Some("Skid/".to_string()),
                    layer: Some("MEP".to_string()),
                    color: Some("(1.000, 0.000, 0.000)".to_string()),
                    geometry_archetype: Some(Archetype::Member),
                    ..Default::default()
                },
                "IfcMember",
            )],
            ..Default::default()
        };
        let engine = MappingEngine::new(&file, "IfcPlate").unwrap();
        let p = part("Rail", "Skid/Rail");

        let mut context = ctx(&p);
        assert_eq!(engine.map_part(&context).unwrap().target_class, "IfcPlate");
        context.archetype = Archetype::Member;
        let result = engine.map_part(&context).unwrap();
        assert_eq!(result.target_class, "IfcMember");
        assert_eq!(result.rule_index, Some(0));
    }

    #[test]
    fn test_tag_is_deterministic() {
        let engine = MappingEngine::new(&RuleFile::default(), "IfcBuildingElementProxy").unwrap();
        let p = part("VALVE-200mm", "VALVE-200mm");
        let a = engine.map_part(&ctx(&p)).unwrap();
        let b = engine.map_part(&ctx(&p)).unwrap();
        assert_eq!(a.tag, b.tag);
        assert_eq!(a.tag.len(), TAG_LENGTH);
        assert_eq!(a.tag, short_tag("f00d", "VALVE-200mm", "VALVE-200mm"));
        assert!(a.guid_seed.starts_with(&a.tag));
        assert_eq!(a.guid_seed.len(), 64);

        let moved = part("VALVE-200mm", "Skid/VALVE-200mm");
        assert_ne!(engine.map_part(&ctx(&moved)).unwrap().tag, a.tag);
    }

    #[test]
    fn test_name_normalization() {
        let file = RuleFile {
            name_normalization: vec![
                NameNormalization {
                    pattern: r"\s+rev\s*\w+$".to_string(),
                    replacement: String::new(),
                },
                NameNormalization {
                    pattern: "_".to_string(),
                    replacement: "-".to_string(),
                },
            ],
            ..Default::default()
        };
        let engine = MappingEngine::new(&file, "IfcBuildingElementProxy").unwrap();
        assert_eq!(engine.normalize_name("  Gate_Valve REV C"), "Gate-Valve");
    }

    #[test]
    fn test_property_substitution() {
        let mut valve = rule(RuleMatch::default(), "IfcValve");
        valve.assign.properties = vec![
            PropertyTemplate {
                name: "Ref".to_string(),
                value: "${ProjectKey}:${AssemblyPath}".to_string(),
                data_type: "IfcLabel".to_string(),
            },
            PropertyTemplate {
                name: "Info".to_string(),
                value: "${GeometryArchetype} ${Discipline} ${Unknown}".to_string(),
                data_type: "IfcText".to_string(),
            },
        ];
        valve.assign.classification = Some(Classification {
            system: "Uniclass".to_string(),
            code: "Pr_65".to_string(),
            title: None,
        });
        let mut file = RuleFile {
            rules: vec![valve],
            ..Default::default()
        };
        file.property_defaults.insert("Discipline".to_string(), "MEP".to_string());
        file.property_defaults.insert("ProjectKey".to_string(), "ignored".to_string());

        let engine = MappingEngine::new(&file, "IfcBuildingElementProxy").unwrap();
        let p = part("Valve", "Skid/Valve");
        let result = engine.map_part(&ctx(&p)).unwrap();
        assert_eq!(result.properties[0].value, "P-1:Skid/Valve");
        assert_eq!(result.properties[1].value, "pipe MEP ${Unknown}");
        assert_eq!(result.properties[1].data_type, "IfcText");
        let classification = result.classification.unwrap();
        assert_eq!(classification.title.as_deref(), Some("Pr_65"));
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let file = RuleFile {
            rules: vec![rule(
                RuleMatch {
                    name_pattern: Some("(unclosed".to_string()),
                    ..Default::default()
                },
                "IfcValve",
            )],
            ..Default::default()
        };
        assert!(matches!(
            MappingEngine::new(&file, "IfcBuildingElementProxy"),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_bad_class_is_part_failure() {
        let file = RuleFile {
            rules: vec![rule(RuleMatch::default(), "Valve")],
            ..Default::default()
        };
        let engine = MappingEngine::new(&file, "IfcBuildingElementProxy").unwrap();
        let p = part("Valve", "Valve");
        assert!(matches!(engine.map_part(&ctx(&p)), Err(FailureReason::Mapping(_))));
    }
}
