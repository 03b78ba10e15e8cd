// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Heuristic part classification.
//!
//! A transparent keyword/proportion scoring table, not a trained model: each
//! recognised token or bounding-box archetype adds a fixed bump to one or
//! more candidate classes and the best candidate wins if it clears the
//! acceptance threshold. Every table lives in [`Vocabulary`], which is handed
//! to the classifier at construction.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse shape category derived from bounding-box proportions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Archetype {
    #[serde(alias = "plate_like")]
    Plate,
    #[serde(alias = "pipe_like")]
    Pipe,
    #[serde(alias = "member_like")]
    Member,
    #[serde(alias = "fastener_like")]
    Fastener,
    Unknown,
}

impl Archetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Archetype::Plate => "plate",
            Archetype::Pipe => "pipe",
            Archetype::Member => "member",
            Archetype::Fastener => "fastener",
            Archetype::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Archetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.strip_suffix("_like").unwrap_or(&lower) {
            "plate" => Ok(Archetype::Plate),
            "pipe" => Ok(Archetype::Pipe),
            "member" => Ok(Archetype::Member),
            "fastener" => Ok(Archetype::Fastener),
            "unknown" => Ok(Archetype::Unknown),
            other => Err(format!("unknown geometry archetype '{}'", other)),
        }
    }
}

/// Ratio thresholds over sorted extents `s <= m <= l`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeThresholds {
    /// `s / l` below this is a plate
    pub plate_thickness: f64,
    /// `l / m` above this (with a round section) is a pipe
    pub pipe_length: f64,
    /// `m / s` below this counts as a round/square section
    pub round_section: f64,
    /// `l / s` above this is a member
    pub member_slenderness: f64,
    /// `l / m` range of a fastener (with a round section)
    pub fastener_length: (f64, f64),
}

impl Default for ArchetypeThresholds {
    fn default() -> Self {
        Self {
            plate_thickness: 0.05,
            pipe_length: 4.0,
            round_section: 1.3,
            member_slenderness: 8.0,
            fastener_length: (2.0, 4.0),
        }
    }
}

/// Any of `tokens` present adds `bump` to `class`, once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordBump {
    pub tokens: Vec<String>,
    pub class: String,
    pub bump: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeBump {
    pub archetype: Archetype,
    pub class: String,
    pub bump: f64,
}

/// Immutable scoring tables for one classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Tokens dropped during normalization
    pub noise: BTreeSet<String>,
    /// Tokens that make up cluster signatures
    pub domain: BTreeSet<String>,
    pub keywords: Vec<KeywordBump>,
    pub archetypes: Vec<ArchetypeBump>,
    pub thresholds: ArchetypeThresholds,
    /// Minimum top score for a class to be accepted
    pub acceptance: f64,
    pub fallback_class: String,
    /// Score given to the fallback when nothing else scored
    pub fallback_score: f64,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        let keyword = |tokens: &[&str], class: &str, bump: f64| KeywordBump {
            tokens: words(tokens),
            class: class.to_string(),
            bump,
        };
        let archetype = |archetype: Archetype, class: &str, bump: f64| ArchetypeBump {
            archetype,
            class: class.to_string(),
            bump,
        };

        Self {
            noise: words(&["REV", "R", "V", "V1", "V2", "COPY", "ASSY", "ASSEMBLY", "PART", "ITEM"])
                .into_iter()
                .collect(),
            domain: words(&[
                "VALVE", "DUCT", "PIPE", "ELBOW", "TEE", "COUPLING", "FLANGE", "DIFFUSER", "GRILLE",
                "BOLT", "NUT", "WASHER", "SCREW", "PLATE", "PANEL", "SHEET", "BEAM", "MEMBER",
            ])
            .into_iter()
            .collect(),
            keywords: vec![
                keyword(&["VALVE"], "IfcValve", 0.9),
                keyword(&["DIFFUSER", "GRILLE"], "IfcAirTerminal", 0.8),
                keyword(&["DUCT", "AHU"], "IfcDuctSegment", 0.7),
                keyword(&["PIPE", "ELBOW", "TEE", "COUPLING"], "IfcPipeSegment", 0.6),
                keyword(&["ELBOW", "TEE", "COUPLING"], "IfcPipeFitting", 0.8),
                keyword(&["BOLT", "NUT", "WASHER", "SCREW"], "IfcMechanicalFastener", 0.8),
                keyword(&["PLATE", "PANEL", "SHEET"], "IfcPlate", 0.6),
                keyword(&["BEAM", "MEMBER"], "IfcMember", 0.6),
            ],
            archetypes: vec![
                archetype(Archetype::Pipe, "IfcPipeSegment", 0.3),
                archetype(Archetype::Pipe, "IfcPipeFitting", 0.2),
                archetype(Archetype::Plate, "IfcPlate", 0.3),
                archetype(Archetype::Member, "IfcMember", 0.3),
                archetype(Archetype::Fastener, "IfcMechanicalFastener", 0.3),
            ],
            thresholds: ArchetypeThresholds::default(),
            acceptance: 0.6,
            fallback_class: "IfcBuildingElementProxy".to_string(),
            fallback_score: 0.4,
        }
    }
}

/// One scored class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub target_class: String,
    pub score: f64,
}

/// Outcome of [`HeuristicClassifier::infer_class`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    pub target_class: String,
    pub object_type: String,
    pub confidence: f64,
    /// Best three candidates, scores rounded to 3 decimals
    pub candidates: Vec<Candidate>,
    pub archetype: Archetype,
}

/// Class name without the `Ifc` prefix
pub fn object_type_of(class: &str) -> String {
    class.strip_prefix("Ifc").unwrap_or(class).to_string()
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Scores parts against a [`Vocabulary`]
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    vocabulary: Vocabulary,
}

impl HeuristicClassifier {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Upper-cased alphanumeric runs of name and path, noise removed
    pub fn normalize_tokens(&self, name: &str, assembly_path: &str) -> Vec<String> {
        let combined = format!("{} {}", name, assembly_path).to_uppercase();
        combined
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty() && !self.vocabulary.noise.contains(*t))
            .map(str::to_string)
            .collect()
    }

    /// Bucket a bounding box by its sorted extent ratios
    pub fn geometry_archetype(&self, bbox: &[f64; 6]) -> Archetype {
        let mut dims = [
            (bbox[3] - bbox[0]).abs(),
            (bbox[4] - bbox[1]).abs(),
            (bbox[5] - bbox[2]).abs(),
        ];
        dims.sort_by(f64::total_cmp);
        let [s, m, l] = dims;
        let t = &self.vocabulary.thresholds;

        if l <= 0.0 || !l.is_finite() {
            return Archetype::Unknown;
        }
        if s / l < t.plate_thickness {
            return Archetype::Plate;
        }
        // s > 0 from here on, so every ratio is finite
        let round = m / s < t.round_section;
        if l / m > t.pipe_length && round {
            return Archetype::Pipe;
        }
        if l / s > t.member_slenderness {
            return Archetype::Member;
        }
        let (lo, hi) = t.fastener_length;
        if (lo..=hi).contains(&(l / m)) && round {
            return Archetype::Fastener;
        }
        Archetype::Unknown
    }

    /// Score every class the tokens and archetype vote for
    pub fn infer_class(&self, tokens: &[String], archetype: Archetype) -> Inference {
        let vocab = &self.vocabulary;
        let present: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();

        // First-bumped order is kept for tie-breaking
        let mut scores: Vec<(String, f64)> = Vec::new();
        let mut bump = |class: &str, value: f64| match scores.iter_mut().find(|(c, _)| c == class) {
            Some((_, score)) => *score += value,
            None => scores.push((class.to_string(), value)),
        };

        for rule in &vocab.keywords {
            if rule.tokens.iter().any(|t| present.contains(t.as_str())) {
                bump(&rule.class, rule.bump);
            }
        }
        for rule in vocab.archetypes.iter().filter(|r| r.archetype == archetype) {
            bump(&rule.class, rule.bump);
        }
        if scores.is_empty() {
            scores.push((vocab.fallback_class.clone(), vocab.fallback_score));
        }

        // Stable sort keeps first-bumped order among equal scores
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        let (top_class, top_score) = &scores[0];
        let confidence = top_score.min(1.0);
        let target_class = if confidence < vocab.acceptance {
            vocab.fallback_class.clone()
        } else {
            top_class.clone()
        };

        Inference {
            object_type: object_type_of(&target_class),
            target_class,
            confidence,
            candidates: scores
                .iter()
                .take(3)
                .map(|(class, score)| Candidate {
                    target_class: class.clone(),
                    score: round3(*score),
                })
                .collect(),
            archetype,
        }
    }

    /// Sorted unique domain tokens joined with `_`, or `UNSPECIFIED`
    pub fn token_signature(&self, tokens: &[String]) -> String {
        let domain: BTreeSet<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| self.vocabulary.domain.contains(*t))
            .collect();
        if domain.is_empty() {
            return UNSPECIFIED.to_string();
        }
        domain.into_iter().collect::<Vec<_>>().join("_")
    }
}

/// Signature of parts with no domain token
pub const UNSPECIFIED: &str = "UNSPECIFIED";
