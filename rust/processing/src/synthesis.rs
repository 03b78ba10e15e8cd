// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rule synthesis: cluster classified parts and emit one rule per cluster.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::heuristics::{object_type_of, round3, Archetype, Inference, UNSPECIFIED};
use crate::rules::{Rule, RuleAssign, RuleMatch};

/// Parts sharing signature, archetype, layer and colour
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// `signature|archetype|layer|color`
    pub key: String,
    pub signature: String,
    pub archetype: Archetype,
    pub layer: Option<String>,
    pub color: Option<String>,
    /// Summed confidence per class, first-seen order
    pub scores: Vec<(String, f64)>,
    pub count: usize,
}

impl Cluster {
    /// Highest summed score; the first class seen wins ties
    pub fn best(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (class, score) in &self.scores {
            if best.map_or(true, |(_, s)| *score > s) {
                best = Some((class.as_str(), *score));
            }
        }
        best
    }
}

/// A rule with the cluster it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedRule {
    pub cluster: String,
    pub members: usize,
    pub rule: Rule,
}

/// Accumulates per-part inferences, then emits rules in one pass
#[derive(Debug, Default)]
pub struct RuleSynthesizer {
    clusters: Vec<Cluster>,
    index: FxHashMap<String, usize>,
}

pub fn cluster_key(signature: &str, archetype: Archetype, layer: Option<&str>, color: Option<&str>) -> String {
    format!(
        "{}|{}|{}|{}",
        signature,
        archetype,
        layer.unwrap_or_default(),
        color.unwrap_or_default()
    )
}

impl RuleSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one part's inference to its cluster
    pub fn observe(&mut self, signature: &str, layer: Option<&str>, color: Option<&str>, inference: &Inference) {
        let key = cluster_key(signature, inference.archetype, layer, color);
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.clusters.push(Cluster {
                    key: key.clone(),
                    signature: signature.to_string(),
                    archetype: inference.archetype,
                    layer: layer.map(str::to_string),
                    color: color.map(str::to_string),
                    scores: Vec::new(),
                    count: 0,
                });
                self.index.insert(key, self.clusters.len() - 1);
                self.clusters.len() - 1
            }
        };

        let cluster = &mut self.clusters[slot];
        match cluster.scores.iter_mut().find(|(c, _)| *c == inference.target_class) {
            Some((_, score)) => *score += inference.confidence,
            None => cluster
                .scores
                .push((inference.target_class.clone(), inference.confidence)),
        }
        cluster.count += 1;
    }

    /// Clusters in first-seen order
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// One rule per cluster, most constrained first, then by cluster key
    pub fn synthesize(&self) -> Vec<SynthesizedRule> {
        let mut rules: Vec<SynthesizedRule> = self
            .clusters
            .iter()
            .filter_map(|cluster| {
                let (class, score) = cluster.best()?;
                let name_pattern = (cluster.signature != UNSPECIFIED).then(|| {
                    let alternatives: Vec<String> =
                        cluster.signature.split('_').map(regex::escape).collect();
                    format!("(?i).*({}).*", alternatives.join("|"))
                });
                Some(SynthesizedRule {
                    cluster: cluster.key.clone(),
                    members: cluster.count,
                    rule: Rule {
                        confidence: Some(round3(score / cluster.count.max(1) as f64)),
                        matcher: RuleMatch {
                            name_pattern,
                            layer: cluster.layer.clone(),
                            color: cluster.color.clone(),
                            geometry_archetype: Some(cluster.archetype),
                            ..Default::default()
                        },
                        assign: RuleAssign {
                            target_class: class.to_string(),
                            object_type: Some(object_type_of(class)),
                            classification: None,
                            properties: Vec::new(),
                        },
                    },
                })
            })
            .collect();

        rules.sort_by(|a, b| {
            b.rule
                .matcher
                .specificity()
                .cmp(&a.rule.matcher.specificity())
                .then_with(|| a.cluster.cmp(&b.cluster))
        });
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inference(class: &str, confidence: f64, archetype: Archetype) -> Inference {
        Inference {
            target_class: class.to_string(),
            object_type: object_type_of(class),
            confidence,
            candidates: Vec::new(),
            archetype,
        }
    }

    #[test]
    fn test_single_valve_cluster() {
        let mut synth = RuleSynthesizer::new();
        synth.observe("VALVE", None, None, &inference("IfcValve", 0.9, Archetype::Unknown));
        let rules = synth.synthesize();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0].rule;
        assert_eq!(rules[0].cluster, "VALVE|unknown||");
        assert_eq!(rule.matcher.name_pattern.as_deref(), Some("(?i).*(VALVE).*"));
        assert_eq!(rule.matcher.geometry_archetype, Some(Archetype::Unknown));
        assert_eq!(rule.matcher.layer, None);
        assert_eq!(rule.assign.target_class, "IfcValve");
        assert_eq!(rule.assign.object_type.as_deref(), Some("Valve"));
        assert_eq!(rule.confidence, Some(0.9));
    }

    #[test]
    fn test_argmax_and_normalized_confidence() {
        let mut synth = RuleSynthesizer::new();
        let layer = Some("STEEL");
        synth.observe("BOLT", layer, None, &inference("IfcMechanicalFastener", 0.8, Archetype::Fastener));
        synth.observe("BOLT", layer, None, &inference("IfcMechanicalFastener", 1.0, Archetype::Fastener));
        synth.observe("BOLT", layer, None, &inference("IfcBuildingElementProxy", 0.4, Archetype::Fastener));
        assert_eq!(synth.clusters().len(), 1);
        assert_eq!(synth.clusters()[0].count, 3);

        let rules = synth.synthesize();
        assert_eq!(rules[0].rule.assign.target_class, "IfcMechanicalFastener");
        assert_relative_eq!(rules[0].rule.confidence.unwrap(), 0.6);
        assert_eq!(rules[0].rule.matcher.layer.as_deref(), Some("STEEL"));
        assert_eq!(rules[0].members, 3);
    }

    #[test]
    fn test_tie_goes_to_first_class() {
        let mut synth = RuleSynthesizer::new();
        synth.observe(UNSPECIFIED, None, None, &inference("IfcPlate", 0.6, Archetype::Plate));
        synth.observe(UNSPECIFIED, None, None, &inference("IfcMember", 0.6, Archetype::Plate));
        let rules = synth.synthesize();
        assert_eq!(rules[0].rule.assign.target_class, "IfcPlate");
        assert_eq!(rules[0].rule.matcher.name_pattern, None);
    }

    #[test]
    fn test_specific_rules_first() {
        let mut synth = RuleSynthesizer::new();
        synth.observe(UNSPECIFIED, None, None, &inference("IfcBuildingElementProxy", 0.4, Archetype::Unknown));
        synth.observe("PIPE", None, None, &inference("IfcPipeSegment", 0.9, Archetype::Pipe));
        synth.observe("DUCT", Some("HVAC"), None, &inference("IfcDuctSegment", 0.7, Archetype::Unknown));
        synth.observe("BEAM", None, None, &inference("IfcMember", 0.9, Archetype::Member));

        let rules = synth.synthesize();
        let order: Vec<&str> = rules.iter().map(|r| r.cluster.as_str()).collect();
        assert_eq!(
            order,
            vec!["DUCT|unknown|HVAC|", "BEAM|member||", "PIPE|pipe||", "UNSPECIFIED|unknown||"]
        );
    }

    #[test]
    fn test_multi_token_pattern() {
        let mut synth = RuleSynthesizer::new();
        let grey = Some("(0.500, 0.500, 0.500)");
        synth.observe("ELBOW_PIPE", None, grey, &inference("IfcPipeFitting", 1.0, Archetype::Pipe));
        let rule = &synth.synthesize()[0].rule;
        assert_eq!(rule.matcher.name_pattern.as_deref(), Some("(?i).*(ELBOW|PIPE).*"));
        assert_eq!(rule.matcher.color.as_deref(), Some("(0.500, 0.500, 0.500)"));
        assert_eq!(rule.matcher.specificity(), 3);
    }
}
