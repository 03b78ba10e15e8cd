// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length-unit inference: header hint first, then the scale of the parts.

use ifc_bridge_core::LengthUnit;
use serde::{Deserialize, Serialize};

/// Inferred unit with its confidence and the reasoning behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInference {
    pub unit: LengthUnit,
    pub confidence: f64,
    pub rationale: Vec<String>,
}

/// A plausible range of median bounding-box diagonals for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitBand {
    pub unit: LengthUnit,
    pub min: f64,
    pub max: f64,
    pub confidence: f64,
    pub label: String,
}

/// Ordered bands, first match wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitBands {
    pub bands: Vec<UnitBand>,
    pub hint_confidence: f64,
    pub fallback_unit: LengthUnit,
    pub fallback_confidence: f64,
}

impl Default for UnitBands {
    fn default() -> Self {
        let band = |unit, min, max, confidence, label: &str| UnitBand {
            unit,
            min,
            max,
            confidence,
            label: label.to_string(),
        };
        Self {
            bands: vec![
                band(LengthUnit::Meter, 0.001, 5.0, 0.7, "meter"),
                band(LengthUnit::Inch, 0.1, 200.0, 0.6, "inch"),
                band(LengthUnit::Millimeter, 1.0, 5000.0, 0.7, "millimeter"),
            ],
            hint_confidence: 0.9,
            fallback_unit: LengthUnit::Millimeter,
            fallback_confidence: 0.4,
        }
    }
}

/// Median of the finite values, `None` when there are none
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Infer the length unit of a file from its header hint or, failing that,
/// from the median bounding-box diagonal of its parts
pub fn infer_units(hint: Option<LengthUnit>, diagonals: &[f64], bands: &UnitBands) -> UnitInference {
    let mut rationale = Vec::new();

    if let Some(unit) = hint {
        rationale.push(format!("STEP header unit hint: {}", unit));
        return UnitInference {
            unit,
            confidence: bands.hint_confidence,
            rationale,
        };
    }

    let Some(median) = median(diagonals) else {
        rationale.push(format!(
            "No geometry extents available; defaulted to {}.",
            bands.fallback_unit
        ));
        return UnitInference {
            unit: bands.fallback_unit,
            confidence: bands.fallback_confidence,
            rationale,
        };
    };

    rationale.push(format!("Median bbox diagonal: {:.4}", median));
    match bands.bands.iter().find(|b| (b.min..=b.max).contains(&median)) {
        Some(band) => {
            rationale.push(format!("Diagonal suggests {}-scale parts.", band.label));
            UnitInference {
                unit: band.unit,
                confidence: band.confidence,
                rationale,
            }
        }
        None => {
            rationale.push(format!("Ambiguous scale; defaulted to {}.", bands.fallback_unit));
            UnitInference {
                unit: bands.fallback_unit,
                confidence: bands.fallback_confidence,
                rationale,
            }
        }
    }
}
