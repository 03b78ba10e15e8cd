// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length unit detection for exchange files
//!
//! Handles `SI_UNIT` prefixes and `CONVERSION_BASED_UNIT` declarations.

use std::fmt;
use std::str::FromStr;

use crate::decoder::EntityDecoder;
use crate::parser::EntityScanner;

/// Bytes inspected by the text fallback
const TEXT_SCAN_LIMIT: usize = 50_000;

/// SI Prefix multipliers as defined by ISO 10303-41
#[inline]
pub fn get_si_prefix_multiplier(prefix: &str) -> f64 {
    match prefix {
        "ATTO" => 1e-18,
        "FEMTO" => 1e-15,
        "PICO" => 1e-12,
        "NANO" => 1e-9,
        "MICRO" => 1e-6,
        "MILLI" => 1e-3,
        "CENTI" => 1e-2,
        "DECI" => 1e-1,
        "DECA" => 1e1,
        "HECTO" => 1e2,
        "KILO" => 1e3,
        "MEGA" => 1e6,
        "GIGA" => 1e9,
        "TERA" => 1e12,
        "PETA" => 1e15,
        "EXA" => 1e18,
        _ => 1.0, // no prefix
    }
}

/// Length units supported on both sides of the conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LengthUnit {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "mm"))]
    Millimeter,
    #[cfg_attr(feature = "serde", serde(rename = "m"))]
    Meter,
    #[cfg_attr(feature = "serde", serde(rename = "in"))]
    Inch,
}

impl LengthUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            LengthUnit::Millimeter => "mm",
            LengthUnit::Meter => "m",
            LengthUnit::Inch => "in",
        }
    }

    /// Metres per unit
    pub fn to_metres(&self) -> f64 {
        match self {
            LengthUnit::Millimeter => 1e-3,
            LengthUnit::Meter => 1.0,
            LengthUnit::Inch => 0.0254,
        }
    }

    fn from_metres(scale: f64) -> Option<Self> {
        [LengthUnit::Millimeter, LengthUnit::Meter, LengthUnit::Inch]
            .into_iter()
            .find(|u| (u.to_metres() - scale).abs() <= scale * 1e-6)
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm" | "millimeter" | "millimetre" => Ok(LengthUnit::Millimeter),
            "m" | "meter" | "metre" => Ok(LengthUnit::Meter),
            "in" | "inch" => Ok(LengthUnit::Inch),
            other => Err(format!("unsupported length unit '{}'", other)),
        }
    }
}

/// Where a unit hint came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSource {
    /// A `LENGTH_UNIT` instance in the DATA section
    UnitEntity,
    /// Keyword match near the top of the file
    TextScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitHint {
    pub unit: LengthUnit,
    pub source: HintSource,
}

/// Declared length unit of an exchange file, if any
pub fn detect_length_unit(content: &str, decoder: &mut EntityDecoder) -> Option<UnitHint> {
    structural_unit(content, decoder)
        .map(|unit| UnitHint {
            unit,
            source: HintSource::UnitEntity,
        })
        .or_else(|| {
            text_scan_unit(content).map(|unit| UnitHint {
                unit,
                source: HintSource::TextScan,
            })
        })
}

/// Conversion-based length units win over SI units, since an inch unit is
/// declared on top of a metre-based measure.
fn structural_unit(content: &str, decoder: &mut EntityDecoder) -> Option<LengthUnit> {
    let mut si_unit = None;
    let mut scanner = EntityScanner::new(content);
    while let Some((id, _, start, end)) = scanner.next_entity() {
        if !content[start..end].contains("LENGTH_UNIT") {
            continue;
        }
        let entity = match decoder.decode_by_id(id) {
            Ok(entity) => entity,
            Err(e) => {
                tracing::debug!(id, error = %e, "Skipping unreadable unit instance");
                continue;
            }
        };
        if !entity.is_a("LENGTH_UNIT") {
            continue;
        }

        if let Some(conversion) = entity.record("CONVERSION_BASED_UNIT") {
            let name = conversion
                .attributes
                .first()
                .and_then(|v| v.as_string())
                .unwrap_or("")
                .to_ascii_uppercase();
            if name.contains("INCH") {
                return Some(LengthUnit::Inch);
            }
            if name.contains("MILLIMETRE") || name.contains("MILLIMETER") {
                return Some(LengthUnit::Millimeter);
            }
        }

        if let Some(si) = entity.record("SI_UNIT") {
            let prefix = si.attributes.first().and_then(|v| v.as_enum()).unwrap_or("");
            let name = si.attributes.get(1).and_then(|v| v.as_enum()).unwrap_or("");
            if name == "METRE" && si_unit.is_none() {
                si_unit = LengthUnit::from_metres(get_si_prefix_multiplier(prefix));
            }
        }
    }
    si_unit
}

fn text_scan_unit(content: &str) -> Option<LengthUnit> {
    let mut limit = content.len().min(TEXT_SCAN_LIMIT);
    while !content.is_char_boundary(limit) {
        limit -= 1;
    }
    let head = content[..limit].to_ascii_uppercase();
    if head.contains("INCH") {
        Some(LengthUnit::Inch)
    } else if head.contains("MILLI") {
        Some(LengthUnit::Millimeter)
    } else if head.contains("METRE") {
        Some(LengthUnit::Meter)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(data: &str) -> Option<UnitHint> {
        let content = format!(
            "ISO-10303-21;\nHEADER;\nFILE_SCHEMA(('AUTOMOTIVE_DESIGN'));\nENDSEC;\nDATA;\n{}\nENDSEC;\n",
            data
        );
        let mut decoder = EntityDecoder::new(&content);
        detect_length_unit(&content, &mut decoder)
    }

    #[test]
    fn test_si_prefix() {
        assert_eq!(get_si_prefix_multiplier("MILLI"), 1e-3);
        assert_eq!(get_si_prefix_multiplier(""), 1.0);
    }

    #[test]
    fn test_millimetre_unit_entity() {
        let hint = detect(
            "#1=(NAMED_UNIT(*)PLANE_ANGLE_UNIT()SI_UNIT($,.RADIAN.));\n\
             #2=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));",
        )
        .unwrap();
        assert_eq!(hint.unit, LengthUnit::Millimeter);
        assert_eq!(hint.source, HintSource::UnitEntity);
    }

    #[test]
    fn test_metre_unit_entity() {
        let hint = detect("#2=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT($,.METRE.));").unwrap();
        assert_eq!(hint.unit, LengthUnit::Meter);
    }

    #[test]
    fn test_inch_conversion_unit() {
        let hint = detect(
            "#1=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));\n\
             #2=LENGTH_MEASURE_WITH_UNIT(LENGTH_MEASURE(25.4),#1);\n\
             #3=(CONVERSION_BASED_UNIT('INCH',#2)LENGTH_UNIT()NAMED_UNIT(#4));",
        );
        assert_eq!(hint.map(|h| h.unit), Some(LengthUnit::Inch));

        let hint = detect(
            "#2=LENGTH_MEASURE_WITH_UNIT(LENGTH_MEASURE(25.4),#5);\n\
             #3=(CONVERSION_BASED_UNIT('INCH',#2)LENGTH_UNIT()NAMED_UNIT(#4));",
        )
        .unwrap();
        assert_eq!(hint.unit, LengthUnit::Inch);
    }

    #[test]
    fn test_no_hint() {
        assert_eq!(detect("#1=PRODUCT('A','A','',());"), None);
    }

    #[test]
    fn test_unit_from_str() {
        assert_eq!("MM".parse::<LengthUnit>(), Ok(LengthUnit::Millimeter));
        assert_eq!("inch".parse::<LengthUnit>(), Ok(LengthUnit::Inch));
        assert!("furlong".parse::<LengthUnit>().is_err());
    }
}
