// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoded STEP instances
//!
//! Attribute values are owned so decoded instances can be cached and shared
//! across threads.

use smallvec::SmallVec;

use crate::parser::Token;

/// STEP attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    EntityRef(u32),
    /// Unescaped string value
    String(String),
    Integer(i64),
    Float(f64),
    Enum(String),
    List(Vec<AttributeValue>),
    /// Typed parameter such as `LENGTH_MEASURE(25.4)`
    Typed(String, Vec<AttributeValue>),
    Null,
    Derived,
}

impl AttributeValue {
    pub fn from_token(token: &Token) -> Self {
        match token {
            Token::EntityRef(id) => AttributeValue::EntityRef(*id),
            Token::String(s) => AttributeValue::String(decode_step_string(s)),
            Token::Integer(i) => AttributeValue::Integer(*i),
            Token::Float(f) => AttributeValue::Float(*f),
            Token::Enum(e) => AttributeValue::Enum(e.to_string()),
            Token::List(items) => {
                AttributeValue::List(items.iter().map(Self::from_token).collect())
            }
            Token::TypedValue(name, args) => AttributeValue::Typed(
                name.to_string(),
                args.iter().map(Self::from_token).collect(),
            ),
            Token::Null => AttributeValue::Null,
            Token::Derived => AttributeValue::Derived,
        }
    }

    #[inline]
    pub fn as_entity_ref(&self) -> Option<u32> {
        match self {
            AttributeValue::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_enum(&self) -> Option<&str> {
        match self {
            AttributeValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value; a typed measure with one numeric argument unwraps to it
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Typed(_, args) if args.len() == 1 => args[0].as_float(),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// `.T.` / `.F.` enumerations
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_enum()? {
            "T" | "TRUE" => Some(true),
            "F" | "FALSE" => Some(false),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null | AttributeValue::Derived)
    }

    /// Entity references of a list attribute, skipping anything else
    pub fn ref_list(&self) -> Vec<u32> {
        self.as_list()
            .map(|items| items.iter().filter_map(|v| v.as_entity_ref()).collect())
            .unwrap_or_default()
    }

    /// Three-component coordinate list such as `(0.,1.,2.)`; 2D lists get z = 0
    pub fn as_point3(&self) -> Option<[f64; 3]> {
        let items = self.as_list()?;
        let x = items.first()?.as_float()?;
        let y = items.get(1)?.as_float()?;
        let z = match items.get(2) {
            Some(v) => v.as_float()?,
            None => 0.0,
        };
        Some([x, y, z])
    }
}

/// One `NAME(args)` part of an instance
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub type_name: String,
    pub attributes: Vec<AttributeValue>,
}

/// Decoded STEP instance. Simple instances have one record; complex
/// (multi-leaf) instances such as `(LENGTH_UNIT() NAMED_UNIT(*) SI_UNIT(...))`
/// have one per leaf, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEntity {
    pub id: u32,
    pub records: SmallVec<[EntityRecord; 1]>,
}

impl DecodedEntity {
    /// Simple instance
    pub fn new(id: u32, type_name: impl Into<String>, attributes: Vec<AttributeValue>) -> Self {
        let mut records = SmallVec::new();
        records.push(EntityRecord {
            type_name: type_name.into(),
            attributes,
        });
        Self { id, records }
    }

    /// Upper-case type name of the first record
    pub fn type_name(&self) -> &str {
        self.records
            .first()
            .map(|r| r.type_name.as_str())
            .unwrap_or("")
    }

    pub fn is_complex(&self) -> bool {
        self.records.len() > 1
    }

    /// True when any record has the given type
    pub fn is_a(&self, type_name: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.type_name.eq_ignore_ascii_case(type_name))
    }

    /// Record of the given type (complex instances)
    pub fn record(&self, type_name: &str) -> Option<&EntityRecord> {
        self.records
            .iter()
            .find(|r| r.type_name.eq_ignore_ascii_case(type_name))
    }

    /// Attributes of the first record
    pub fn attributes(&self) -> &[AttributeValue] {
        self.records
            .first()
            .map(|r| r.attributes.as_slice())
            .unwrap_or(&[])
    }

    /// Get attribute by index
    pub fn get(&self, index: usize) -> Option<&AttributeValue> {
        self.attributes().get(index)
    }

    /// Get entity reference attribute
    pub fn get_ref(&self, index: usize) -> Option<u32> {
        self.get(index).and_then(|v| v.as_entity_ref())
    }

    /// Get string attribute
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(|v| v.as_string())
    }

    /// Get float attribute
    pub fn get_float(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(|v| v.as_float())
    }

    /// Get list attribute
    pub fn get_list(&self, index: usize) -> Option<&[AttributeValue]> {
        self.get(index).and_then(|v| v.as_list())
    }

    /// Entity references of a list attribute
    pub fn get_ref_list(&self, index: usize) -> Vec<u32> {
        self.get(index).map(|v| v.ref_list()).unwrap_or_default()
    }
}

/// Undo ISO 10303-21 string escaping: doubled quotes, `\\`, `\S\`, `\X\`,
/// `\X2\ ... \X0\` and `\X4\ ... \X0\`.
pub fn decode_step_string(raw: &str) -> String {
    if !raw.contains('\\') && !raw.contains("''") {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(c) = rest.chars().next() {
        if c == '\'' && rest.starts_with("''") {
            out.push('\'');
            rest = &rest[2..];
        } else if c == '\\' {
            let (decoded, consumed) = decode_escape(rest);
            out.push_str(&decoded);
            rest = &rest[consumed..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Decode one escape at the start of `s`; returns the text and bytes consumed.
/// Unknown escapes are copied through.
fn decode_escape(s: &str) -> (String, usize) {
    if s.starts_with("\\\\") {
        return ("\\".to_string(), 2);
    }
    if let Some(tail) = s.strip_prefix("\\S\\") {
        if let Some(c) = tail.chars().next() {
            if c.is_ascii() {
                let shifted = char::from(c as u8 + 128);
                return (shifted.to_string(), 3 + 1);
            }
        }
    }
    if let Some(tail) = s.strip_prefix("\\X\\") {
        if let Some(byte) = tail.get(..2).and_then(|h| u8::from_str_radix(h, 16).ok()) {
            return (char::from(byte).to_string(), 5);
        }
    }
    for (marker, width) in [("\\X2\\", 4usize), ("\\X4\\", 8usize)] {
        if let Some(tail) = s.strip_prefix(marker) {
            if let Some(end) = tail.find("\\X0\\") {
                let hex = &tail[..end];
                let decoded = if width == 4 {
                    let units: Vec<u16> = hex
                        .as_bytes()
                        .chunks(4)
                        .filter_map(|c| std::str::from_utf8(c).ok())
                        .filter_map(|c| u16::from_str_radix(c, 16).ok())
                        .collect();
                    String::from_utf16_lossy(&units)
                } else {
                    hex.as_bytes()
                        .chunks(8)
                        .filter_map(|c| std::str::from_utf8(c).ok())
                        .filter_map(|c| u32::from_str_radix(c, 16).ok())
                        .filter_map(char::from_u32)
                        .collect()
                };
                return (decoded, marker.len() + end + 4);
            }
        }
    }
    if s.starts_with("\\P") && s.get(3..4) == Some("\\") {
        return (String::new(), 4);
    }
    ("\\".to_string(), 1)
}
