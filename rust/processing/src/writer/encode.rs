// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attribute encoding for ISO 10303-21 output and IFC GlobalIds.

use std::fmt::Write;

use uuid::Uuid;

/// IFC's base64 alphabet for compressed GUIDs
const GUID_CHARS: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_$";

fn push_base64(out: &mut String, value: u32, digits: u32) {
    for i in (0..digits).rev() {
        out.push(GUID_CHARS[((value >> (6 * i)) & 63) as usize] as char);
    }
}

/// 22-character IFC GlobalId of a UUID
pub fn compress_guid(uuid: &Uuid) -> String {
    let bytes = uuid.as_bytes();
    let mut out = String::with_capacity(22);
    push_base64(&mut out, bytes[0] as u32, 2);
    for chunk in bytes[1..].chunks_exact(3) {
        let value = (chunk[0] as u32) << 16 | (chunk[1] as u32) << 8 | chunk[2] as u32;
        push_base64(&mut out, value, 4);
    }
    out
}

/// Deterministic GlobalId: UUIDv5 in the URL namespace over `seed`
pub fn global_id(seed: &str) -> String {
    compress_guid(&Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes()))
}

/// REAL literal; always carries a decimal point
pub fn real(value: f64) -> String {
    if !value.is_finite() {
        return "0.".to_string();
    }
    // Avoid "-0."
    let value = if value == 0.0 { 0.0 } else { value };
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        text + "."
    }
}

/// Quoted STRING literal. Quotes and backslashes are doubled, anything
/// outside printable ASCII goes through `\X2\` UTF-16 escapes.
pub fn string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                out.push_str("\\X2\\");
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "{:04X}", unit);
                }
                out.push_str("\\X0\\");
            }
        }
    }
    out.push('\'');
    out
}

/// STRING literal or `$`
pub fn opt_string(value: Option<&str>) -> String {
    value.map_or_else(|| "$".to_string(), string)
}

/// `(#a,#b,...)`
pub fn refs(ids: &[u32]) -> String {
    let mut out = String::with_capacity(ids.len() * 6 + 2);
    out.push('(');
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "#{}", id);
    }
    out.push(')');
    out
}

/// `(x,y,z)` with REAL literals
pub fn triple(p: [f64; 3]) -> String {
    format!("({},{},{})", real(p[0]), real(p[1]), real(p[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_guid() {
        assert_eq!(compress_guid(&Uuid::nil()), "0000000000000000000000");
        assert_eq!(compress_guid(&Uuid::from_u128(u128::MAX)), "3$$$$$$$$$$$$$$$$$$$$$");
        let one = Uuid::from_u128(1);
        assert_eq!(compress_guid(&one), "0000000000000000000001");
    }

    #[test]
    fn test_global_id_is_stable() {
        let a = global_id("seed");
        assert_eq!(a, global_id("seed"));
        assert_ne!(a, global_id("seed2"));
        assert_eq!(a.len(), 22);
    }

    #[test]
    fn test_real() {
        assert_eq!(real(1.0), "1.");
        assert_eq!(real(-2.5), "-2.5");
        assert_eq!(real(-0.0), "0.");
        assert_eq!(real(1e-7), "0.0000001");
        assert_eq!(real(f64::NAN), "0.");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(string("O'Brien"), "'O''Brien'");
        assert_eq!(string("a\\b"), "'a\\\\b'");
        assert_eq!(string("Ø10"), "'\\X2\\00D8\\X0\\10'");
        assert_eq!(opt_string(None), "$");
    }

    #[test]
    fn test_refs() {
        assert_eq!(refs(&[1, 22]), "(#1,#22)");
        assert_eq!(refs(&[]), "()");
    }
}
