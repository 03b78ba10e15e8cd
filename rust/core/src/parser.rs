// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ISO 10303-21 parser using nom
//!
//! Zero-copy tokenization of entity instances (simple and complex) and
//! string-aware record scanning.

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, one_of},
    combinator::{map, map_res, opt, recognize},
    multi::{many1, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// STEP token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Entity reference: #123
    EntityRef(u32),
    /// String literal, still escaped: 'it''s'
    String(&'a str),
    /// Integer: 42
    Integer(i64),
    /// Real: 3.14, 0., 1.E-05
    Float(f64),
    /// Enumeration: .T., .MILLI.
    Enum(&'a str),
    /// List: (1, 2, 3)
    List(Vec<Token<'a>>),
    /// Typed value: LENGTH_MEASURE(25.4)
    TypedValue(&'a str, Vec<Token<'a>>),
    /// Unset value: $
    Null,
    /// Redeclared/derived value: *
    Derived,
}

/// One `NAME(args)` record of an instance. Complex instances carry several.
pub type EntityPart<'a> = (&'a str, Vec<Token<'a>>);

/// Parts of a decoded instance, in file order.
pub type EntityParts<'a> = SmallVec<[EntityPart<'a>; 1]>;

/// Skip whitespace and `/* ... */` comments
fn ws(input: &str) -> IResult<&str, ()> {
    let mut rest = input.trim_start();
    while let Some(after) = rest.strip_prefix("/*") {
        match after.find("*/") {
            Some(end) => rest = after[end + 2..].trim_start(),
            None => return Ok(("", ())),
        }
    }
    Ok((rest, ()))
}

fn keyword(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Parse entity reference: #123
fn entity_ref(input: &str) -> IResult<&str, Token> {
    map(
        preceded(char('#'), map_res(digit1, |s: &str| s.parse::<u32>())),
        Token::EntityRef,
    )(input)
}

/// Parse string literal: 'text' or "hex"
/// A doubled quote escapes the quote character.
fn string_literal(input: &str) -> IResult<&str, Token> {
    fn content(input: &str, quote: u8) -> IResult<&str, &str> {
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == quote {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                    continue;
                }
                return Ok((&input[i..], &input[..i]));
            }
            i += 1;
        }
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )))
    }

    alt((
        map(
            delimited(char('\''), |i| content(i, b'\''), char('\'')),
            Token::String,
        ),
        map(
            delimited(char('"'), |i| content(i, b'"'), char('"')),
            Token::String,
        ),
    ))(input)
}

fn integer(input: &str) -> IResult<&str, Token> {
    map_res(
        recognize(pair(opt(one_of("+-")), digit1)),
        |s: &str| s.parse::<i64>().map(Token::Integer),
    )(input)
}

fn parse_real(s: &str) -> Option<f64> {
    lexical_core::parse::<f64>(s.as_bytes())
        .ok()
        .or_else(|| s.parse::<f64>().ok())
}

/// Parse real: 3.14, -3.14, 1.5E-10, 0., 1.E-05
fn float(input: &str) -> IResult<&str, Token> {
    map(
        map_res(
            recognize(tuple((
                opt(one_of("+-")),
                digit1,
                char('.'),
                opt(digit1),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            ))),
            |s: &str| parse_real(s).ok_or(()),
        ),
        Token::Float,
    )(input)
}

fn enum_value(input: &str) -> IResult<&str, Token> {
    map(delimited(char('.'), keyword, char('.')), Token::Enum)(input)
}

fn null(input: &str) -> IResult<&str, Token> {
    map(char('$'), |_| Token::Null)(input)
}

fn derived(input: &str) -> IResult<&str, Token> {
    map(char('*'), |_| Token::Derived)(input)
}

/// Parenthesised, comma separated arguments
fn arguments(input: &str) -> IResult<&str, Vec<Token>> {
    delimited(
        terminated(char('('), ws),
        separated_list0(delimited(ws, char(','), ws), token),
        preceded(ws, char(')')),
    )(input)
}

/// Parse typed value: LENGTH_MEASURE(25.4), POSITIVE_LENGTH_MEASURE(1.)
fn typed_value(input: &str) -> IResult<&str, Token> {
    map(pair(keyword, preceded(ws, arguments)), |(name, args)| {
        Token::TypedValue(name, args)
    })(input)
}

fn list(input: &str) -> IResult<&str, Token> {
    map(arguments, Token::List)(input)
}

/// Parse one parameter with surrounding whitespace
fn token(input: &str) -> IResult<&str, Token> {
    delimited(
        ws,
        alt((
            float, // before integer: a real starts like one
            integer,
            entity_ref,
            string_literal,
            enum_value,
            list,
            typed_value,
            null,
            derived,
        )),
        ws,
    )(input)
}

/// `NAME(args)`
fn entity_part(input: &str) -> IResult<&str, EntityPart> {
    pair(delimited(ws, keyword, ws), arguments)(input)
}

/// `NAME(args)` or `(A(args) B(args) ...)`
fn instance_body(input: &str) -> IResult<&str, EntityParts> {
    alt((
        map(entity_part, |part| {
            let mut parts = SmallVec::new();
            parts.push(part);
            parts
        }),
        map(
            delimited(
                terminated(char('('), ws),
                many1(terminated(entity_part, ws)),
                char(')'),
            ),
            SmallVec::from_vec,
        ),
    ))(input)
}

/// Parse a complete instance record
/// Example: `#123=PRODUCT('P1','Valve','',(#2));`
pub fn parse_entity(input: &str) -> Result<(u32, EntityParts)> {
    let result: IResult<&str, (u32, EntityParts)> = tuple((
        delimited(
            ws,
            preceded(char('#'), map_res(digit1, |s: &str| s.parse::<u32>())),
            ws,
        ),
        delimited(
            char('='),
            delimited(ws, instance_body, ws),
            char(';'),
        ),
    ))(input);

    match result {
        Ok((_, parsed)) => Ok(parsed),
        Err(e) => Err(Error::parse(0, format!("Failed to parse entity: {}", e))),
    }
}

/// Parse a header record such as `FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));`
pub fn parse_record(input: &str) -> Result<EntityPart> {
    let result: IResult<&str, EntityPart> =
        terminated(entity_part, pair(ws, char(';')))(input);

    match result {
        Ok((_, part)) => Ok(part),
        Err(e) => Err(Error::parse(0, format!("Failed to parse record: {}", e))),
    }
}

/// Find the byte just past the `;` closing the record that starts at `from`.
/// Quoted strings are skipped so a `;` inside a label does not end the record.
pub fn record_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while pos < bytes.len() {
        let offset = memchr::memchr3(b';', b'\'', b'"', &bytes[pos..])?;
        let at = pos + offset;
        match bytes[at] {
            b';' => return Some(at + 1),
            quote => {
                let mut i = at + 1;
                loop {
                    let close = i + memchr::memchr(quote, &bytes[i..])?;
                    if bytes.get(close + 1) == Some(&quote) {
                        i = close + 2;
                        continue;
                    }
                    pos = close + 1;
                    break;
                }
            }
        }
    }
    None
}

/// Byte offset of the first instance in the DATA section, or 0 when the
/// content has no section markers (e.g. a bare list of instances).
pub fn data_section_start(content: &str) -> usize {
    let header_end = content.find("ENDSEC;").map(|i| i + 7).unwrap_or(0);
    content[header_end..]
        .find("DATA;")
        .map(|i| header_end + i + 5)
        .unwrap_or(0)
}

/// Fast instance scanner - finds records without decoding them
pub struct EntityScanner<'a> {
    content: &'a str,
    origin: usize,
    position: usize,
}

impl<'a> EntityScanner<'a> {
    pub fn new(content: &'a str) -> Self {
        let origin = data_section_start(content);
        Self {
            content,
            origin,
            position: origin,
        }
    }

    /// Scan for the next instance
    /// Returns (entity_id, type_name, record_start, record_end). For complex
    /// instances the type name is that of the first part.
    pub fn next_entity(&mut self) -> Option<(u32, &'a str, usize, usize)> {
        let bytes = self.content.as_bytes();
        loop {
            let start = self.position + memchr::memchr(b'#', &bytes[self.position..])?;
            let mut pos = start + 1;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let id_end = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if id_end == start + 1 || bytes.get(pos) != Some(&b'=') {
                self.position = start + 1;
                continue;
            }

            let id = self.content[start + 1..id_end].parse::<u32>().ok()?;
            let end = record_end(bytes, pos)?;
            self.position = end;

            let body = self.content[pos + 1..end].trim_start();
            let body = body.strip_prefix('(').map(str::trim_start).unwrap_or(body);
            let name_len = body
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(body.len());
            return Some((id, &body[..name_len], start, end));
        }
    }

    /// Find all instances of a specific type
    pub fn find_by_type(&mut self, target_type: &str) -> Vec<(u32, usize, usize)> {
        let mut results = Vec::new();
        while let Some((id, type_name, start, end)) = self.next_entity() {
            if type_name.eq_ignore_ascii_case(target_type) {
                results.push((id, start, end));
            }
        }
        results
    }

    /// Count instances by type
    pub fn count_by_type(&mut self) -> rustc_hash::FxHashMap<String, usize> {
        let mut counts = rustc_hash::FxHashMap::default();
        while let Some((_, type_name, _, _)) = self.next_entity() {
            *counts.entry(type_name.to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn reset(&mut self) {
        self.position = self.origin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref() {
        assert_eq!(entity_ref("#123"), Ok(("", Token::EntityRef(123))));
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal("'hello'"), Ok(("", Token::String("hello"))));
        assert_eq!(string_literal("'it''s'"), Ok(("", Token::String("it''s"))));
        assert_eq!(string_literal("'a;b'"), Ok(("", Token::String("a;b"))));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(integer("-42"), Ok(("", Token::Integer(-42))));
        assert_eq!(float("3.5"), Ok(("", Token::Float(3.5))));
        assert_eq!(float("0."), Ok(("", Token::Float(0.0))));
        assert_eq!(float("1.E-05"), Ok(("", Token::Float(1e-5))));
        assert_eq!(float("-2.5E+02"), Ok(("", Token::Float(-250.0))));
    }

    #[test]
    fn test_enum() {
        assert_eq!(enum_value(".MILLI."), Ok(("", Token::Enum("MILLI"))));
        assert_eq!(enum_value(".T."), Ok(("", Token::Enum("T"))));
    }

    #[test]
    fn test_typed_value() {
        let (_, token) = token("LENGTH_MEASURE(25.4)").unwrap();
        assert_eq!(
            token,
            Token::TypedValue("LENGTH_MEASURE", vec![Token::Float(25.4)])
        );
    }

    #[test]
    fn test_parse_simple_entity() {
        let (id, parts) =
            parse_entity("#12 = PRODUCT('V-1','Valve 200','',(#3));").unwrap();
        assert_eq!(id, 12);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0, "PRODUCT");
        assert_eq!(parts[0].1.len(), 4);
        assert_eq!(parts[0].1[3], Token::List(vec![Token::EntityRef(3)]));
    }

    #[test]
    fn test_parse_complex_entity() {
        let input = "#7=( LENGTH_UNIT() NAMED_UNIT(*) SI_UNIT(.MILLI.,.METRE.) );";
        let (id, parts) = parse_entity(input).unwrap();
        assert_eq!(id, 7);
        let names: Vec<&str> = parts.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["LENGTH_UNIT", "NAMED_UNIT", "SI_UNIT"]);
        assert_eq!(parts[1].1, vec![Token::Derived]);
        assert_eq!(
            parts[2].1,
            vec![Token::Enum("MILLI"), Token::Enum("METRE")]
        );
    }

    #[test]
    fn test_parse_entity_with_comment() {
        let (_, parts) =
            parse_entity("#3=CARTESIAN_POINT('', /* origin */ (0.,0.,1.));").unwrap();
        assert_eq!(parts[0].1.len(), 2);
    }

    #[test]
    fn test_parse_record() {
        let (name, args) = parse_record("FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));").unwrap();
        assert_eq!(name, "FILE_SCHEMA");
        assert_eq!(
            args,
            vec![Token::List(vec![Token::String("AUTOMOTIVE_DESIGN")])]
        );
    }

    #[test]
    fn test_record_end_skips_quoted_semicolons() {
        let text = b"#1=PRODUCT('a;b','x''y;z','',());#2=X();";
        let end = record_end(text, 0).unwrap();
        assert_eq!(&text[..end], b"#1=PRODUCT('a;b','x''y;z','',());");
    }

    #[test]
    fn test_entity_scanner() {
        let content = "ISO-10303-21;\nHEADER;\nFILE_NAME('part#1=x;','',(''),(''),'','','');\nENDSEC;\nDATA;\n\
#1=PRODUCT('P','Plate; thin','',());\n\
#2=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));\n\
#3=PRODUCT('Q','Q','',());\nENDSEC;\nEND-ISO-10303-21;\n";

        let mut scanner = EntityScanner::new(content);
        let (id, type_name, _, _) = scanner.next_entity().unwrap();
        assert_eq!((id, type_name), (1, "PRODUCT"));
        let (id, type_name, _, _) = scanner.next_entity().unwrap();
        assert_eq!((id, type_name), (2, "LENGTH_UNIT"));

        scanner.reset();
        let products = scanner.find_by_type("PRODUCT");
        assert_eq!(products.iter().map(|p| p.0).collect::<Vec<_>>(), vec![1, 3]);

        scanner.reset();
        let counts = scanner.count_by_type();
        assert_eq!(counts.get("PRODUCT"), Some(&2));
    }
}
