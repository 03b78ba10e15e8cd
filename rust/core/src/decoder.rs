// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity Decoder - On-demand instance parsing
//!
//! Lazily decode STEP instances from byte offsets without materialising the
//! whole file.

use crate::entity::{AttributeValue, DecodedEntity, EntityRecord};
use crate::error::{Error, Result};
use crate::parser::{data_section_start, parse_entity, record_end};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Pre-built entity index type
pub type EntityIndex = FxHashMap<u32, (usize, usize)>;

/// Build entity index from content - O(n) scan using SIMD-accelerated search
/// Returns index mapping entity IDs to byte offsets of their records
pub fn build_entity_index(content: &str) -> EntityIndex {
    let bytes = content.as_bytes();
    let len = bytes.len();

    // Roughly 1 instance per 60 bytes in typical exports
    let mut index = FxHashMap::with_capacity_and_hasher(len / 60, Default::default());

    let mut pos = data_section_start(content);

    while pos < len {
        let hash_offset = match memchr::memchr(b'#', &bytes[pos..]) {
            Some(offset) => offset,
            None => break,
        };

        let start = pos + hash_offset;
        pos = start + 1;

        let id_start = pos;
        while pos < len && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let id_end = pos;

        // Handles both `#45=` and `#45 = `
        while pos < len && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        if id_end > id_start && pos < len && bytes[pos] == b'=' {
            let id = parse_u32_inline(bytes, id_start, id_end);
            match record_end(bytes, pos) {
                Some(end) => {
                    pos = end;
                    index.insert(id, (start, end));
                }
                None => break, // unterminated record
            }
        }
    }

    index
}

/// Fast u32 parsing without string allocation
#[inline]
fn parse_u32_inline(bytes: &[u8], start: usize, end: usize) -> u32 {
    let mut result: u32 = 0;
    for &byte in &bytes[start..end] {
        let digit = byte.wrapping_sub(b'0');
        result = result.wrapping_mul(10).wrapping_add(digit as u32);
    }
    result
}

/// Entity decoder for lazy parsing - uses Arc for cheap cache sharing
pub struct EntityDecoder<'a> {
    content: &'a str,
    cache: FxHashMap<u32, Arc<DecodedEntity>>,
    /// Shared across threads without cloning the map
    entity_index: Option<Arc<EntityIndex>>,
    point_cache: FxHashMap<u32, [f64; 3]>,
}

impl<'a> EntityDecoder<'a> {
    /// Create new decoder; the index is built on first lookup
    pub fn new(content: &'a str) -> Self {
        Self {
            content,
            cache: FxHashMap::default(),
            entity_index: None,
            point_cache: FxHashMap::default(),
        }
    }

    /// Create decoder with shared Arc index (for parallel processing)
    pub fn with_arc_index(content: &'a str, index: Arc<EntityIndex>) -> Self {
        Self {
            content,
            cache: FxHashMap::default(),
            entity_index: Some(index),
            point_cache: FxHashMap::default(),
        }
    }

    fn build_index(&mut self) {
        if self.entity_index.is_none() {
            self.entity_index = Some(Arc::new(build_entity_index(self.content)));
        }
    }

    /// Shared index, building it if needed
    pub fn index(&mut self) -> Arc<EntityIndex> {
        self.build_index();
        self.entity_index.clone().unwrap_or_default()
    }

    /// Decode the record at byte offsets
    pub fn decode_at(&mut self, start: usize, end: usize) -> Result<Arc<DecodedEntity>> {
        let line = &self.content[start..end];
        let (id, parts) = parse_entity(line).map_err(|e| {
            Error::parse(
                start,
                format!("{}, input: {:?}", e, &line[..line.len().min(100)]),
            )
        })?;

        if let Some(entity) = self.cache.get(&id) {
            return Ok(Arc::clone(entity));
        }

        let records = parts
            .iter()
            .map(|(name, tokens)| EntityRecord {
                type_name: name.to_ascii_uppercase(),
                attributes: tokens.iter().map(AttributeValue::from_token).collect(),
            })
            .collect();

        let entity = Arc::new(DecodedEntity { id, records });
        self.cache.insert(id, Arc::clone(&entity));
        Ok(entity)
    }

    /// Decode instance by ID - O(1) lookup using entity index
    pub fn decode_by_id(&mut self, entity_id: u32) -> Result<Arc<DecodedEntity>> {
        if let Some(entity) = self.cache.get(&entity_id) {
            return Ok(Arc::clone(entity));
        }

        self.build_index();

        let (start, end) = self
            .entity_index
            .as_ref()
            .and_then(|idx| idx.get(&entity_id).copied())
            .ok_or(Error::UnresolvedReference(entity_id))?;

        self.decode_at(start, end)
    }

    /// Resolve entity reference (follow #ID)
    /// Returns None for null/derived values
    pub fn resolve_ref(&mut self, attr: &AttributeValue) -> Result<Option<Arc<DecodedEntity>>> {
        match attr.as_entity_ref() {
            Some(id) => Ok(Some(self.decode_by_id(id)?)),
            None => Ok(None),
        }
    }

    /// Resolve list of entity references
    pub fn resolve_ref_list(&mut self, attr: &AttributeValue) -> Result<Vec<Arc<DecodedEntity>>> {
        let list = attr
            .as_list()
            .ok_or_else(|| Error::parse(0, "Expected list"))?;

        let mut entities = Vec::with_capacity(list.len());
        for item in list {
            if let Some(id) = item.as_entity_ref() {
                entities.push(self.decode_by_id(id)?);
            }
        }
        Ok(entities)
    }

    /// Coordinates of a `CARTESIAN_POINT`, memoised per decoder
    pub fn point(&mut self, entity_id: u32) -> Result<[f64; 3]> {
        if let Some(p) = self.point_cache.get(&entity_id) {
            return Ok(*p);
        }
        let entity = self.decode_by_id(entity_id)?;
        let coords = entity
            .get(1)
            .and_then(|v| v.as_point3())
            .ok_or_else(|| {
                Error::parse(0, format!("#{} is not a cartesian point", entity_id))
            })?;
        self.point_cache.insert(entity_id, coords);
        Ok(coords)
    }

    pub fn contains(&mut self, entity_id: u32) -> bool {
        self.build_index();
        self.entity_index
            .as_ref()
            .is_some_and(|idx| idx.contains_key(&entity_id))
    }

    /// Get cached instance (without decoding)
    pub fn get_cached(&self, entity_id: u32) -> Option<Arc<DecodedEntity>> {
        self.cache.get(&entity_id).cloned()
    }

    /// Clear cache to free memory
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.point_cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Raw record text of an instance
    pub fn get_raw_content(&mut self, entity_id: u32) -> Option<&'a str> {
        self.build_index();
        let (start, end) = self.entity_index.as_ref()?.get(&entity_id).copied()?;
        Some(&self.content[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = r#"ISO-10303-21;
HEADER;
FILE_NAME('a#9=b;','2024-01-01',(''),(''),'','','');
ENDSEC;
DATA;
#1=PRODUCT('P-1','Bolt; M8','',(#4));
#2=CARTESIAN_POINT('',(1.,2.,3.));
#3=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));
#4 = PRODUCT_CONTEXT('',#5,'mechanical');
ENDSEC;
END-ISO-10303-21;
"#;

    #[test]
    fn test_index_is_string_aware() {
        let index = build_entity_index(CONTENT);
        assert_eq!(index.len(), 4);
        assert!(!index.contains_key(&9));
        let (start, end) = index[&1];
        assert_eq!(&CONTENT[start..end], "#1=PRODUCT('P-1','Bolt; M8','',(#4));");
    }

    #[test]
    fn test_decode_by_id() {
        let mut decoder = EntityDecoder::new(CONTENT);

        let product = decoder.decode_by_id(1).unwrap();
        assert_eq!(product.type_name(), "PRODUCT");
        assert_eq!(product.get_string(1), Some("Bolt; M8"));
        assert_eq!(product.get_ref_list(3), vec![4]);

        assert_eq!(decoder.cache_size(), 1);
        assert_eq!(decoder.get_cached(1).unwrap().id, 1);
    }

    #[test]
    fn test_decode_complex() {
        let mut decoder = EntityDecoder::new(CONTENT);
        let unit = decoder.decode_by_id(3).unwrap();
        assert!(unit.is_complex());
        assert!(unit.is_a("SI_UNIT"));
        let si = unit.record("SI_UNIT").unwrap();
        assert_eq!(si.attributes[0].as_enum(), Some("MILLI"));
    }

    #[test]
    fn test_resolve_ref() {
        let mut decoder = EntityDecoder::new(CONTENT);
        let product = decoder.decode_by_id(1).unwrap();
        let contexts = decoder.resolve_ref_list(product.get(3).unwrap()).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].type_name(), "PRODUCT_CONTEXT");

        assert!(matches!(
            decoder.decode_by_id(42),
            Err(Error::UnresolvedReference(42))
        ));
    }

    #[test]
    fn test_point_cache() {
        let mut decoder = EntityDecoder::new(CONTENT);
        assert_eq!(decoder.point(2).unwrap(), [1.0, 2.0, 3.0]);
        decoder.clear_cache();
        assert_eq!(decoder.cache_size(), 0);
        assert!(decoder.point(1).is_err());
    }
}
