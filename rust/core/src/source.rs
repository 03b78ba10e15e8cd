// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A loaded exchange file: content, header and shared entity index

use std::path::Path;
use std::sync::Arc;

use crate::decoder::{build_entity_index, EntityDecoder, EntityIndex};
use crate::error::{Error, Result};
use crate::header::StepHeader;

/// Exchange file held in memory. Decoders borrow the content and share the
/// index, so several threads can decode the same file.
#[derive(Debug, Clone)]
pub struct StepFile {
    content: String,
    header: StepHeader,
    index: Arc<EntityIndex>,
    stem: String,
}

impl StepFile {
    /// Read and index a file. Non-UTF-8 bytes are replaced rather than rejected.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        Self::from_content(content, stem)
    }

    /// Index in-memory content; `stem` names the fallback part
    pub fn from_content(content: String, stem: impl Into<String>) -> Result<Self> {
        let header = StepHeader::parse(&content)?;
        if !content.contains("DATA;") {
            return Err(Error::EmptyData);
        }
        let index = build_entity_index(&content);
        if index.is_empty() {
            return Err(Error::EmptyData);
        }
        tracing::debug!(entities = index.len(), "Indexed exchange file");

        Ok(Self {
            content,
            header,
            index: Arc::new(index),
            stem: stem.into(),
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn header(&self) -> &StepHeader {
        &self.header
    }

    /// Raw bytes, e.g. for fingerprinting
    pub fn as_bytes(&self) -> &[u8] {
        self.content.as_bytes()
    }

    /// File name without extension
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn entity_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> Arc<EntityIndex> {
        Arc::clone(&self.index)
    }

    /// Fresh decoder over the shared index
    pub fn decoder(&self) -> EntityDecoder<'_> {
        EntityDecoder::with_arc_index(&self.content, self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_data() {
        let content = "ISO-10303-21;\nHEADER;\nENDSEC;\nEND-ISO-10303-21;\n".to_string();
        assert!(matches!(
            StepFile::from_content(content, "x"),
            Err(Error::EmptyData)
        ));
    }

    #[test]
    fn test_rejects_non_step() {
        assert!(matches!(
            StepFile::from_content("not a step file".to_string(), "x"),
            Err(Error::MissingHeader)
        ));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            StepFile::open("/nonexistent/dir/part.stp"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_decoder_shares_index() {
        let content = "ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n#1=PRODUCT('A','A','',());\nENDSEC;\n";
        let step = StepFile::from_content(content.to_string(), "a").unwrap();
        assert_eq!(step.entity_count(), 1);
        let mut decoder = step.decoder();
        assert_eq!(decoder.decode_by_id(1).unwrap().get_string(1), Some("A"));
    }
}
