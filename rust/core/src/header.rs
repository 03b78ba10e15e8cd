// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HEADER section of an exchange file

use crate::entity::AttributeValue;
use crate::error::{Error, Result};
use crate::parser::{parse_record, record_end};

/// Leading magic of every exchange file
pub const MAGIC: &str = "ISO-10303-21;";

/// Parsed `FILE_DESCRIPTION`, `FILE_NAME` and `FILE_SCHEMA`
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepHeader {
    pub description: Vec<String>,
    pub implementation_level: String,
    pub file_name: String,
    pub time_stamp: String,
    pub author: Vec<String>,
    pub organization: Vec<String>,
    pub preprocessor_version: String,
    pub originating_system: String,
    pub authorization: String,
    pub schemas: Vec<String>,
}

impl StepHeader {
    /// Parse the header. Fails when the file does not start with the
    /// ISO-10303-21 magic; unreadable header records are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let body = content.trim_start_matches('\u{feff}').trim_start();
        if !body.starts_with(MAGIC) {
            return Err(Error::MissingHeader);
        }

        let mut header = StepHeader::default();
        let Some(section_start) = content.find("HEADER;").map(|i| i + 7) else {
            return Ok(header);
        };
        let section_end = content[section_start..]
            .find("ENDSEC;")
            .map(|i| section_start + i)
            .unwrap_or(content.len());

        let bytes = &content.as_bytes()[..section_end];
        let mut pos = section_start;
        while pos < section_end {
            let Some(end) = record_end(bytes, pos) else {
                break;
            };
            let text = &content[pos..end];
            pos = end;

            let record = match parse_record(text) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable header record");
                    continue;
                }
            };
            let args: Vec<AttributeValue> =
                record.1.iter().map(AttributeValue::from_token).collect();
            let text_at = |i: usize| {
                args.get(i)
                    .and_then(|v| v.as_string())
                    .unwrap_or_default()
                    .to_string()
            };
            let list_at = |i: usize| strings(args.get(i));

            match record.0.to_ascii_uppercase().as_str() {
                "FILE_DESCRIPTION" => {
                    header.description = list_at(0);
                    header.implementation_level = text_at(1);
                }
                "FILE_NAME" => {
                    header.file_name = text_at(0);
                    header.time_stamp = text_at(1);
                    header.author = list_at(2);
                    header.organization = list_at(3);
                    header.preprocessor_version = text_at(4);
                    header.originating_system = text_at(5);
                    header.authorization = text_at(6);
                }
                "FILE_SCHEMA" => header.schemas = list_at(0),
                _ => {}
            }
        }

        Ok(header)
    }

    /// Application protocol guessed from the schema identifier
    pub fn protocol(&self) -> Option<&'static str> {
        let schema = self.schemas.first()?.to_ascii_uppercase();
        if schema.contains("AP242") || schema.contains("MANAGED_MODEL_BASED_3D") {
            Some("AP242")
        } else if schema.contains("AUTOMOTIVE_DESIGN") || schema.contains("AP214") {
            Some("AP214")
        } else if schema.contains("CONFIG_CONTROL_DESIGN") || schema.contains("AP203") {
            Some("AP203")
        } else {
            None
        }
    }
}

fn strings(value: Option<&AttributeValue>) -> Vec<String> {
    value
        .and_then(|v| v.as_list())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_string())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
