// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # IFC-Bridge Core
//!
//! ISO 10303-21 (STEP) reader built with [nom](https://docs.rs/nom).
//! Provides zero-copy tokenization, string-aware entity indexing, lazy
//! decoding and the CAD assembly reader that feeds the conversion pipeline.
//!
//! ## Overview
//!
//! - **Tokenization**: simple and complex (multi-leaf) instances
//! - **Entity Index**: SIMD-accelerated record discovery using [memchr](https://docs.rs/memchr)
//! - **Lazy Decoding**: on-demand attribute parsing with a shared index
//! - **Assembly Reader**: product structure, placements, layers and colours
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ifc_bridge_core::{read_assembly, StepFile};
//!
//! let step = StepFile::open("skid.stp")?;
//! for part in read_assembly(&step)? {
//!     println!("{} ({} shape items)", part.assembly_path, part.shape.items.len());
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: serialization support for header, unit and colour values

pub mod assembly;
pub mod decoder;
pub mod entity;
pub mod error;
pub mod header;
pub mod parser;
pub mod placement;
pub mod source;
pub mod units;

pub use assembly::{read_assembly, AssemblyReader, Part, Rgb, ShapeHandle, SHAPE_ITEM_TYPES};
pub use decoder::{build_entity_index, EntityDecoder, EntityIndex};
pub use entity::{decode_step_string, AttributeValue, DecodedEntity, EntityRecord};
pub use error::{Error, Result};
pub use header::StepHeader;
pub use parser::{parse_entity, EntityScanner, Token};
pub use placement::{axis2_placement_3d, direction};
pub use source::StepFile;
pub use units::{detect_length_unit, get_si_prefix_multiplier, HintSource, LengthUnit, UnitHint};
