// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC-Bridge Processing
//!
//! Turns the parts of a STEP assembly into an IFC model: heuristic
//! classification, rule synthesis, rule-driven mapping, IFC writing and QC.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use ifc_bridge_processing::{auto_convert, ConversionConfig, Schema};
//!
//! let summary = auto_convert(
//!     Path::new("skid.stp"),
//!     Path::new("skid.ifc"),
//!     &ConversionConfig::auto(Schema::Ifc4),
//! )?;
//! println!("{} of {} parts converted", summary.converted_parts(), summary.total_parts());
//! ```

pub mod config;
pub mod conformance;
pub mod error;
pub mod events;
pub mod heuristics;
pub mod mapping;
pub mod pipeline;
pub mod qc;
pub mod rules;
pub mod synthesis;
pub mod units;
pub mod writer;

pub use config::{ConversionConfig, GeometryMode, Schema};
pub use error::{Error, FailureReason, Result};
pub use events::EventLog;
pub use heuristics::{Archetype, Candidate, HeuristicClassifier, Inference, Vocabulary};
pub use mapping::{MappingEngine, MappingResult, PartContext};
pub use pipeline::{auto_convert, convert, ConversionSummary};
pub use qc::{QcPart, QcReport};
pub use rules::{Rule, RuleFile};
pub use synthesis::{Cluster, RuleSynthesizer};
pub use units::{infer_units, UnitBands, UnitInference};
pub use writer::{IfcModel, IfcWriter, RepresentationKind, WriterSettings};
