// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC model writer.
//!
//! [`IfcWriter`] appends STEP records to an [`IfcModel`] arena: the spatial
//! hierarchy when created, one element per [`IfcWriter::add_element`] call,
//! and the relationships in [`IfcWriter::finish`]. It has a single owner, so
//! element creation is serialized. Every GlobalId is derived from the
//! source fingerprint or the element's mapping seed.

pub mod encode;
pub mod schema;

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use ifc_bridge_core::{LengthUnit, Part, Rgb};
use ifc_bridge_geometry::{Mesh, Polyhedron, ProcessedShape};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{GeometryMode, Schema};
use crate::error::{Error, FailureReason, Result};
use crate::mapping::{guid_seed, short_tag, MappedProperty, MappingResult};
use encode::{global_id, opt_string, real, refs, string, triple};
use schema::{class_spec, file_schema, view_definition, ClassSpec};

/// Ordered STEP record arena; entity `#n` is `records[n - 1]`
#[derive(Debug, Clone)]
pub struct IfcModel {
    schema: Schema,
    file_name: String,
    timestamp: String,
    records: Vec<String>,
}

impl IfcModel {
    pub fn new(schema: Schema, file_name: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            schema,
            file_name: file_name.into(),
            timestamp: timestamp.into(),
            records: Vec::new(),
        }
    }

    /// Append `ENTITY(attrs)` and return its id
    pub fn add(&mut self, record: String) -> u32 {
        self.records.push(record);
        self.records.len() as u32
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// Drop every record after the first `len`
    fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    pub fn to_step_string(&self) -> String {
        let mut out = String::with_capacity(self.records.iter().map(|r| r.len() + 10).sum::<usize>() + 512);
        out.push_str("ISO-10303-21;\nHEADER;\n");
        let _ = writeln!(
            out,
            "FILE_DESCRIPTION(({}),'2;1');",
            string(view_definition(self.schema))
        );
        let _ = writeln!(
            out,
            "FILE_NAME({},{},(''),(''),{},'ifc-bridge','');",
            string(&self.file_name),
            string(&self.timestamp),
            string(concat!("ifc-bridge ", env!("CARGO_PKG_VERSION")))
        );
        let _ = writeln!(out, "FILE_SCHEMA(({}));", string(file_schema(self.schema)));
        out.push_str("ENDSEC;\nDATA;\n");
        for (i, record) in self.records.iter().enumerate() {
            let _ = writeln!(out, "#{}={};", i + 1, record);
        }
        out.push_str("ENDSEC;\nEND-ISO-10303-21;\n");
        out
    }

    /// Write the model; an unwritable path is a run-level error
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_step_string()).map_err(|e| Error::io(path, e))?;
        tracing::info!(path = %path.display(), entities = self.records.len(), schema = %self.schema, "IFC written");
        Ok(())
    }
}

/// Fixed inputs of one writer
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub schema: Schema,
    pub unit: LengthUnit,
    pub project: String,
    pub site: String,
    pub building: String,
    pub storey: String,
    pub geom: GeometryMode,
    pub split_by_assembly: bool,
    /// Multiplier from source coordinates to output units
    pub scale: f64,
    /// SHA-256 of the source file
    pub fingerprint: String,
    /// Source path as recorded in the provenance property set
    pub source_file: String,
    /// Output file name for the header
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
    /// Substitute for classes the schema table does not know
    pub default_class: String,
}

/// Which representation an element received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationKind {
    Brep,
    Tessellation,
    SurfaceModel,
    None,
}

/// One part handed to the writer
#[derive(Debug, Clone, Copy)]
pub struct ElementInput<'a> {
    pub part: &'a Part,
    pub mapping: &'a MappingResult,
    /// Absent when geometry processing failed
    pub geometry: Option<&'a ProcessedShape>,
}

/// A created element
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenElement {
    pub id: u32,
    pub global_id: String,
    /// Entity actually written, e.g. `IFCFLOWCONTROLLER` for an IFC2X3 valve
    pub entity: &'static str,
    pub representation: RepresentationKind,
    /// Fallbacks taken while writing
    pub notes: Vec<String>,
}

struct Hierarchy {
    owner_history: u32,
    storey: u32,
    storey_placement: u32,
    origin_axis: u32,
    body_context: u32,
}

struct Assembly {
    key: String,
    id: u32,
    placement: u32,
    children: Vec<u32>,
}

/// Writes one output model
pub struct IfcWriter {
    model: IfcModel,
    settings: WriterSettings,
    hierarchy: Hierarchy,
    contained: Vec<u32>,
    assemblies: Vec<Assembly>,
    assembly_index: FxHashMap<String, usize>,
    /// (system, code, title) → elements, first-seen order
    classified: Vec<((String, String, String), Vec<u32>)>,
    styled: Vec<(u32, Rgb)>,
    elements: usize,
}

/// Side effects of an element, applied only once it is fully written
#[derive(Default)]
struct Pending {
    styled: Vec<(u32, Rgb)>,
}

impl IfcWriter {
    /// Create the model with its owner history, units, contexts and the
    /// project → site → building → storey hierarchy
    pub fn new(settings: WriterSettings) -> Self {
        let timestamp = settings.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut model = IfcModel::new(settings.schema, settings.file_name.clone(), timestamp);
        let fp = settings.fingerprint.clone();
        let gid = |label: &str| string(&global_id(&format!("{}|{}", fp, label)));

        // Owner history
        let person = model.add("IFCPERSON($,$,'',$,$,$,$,$)".to_string());
        let org = model.add("IFCORGANIZATION($,'ifc-bridge',$,$,$)".to_string());
        let person_org = model.add(format!("IFCPERSONANDORGANIZATION(#{},#{},$)", person, org));
        let app = model.add(format!(
            "IFCAPPLICATION(#{},{},'ifc-bridge','ifc-bridge')",
            org,
            string(env!("CARGO_PKG_VERSION"))
        ));
        let owner_history = model.add(format!(
            "IFCOWNERHISTORY(#{},#{},$,.ADDED.,$,$,$,{})",
            person_org,
            app,
            settings.timestamp.timestamp()
        ));

        let units = add_units(&mut model, settings.unit);

        // Contexts
        let origin = model.add("IFCCARTESIANPOINT((0.,0.,0.))".to_string());
        let z = model.add("IFCDIRECTION((0.,0.,1.))".to_string());
        let x = model.add("IFCDIRECTION((1.,0.,0.))".to_string());
        let origin_axis = model.add(format!("IFCAXIS2PLACEMENT3D(#{},#{},#{})", origin, z, x));
        let context = model.add(format!(
            "IFCGEOMETRICREPRESENTATIONCONTEXT($,'Model',3,1.E-05,#{},$)",
            origin_axis
        ));
        let body_context = model.add(format!(
            "IFCGEOMETRICREPRESENTATIONSUBCONTEXT('Body','Model',*,*,*,*,#{},$,.MODEL_VIEW.,$)",
            context
        ));

        let project = model.add(format!(
            "IFCPROJECT({},#{},{},$,$,$,$,(#{}),#{})",
            gid("project"),
            owner_history,
            string(&settings.project),
            context,
            units
        ));

        let site_placement = model.add(format!("IFCLOCALPLACEMENT($,#{})", origin_axis));
        let site = model.add(format!(
            "IFCSITE({},#{},{},$,$,#{},$,$,.ELEMENT.,$,$,$,$,$)",
            gid("site"),
            owner_history,
            string(&settings.site),
            site_placement
        ));
        let building_placement = model.add(format!("IFCLOCALPLACEMENT(#{},#{})", site_placement, origin_axis));
        let building = model.add(format!(
            "IFCBUILDING({},#{},{},$,$,#{},$,$,.ELEMENT.,$,$,$)",
            gid("building"),
            owner_history,
            string(&settings.building),
            building_placement
        ));
        let storey_placement = model.add(format!(
            "IFCLOCALPLACEMENT(#{},#{})",
            building_placement, origin_axis
        ));
        let storey = model.add(format!(
            "IFCBUILDINGSTOREY({},#{},{},$,$,#{},$,$,.ELEMENT.,0.)",
            gid("storey"),
            owner_history,
            string(&settings.storey),
            storey_placement
        ));

        for (label, parent, child) in [
            ("aggregate|project", project, site),
            ("aggregate|site", site, building),
            ("aggregate|building", building, storey),
        ] {
            model.add(format!(
                "IFCRELAGGREGATES({},#{},$,$,#{},(#{}))",
                gid(label),
                owner_history,
                parent,
                child
            ));
        }

        debug!(entities = model.len(), schema = %settings.schema, "IFC hierarchy created");
        Self {
            model,
            settings,
            hierarchy: Hierarchy {
                owner_history,
                storey,
                storey_placement,
                origin_axis,
                body_context,
            },
            contained: Vec::new(),
            assemblies: Vec::new(),
            assembly_index: FxHashMap::default(),
            classified: Vec::new(),
            styled: Vec::new(),
            elements: 0,
        }
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Elements written so far
    pub fn element_count(&self) -> usize {
        self.elements
    }

    /// Create one element. On failure every record added for it is rolled
    /// back and the model is left as before the call.
    pub fn add_element(&mut self, input: ElementInput<'_>) -> std::result::Result<WrittenElement, FailureReason> {
        let mark = self.model.len();
        let assemblies = self.assemblies.len();
        let mut pending = Pending::default();

        match self.write_element(input, &mut pending) {
            Ok((written, parent)) => {
                match parent {
                    Some(slot) => self.assemblies[slot].children.push(written.id),
                    None => self.contained.push(written.id),
                }
                if let Some(c) = &input.mapping.classification {
                    let key = (
                        c.system.clone(),
                        c.code.clone(),
                        c.title.clone().unwrap_or_else(|| c.code.clone()),
                    );
                    match self.classified.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, ids)) => ids.push(written.id),
                        None => self.classified.push((key, vec![written.id])),
                    }
                }
                self.styled.extend(pending.styled);
                self.elements += 1;
                Ok(written)
            }
            Err(message) => {
                self.model.truncate(mark);
                for assembly in self.assemblies.drain(assemblies..) {
                    self.assembly_index.remove(&assembly.key);
                    self.contained.retain(|id| *id != assembly.id);
                }
                Err(FailureReason::Element(message))
            }
        }
    }

    fn write_element(
        &mut self,
        input: ElementInput<'_>,
        pending: &mut Pending,
    ) -> std::result::Result<(WrittenElement, Option<usize>), String> {
        let ElementInput { part, mapping, geometry } = input;
        let mut notes = Vec::new();
        let spec = self.resolve_class(&mapping.target_class, &mut notes);

        let parent = if self.settings.split_by_assembly {
            self.assembly_for(&part.assembly_path)
        } else {
            None
        };
        let relative_to = parent.map_or(self.hierarchy.storey_placement, |slot| self.assemblies[slot].placement);
        let placement = self.model.add(format!(
            "IFCLOCALPLACEMENT(#{},#{})",
            relative_to, self.hierarchy.origin_axis
        ));

        let (shape, representation) = match geometry {
            Some(processed) => self.representation(processed, part.color, pending, &mut notes),
            None => {
                notes.push("no geometry".to_string());
                (None, RepresentationKind::None)
            }
        };

        let global_id = global_id(&mapping.guid_seed);
        let id = self.model.add(format!(
            "{}({},#{},{},$,{},#{},{},{}{})",
            spec.entity,
            string(&global_id),
            self.hierarchy.owner_history,
            string(&mapping.normalized_name),
            opt_string(mapping.object_type.as_deref()),
            placement,
            shape.map_or_else(|| "$".to_string(), |s| format!("#{}", s)),
            string(&mapping.tag),
            spec.trailing
        ));

        let timestamp_type = if self.settings.schema == Schema::Ifc2x3 {
            "IfcLabel"
        } else {
            "IfcDateTime"
        };
        let source = [
            ("SourceFile", self.settings.source_file.clone(), "IfcLabel"),
            ("SourceFormat", "STEP".to_string(), "IfcLabel"),
            ("SourceFingerprint", self.settings.fingerprint.clone(), "IfcLabel"),
            ("AssemblyPath", part.assembly_path.clone(), "IfcLabel"),
            ("OriginalName", part.name.clone(), "IfcLabel"),
            (
                "ConversionTimestamp",
                self.settings.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                timestamp_type,
            ),
        ]
        .into_iter()
        .map(|(name, value, data_type)| MappedProperty {
            name: name.to_string(),
            value,
            data_type: data_type.to_string(),
        })
        .collect::<Vec<_>>();
        self.add_pset(id, &mapping.guid_seed, "Source", &source)?;
        if !mapping.properties.is_empty() {
            self.add_pset(id, &mapping.guid_seed, "Mapped", &mapping.properties)?;
        }

        for note in &notes {
            debug!(element = %mapping.normalized_name, note = %note, "element fallback");
        }
        Ok((
            WrittenElement {
                id,
                global_id,
                entity: spec.entity,
                representation,
                notes,
            },
            parent,
        ))
    }

    /// Schema layout of `class`, falling back to the default class and then
    /// the generic proxy
    fn resolve_class(&self, class: &str, notes: &mut Vec<String>) -> ClassSpec {
        let schema = self.settings.schema;
        if let Some(spec) = class_spec(schema, class) {
            return spec;
        }
        warn!(class, schema = %schema, "class not supported, using default");
        notes.push(format!("{} is not supported in {}; written as {}", class, schema, self.settings.default_class));
        class_spec(schema, &self.settings.default_class)
            .unwrap_or(schema::ClassSpec {
                entity: "IFCBUILDINGELEMENTPROXY",
                trailing: ",$",
            })
    }

    /// Assembly grouping the parts under the parent of `path`, created on
    /// first use. Top-level parts have none.
    fn assembly_for(&mut self, path: &str) -> Option<usize> {
        let (parent, _) = path.rsplit_once('/')?;
        if let Some(&slot) = self.assembly_index.get(parent) {
            return Some(slot);
        }

        let label = parent.rsplit('/').next().unwrap_or(parent);
        let fp = &self.settings.fingerprint;
        let spec = class_spec(self.settings.schema, "IfcElementAssembly")?;
        let placement = self.model.add(format!(
            "IFCLOCALPLACEMENT(#{},#{})",
            self.hierarchy.storey_placement, self.hierarchy.origin_axis
        ));
        let id = self.model.add(format!(
            "{}({},#{},{},$,$,#{},$,{}{})",
            spec.entity,
            string(&global_id(&guid_seed(fp, parent, "IfcElementAssembly"))),
            self.hierarchy.owner_history,
            string(label),
            placement,
            string(&short_tag(fp, parent, label)),
            spec.trailing
        ));
        self.contained.push(id);
        self.assemblies.push(Assembly {
            key: parent.to_string(),
            id,
            placement,
            children: Vec::new(),
        });
        self.assembly_index.insert(parent.to_string(), self.assemblies.len() - 1);
        Some(self.assemblies.len() - 1)
    }

    /// Product shape for a processed part: faceted B-rep when asked for and
    /// possible, otherwise the triangulation
    fn representation(
        &mut self,
        processed: &ProcessedShape,
        color: Option<Rgb>,
        pending: &mut Pending,
        notes: &mut Vec<String>,
    ) -> (Option<u32>, RepresentationKind) {
        let mut built = None;

        if self.settings.geom == GeometryMode::Brep {
            if processed.is_planar_solid() {
                match self.brep_items(&processed.polyhedron) {
                    Ok(items) => built = Some((items, "Brep", RepresentationKind::Brep)),
                    Err(e) => notes.push(format!("brep failed ({}); using mesh", e)),
                }
            } else {
                notes.push("not a valid planar solid; using mesh".to_string());
            }
        }

        if built.is_none() {
            let (kind, label) = if self.settings.schema.has_tessellation() {
                (RepresentationKind::Tessellation, "Tessellation")
            } else {
                (RepresentationKind::SurfaceModel, "SurfaceModel")
            };
            match self.mesh_item(&processed.mesh) {
                Ok(item) => built = Some((vec![item], label, kind)),
                Err(e) => notes.push(format!("mesh failed ({}); no representation", e)),
            }
        }

        let Some((items, label, kind)) = built else {
            return (None, RepresentationKind::None);
        };
        if let Some(rgb) = color {
            pending.styled.extend(items.iter().map(|item| (*item, rgb)));
        }
        let rep = self.model.add(format!(
            "IFCSHAPEREPRESENTATION(#{},'Body',{},{})",
            self.hierarchy.body_context,
            string(label),
            refs(&items)
        ));
        let shape = self.model.add(format!("IFCPRODUCTDEFINITIONSHAPE($,$,(#{}))", rep));
        (Some(shape), kind)
    }

    fn scaled(&self, p: [f64; 3]) -> std::result::Result<[f64; 3], String> {
        let s = self.settings.scale;
        let q = [p[0] * s, p[1] * s, p[2] * s];
        if q.iter().all(|c| c.is_finite()) {
            Ok(q)
        } else {
            Err("non-finite coordinate".to_string())
        }
    }

    /// `IfcFacetedBrep` per outer shell; voids go on the first
    fn brep_items(&mut self, shape: &Polyhedron) -> std::result::Result<Vec<u32>, String> {
        // Validate before adding anything so a failure leaves no records
        for face in shape.faces() {
            for lp in face.loops() {
                if lp.len() < 3 {
                    return Err("loop with fewer than 3 points".to_string());
                }
                for p in lp {
                    self.scaled([p.x, p.y, p.z])?;
                }
            }
        }

        let mut points: FxHashMap<[u64; 3], u32> = FxHashMap::default();
        let mut shells = Vec::new();
        let mut voids = Vec::new();
        for shell in &shape.shells {
            let mut faces = Vec::with_capacity(shell.faces.len());
            for face in &shell.faces {
                let mut bounds = Vec::with_capacity(1 + face.inner.len());
                for (i, lp) in face.loops().enumerate() {
                    let mut ids = Vec::with_capacity(lp.len());
                    for p in lp {
                        let q = self.scaled([p.x, p.y, p.z])?;
                        let key = [q[0].to_bits(), q[1].to_bits(), q[2].to_bits()];
                        let id = match points.get(&key) {
                            Some(&id) => id,
                            None => {
                                let id = self.model.add(format!("IFCCARTESIANPOINT({})", triple(q)));
                                points.insert(key, id);
                                id
                            }
                        };
                        ids.push(id);
                    }
                    let poly = self.model.add(format!("IFCPOLYLOOP({})", refs(&ids)));
                    let kind = if i == 0 { "IFCFACEOUTERBOUND" } else { "IFCFACEBOUND" };
                    bounds.push(self.model.add(format!("{}(#{},.T.)", kind, poly)));
                }
                faces.push(self.model.add(format!("IFCFACE({})", refs(&bounds))));
            }
            let closed = self.model.add(format!("IFCCLOSEDSHELL({})", refs(&faces)));
            if shell.void {
                voids.push(closed);
            } else {
                shells.push(closed);
            }
        }
        if shells.is_empty() {
            return Err("no outer shell".to_string());
        }

        let items = shells
            .iter()
            .enumerate()
            .map(|(i, shell)| {
                if i == 0 && !voids.is_empty() {
                    self.model
                        .add(format!("IFCFACETEDBREPWITHVOIDS(#{},{})", shell, refs(&voids)))
                } else {
                    self.model.add(format!("IFCFACETEDBREP(#{})", shell))
                }
            })
            .collect();
        Ok(items)
    }

    /// `IfcTriangulatedFaceSet` (IFC4+) or `IfcShellBasedSurfaceModel`
    fn mesh_item(&mut self, mesh: &Mesh) -> std::result::Result<u32, String> {
        if mesh.is_empty() {
            return Err("empty triangulation".to_string());
        }
        let vertices = (0..mesh.vertex_count() as u32)
            .map(|i| {
                let v = mesh.vertex(i);
                self.scaled([v.x, v.y, v.z])
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if self.settings.schema.has_tessellation() {
            let coords = vertices.iter().map(|v| triple(*v)).collect::<Vec<_>>().join(",");
            let list = match self.settings.schema {
                Schema::Ifc4x3 => format!("IFCCARTESIANPOINTLIST3D(({}),$)", coords),
                _ => format!("IFCCARTESIANPOINTLIST3D(({}))", coords),
            };
            let list = self.model.add(list);
            let indices = mesh
                .indices
                .chunks_exact(3)
                .map(|t| format!("({},{},{})", t[0] + 1, t[1] + 1, t[2] + 1))
                .collect::<Vec<_>>()
                .join(",");
            return Ok(self
                .model
                .add(format!("IFCTRIANGULATEDFACESET(#{},$,$,({}),$)", list, indices)));
        }

        let points = vertices
            .iter()
            .map(|v| self.model.add(format!("IFCCARTESIANPOINT({})", triple(*v))))
            .collect::<Vec<_>>();
        let faces = mesh
            .indices
            .chunks_exact(3)
            .map(|t| {
                let tri = [points[t[0] as usize], points[t[1] as usize], points[t[2] as usize]];
                let poly = self.model.add(format!("IFCPOLYLOOP({})", refs(&tri)));
                let bound = self.model.add(format!("IFCFACEOUTERBOUND(#{},.T.)", poly));
                self.model.add(format!("IFCFACE((#{}))", bound))
            })
            .collect::<Vec<_>>();
        let shell = self.model.add(format!("IFCOPENSHELL({})", refs(&faces)));
        Ok(self.model.add(format!("IFCSHELLBASEDSURFACEMODEL((#{}))", shell)))
    }

    fn add_pset(
        &mut self,
        element: u32,
        seed: &str,
        name: &str,
        properties: &[MappedProperty],
    ) -> std::result::Result<(), String> {
        let schema = self.settings.schema;
        let values = properties
            .iter()
            .map(|p| {
                typed_value(schema, &p.data_type, &p.value)
                    .map_err(|e| format!("property '{}' in {}: {}", p.name, name, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let ids = properties
            .iter()
            .zip(values)
            .map(|(p, value)| {
                self.model.add(format!(
                    "IFCPROPERTYSINGLEVALUE({},$,{},$)",
                    string(&p.name),
                    value
                ))
            })
            .collect::<Vec<_>>();
        let pset = self.model.add(format!(
            "IFCPROPERTYSET({},#{},{},$,{})",
            string(&global_id(&format!("{}|pset|{}", seed, name))),
            self.hierarchy.owner_history,
            string(name),
            refs(&ids)
        ));
        self.model.add(format!(
            "IFCRELDEFINESBYPROPERTIES({},#{},$,$,(#{}),#{})",
            string(&global_id(&format!("{}|defines|{}", seed, name))),
            self.hierarchy.owner_history,
            element,
            pset
        ));
        Ok(())
    }

    /// Emit containment, assembly, classification and style relationships
    pub fn finish(mut self) -> IfcModel {
        let fp = self.settings.fingerprint.clone();
        let oh = self.hierarchy.owner_history;
        let schema = self.settings.schema;

        for assembly in &self.assemblies {
            if assembly.children.is_empty() {
                continue;
            }
            self.model.add(format!(
                "IFCRELAGGREGATES({},#{},$,$,#{},{})",
                string(&global_id(&format!("{}|aggregate|{}", fp, assembly.key))),
                oh,
                assembly.id,
                refs(&assembly.children)
            ));
        }

        if !self.contained.is_empty() {
            self.model.add(format!(
                "IFCRELCONTAINEDINSPATIALSTRUCTURE({},#{},$,$,{},#{})",
                string(&global_id(&format!("{}|contained|storey", fp))),
                oh,
                refs(&self.contained),
                self.hierarchy.storey
            ));
        }

        let mut systems: Vec<(String, u32)> = Vec::new();
        for ((system, code, title), elements) in &self.classified {
            let system_id = match systems.iter().find(|(s, _)| s == system) {
                Some((_, id)) => *id,
                None => {
                    let id = self.model.add(match schema {
                        Schema::Ifc2x3 => format!("IFCCLASSIFICATION('','',$,{})", string(system)),
                        _ => format!("IFCCLASSIFICATION($,$,$,{},$,$,$)", string(system)),
                    });
                    systems.push((system.clone(), id));
                    id
                }
            };
            let reference = self.model.add(match schema {
                Schema::Ifc2x3 => format!(
                    "IFCCLASSIFICATIONREFERENCE($,{},{},#{})",
                    string(code),
                    string(title),
                    system_id
                ),
                _ => format!(
                    "IFCCLASSIFICATIONREFERENCE($,{},{},#{},$,$)",
                    string(code),
                    string(title),
                    system_id
                ),
            });
            self.model.add(format!(
                "IFCRELASSOCIATESCLASSIFICATION({},#{},$,$,{},#{})",
                string(&global_id(&format!("{}|classification|{}|{}", fp, system, code))),
                oh,
                refs(elements),
                reference
            ));
        }

        let mut styles: Vec<(String, u32)> = Vec::new();
        for (item, rgb) in std::mem::take(&mut self.styled) {
            let key = rgb.to_string();
            let style = match styles.iter().find(|(k, _)| *k == key) {
                Some((_, id)) => *id,
                None => {
                    let id = add_surface_style(&mut self.model, schema, rgb);
                    styles.push((key, id));
                    id
                }
            };
            self.model.add(format!("IFCSTYLEDITEM(#{},(#{}),$)", item, style));
        }

        debug!(
            entities = self.model.len(),
            elements = self.elements,
            assemblies = self.assemblies.len(),
            "IFC model finished"
        );
        self.model
    }
}

/// Length unit plus square metre, cubic metre and radian
fn add_units(model: &mut IfcModel, unit: LengthUnit) -> u32 {
    let length = match unit {
        LengthUnit::Millimeter => model.add("IFCSIUNIT(*,.LENGTHUNIT.,.MILLI.,.METRE.)".to_string()),
        LengthUnit::Meter => model.add("IFCSIUNIT(*,.LENGTHUNIT.,$,.METRE.)".to_string()),
        LengthUnit::Inch => {
            let metre = model.add("IFCSIUNIT(*,.LENGTHUNIT.,$,.METRE.)".to_string());
            let dims = model.add("IFCDIMENSIONALEXPONENTS(1,0,0,0,0,0,0)".to_string());
            let factor = model.add(format!(
                "IFCMEASUREWITHUNIT(IFCLENGTHMEASURE({}),#{})",
                real(LengthUnit::Inch.to_metres()),
                metre
            ));
            model.add(format!(
                "IFCCONVERSIONBASEDUNIT(#{},.LENGTHUNIT.,'INCH',#{})",
                dims, factor
            ))
        }
    };
    let area = model.add("IFCSIUNIT(*,.AREAUNIT.,$,.SQUARE_METRE.)".to_string());
    let volume = model.add("IFCSIUNIT(*,.VOLUMEUNIT.,$,.CUBIC_METRE.)".to_string());
    let angle = model.add("IFCSIUNIT(*,.PLANEANGLEUNIT.,$,.RADIAN.)".to_string());
    model.add(format!("IFCUNITASSIGNMENT({})", refs(&[length, area, volume, angle])))
}

fn add_surface_style(model: &mut IfcModel, schema: Schema, rgb: Rgb) -> u32 {
    let colour = model.add(format!(
        "IFCCOLOURRGB($,{},{},{})",
        real(rgb.r),
        real(rgb.g),
        real(rgb.b)
    ));
    let shading = model.add(match schema {
        Schema::Ifc2x3 => format!("IFCSURFACESTYLESHADING(#{})", colour),
        _ => format!("IFCSURFACESTYLESHADING(#{},$)", colour),
    });
    let style = model.add(format!("IFCSURFACESTYLE($,.BOTH.,(#{}))", shading));
    match schema {
        Schema::Ifc2x3 => model.add(format!("IFCPRESENTATIONSTYLEASSIGNMENT((#{}))", style)),
        _ => style,
    }
}

/// `IFCLABEL('x')`-style typed value for a property
fn typed_value(schema: Schema, data_type: &str, value: &str) -> std::result::Result<String, String> {
    let upper = data_type.to_ascii_uppercase();
    match upper.as_str() {
        "IFCLABEL" | "IFCTEXT" | "IFCIDENTIFIER" => Ok(format!("{}({})", upper, string(value))),
        "IFCDATETIME" if schema == Schema::Ifc2x3 => Ok(format!("IFCLABEL({})", string(value))),
        "IFCDATETIME" => Ok(format!("IFCDATETIME({})", string(value))),
        "IFCREAL" | "IFCLENGTHMEASURE" | "IFCPOSITIVELENGTHMEASURE" | "IFCAREAMEASURE"
        | "IFCVOLUMEMEASURE" | "IFCMASSMEASURE" => value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| format!("{}({})", upper, real(v)))
            .ok_or_else(|| format!("'{}' is not a number", value)),
        "IFCINTEGER" | "IFCCOUNTMEASURE" => value
            .trim()
            .parse::<i64>()
            .map(|v| format!("{}({})", upper, v))
            .map_err(|_| format!("'{}' is not an integer", value)),
        "IFCBOOLEAN" => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | ".t." => Ok("IFCBOOLEAN(.T.)".to_string()),
            "false" | "no" | "0" | ".f." => Ok("IFCBOOLEAN(.F.)".to_string()),
            _ => Err(format!("'{}' is not a boolean", value)),
        },
        _ => Err(format!("unsupported data type {}", data_type)),
    }
}
