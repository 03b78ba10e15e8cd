// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly Reader
//!
//! Walks the AP203/AP214/AP242 product structure of an exchange file and
//! produces one [`Part`] per leaf occurrence:
//!
//! ```text
//! PRODUCT <- PRODUCT_DEFINITION_FORMATION <- PRODUCT_DEFINITION
//! PRODUCT_DEFINITION --NEXT_ASSEMBLY_USAGE_OCCURRENCE--> PRODUCT_DEFINITION
//! PRODUCT_DEFINITION <- PRODUCT_DEFINITION_SHAPE <- SHAPE_DEFINITION_REPRESENTATION -> SHAPE_REPRESENTATION
//! ```
//!
//! Occurrence placements come from `CONTEXT_DEPENDENT_SHAPE_REPRESENTATION`
//! and are composed root to leaf. Layers and colours resolve to the nearest
//! level that defines one.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use nalgebra::Matrix4;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::decoder::EntityDecoder;
use crate::entity::{AttributeValue, DecodedEntity};
use crate::error::Result;
use crate::parser::EntityScanner;
use crate::placement::axis2_placement_3d;
use crate::source::StepFile;

/// Instance types that carry solid or surface geometry
pub const SHAPE_ITEM_TYPES: &[&str] = &[
    "MANIFOLD_SOLID_BREP",
    "BREP_WITH_VOIDS",
    "FACETED_BREP",
    "SHELL_BASED_SURFACE_MODEL",
];

/// Nesting limit for product structures
const MAX_DEPTH: usize = 64;

/// Nesting limit when searching presentation styles for a colour
const MAX_STYLE_DEPTH: usize = 10;

/// Surface colour, components in 0..=1
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Named colours of `DRAUGHTING_PRE_DEFINED_COLOUR`
    pub fn predefined(name: &str) -> Option<Self> {
        let (r, g, b) = match name.to_ascii_lowercase().as_str() {
            "red" => (1.0, 0.0, 0.0),
            "green" => (0.0, 1.0, 0.0),
            "blue" => (0.0, 0.0, 1.0),
            "yellow" => (1.0, 1.0, 0.0),
            "magenta" => (1.0, 0.0, 1.0),
            "cyan" => (0.0, 1.0, 1.0),
            "black" => (0.0, 0.0, 0.0),
            "white" => (1.0, 1.0, 1.0),
            _ => return None,
        };
        Some(Self::new(r, g, b))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.r, self.g, self.b)
    }
}

/// Geometry of a part: shape item instance ids plus the accumulated
/// placement from the assembly root
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeHandle {
    pub items: Vec<u32>,
    pub transform: Matrix4<f64>,
}

impl ShapeHandle {
    pub fn new(items: Vec<u32>) -> Self {
        Self {
            items,
            transform: Matrix4::identity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One leaf occurrence of the assembly
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    /// `/`-joined labels from the root; unique within one read
    pub assembly_path: String,
    pub shape: ShapeHandle,
    pub layer: Option<String>,
    pub color: Option<Rgb>,
}

/// Read every leaf part of a file, sorted by assembly path
pub fn read_assembly(step: &StepFile) -> Result<Vec<Part>> {
    AssemblyReader::new(step).read()
}

#[derive(Debug, Clone, Default)]
struct Inherited {
    layer: Option<String>,
    color: Option<Rgb>,
}

/// Cross references collected in one pass over the DATA section
#[derive(Default)]
struct Catalog {
    definitions: Vec<u32>,
    /// relating definition -> (occurrence, related definition)
    children: FxHashMap<u32, Vec<(u32, u32)>>,
    used_as_component: FxHashSet<u32>,
    /// definition -> representations bound through SHAPE_DEFINITION_REPRESENTATION
    representations: FxHashMap<u32, Vec<u32>>,
    /// representation <-> representation without a transformation
    rep_links: FxHashMap<u32, Vec<u32>>,
    /// occurrence -> placement relative to the parent
    placements: FxHashMap<u32, Matrix4<f64>>,
    layers: FxHashMap<u32, String>,
    colors: FxHashMap<u32, Rgb>,
    shape_items: Vec<u32>,
}

/// Product-structure walker over one exchange file
pub struct AssemblyReader<'a> {
    step: &'a StepFile,
    decoder: EntityDecoder<'a>,
    catalog: Catalog,
}

impl<'a> AssemblyReader<'a> {
    pub fn new(step: &'a StepFile) -> Self {
        Self {
            step,
            decoder: step.decoder(),
            catalog: Catalog::default(),
        }
    }

    /// Collect parts. Never fails on content: an unusable product structure
    /// degrades to a single part holding every shape item.
    pub fn read(mut self) -> Result<Vec<Part>> {
        self.build_catalog();

        let roots: Vec<u32> = self
            .catalog
            .definitions
            .iter()
            .copied()
            .filter(|pd| !self.catalog.used_as_component.contains(pd))
            .collect();

        let mut parts = Vec::new();
        let mut stack = Vec::new();
        let labels: Vec<(u32, String)> = roots.iter().map(|&pd| (pd, self.label(pd))).collect();
        for (pd, name, label) in unique_labels(labels) {
            self.visit(
                pd,
                None,
                None,
                &name,
                &label,
                Matrix4::identity(),
                &Inherited::default(),
                &mut stack,
                &mut parts,
            );
        }

        if parts.is_empty() {
            tracing::warn!(
                definitions = self.catalog.definitions.len(),
                "No leaf parts in product structure, falling back to a single part"
            );
            parts.push(self.fallback_part());
        }

        parts.sort_by(|a, b| a.assembly_path.cmp(&b.assembly_path));
        tracing::info!(
            parts = parts.len(),
            roots = roots.len(),
            shape_items = self.catalog.shape_items.len(),
            "Assembly read"
        );
        Ok(parts)
    }

    fn decode(&mut self, id: u32) -> Option<Arc<DecodedEntity>> {
        match self.decoder.decode_by_id(id) {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::debug!(id, error = %e, "Skipping unreadable instance");
                None
            }
        }
    }

    fn build_catalog(&mut self) {
        let step = self.step;
        let content = step.content();
        let mut occurrences = Vec::new();
        let mut definition_shapes = Vec::new();
        let mut shape_definitions = Vec::new();
        let mut relationships = Vec::new();
        let mut context_shapes = Vec::new();
        let mut styled = Vec::new();
        let mut layer_assignments = Vec::new();

        let mut scanner = EntityScanner::new(content);
        while let Some((id, type_name, start, end)) = scanner.next_entity() {
            let type_name = type_name.to_ascii_uppercase();
            match type_name.as_str() {
                "PRODUCT_DEFINITION" | "PRODUCT_DEFINITION_WITH_ASSOCIATED_DOCUMENTS" => {
                    self.catalog.definitions.push(id)
                }
                "NEXT_ASSEMBLY_USAGE_OCCURRENCE" => occurrences.push(id),
                "PRODUCT_DEFINITION_SHAPE" => definition_shapes.push(id),
                "SHAPE_DEFINITION_REPRESENTATION" => shape_definitions.push(id),
                "SHAPE_REPRESENTATION_RELATIONSHIP" | "REPRESENTATION_RELATIONSHIP"
                    if !content[start..end].contains("WITH_TRANSFORMATION") =>
                {
                    relationships.push(id)
                }
                "CONTEXT_DEPENDENT_SHAPE_REPRESENTATION" => context_shapes.push(id),
                "STYLED_ITEM" | "OVER_RIDING_STYLED_ITEM" => styled.push(id),
                "PRESENTATION_LAYER_ASSIGNMENT" => layer_assignments.push(id),
                t if SHAPE_ITEM_TYPES.contains(&t) => self.catalog.shape_items.push(id),
                _ => {}
            }
        }

        for id in occurrences {
            let Some(nauo) = self.decode(id) else { continue };
            if let (Some(relating), Some(related)) = (nauo.get_ref(3), nauo.get_ref(4)) {
                self.catalog
                    .children
                    .entry(relating)
                    .or_default()
                    .push((id, related));
                self.catalog.used_as_component.insert(related);
            }
        }

        // PRODUCT_DEFINITION_SHAPE -> definition (product definition or occurrence)
        let mut shape_owner: FxHashMap<u32, u32> = FxHashMap::default();
        for id in definition_shapes {
            if let Some(owner) = self.decode(id).and_then(|pds| pds.get_ref(2)) {
                shape_owner.insert(id, owner);
            }
        }

        for id in shape_definitions {
            let Some(sdr) = self.decode(id) else { continue };
            let owner = sdr.get_ref(0).and_then(|pds| shape_owner.get(&pds).copied());
            if let (Some(owner), Some(rep)) = (owner, sdr.get_ref(1)) {
                self.catalog.representations.entry(owner).or_default().push(rep);
            }
        }

        for id in relationships {
            let Some(rel) = self.decode(id) else { continue };
            let attributes = rel
                .record("REPRESENTATION_RELATIONSHIP")
                .map(|r| r.attributes.as_slice())
                .unwrap_or_else(|| rel.attributes());
            let rep_1 = attributes.get(2).and_then(|v| v.as_entity_ref());
            let rep_2 = attributes.get(3).and_then(|v| v.as_entity_ref());
            if let (Some(a), Some(b)) = (rep_1, rep_2) {
                self.catalog.rep_links.entry(a).or_default().push(b);
                self.catalog.rep_links.entry(b).or_default().push(a);
            }
        }

        for id in context_shapes {
            let Some(cdsr) = self.decode(id) else { continue };
            let occurrence = cdsr.get_ref(1).and_then(|pds| shape_owner.get(&pds).copied());
            let transform = cdsr.get_ref(0).and_then(|rr| self.relationship_transform(rr));
            if let (Some(occurrence), Some(transform)) = (occurrence, transform) {
                self.catalog.placements.insert(occurrence, transform);
            }
        }

        for id in layer_assignments {
            let Some(assignment) = self.decode(id) else { continue };
            let name = assignment.get_string(0).unwrap_or("").trim().to_string();
            if name.is_empty() {
                continue;
            }
            for item in assignment.get_ref_list(2) {
                self.catalog.layers.entry(item).or_insert_with(|| name.clone());
            }
        }

        for id in styled {
            let Some(styled_item) = self.decode(id) else { continue };
            let Some(item) = styled_item.get_ref(2) else { continue };
            if self.catalog.colors.contains_key(&item) {
                continue;
            }
            let styles = styled_item.get_ref_list(1);
            if let Some(color) = self.find_colour(&styles, 0) {
                self.catalog.colors.insert(item, color);
            }
        }

        for children in self.catalog.children.values_mut() {
            children.sort_unstable();
        }
        tracing::debug!(
            definitions = self.catalog.definitions.len(),
            placements = self.catalog.placements.len(),
            layers = self.catalog.layers.len(),
            colors = self.catalog.colors.len(),
            "Product structure indexed"
        );
    }

    /// Placement of `rep_1` in `rep_2` for a relationship with transformation
    fn relationship_transform(&mut self, relationship: u32) -> Option<Matrix4<f64>> {
        let rel = self.decode(relationship)?;
        let transformation = rel
            .record("REPRESENTATION_RELATIONSHIP_WITH_TRANSFORMATION")?
            .attributes
            .first()?
            .as_entity_ref()?;
        let idt = self.decode(transformation)?;
        if !idt.is_a("ITEM_DEFINED_TRANSFORMATION") {
            return None;
        }
        let source = self.axis_placement(idt.get_ref(2)?)?;
        let target = self.axis_placement(idt.get_ref(3)?)?;
        Some(target * source.try_inverse()?)
    }

    fn axis_placement(&mut self, id: u32) -> Option<Matrix4<f64>> {
        match axis2_placement_3d(&mut self.decoder, id) {
            Ok(matrix) => Some(matrix),
            Err(e) => {
                tracing::debug!(id, error = %e, "Ignoring unreadable placement");
                None
            }
        }
    }

    /// Depth-first search through presentation styles for the first colour
    fn find_colour(&mut self, ids: &[u32], depth: usize) -> Option<Rgb> {
        if depth > MAX_STYLE_DEPTH {
            return None;
        }
        for &id in ids {
            let Some(entity) = self.decode(id) else { continue };
            match entity.type_name() {
                "COLOUR_RGB" => {
                    let r = entity.get_float(1)?;
                    let g = entity.get_float(2)?;
                    let b = entity.get_float(3)?;
                    return Some(Rgb::new(r, g, b));
                }
                "DRAUGHTING_PRE_DEFINED_COLOUR" => {
                    if let Some(color) = entity.get_string(0).and_then(Rgb::predefined) {
                        return Some(color);
                    }
                }
                _ => {
                    let mut nested = Vec::new();
                    for attribute in entity.attributes() {
                        collect_refs(attribute, &mut nested);
                    }
                    if let Some(color) = self.find_colour(&nested, depth + 1) {
                        return Some(color);
                    }
                }
            }
        }
        None
    }

    /// Product name, then product id, then "Unnamed"
    fn label(&mut self, definition: u32) -> String {
        let product = self
            .decode(definition)
            .and_then(|pd| pd.get_ref(2))
            .and_then(|formation| self.decode(formation))
            .and_then(|pdf| pdf.get_ref(2))
            .and_then(|product| self.decode(product));

        product
            .and_then(|p| {
                [p.get_string(1), p.get_string(0)]
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .find(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unnamed".to_string())
    }

    /// Representations of a definition plus everything linked to them
    fn linked_representations(&self, definition: u32) -> Vec<u32> {
        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue: VecDeque<u32> = self
            .catalog
            .representations
            .get(&definition)
            .cloned()
            .unwrap_or_default()
            .into();
        while let Some(rep) = queue.pop_front() {
            if !seen.insert(rep) {
                continue;
            }
            order.push(rep);
            if let Some(links) = self.catalog.rep_links.get(&rep) {
                queue.extend(links.iter().copied());
            }
        }
        order
    }

    fn lookup_layer(&self, ids: &[u32]) -> Option<String> {
        ids.iter().find_map(|id| self.catalog.layers.get(id).cloned())
    }

    fn lookup_color(&self, ids: &[u32]) -> Option<Rgb> {
        ids.iter().find_map(|id| self.catalog.colors.get(id).copied())
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &mut self,
        definition: u32,
        occurrence: Option<u32>,
        parent_path: Option<&str>,
        name: &str,
        label: &str,
        transform: Matrix4<f64>,
        inherited: &Inherited,
        stack: &mut Vec<u32>,
        parts: &mut Vec<Part>,
    ) {
        let path = match parent_path {
            Some(parent) => format!("{}/{}", parent, label),
            None => label.to_string(),
        };

        let reps = self.linked_representations(definition);
        let mut owners = reps.clone();
        owners.push(definition);
        owners.extend(occurrence);
        let level = Inherited {
            layer: self.lookup_layer(&owners).or_else(|| inherited.layer.clone()),
            color: self.lookup_color(&owners).or(inherited.color),
        };

        let children = self
            .catalog
            .children
            .get(&definition)
            .cloned()
            .unwrap_or_default();

        if !children.is_empty() {
            if stack.len() >= MAX_DEPTH {
                tracing::warn!(path = %path, "Assembly nesting too deep, skipping subtree");
                return;
            }
            stack.push(definition);
            let labelled: Vec<((u32, u32), String)> = children
                .iter()
                .map(|&(nauo, child)| ((nauo, child), self.label(child)))
                .collect();
            for ((nauo, child), child_name, child_label) in unique_labels(labelled) {
                if stack.contains(&child) {
                    tracing::warn!(path = %path, child, "Cyclic product structure, skipping");
                    continue;
                }
                let placement = self
                    .catalog
                    .placements
                    .get(&nauo)
                    .copied()
                    .unwrap_or_else(Matrix4::identity);
                self.visit(
                    child,
                    Some(nauo),
                    Some(&path),
                    &child_name,
                    &child_label,
                    transform * placement,
                    &level,
                    stack,
                    parts,
                );
            }
            stack.pop();
            return;
        }

        let mut items = Vec::new();
        for rep in &reps {
            let Some(representation) = self.decode(*rep) else { continue };
            for item in representation.get_ref_list(1) {
                if items.contains(&item) {
                    continue;
                }
                let is_shape = self
                    .decode(item)
                    .map(|e| SHAPE_ITEM_TYPES.contains(&e.type_name()))
                    .unwrap_or(false);
                if is_shape {
                    items.push(item);
                }
            }
        }

        if reps.is_empty() {
            tracing::debug!(path = %path, "Leaf part without shape representation");
        }

        let layer = self.lookup_layer(&items).or(level.layer);
        let color = self.lookup_color(&items).or(level.color);
        parts.push(Part {
            name: name.to_string(),
            assembly_path: path,
            shape: ShapeHandle { items, transform },
            layer,
            color,
        });
    }

    fn fallback_part(&self) -> Part {
        let items = self.catalog.shape_items.clone();
        let name = self.step.stem().to_string();
        Part {
            layer: self.lookup_layer(&items),
            color: self.lookup_color(&items),
            assembly_path: name.clone(),
            name,
            shape: ShapeHandle::new(items),
        }
    }
}

fn collect_refs(value: &AttributeValue, out: &mut Vec<u32>) {
    match value {
        AttributeValue::EntityRef(id) => out.push(*id),
        AttributeValue::List(items) | AttributeValue::Typed(_, items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Pair each sibling label with a path segment. The first occurrence of a
/// label keeps it; repeats take the lowest free `:n` (n >= 2) not already
/// used by a sibling, including siblings literally named `label:n`.
fn unique_labels<K>(labelled: Vec<(K, String)>) -> Vec<(K, String, String)> {
    let mut taken: FxHashSet<String> = labelled.iter().map(|(_, label)| label.clone()).collect();
    let mut emitted: FxHashSet<String> = FxHashSet::default();
    let mut next: FxHashMap<String, usize> = FxHashMap::default();
    labelled
        .into_iter()
        .map(|(key, label)| {
            if emitted.insert(label.clone()) {
                return (key, label.clone(), label);
            }
            let n = next.entry(label.clone()).or_insert(1);
            let segment = loop {
                *n += 1;
                let candidate = format!("{}:{}", label, n);
                if taken.insert(candidate.clone()) {
                    break candidate;
                }
            };
            (key, label, segment)
        })
        .collect()
}
