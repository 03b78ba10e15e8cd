// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-schema entity layouts for the element classes the writer emits.

use crate::config::Schema;

/// How to spell one element class in a given schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassSpec {
    /// Upper-case STEP entity name
    pub entity: &'static str,
    /// Attributes after `Tag`, comma-prefixed (`",$"`), empty when none
    pub trailing: &'static str,
}

const fn spec(entity: &'static str, trailing: &'static str) -> ClassSpec {
    ClassSpec { entity, trailing }
}

/// IFC4 and IFC4X3 share these layouts
fn ifc4_class(class: &str) -> Option<ClassSpec> {
    Some(match class {
        "IfcBuildingElementProxy" => spec("IFCBUILDINGELEMENTPROXY", ",$"),
        "IfcValve" => spec("IFCVALVE", ",$"),
        "IfcDamper" => spec("IFCDAMPER", ",$"),
        "IfcFlowMeter" => spec("IFCFLOWMETER", ",$"),
        "IfcPipeSegment" => spec("IFCPIPESEGMENT", ",$"),
        "IfcPipeFitting" => spec("IFCPIPEFITTING", ",$"),
        "IfcDuctSegment" => spec("IFCDUCTSEGMENT", ",$"),
        "IfcDuctFitting" => spec("IFCDUCTFITTING", ",$"),
        "IfcAirTerminal" => spec("IFCAIRTERMINAL", ",$"),
        "IfcPump" => spec("IFCPUMP", ",$"),
        "IfcTank" => spec("IFCTANK", ",$"),
        "IfcPlate" => spec("IFCPLATE", ",$"),
        "IfcMember" => spec("IFCMEMBER", ",$"),
        "IfcBeam" => spec("IFCBEAM", ",$"),
        "IfcColumn" => spec("IFCCOLUMN", ",$"),
        "IfcSlab" => spec("IFCSLAB", ",$"),
        "IfcWall" => spec("IFCWALL", ",$"),
        "IfcRailing" => spec("IFCRAILING", ",$"),
        "IfcFastener" => spec("IFCFASTENER", ",$"),
        "IfcMechanicalFastener" => spec("IFCMECHANICALFASTENER", ",$,$,$"),
        "IfcElementAssembly" => spec("IFCELEMENTASSEMBLY", ",$,$"),
        _ => return None,
    })
}

/// IFC2X3 has no specific distribution element classes; flow classes map
/// to their generic supertypes
fn ifc2x3_class(class: &str) -> Option<ClassSpec> {
    Some(match class {
        "IfcBuildingElementProxy" => spec("IFCBUILDINGELEMENTPROXY", ",$"),
        "IfcValve" | "IfcDamper" | "IfcFlowMeter" => spec("IFCFLOWCONTROLLER", ""),
        "IfcPipeSegment" | "IfcDuctSegment" => spec("IFCFLOWSEGMENT", ""),
        "IfcPipeFitting" | "IfcDuctFitting" => spec("IFCFLOWFITTING", ""),
        "IfcAirTerminal" => spec("IFCFLOWTERMINAL", ""),
        "IfcPump" => spec("IFCFLOWMOVINGDEVICE", ""),
        "IfcTank" => spec("IFCFLOWSTORAGEDEVICE", ""),
        "IfcPlate" => spec("IFCPLATE", ""),
        "IfcMember" => spec("IFCMEMBER", ""),
        "IfcBeam" => spec("IFCBEAM", ""),
        "IfcColumn" => spec("IFCCOLUMN", ""),
        "IfcSlab" => spec("IFCSLAB", ",$"),
        "IfcWall" => spec("IFCWALL", ""),
        "IfcRailing" => spec("IFCRAILING", ",$"),
        "IfcFastener" => spec("IFCFASTENER", ""),
        "IfcMechanicalFastener" => spec("IFCMECHANICALFASTENER", ",$,$"),
        "IfcElementAssembly" => spec("IFCELEMENTASSEMBLY", ",$,.NOTDEFINED."),
        _ => return None,
    })
}

/// Layout of `class` in `schema`, `None` when the writer does not know it
pub fn class_spec(schema: Schema, class: &str) -> Option<ClassSpec> {
    match schema {
        Schema::Ifc2x3 => ifc2x3_class(class),
        Schema::Ifc4 | Schema::Ifc4x3 => ifc4_class(class),
    }
}

/// Name written to `FILE_SCHEMA`
pub fn file_schema(schema: Schema) -> &'static str {
    match schema {
        Schema::Ifc2x3 => "IFC2X3",
        Schema::Ifc4 => "IFC4",
        Schema::Ifc4x3 => "IFC4X3_ADD2",
    }
}

pub fn view_definition(schema: Schema) -> &'static str {
    match schema {
        Schema::Ifc2x3 => "ViewDefinition [CoordinationView_V2.0]",
        Schema::Ifc4 | Schema::Ifc4x3 => "ViewDefinition [ReferenceView_V1.2]",
    }
}
