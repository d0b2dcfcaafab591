use std::ffi::CStr;
use std::fmt;

use gdal::spatial_ref::SpatialRef;
use gdal::vector::{LayerAccess, OGRFieldType, OGRwkbGeometryType};

use crate::crs::crs_utils::display_name;

/// Name given to the geometry column when the driver does not name it, as for shapefiles.
pub const DEFAULT_GEOMETRY_FIELD: &str = "the_geom";

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: OGRFieldType::Type,
    pub width: i32,
    pub precision: i32,
}

impl FieldDef {
    pub fn new(name: &str, field_type: OGRFieldType::Type) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            width: 0,
            precision: 0,
        }
    }

    pub fn with_width(mut self, width: i32) -> Self {
        self.width = width;
        self
    }

    pub fn type_name(&self) -> String {
        let name = unsafe { gdal_sys::OGR_GetFieldTypeName(self.field_type) };
        c_str_to_string(name).unwrap_or_else(|| format!("{}", self.field_type))
    }
}

/// Feature type shared by every feature of a collection.
#[derive(Clone)]
pub struct Schema {
    pub type_name: String,
    pub geometry_field: String,
    pub geometry_type: OGRwkbGeometryType::Type,
    pub fields: Vec<FieldDef>,
    pub crs: Option<SpatialRef>,
}

impl Schema {
    pub fn from_layer<L: LayerAccess>(layer: &L) -> Self {
        let fields = layer
            .defn()
            .fields()
            .map(|field| FieldDef {
                name: field.name(),
                field_type: field.field_type(),
                width: field.width(),
                precision: field.precision(),
            })
            .collect();
        let (geometry_type, geometry_column) = unsafe {
            let c_layer = layer.c_layer();
            (
                gdal_sys::OGR_L_GetGeomType(c_layer),
                c_str_to_string(gdal_sys::OGR_L_GetGeometryColumn(c_layer)),
            )
        };
        let geometry_field = geometry_column
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_GEOMETRY_FIELD.to_string());
        Self {
            type_name: layer.name(),
            geometry_field,
            geometry_type,
            fields,
            crs: layer.spatial_ref(),
        }
    }

    /// Same schema with the geometry column declared in `crs`.
    pub fn retyped(&self, crs: &SpatialRef) -> Self {
        Self {
            crs: Some(crs.clone()),
            ..self.clone()
        }
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    pub fn is_geometry_field(&self, name: &str) -> bool {
        self.geometry_field.eq_ignore_ascii_case(name)
    }

    pub fn geometry_type_name(&self) -> String {
        let name = unsafe { gdal_sys::OGRGeometryTypeToName(self.geometry_type) };
        c_str_to_string(name).unwrap_or_else(|| format!("{}", self.geometry_type))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("geometry_field", &self.geometry_field)
            .field("geometry_type", &self.geometry_type_name())
            .field("fields", &self.fields)
            .field("crs", &self.crs.as_ref().map(display_name))
            .finish()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Type name: {}", self.type_name)?;
        writeln!(
            f,
            "Geometry: {} ({})",
            self.geometry_field,
            self.geometry_type_name()
        )?;
        match &self.crs {
            Some(crs) => writeln!(f, "CRS: {}", display_name(crs))?,
            None => writeln!(f, "CRS: <none>")?,
        }
        writeln!(f, "Attributes:")?;
        for field in &self.fields {
            writeln!(f, "  {}: {} ({})", field.name, field.type_name(), field.width)?;
        }
        Ok(())
    }
}

fn c_str_to_string(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use gdal::vector::{OGRFieldType, OGRwkbGeometryType};

    use crate::crs::crs_utils::{epsg_4326, parse_crs};

    use super::{FieldDef, Schema, DEFAULT_GEOMETRY_FIELD};

    fn test_schema() -> Schema {
        Schema {
            type_name: "roads".to_string(),
            geometry_field: DEFAULT_GEOMETRY_FIELD.to_string(),
            geometry_type: OGRwkbGeometryType::wkbLineString,
            fields: vec![
                FieldDef::new("name", OGRFieldType::OFTString).with_width(80),
                FieldDef::new("lanes", OGRFieldType::OFTInteger),
            ],
            crs: Some(epsg_4326().unwrap()),
        }
    }

    #[test]
    fn test_retyped_only_changes_crs() {
        let schema = test_schema();
        let utm = parse_crs("EPSG:32654").unwrap();
        let retyped = schema.retyped(&utm);

        assert_eq!(retyped.type_name, schema.type_name);
        assert_eq!(retyped.fields, schema.fields);
        assert_eq!(retyped.geometry_type, schema.geometry_type);
        assert_eq!(retyped.crs.unwrap().auth_code().unwrap(), 32654);
        assert_eq!(schema.crs.unwrap().auth_code().unwrap(), 4326);
    }

    #[test]
    fn test_attribute_queries() {
        let schema = test_schema();
        assert_eq!(schema.attribute_names(), vec!["name", "lanes"]);
        assert!(schema.has_attribute("lanes"));
        assert!(!schema.has_attribute("the_geom"));
        assert!(schema.is_geometry_field("THE_GEOM"));
        assert_eq!(schema.geometry_type_name(), "Line String");
    }
}
