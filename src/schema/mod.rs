//! Schema Module
//!
//! Field descriptors, catalogs and the fixed field names the toolbox relies on.

mod catalog;
mod value;

pub use catalog::{observed_values, read_catalog};
pub use value::FieldValue;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── System-managed columns ──────────────────────────────────────────────────
pub mod system {
    pub const OBJECT_ID: &str = "OBJECTID";
    pub const SHAPE: &str = "Shape";
    pub const SHAPE_LENGTH: &str = "Shape_Length";
    pub const SHAPE_AREA: &str = "Shape_Area";

    pub const INSOLUBLES: [&str; 4] = [OBJECT_ID, SHAPE, SHAPE_LENGTH, SHAPE_AREA];
    pub const MEASURES: [&str; 2] = [SHAPE_LENGTH, SHAPE_AREA];
}

// ── Provenance columns ──────────────────────────────────────────────────────
pub mod provenance {
    pub const PROCESSOR: &str = "PROCESSOR";
    pub const SUBPROCESSOR: &str = "SUBPROCESSOR";
    pub const IS_OUG: &str = "IS_OUG";
    pub const SUBTYPE: &str = "SUBTYPE";
    pub const COMPLETE: &str = "COMPLETE";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(alias = "String", alias = "TEXT")]
    Text,
    #[serde(alias = "SmallInteger", alias = "SHORT")]
    Short,
    #[serde(alias = "Integer", alias = "LONG")]
    Long,
    #[serde(alias = "Single", alias = "FLOAT")]
    Float,
    #[serde(alias = "DOUBLE")]
    Double,
    #[serde(alias = "DATE")]
    Date,
    Geometry,
    #[serde(alias = "OID")]
    ObjectId,
    #[serde(alias = "GlobalID", alias = "GUID")]
    Guid,
    Blob,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Short | FieldType::Long | FieldType::Float | FieldType::Double)
    }

    /// Types the engine owns; never written through the attribute table.
    pub fn is_system(self) -> bool {
        matches!(self, FieldType::Geometry | FieldType::ObjectId)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "Text",
            FieldType::Short => "Short",
            FieldType::Long => "Long",
            FieldType::Float => "Float",
            FieldType::Double => "Double",
            FieldType::Date => "Date",
            FieldType::Geometry => "Geometry",
            FieldType::ObjectId => "ObjectId",
            FieldType::Guid => "Guid",
            FieldType::Blob => "Blob",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldType {
    type Err = String;

    /// Accepts both the add-field keywords (`TEXT`, `SHORT`) and the names
    /// reported by field listings (`String`, `SmallInteger`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(FieldType::Text),
            "short" | "smallinteger" => Ok(FieldType::Short),
            "long" | "integer" => Ok(FieldType::Long),
            "float" | "single" => Ok(FieldType::Float),
            "double" => Ok(FieldType::Double),
            "date" => Ok(FieldType::Date),
            "geometry" => Ok(FieldType::Geometry),
            "objectid" | "oid" => Ok(FieldType::ObjectId),
            "guid" | "globalid" => Ok(FieldType::Guid),
            "blob" => Ok(FieldType::Blob),
            other => Err(format!("unknown field type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Text width; other types leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            alias: None,
            length: None,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Ordered schema of a layer. Names are unique; the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldCatalog {
    fields: Vec<FieldDescriptor>,
}

impl FieldCatalog {
    pub fn new(fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        fields.into_iter().collect()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<FieldDescriptor> for FieldCatalog {
    fn from_iter<I: IntoIterator<Item = FieldDescriptor>>(iter: I) -> Self {
        let mut fields: Vec<FieldDescriptor> = Vec::new();
        for field in iter {
            if !fields.iter().any(|f| f.name == field.name) {
                fields.push(field);
            }
        }
        Self { fields }
    }
}

impl<'a> IntoIterator for &'a FieldCatalog {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Which columns the engine manages on its own.
///
/// Insolubles match exactly; geometry measures match case-insensitively so
/// that `SHAPE_Area` style variants are recognised as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemFields {
    pub insolubles: Vec<String>,
    pub measures: Vec<String>,
}

impl Default for SystemFields {
    fn default() -> Self {
        Self {
            insolubles: system::INSOLUBLES.iter().map(|s| s.to_string()).collect(),
            measures: system::MEASURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SystemFields {
    pub fn is_insoluble(&self, name: &str) -> bool {
        self.insolubles.iter().any(|f| f == name)
    }

    pub fn is_measure(&self, name: &str) -> bool {
        self.measures.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    /// Insoluble, a geometry measure, or typed as engine-owned.
    pub fn is_managed(&self, field: &FieldDescriptor) -> bool {
        self.is_insoluble(&field.name) || self.is_measure(&field.name) || field.field_type.is_system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_keeps_first_duplicate() {
        let catalog = FieldCatalog::new(vec![
            FieldDescriptor::new("owner", FieldType::Text),
            FieldDescriptor::new("owner", FieldType::Long),
            FieldDescriptor::new("area", FieldType::Double),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("owner").unwrap().field_type, FieldType::Text);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["owner", "area"]);
    }

    #[test]
    fn test_field_type_accepts_listing_names() {
        assert_eq!("String".parse::<FieldType>().unwrap(), FieldType::Text);
        assert_eq!("SmallInteger".parse::<FieldType>().unwrap(), FieldType::Short);
        assert_eq!("LONG".parse::<FieldType>().unwrap(), FieldType::Long);
        assert!("Raster".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_measure_match_ignores_case() {
        let system = SystemFields::default();
        assert!(system.is_measure("SHAPE_Area"));
        assert!(!system.is_insoluble("SHAPE_Area"));
        assert!(system.is_insoluble("Shape_Area"));
    }
}
