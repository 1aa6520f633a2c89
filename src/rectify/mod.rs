//! Name/Type Rectifier
//!
//! The dissolve prefixes every statistic column with its operator keyword
//! (`SUM_area`) and gives numeric statistics its own default type. This module
//! strips the prefix again and builds the field mapping that restores the
//! original name, alias, type and length on export.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{MergeError, MergeResult};
use crate::schema::{FieldCatalog, FieldDescriptor, SystemFields};

/// Prefixes recognised on dissolved field names.
///
/// `UNIQUE` and `CONCATENATE` appear as one fused keyword. Fields decorated
/// with either one alone are therefore passed through under their dissolved
/// name, and a strict append will reject them.
pub const DISSOLVE_PREFIXES: [&str; 12] = [
    "SUM",
    "MEAN",
    "MIN",
    "MAX",
    "RANGE",
    "STD",
    "COUNT",
    "FIRST",
    "LAST",
    "MEDIAN",
    "VARIANCE",
    "UNIQUECONCATENATE",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub source: String,
    pub restored: String,
}

/// Outcome of inspecting a dissolved catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameMap {
    renames: Vec<Rename>,
    passthrough: Vec<FieldDescriptor>,
    /// Decorated geometry measures; the export target recomputes them.
    dropped: Vec<String>,
}

impl RenameMap {
    pub fn restored_name(&self, source: &str) -> Option<&str> {
        self.renames
            .iter()
            .find(|r| r.source == source)
            .map(|r| r.restored.as_str())
    }

    pub fn renames(&self) -> &[Rename] {
        &self.renames
    }

    pub fn passthrough(&self) -> &[FieldDescriptor] {
        &self.passthrough
    }

    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// Build the export mapping, taking output types from `original`.
    pub fn apply(&self, original: &FieldCatalog, layer: &str) -> MergeResult<FieldMapping> {
        let mut entries = Vec::with_capacity(self.renames.len() + self.passthrough.len());

        for rename in &self.renames {
            let template = original.get(&rename.restored).ok_or_else(|| MergeError::UnknownField {
                field: rename.restored.clone(),
                layer: layer.to_string(),
            })?;
            let output = FieldDescriptor {
                name: rename.restored.clone(),
                field_type: template.field_type,
                alias: Some(rename.restored.clone()),
                length: template.length,
            };
            debug!("Mapping {} -> {} ({})", rename.source, output.name, output.field_type);
            entries.push(FieldMap {
                source: rename.source.clone(),
                output,
            });
        }

        for field in &self.passthrough {
            entries.push(FieldMap {
                source: field.name.clone(),
                output: field.clone(),
            });
        }

        Ok(FieldMapping { entries })
    }
}

/// Split a dissolved name into its operator keyword and the original name.
fn strip_prefix(name: &str) -> Option<&str> {
    let (prefix, remainder) = name.split_once('_')?;
    if remainder.is_empty() || !DISSOLVE_PREFIXES.contains(&prefix) {
        return None;
    }
    Some(remainder)
}

/// Inspect a dissolved catalog and work out which fields get their names back.
pub fn rectify(dissolved: &FieldCatalog, system: &SystemFields) -> MergeResult<RenameMap> {
    let mut map = RenameMap::default();

    for field in dissolved {
        if system.is_managed(field) {
            continue;
        }
        match strip_prefix(&field.name) {
            Some(restored) if system.is_measure(restored) => map.dropped.push(field.name.clone()),
            Some(restored) => map.renames.push(Rename {
                source: field.name.clone(),
                restored: restored.to_string(),
            }),
            None => map.passthrough.push(field.clone()),
        }
    }

    let mut claimed: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for rename in &map.renames {
        claimed.entry(rename.restored.as_str()).or_default().push(rename.source.clone());
    }
    for field in &map.passthrough {
        claimed.entry(field.name.as_str()).or_default().push(field.name.clone());
    }
    if let Some((restored, sources)) = claimed.into_iter().find(|(_, sources)| sources.len() > 1) {
        return Err(MergeError::NameRestoreAmbiguous {
            restored: restored.to_string(),
            sources,
        });
    }

    info!(
        "Rectified {} dissolved fields ({} passed through, {} measures dropped)",
        map.renames.len(),
        map.passthrough.len(),
        map.dropped.len()
    );
    Ok(map)
}

/// One output column of a field-mapped export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    pub source: String,
    pub output: FieldDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: Vec<FieldMap>,
}

impl FieldMapping {
    pub fn new(entries: Vec<FieldMap>) -> Self {
        Self { entries }
    }

    pub fn output_for(&self, source: &str) -> Option<&FieldDescriptor> {
        self.entries.iter().find(|e| e.source == source).map(|e| &e.output)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldMap> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn dissolved(fields: &[(&str, FieldType)]) -> FieldCatalog {
        let mut all = vec![
            FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
            FieldDescriptor::new("Shape", FieldType::Geometry),
        ];
        all.extend(fields.iter().map(|(n, t)| FieldDescriptor::new(*n, *t)));
        all.push(FieldDescriptor::new("Shape_Length", FieldType::Double));
        all.push(FieldDescriptor::new("Shape_Area", FieldType::Double));
        FieldCatalog::new(all)
    }

    #[test]
    fn test_restores_name_and_original_type() {
        let system = SystemFields::default();
        let original = FieldCatalog::new(vec![
            FieldDescriptor::new("parcel_id", FieldType::Text).with_length(20),
            FieldDescriptor::new("area", FieldType::Double),
            FieldDescriptor::new("units", FieldType::Short),
        ]);
        let out = dissolved(&[
            ("FIRST_parcel_id", FieldType::Text),
            ("SUM_area", FieldType::Double),
            ("SUM_units", FieldType::Double),
        ]);

        let map = rectify(&out, &system).unwrap();
        assert_eq!(map.restored_name("SUM_area"), Some("area"));
        assert_eq!(map.restored_name("FIRST_parcel_id"), Some("parcel_id"));

        let mapping = map.apply(&original, "parcels").unwrap();
        let area = mapping.output_for("SUM_area").unwrap();
        assert_eq!(area.name, "area");
        assert_eq!(area.alias.as_deref(), Some("area"));
        assert_eq!(area.field_type, FieldType::Double);

        let units = mapping.output_for("SUM_units").unwrap();
        assert_eq!(units.field_type, FieldType::Short);

        let parcel = mapping.output_for("FIRST_parcel_id").unwrap();
        assert_eq!(parcel.length, Some(20));
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_only_first_underscore_splits() {
        let system = SystemFields::default();
        let map = rectify(&dissolved(&[("LAST_tax_year_2023", FieldType::Long)]), &system).unwrap();
        assert_eq!(map.restored_name("LAST_tax_year_2023"), Some("tax_year_2023"));
    }

    #[test]
    fn test_fused_unique_concatenate_keyword() {
        let system = SystemFields::default();
        let out = dissolved(&[
            ("UNIQUE_zone", FieldType::Long),
            ("CONCATENATE_notes", FieldType::Text),
            ("UNIQUECONCATENATE_owner", FieldType::Text),
        ]);

        let map = rectify(&out, &system).unwrap();

        assert_eq!(map.restored_name("UNIQUE_zone"), None);
        assert_eq!(map.restored_name("CONCATENATE_notes"), None);
        assert_eq!(map.restored_name("UNIQUECONCATENATE_owner"), Some("owner"));
        let passed: Vec<&str> = map.passthrough().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(passed, vec!["UNIQUE_zone", "CONCATENATE_notes"]);
    }

    #[test]
    fn test_ambiguous_restore_is_detected() {
        let system = SystemFields::default();
        let out = dissolved(&[("SUM_area", FieldType::Double), ("MAX_area", FieldType::Double)]);

        let err = rectify(&out, &system).unwrap_err();

        assert_eq!(
            err,
            MergeError::NameRestoreAmbiguous {
                restored: "area".to_string(),
                sources: vec!["SUM_area".to_string(), "MAX_area".to_string()],
            }
        );
    }

    #[test]
    fn test_restore_colliding_with_passthrough() {
        let system = SystemFields::default();
        let out = dissolved(&[("owner", FieldType::Text), ("FIRST_owner", FieldType::Text)]);
        assert!(matches!(
            rectify(&out, &system),
            Err(MergeError::NameRestoreAmbiguous { .. })
        ));
    }

    #[test]
    fn test_restored_name_missing_from_original() {
        let system = SystemFields::default();
        let map = rectify(&dissolved(&[("SUM_acres", FieldType::Double)]), &system).unwrap();
        let err = map.apply(&FieldCatalog::default(), "parcels").unwrap_err();
        assert!(matches!(err, MergeError::UnknownField { ref field, .. } if field == "acres"));
    }

    #[test]
    fn test_decorated_measures_are_dropped() {
        let system = SystemFields::default();
        let map = rectify(&dissolved(&[("LAST_SHAPE_Area", FieldType::Double)]), &system).unwrap();
        assert_eq!(map.dropped(), &["LAST_SHAPE_Area".to_string()]);
        assert!(map.renames().is_empty());
    }
}
