//! Provenance stamping of merged parcels.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::GeoEngine;
use crate::error::{MergeError, MergeResult};
use crate::schema::{provenance, read_catalog, FieldType, FieldValue};

/// Fields every destination layer must carry, with the type they are added as.
pub const PROVENANCE_FIELDS: [(&str, FieldType); 3] = [
    (provenance::PROCESSOR, FieldType::Text),
    (provenance::SUBPROCESSOR, FieldType::Text),
    (provenance::IS_OUG, FieldType::Short),
];

/// Add any missing provenance field to `layer`. Returns the names added.
pub fn ensure_provenance_fields(engine: &mut dyn GeoEngine, layer: &str) -> MergeResult<Vec<String>> {
    let catalog = read_catalog(engine, layer)?;
    let mut added = Vec::new();
    for (name, field_type) in PROVENANCE_FIELDS {
        if catalog.contains(name) {
            continue;
        }
        warn!("Layer '{}' is missing field {}; adding it as {}", layer, name, field_type);
        engine.add_field(layer, name, field_type)?;
        added.push(name.to_string());
    }
    Ok(added)
}

/// Values written onto the merged parcel before it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceTag {
    pub processor: String,
    pub subprocessor: String,
    pub subtype: Option<String>,
}

impl ProvenanceTag {
    pub fn apply(&self, engine: &mut dyn GeoEngine, table: &str) -> MergeResult<()> {
        engine.calculate_field(table, provenance::IS_OUG, &FieldValue::Integer(1))?;
        engine.calculate_field(table, provenance::PROCESSOR, &FieldValue::text(&self.processor))?;
        engine.calculate_field(table, provenance::SUBPROCESSOR, &FieldValue::text(&self.subprocessor))?;

        if let Some(subtype) = &self.subtype {
            if !read_catalog(engine, table)?.contains(provenance::SUBTYPE) {
                return Err(MergeError::UnknownField {
                    field: provenance::SUBTYPE.to_string(),
                    layer: table.to_string(),
                });
            }
            engine.calculate_field(table, provenance::SUBTYPE, &FieldValue::text(subtype))?;
        }

        info!("Tagged {} as '{}' ({})", table, self.subprocessor, self.processor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Dataset, Geometry, MemoryEngine};
    use crate::schema::FieldDescriptor;

    fn engine_with(fields: Vec<FieldDescriptor>) -> MemoryEngine {
        let dataset = Dataset::new(fields).with_feature(Geometry::rect(0.0, 0.0, 1.0, 1.0), Vec::<(String, FieldValue)>::new());
        MemoryEngine::new().with_dataset("parcels", dataset)
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut engine = engine_with(vec![FieldDescriptor::new("PROCESSOR", FieldType::Text)]);

        let added = ensure_provenance_fields(&mut engine, "parcels").unwrap();
        assert_eq!(added, vec!["SUBPROCESSOR", "IS_OUG"]);
        assert_eq!(engine.dataset("parcels").unwrap().field("IS_OUG").unwrap().field_type, FieldType::Short);

        assert!(ensure_provenance_fields(&mut engine, "parcels").unwrap().is_empty());
    }

    #[test]
    fn test_tag_requires_subtype_field_when_given() {
        let mut engine = engine_with(vec![]);
        ensure_provenance_fields(&mut engine, "parcels").unwrap();
        let tag = ProvenanceTag {
            processor: "OUG Merge Processor v1.1".to_string(),
            subprocessor: "Selected Parcel Merge".to_string(),
            subtype: Some("Condo".to_string()),
        };

        let err = tag.apply(&mut engine, "parcels").unwrap_err();
        assert_eq!(err.field(), Some("SUBTYPE"));

        let feature = &engine.dataset("parcels").unwrap().features[0];
        assert_eq!(feature.attribute("IS_OUG"), &FieldValue::Integer(1));
        assert_eq!(feature.attribute("SUBPROCESSOR"), &FieldValue::text("Selected Parcel Merge"));
    }
}
