//! Toolbox
//!
//! Stand-alone tools shipped next to the merges: conforming one attribute
//! table to another, bulk completion stamping and selection clearing.

mod conform;

pub use conform::{conform, ConformReport, GEOMETRY_FIELDS};

use tracing::info;

use crate::engine::GeoEngine;
use crate::error::{MergeError, MergeResult};
use crate::schema::{provenance, read_catalog, FieldValue};

pub const MAX_PROCESSOR_LENGTH: usize = 255;

/// Stamp the visible rows of `layer` with COMPLETE=1 and `processor`.
/// Returns the number of rows stamped.
pub fn mark_complete(engine: &mut dyn GeoEngine, layer: &str, processor: &str) -> MergeResult<usize> {
    let length = processor.chars().count();
    if length > MAX_PROCESSOR_LENGTH {
        return Err(MergeError::ValueTooLong {
            field: provenance::PROCESSOR.to_string(),
            length,
            max: MAX_PROCESSOR_LENGTH,
        });
    }

    let catalog = read_catalog(engine, layer)?;
    for field in [provenance::COMPLETE, provenance::PROCESSOR] {
        if !catalog.contains(field) {
            return Err(MergeError::UnknownField {
                field: field.to_string(),
                layer: layer.to_string(),
            });
        }
    }

    engine.calculate_field(layer, provenance::COMPLETE, &FieldValue::Integer(1))?;
    engine.calculate_field(layer, provenance::PROCESSOR, &FieldValue::text(processor))?;

    let stamped = engine.count(layer)?;
    info!("Marked {} rows of '{}' complete by '{}'", stamped, layer, processor);
    Ok(stamped)
}

pub fn clear_selection(engine: &mut dyn GeoEngine, layer: &str) -> MergeResult<()> {
    engine.clear_selection(layer)?;
    info!("Cleared selection on '{}'", layer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Dataset, Geometry, MemoryEngine};
    use crate::schema::{FieldDescriptor, FieldType};

    fn review() -> MemoryEngine {
        let mut dataset = Dataset::new(vec![
            FieldDescriptor::new("COMPLETE", FieldType::Short),
            FieldDescriptor::new("PROCESSOR", FieldType::Text).with_length(255),
        ]);
        for i in 0..3 {
            let x = i as f64;
            dataset = dataset.with_feature(Geometry::rect(x, 0.0, x + 1.0, 1.0), Vec::<(String, FieldValue)>::new());
        }
        MemoryEngine::new().with_dataset("review", dataset)
    }

    #[test]
    fn test_mark_complete_stamps_selection_only() {
        let mut engine = review();
        engine.dataset_mut("review").unwrap().select([2]);

        assert_eq!(mark_complete(&mut engine, "review", "J. Doe").unwrap(), 1);

        let features = &engine.dataset("review").unwrap().features;
        assert!(features[0].attribute("COMPLETE").is_null());
        assert_eq!(features[1].attribute("COMPLETE"), &FieldValue::Integer(1));
        assert_eq!(features[1].attribute("PROCESSOR"), &FieldValue::text("J. Doe"));
    }

    #[test]
    fn test_mark_complete_rejects_long_processor() {
        let mut engine = review();
        let err = mark_complete(&mut engine, "review", &"x".repeat(256)).unwrap_err();
        assert!(matches!(err, MergeError::ValueTooLong { length: 256, max: 255, .. }));
        assert!(engine.dataset("review").unwrap().features.iter().all(|f| f.attribute("COMPLETE").is_null()));
    }

    #[test]
    fn test_mark_complete_requires_fields() {
        let mut engine = MemoryEngine::new().with_dataset("bare", Dataset::default());
        let err = mark_complete(&mut engine, "bare", "J. Doe").unwrap_err();
        assert_eq!(err.field(), Some("COMPLETE"));
    }

    #[test]
    fn test_clear_selection() {
        let mut engine = review();
        engine.dataset_mut("review").unwrap().select([1]);
        clear_selection(&mut engine, "review").unwrap();
        assert_eq!(engine.count("review").unwrap(), 3);
    }
}
