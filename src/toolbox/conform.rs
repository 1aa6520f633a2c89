//! Make one layer's attribute table match another's.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::GeoEngine;
use crate::error::MergeResult;
use crate::schema::{read_catalog, FieldDescriptor};

/// Geometry columns conform leaves alone, in either casing.
pub const GEOMETRY_FIELDS: [&str; 6] = ["Shape", "SHAPE", "Shape_Length", "Shape_Area", "SHAPE_Length", "SHAPE_Area"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

fn untouchable(field: &FieldDescriptor) -> bool {
    GEOMETRY_FIELDS.contains(&field.name.as_str()) || field.field_type.is_system()
}

/// Remove from `target` every field `template` lacks and add every field of
/// `template` that `target` lacks, typed as in `template`.
pub fn conform(engine: &mut dyn GeoEngine, template: &str, target: &str) -> MergeResult<ConformReport> {
    let template_fields = read_catalog(engine, template)?;
    let target_fields = read_catalog(engine, target)?;
    info!(
        "Conforming '{}' ({} fields) to '{}' ({} fields)",
        target,
        target_fields.len(),
        template,
        template_fields.len()
    );

    let mut report = ConformReport::default();
    for field in target_fields.iter().filter(|f| !untouchable(f)) {
        if template_fields.contains(&field.name) {
            report.kept.push(field.name.clone());
        } else {
            report.removed.push(field.name.clone());
        }
    }
    let missing: Vec<&FieldDescriptor> = template_fields
        .iter()
        .filter(|f| !untouchable(f) && !target_fields.contains(&f.name))
        .collect();

    info!("Present in both: {:?}", report.kept);
    info!("Removing: {:?}", report.removed);
    if !report.removed.is_empty() {
        engine.delete_fields(target, &report.removed)?;
    }

    for field in missing {
        info!("Adding field {} of type {}", field.name, field.field_type);
        engine.add_field(target, &field.name, field.field_type)?;
        report.added.push(field.name.clone());
    }

    Ok(report)
}
