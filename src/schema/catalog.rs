use tracing::debug;

use crate::engine::GeoEngine;
use crate::error::MergeResult;

use super::{FieldCatalog, FieldValue};

/// Read a layer's schema. Never cached; every call goes to the engine.
pub fn read_catalog(engine: &dyn GeoEngine, layer: &str) -> MergeResult<FieldCatalog> {
    let catalog = engine.list_fields(layer)?;
    debug!("Layer '{}' has {} fields", layer, catalog.len());
    Ok(catalog)
}

/// Values of one column across the rows visible through `layer`.
pub fn observed_values(engine: &dyn GeoEngine, layer: &str, field: &str) -> MergeResult<Vec<FieldValue>> {
    Ok(engine.read_values(layer, field)?)
}
