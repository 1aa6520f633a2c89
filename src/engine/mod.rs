//! Geometry/Attribute Engine Interface
//!
//! Everything the merge needs from a GIS runtime: schema listing, selection,
//! copying, dissolving, field-mapped export, field calculation and appends.
//! The pipeline never does geometry work itself.

mod geometry;
mod memory;
mod stats;

pub use geometry::{Envelope, Geometry};
pub use memory::{Dataset, Feature, MemoryEngine};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::plan::AggregationPlan;
use crate::rectify::FieldMapping;
use crate::schema::{FieldCatalog, FieldType, FieldValue};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialPredicate {
    /// Candidate lies entirely inside the reference.
    Within,
    Intersects,
}

/// How strictly an append checks the source schema against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaConformance {
    /// Any unresolved mismatch fails the append.
    Strict,
    /// Fields are matched by name; the rest are left empty.
    Lenient,
}

/// Snapshot of the rows selected on a layer, by object id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionHandle {
    pub layer: String,
    pub oids: Vec<i64>,
}

impl SelectionHandle {
    pub fn new(layer: impl Into<String>, oids: Vec<i64>) -> Self {
        Self {
            layer: layer.into(),
            oids,
        }
    }

    pub fn count(&self) -> usize {
        self.oids.len()
    }
}

impl fmt::Display for SelectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} selected)", self.layer, self.count())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DissolveOptions {
    pub multipart: bool,
    pub concatenation_separator: String,
}

impl Default for DissolveOptions {
    fn default() -> Self {
        Self {
            multipart: true,
            concatenation_separator: String::new(),
        }
    }
}

/// Removal of interior polygon parts ("holes" left by unit boundaries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliminateOptions {
    /// Parts smaller than this share of their container are removed.
    pub part_area_percent: f64,
    /// Only remove parts wholly contained in another part.
    pub contained_only: bool,
}

impl Default for EliminateOptions {
    fn default() -> Self {
        Self {
            part_area_percent: 90.0,
            contained_only: true,
        }
    }
}

/// Capability set of the external geometry/attribute engine.
///
/// Queries and mutations honour a layer's current selection, the way GIS
/// layers do: with rows selected only those rows are visible.
pub trait GeoEngine {
    fn list_fields(&self, layer: &str) -> EngineResult<FieldCatalog>;

    /// Rows visible through the layer (its selection if any).
    fn count(&self, layer: &str) -> EngineResult<usize>;

    fn read_values(&self, layer: &str, field: &str) -> EngineResult<Vec<FieldValue>>;

    /// Snapshot of the rows currently visible through `layer`.
    fn selection(&self, layer: &str) -> EngineResult<SelectionHandle>;

    fn select_by_location(
        &mut self,
        candidate: &str,
        predicate: SpatialPredicate,
        reference: &str,
    ) -> EngineResult<SelectionHandle>;

    fn clear_selection(&mut self, layer: &str) -> EngineResult<()>;

    /// Copy the visible rows of `source` into a new dataset `destination`.
    fn copy_features(&mut self, source: &str, destination: &str) -> EngineResult<usize>;

    fn eliminate_polygon_part(&mut self, input: &str, output: &str, options: &EliminateOptions) -> EngineResult<()>;

    fn dissolve(
        &mut self,
        input: &str,
        output: &str,
        group_fields: &[String],
        plan: &AggregationPlan,
        options: &DissolveOptions,
    ) -> EngineResult<()>;

    fn export_with_field_mapping(&mut self, input: &str, output: &str, mapping: &FieldMapping) -> EngineResult<usize>;

    fn calculate_field(&mut self, table: &str, field: &str, value: &FieldValue) -> EngineResult<()>;

    fn append_rows(&mut self, source: &str, destination: &str, conformance: SchemaConformance) -> EngineResult<usize>;

    /// Delete the rows of the snapshot and clear the layer's selection.
    fn delete_rows(&mut self, selection: &SelectionHandle) -> EngineResult<usize>;

    fn add_field(&mut self, table: &str, name: &str, field_type: FieldType) -> EngineResult<()>;

    fn delete_fields(&mut self, table: &str, names: &[String]) -> EngineResult<()>;

    /// Returns whether anything was deleted.
    fn delete_dataset(&mut self, name: &str) -> EngineResult<bool>;
}
