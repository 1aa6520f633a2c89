//! OUG Merge
//!
//! Merges the parcels of an Owned Unit Grouping into one parcel:
//! - Field catalogs read through a pluggable geometry/attribute engine
//! - Aggregation plans built from caller rules and observed values
//! - Dissolve output renamed and retyped back to the source schema
//! - Provenance tagging and strict append into the destination layer
//! - Conform / mark-complete toolbox utilities

pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod rectify;
pub mod schema;
pub mod toolbox;
pub mod utils;

// Re-exports for convenience
pub use config::MergeConfig;
pub use engine::{GeoEngine, MemoryEngine};
pub use error::{EngineError, MergeError, MergeFailure, MergeResult};
pub use orchestrator::{MergeOrchestrator, MergeReport, MergeRequest, MergeState, MergeVariant};
pub use plan::{AggregationOperator, AggregationPlan, OperatorChoice, PlanBuilder, UserRules};
pub use rectify::{rectify, FieldMapping, RenameMap};
pub use schema::{FieldCatalog, FieldDescriptor, FieldType, FieldValue, SystemFields};
