//! Error taxonomy for the merge pipeline.
//!
//! Every variant is fatal to the invocation that produced it. Nothing is
//! retried, and the orchestrator always reports the state it failed in.

use thiserror::Error;

use crate::orchestrator::MergeState;
use crate::plan::AggregationOperator;
use crate::schema::FieldType;

/// Failure reported by the geometry/attribute engine. Opaque to the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} failed on '{target}': {message}")]
pub struct EngineError {
    pub operation: &'static str,
    pub target: String,
    pub message: String,
}

impl EngineError {
    pub fn new(operation: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// The driving selection is at or above the caller's maximum.
    #[error("layer '{layer}' must have fewer than {max} selected features (currently has {count})")]
    SelectionTooLarge {
        layer: String,
        count: usize,
        max: usize,
    },

    #[error("layer '{layer}' has no selected features to merge")]
    EmptySelection { layer: String },

    /// A system-managed field was named in the user rules.
    #[error("cannot combine system-managed field '{field}' of layer '{layer}'; make sure {insolubles:?} are not in the provided field map")]
    IllegalFieldReference {
        field: String,
        layer: String,
        insolubles: Vec<String>,
    },

    #[error("field '{field}' does not exist on layer '{layer}'")]
    UnknownField { field: String, layer: String },

    /// Text only takes FIRST; numeric statistics need a numeric field, or a
    /// date field for MIN and MAX.
    #[error("cannot perform operation {operator} on field '{field}' of layer '{layer}' with type {field_type}")]
    TypeIncompatible {
        field: String,
        layer: String,
        operator: AggregationOperator,
        field_type: FieldType,
    },

    #[error("attributes in column '{field}' of layer '{layer}' vary between features ({distinct} distinct values), but no operation was provided to combine them")]
    ValuesVaryWithoutRule {
        field: String,
        layer: String,
        distinct: usize,
    },

    #[error("dissolved fields {sources:?} all restore to '{restored}'")]
    NameRestoreAmbiguous {
        restored: String,
        sources: Vec<String>,
    },

    #[error("invalid aggregation rule '{input}': {reason}")]
    InvalidRule { input: String, reason: String },

    #[error("value for '{field}' is {length} characters long; the limit is {max}")]
    ValueTooLong { field: String, length: usize, max: usize },

    #[error(transparent)]
    ExternalEngineFailure(#[from] EngineError),
}

impl MergeError {
    /// Field the error is about, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::IllegalFieldReference { field, .. }
            | Self::UnknownField { field, .. }
            | Self::TypeIncompatible { field, .. }
            | Self::ValuesVaryWithoutRule { field, .. }
            | Self::ValueTooLong { field, .. } => Some(field),
            Self::NameRestoreAmbiguous { restored, .. } => Some(restored),
            _ => None,
        }
    }
}

/// A `MergeError` pinned to the orchestrator state it occurred in.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("merge {invocation} failed while {state}: {source}")]
pub struct MergeFailure {
    pub invocation: String,
    pub state: MergeState,
    #[source]
    pub source: MergeError,
}

pub type MergeResult<T> = Result<T, MergeError>;
