//! Merge Orchestrator
//!
//! Sequences one merge: selection validation, schema repair, candidate
//! filtering, copy, plan, dissolve, rectify, tag and append. Every
//! intermediate dataset is scratch and is removed on every exit path.

mod provenance;
mod scratch;

pub use provenance::{ensure_provenance_fields, ProvenanceTag, PROVENANCE_FIELDS};
pub use scratch::ScratchSpace;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::MergeConfig;
use crate::engine::{DissolveOptions, EliminateOptions, GeoEngine, SchemaConformance, SpatialPredicate};
use crate::error::{MergeError, MergeFailure, MergeResult};
use crate::plan::{AggregationPlan, LayerSamples, PlanBuilder, UserRules};
use crate::rectify::{rectify, RenameMap};
use crate::schema::{read_catalog, SystemFields};

// ──────────────────────────────────────────────────────────────────────────────
// STATES AND VARIANTS
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeState {
    ValidatingSelection,
    SchemaChecked,
    Filtered,
    Copied,
    PlanBuilt,
    Dissolved,
    Rectified,
    Tagged,
    Appended,
    Done,
    Failed,
}

impl MergeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Renders the work a state stands for, so failures read "failed while
/// building the plan".
impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ValidatingSelection => "validating the selection",
            Self::SchemaChecked => "checking the destination schema",
            Self::Filtered => "filtering candidates",
            Self::Copied => "copying candidates",
            Self::PlanBuilt => "building the plan",
            Self::Dissolved => "dissolving",
            Self::Rectified => "rectifying field names",
            Self::Tagged => "tagging provenance",
            Self::Appended => "appending",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum MergeVariant {
    /// The selected parcels are merged in place.
    Selection { subtype: Option<String> },
    /// Units lying within a common parcel are merged, taking the common
    /// parcel's attributes wherever the rules say `Common Attribute`.
    CommonParcel,
}

impl MergeVariant {
    pub fn subprocessor(&self) -> &'static str {
        match self {
            Self::Selection { .. } => "Selected Parcel Merge",
            Self::CommonParcel => "Common Parcel Merge",
        }
    }

    pub fn default_max_selection(&self) -> usize {
        match self {
            Self::Selection { .. } => 50,
            Self::CommonParcel => 2,
        }
    }

    fn subtype(&self) -> Option<&str> {
        match self {
            Self::Selection { subtype } => subtype.as_deref(),
            Self::CommonParcel => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub variant: MergeVariant,
    /// Layer whose selection drives the merge.
    pub driving_layer: String,
    /// Layer the merged parcel is appended to.
    pub destination_layer: String,
    pub rules: UserRules,
    /// The driving selection must hold fewer rows than this.
    pub max_selection: usize,
}

impl MergeRequest {
    pub fn selection(parcel_layer: impl Into<String>, rules: UserRules) -> Self {
        let layer = parcel_layer.into();
        let variant = MergeVariant::Selection { subtype: None };
        Self {
            max_selection: variant.default_max_selection(),
            variant,
            driving_layer: layer.clone(),
            destination_layer: layer,
            rules,
        }
    }

    pub fn common_parcel(common_layer: impl Into<String>, review_layer: impl Into<String>, rules: UserRules) -> Self {
        let variant = MergeVariant::CommonParcel;
        Self {
            max_selection: variant.default_max_selection(),
            variant,
            driving_layer: common_layer.into(),
            destination_layer: review_layer.into(),
            rules,
        }
    }

    /// Only meaningful for the selection variant.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        if let MergeVariant::Selection { subtype: slot } = &mut self.variant {
            *slot = Some(subtype.into());
        }
        self
    }

    pub fn with_max_selection(mut self, max: usize) -> Self {
        self.max_selection = max;
        self
    }
}

/// What a finished merge did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub invocation: String,
    pub variant: MergeVariant,
    pub states: Vec<MergeState>,
    pub plan: AggregationPlan,
    pub renames: RenameMap,
    pub input_rows: usize,
    pub appended_rows: usize,
    pub deleted_rows: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ──────────────────────────────────────────────────────────────────────────────
// ORCHESTRATOR
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MergeOrchestrator {
    system: SystemFields,
    processor: String,
    scratch_prefix: String,
}

impl Default for MergeOrchestrator {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

/// Progress of one invocation.
struct Run {
    state: MergeState,
    states: Vec<MergeState>,
    scratch: ScratchSpace,
}

impl Run {
    fn enter(&mut self, state: MergeState) {
        if self.state != state {
            self.states.push(self.state);
        }
        info!("Merge {}: {}", self.scratch.token(), state);
        self.state = state;
    }
}

struct Outcome {
    plan: AggregationPlan,
    renames: RenameMap,
    input_rows: usize,
    appended_rows: usize,
    deleted_rows: usize,
}

impl MergeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            system: config.system_fields.clone(),
            processor: config.processor.clone(),
            scratch_prefix: config.scratch_prefix.clone(),
        }
    }

    pub fn system_fields(&self) -> &SystemFields {
        &self.system
    }

    /// Run one merge. Scratch datasets are cleared whatever the outcome.
    pub fn run(&self, engine: &mut dyn GeoEngine, request: &MergeRequest) -> Result<MergeReport, MergeFailure> {
        let started_at = Utc::now();
        let mut run = Run {
            state: MergeState::ValidatingSelection,
            states: Vec::new(),
            scratch: ScratchSpace::new(&self.scratch_prefix),
        };
        let invocation = run.scratch.token().to_string();
        info!(
            "Starting {} {} on '{}' into '{}'",
            request.variant.subprocessor(),
            invocation,
            request.driving_layer,
            request.destination_layer
        );

        let outcome = self.execute(engine, request, &mut run);
        let cleanup = run.scratch.clear(engine);

        match outcome {
            Ok(outcome) => {
                if let Err(e) = cleanup {
                    warn!("Merge {} finished but scratch cleanup failed: {}", invocation, e);
                }
                run.enter(MergeState::Done);
                run.states.push(MergeState::Done);
                info!(
                    "Merged {} rows of '{}' into 1 parcel",
                    outcome.input_rows, request.driving_layer
                );
                Ok(MergeReport {
                    invocation,
                    variant: request.variant.clone(),
                    states: run.states,
                    plan: outcome.plan,
                    renames: outcome.renames,
                    input_rows: outcome.input_rows,
                    appended_rows: outcome.appended_rows,
                    deleted_rows: outcome.deleted_rows,
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(source) => {
                if let Err(e) = cleanup {
                    warn!("Scratch cleanup after failed merge {} also failed: {}", invocation, e);
                }
                warn!("Merge {}: {} -> {}: {}", invocation, run.state, MergeState::Failed, source);
                Err(MergeFailure {
                    invocation,
                    state: run.state,
                    source,
                })
            }
        }
    }

    fn execute(&self, engine: &mut dyn GeoEngine, request: &MergeRequest, run: &mut Run) -> MergeResult<Outcome> {
        let builder = PlanBuilder::new(&self.system).for_layer(&request.destination_layer);
        let driving = request.driving_layer.as_str();
        let destination = request.destination_layer.as_str();

        // Nothing is mutated before the selection and rule names are known good.
        run.enter(MergeState::ValidatingSelection);
        let driving_selection = engine.selection(driving)?;
        let selected = driving_selection.count();
        if selected >= request.max_selection {
            return Err(MergeError::SelectionTooLarge {
                layer: driving.to_string(),
                count: selected,
                max: request.max_selection,
            });
        }
        if selected == 0 {
            return Err(MergeError::EmptySelection {
                layer: driving.to_string(),
            });
        }
        // The merged rows always come from the destination layer.
        builder.check_references(&read_catalog(engine, destination)?, &request.rules)?;

        run.enter(MergeState::SchemaChecked);
        ensure_provenance_fields(engine, destination)?;

        run.enter(MergeState::Filtered);
        let (source_rows, common) = match request.variant {
            MergeVariant::Selection { .. } => (driving_selection, None),
            MergeVariant::CommonParcel => {
                let common = run.scratch.name("common");
                engine.eliminate_polygon_part(driving, &common, &EliminateOptions::default())?;
                engine.clear_selection(driving)?;
                let within = engine.select_by_location(destination, SpatialPredicate::Within, &common)?;
                if within.count() == 0 {
                    return Err(MergeError::EmptySelection {
                        layer: destination.to_string(),
                    });
                }
                info!("{} units of '{}' lie within the common parcel", within.count(), destination);
                (within, Some(common))
            }
        };

        run.enter(MergeState::Copied);
        let units = run.scratch.name("units");
        let input_rows = engine.copy_features(&source_rows.layer, &units)?;

        run.enter(MergeState::PlanBuilt);
        let original = read_catalog(engine, &units)?;
        let plan = builder.build(&original, &request.rules, &LayerSamples::new(engine, &units))?;
        if let Some(common) = &common {
            // Appended last so that LAST picks up the common parcel's values.
            engine.append_rows(common, &units, SchemaConformance::Lenient)?;
        }

        run.enter(MergeState::Dissolved);
        let dissolved = run.scratch.name("dissolved");
        engine.dissolve(&units, &dissolved, &[], &plan, &DissolveOptions::default())?;

        run.enter(MergeState::Rectified);
        let renames = rectify(&read_catalog(engine, &dissolved)?, &self.system)?;
        let mapping = renames.apply(&original, &units)?;
        let output = run.scratch.name("output");
        engine.export_with_field_mapping(&dissolved, &output, &mapping)?;

        run.enter(MergeState::Tagged);
        ProvenanceTag {
            processor: self.processor.clone(),
            subprocessor: request.variant.subprocessor().to_string(),
            subtype: request.variant.subtype().map(str::to_string),
        }
        .apply(engine, &output)?;

        run.enter(MergeState::Appended);
        let appended_rows = engine.append_rows(&output, destination, SchemaConformance::Strict)?;
        let deleted_rows = engine.delete_rows(&source_rows)?;

        Ok(Outcome {
            plan,
            renames,
            input_rows,
            appended_rows,
            deleted_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Dataset, Geometry, MemoryEngine};
    use crate::plan::AggregationOperator;
    use crate::schema::{FieldDescriptor, FieldType, FieldValue};

    fn parcels(count: usize) -> Dataset {
        let mut dataset = Dataset::new(vec![
            FieldDescriptor::new("owner", FieldType::Text).with_length(50),
            FieldDescriptor::new("area", FieldType::Double),
        ]);
        for i in 0..count {
            let x = i as f64 * 10.0;
            dataset = dataset.with_feature(
                Geometry::rect(x, 0.0, x + 10.0, 10.0),
                [("owner", FieldValue::text("Smith")), ("area", FieldValue::Double(100.0))],
            );
        }
        dataset
    }

    #[test]
    fn test_states_are_traversed_in_order() {
        let mut engine = MemoryEngine::new().with_dataset("parcels", parcels(3));
        engine.dataset_mut("parcels").unwrap().select([1, 2]);
        let request = MergeRequest::selection("parcels", UserRules::new().with("area", AggregationOperator::Sum));

        let report = MergeOrchestrator::new().run(&mut engine, &request).unwrap();

        assert_eq!(
            report.states,
            vec![
                MergeState::ValidatingSelection,
                MergeState::SchemaChecked,
                MergeState::Filtered,
                MergeState::Copied,
                MergeState::PlanBuilt,
                MergeState::Dissolved,
                MergeState::Rectified,
                MergeState::Tagged,
                MergeState::Appended,
                MergeState::Done,
            ]
        );
        assert!(report.states.last().unwrap().is_terminal());
        assert_eq!((report.input_rows, report.appended_rows, report.deleted_rows), (2, 1, 2));
        assert_eq!(engine.dataset("parcels").unwrap().features.len(), 2);
    }

    #[test]
    fn test_selection_at_limit_is_rejected_before_mutation() {
        let mut engine = MemoryEngine::new().with_dataset("parcels", parcels(3));
        let before = engine.clone();
        let request = MergeRequest::selection("parcels", UserRules::new()).with_max_selection(3);

        let failure = MergeOrchestrator::new().run(&mut engine, &request).unwrap_err();

        assert_eq!(failure.state, MergeState::ValidatingSelection);
        assert!(matches!(failure.source, MergeError::SelectionTooLarge { count: 3, max: 3, .. }));
        assert_eq!(engine, before);
    }

    #[test]
    fn test_failure_message_names_the_state() {
        let mut engine = MemoryEngine::new().with_dataset("parcels", parcels(2));
        let request = MergeRequest::selection("parcels", UserRules::new().with("owner", AggregationOperator::Sum));

        let failure = MergeOrchestrator::new().run(&mut engine, &request).unwrap_err();

        assert_eq!(failure.state, MergeState::PlanBuilt);
        assert!(failure.to_string().contains("failed while building the plan"));
    }

    #[test]
    fn test_subtype_only_applies_to_selection_variant() {
        let request = MergeRequest::common_parcel("common", "review", UserRules::new()).with_subtype("Condo");
        assert_eq!(request.variant, MergeVariant::CommonParcel);
        assert_eq!(request.max_selection, 2);

        let request = MergeRequest::selection("parcels", UserRules::new()).with_subtype("Condo");
        assert_eq!(request.variant.subtype(), Some("Condo"));
        assert_eq!(request.variant.subprocessor(), "Selected Parcel Merge");
    }
}
