//! Aggregation plan construction.
//!
//! Rules:
//! 1. Insoluble fields may never be named by the caller, and are never planned.
//! 2. A caller rule wins. `Common Attribute` always becomes LAST; on text
//!    fields anything but FIRST is rejected, and numeric statistics need a
//!    numeric field (MIN and MAX also take dates).
//! 3. Without a rule, geometry measures take LAST (they are recomputed), and
//!    every other column must hold one value across all rows to take FIRST.

use std::collections::HashMap;
use tracing::{debug, info};

use super::{AggregationOperator, AggregationPlan, AggregationRule, OperatorChoice, UserRules};
use crate::engine::GeoEngine;
use crate::error::{MergeError, MergeResult};
use crate::schema::{observed_values, FieldCatalog, FieldType, FieldValue, SystemFields};

/// Where the builder reads a column's observed values from.
///
/// Only consulted for fields the caller gave no rule for.
pub trait SampleSource {
    fn values(&self, field: &str) -> MergeResult<Vec<FieldValue>>;
}

impl SampleSource for HashMap<String, Vec<FieldValue>> {
    fn values(&self, field: &str) -> MergeResult<Vec<FieldValue>> {
        Ok(self.get(field).cloned().unwrap_or_default())
    }
}

/// Reads samples lazily from the rows visible through an engine layer.
pub struct LayerSamples<'e> {
    engine: &'e dyn GeoEngine,
    layer: &'e str,
}

impl<'e> LayerSamples<'e> {
    pub fn new(engine: &'e dyn GeoEngine, layer: &'e str) -> Self {
        Self { engine, layer }
    }
}

impl SampleSource for LayerSamples<'_> {
    fn values(&self, field: &str) -> MergeResult<Vec<FieldValue>> {
        observed_values(self.engine, self.layer, field)
    }
}

pub struct PlanBuilder<'a> {
    system: &'a SystemFields,
    layer: String,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(system: &'a SystemFields) -> Self {
        Self {
            system,
            layer: String::new(),
        }
    }

    /// Layer name used in error messages.
    pub fn for_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    pub fn build(
        &self,
        catalog: &FieldCatalog,
        rules: &UserRules,
        samples: &dyn SampleSource,
    ) -> MergeResult<AggregationPlan> {
        self.check_references(catalog, rules)?;

        let mut planned = Vec::with_capacity(catalog.len());
        for field in catalog {
            if self.system.is_insoluble(&field.name) {
                continue;
            }

            let operator = match rules.get(&field.name) {
                Some(OperatorChoice::CommonAttribute) => AggregationOperator::Last,
                Some(OperatorChoice::Operator(op)) => {
                    let text_only_first = field.field_type == FieldType::Text && op != AggregationOperator::First;
                    if text_only_first || !op.supports(field.field_type) {
                        return Err(MergeError::TypeIncompatible {
                            field: field.name.clone(),
                            layer: self.layer.clone(),
                            operator: op,
                            field_type: field.field_type,
                        });
                    }
                    op
                }
                None if self.system.is_measure(&field.name) => AggregationOperator::Last,
                None => {
                    let values = samples.values(&field.name)?;
                    let distinct = count_distinct(&values);
                    if distinct > 1 {
                        return Err(MergeError::ValuesVaryWithoutRule {
                            field: field.name.clone(),
                            layer: self.layer.clone(),
                            distinct,
                        });
                    }
                    AggregationOperator::First
                }
            };

            debug!("Planned {} {}", field.name, operator);
            planned.push(AggregationRule::new(field.name.clone(), operator));
        }

        let plan = AggregationPlan::from_rules(planned);
        info!("Created dissolve plan with {} rules: {}", plan.len(), plan);
        Ok(plan)
    }

    /// Fail on the first rule naming an insoluble field. Needs no catalog, so
    /// callers can run it before touching any data.
    pub fn reject_insolubles(&self, rules: &UserRules) -> MergeResult<()> {
        match rules.fields().find(|f| self.system.is_insoluble(f)) {
            Some(field) => Err(MergeError::IllegalFieldReference {
                field: field.to_string(),
                layer: self.layer.clone(),
                insolubles: self.system.insolubles.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Every rule must name a field of `catalog`, and none an insoluble one.
    pub fn check_references(&self, catalog: &FieldCatalog, rules: &UserRules) -> MergeResult<()> {
        self.reject_insolubles(rules)?;
        for field in rules.fields() {
            if !catalog.contains(field) {
                return Err(MergeError::UnknownField {
                    field: field.to_string(),
                    layer: self.layer.clone(),
                });
            }
        }
        Ok(())
    }
}

fn count_distinct(values: &[FieldValue]) -> usize {
    let mut seen: Vec<&FieldValue> = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;

    fn parcel_catalog() -> FieldCatalog {
        FieldCatalog::new(vec![
            FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
            FieldDescriptor::new("Shape", FieldType::Geometry),
            FieldDescriptor::new("parcel_id", FieldType::Text),
            FieldDescriptor::new("owner", FieldType::Text),
            FieldDescriptor::new("area", FieldType::Double),
            FieldDescriptor::new("Shape_Length", FieldType::Double),
            FieldDescriptor::new("Shape_Area", FieldType::Double),
        ])
    }

    fn no_samples() -> HashMap<String, Vec<FieldValue>> {
        HashMap::new()
    }

    fn samples(pairs: &[(&str, Vec<FieldValue>)]) -> HashMap<String, Vec<FieldValue>> {
        pairs.iter().map(|(f, v)| (f.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_every_eligible_field_planned_once_in_order() {
        let system = SystemFields::default();
        let rules = UserRules::new()
            .with("area", AggregationOperator::Sum)
            .with("parcel_id", AggregationOperator::First);
        let observed = samples(&[("owner", vec![FieldValue::text("Smith"), FieldValue::text("Smith")])]);

        let plan = PlanBuilder::new(&system).build(&parcel_catalog(), &rules, &observed).unwrap();

        let fields: Vec<&str> = plan.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(fields, vec!["parcel_id", "owner", "area"]);
        assert_eq!(plan.operator_for("area"), Some(AggregationOperator::Sum));
        assert_eq!(plan.operator_for("owner"), Some(AggregationOperator::First));
        assert_eq!(plan.operator_for("OBJECTID"), None);
    }

    #[test]
    fn test_common_attribute_is_last_for_any_type() {
        let system = SystemFields::default();
        let rules = UserRules::new()
            .with("owner", OperatorChoice::CommonAttribute)
            .with("area", OperatorChoice::CommonAttribute)
            .with("parcel_id", OperatorChoice::CommonAttribute);

        let plan = PlanBuilder::new(&system)
            .build(&parcel_catalog(), &rules, &no_samples())
            .unwrap();

        assert!(plan.iter().all(|r| r.operator == AggregationOperator::Last));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_text_field_rejects_numeric_operator() {
        let system = SystemFields::default();
        let rules = UserRules::new().with("owner", AggregationOperator::Sum);

        let err = PlanBuilder::new(&system)
            .for_layer("parcels")
            .build(&parcel_catalog(), &rules, &no_samples())
            .unwrap_err();

        assert_eq!(
            err,
            MergeError::TypeIncompatible {
                field: "owner".to_string(),
                layer: "parcels".to_string(),
                operator: AggregationOperator::Sum,
                field_type: FieldType::Text,
            }
        );
    }

    #[test]
    fn test_date_field_takes_max_but_not_sum() {
        let system = SystemFields::default();
        let catalog = FieldCatalog::new(vec![FieldDescriptor::new("recorded", FieldType::Date)]);

        let rules = UserRules::new().with("recorded", AggregationOperator::Max);
        let plan = PlanBuilder::new(&system).build(&catalog, &rules, &no_samples()).unwrap();
        assert_eq!(plan.operator_for("recorded"), Some(AggregationOperator::Max));

        let rules = UserRules::new().with("recorded", AggregationOperator::Sum);
        let err = PlanBuilder::new(&system).build(&catalog, &rules, &no_samples()).unwrap_err();
        assert!(matches!(
            err,
            MergeError::TypeIncompatible { field_type: FieldType::Date, operator: AggregationOperator::Sum, .. }
        ));
    }

    #[test]
    fn test_integer_and_double_spellings_of_one_value_are_uniform() {
        let system = SystemFields::default();
        let catalog = FieldCatalog::new(vec![FieldDescriptor::new("area", FieldType::Double)]);
        let observed = samples(&[("area", vec![FieldValue::Integer(100), FieldValue::Double(100.0)])]);

        let plan = PlanBuilder::new(&system).build(&catalog, &UserRules::new(), &observed).unwrap();
        assert_eq!(plan.operator_for("area"), Some(AggregationOperator::First));
    }

    #[test]
    fn test_uniform_values_take_first_and_varying_values_fail() {
        let system = SystemFields::default();
        let catalog = FieldCatalog::new(vec![FieldDescriptor::new("owner", FieldType::Text)]);

        let same = samples(&[("owner", vec![FieldValue::text("A"), FieldValue::text("A"), FieldValue::text("A")])]);
        let plan = PlanBuilder::new(&system).build(&catalog, &UserRules::new(), &same).unwrap();
        assert_eq!(plan.operator_for("owner"), Some(AggregationOperator::First));

        let varied = samples(&[("owner", vec![FieldValue::text("A"), FieldValue::text("B")])]);
        let err = PlanBuilder::new(&system)
            .for_layer("parcels")
            .build(&catalog, &UserRules::new(), &varied)
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::ValuesVaryWithoutRule {
                field: "owner".to_string(),
                layer: "parcels".to_string(),
                distinct: 2
            }
        );
    }

    #[test]
    fn test_insoluble_reference_fails_before_any_rule() {
        let system = SystemFields::default();
        // Also contains a text/SUM clash, which must not be the reported error.
        let rules = UserRules::new()
            .with("owner", AggregationOperator::Sum)
            .with("OBJECTID", AggregationOperator::Max);

        let err = PlanBuilder::new(&system)
            .build(&parcel_catalog(), &rules, &no_samples())
            .unwrap_err();

        assert!(matches!(err, MergeError::IllegalFieldReference { ref field, .. } if field == "OBJECTID"));
    }

    #[test]
    fn test_unknown_field_in_rules() {
        let system = SystemFields::default();
        let rules = UserRules::new().with("acres", AggregationOperator::Sum);

        let err = PlanBuilder::new(&system)
            .for_layer("parcels")
            .build(&parcel_catalog(), &rules, &no_samples())
            .unwrap_err();

        assert_eq!(
            err,
            MergeError::UnknownField {
                field: "acres".to_string(),
                layer: "parcels".to_string()
            }
        );
    }

    #[test]
    fn test_case_variant_measures_default_to_last() {
        let system = SystemFields::default();
        let catalog = FieldCatalog::new(vec![
            FieldDescriptor::new("owner", FieldType::Text),
            FieldDescriptor::new("SHAPE_Length", FieldType::Double),
            FieldDescriptor::new("SHAPE_Area", FieldType::Double),
        ]);
        let observed = samples(&[
            ("owner", vec![FieldValue::text("Smith")]),
            ("SHAPE_Area", vec![FieldValue::Double(1.0), FieldValue::Double(2.0)]),
        ]);

        let plan = PlanBuilder::new(&system).build(&catalog, &UserRules::new(), &observed).unwrap();

        assert_eq!(plan.operator_for("SHAPE_Length"), Some(AggregationOperator::Last));
        assert_eq!(plan.operator_for("SHAPE_Area"), Some(AggregationOperator::Last));
    }
}
