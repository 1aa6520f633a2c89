//! Aggregation Plan Module
//!
//! Decides, per attribute column, how the rows of a merge collapse into one.

mod builder;
mod rules;

pub use builder::{LayerSamples, PlanBuilder, SampleSource};
pub use rules::{OperatorChoice, UserRules, COMMON_ATTRIBUTE};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MergeError;
use crate::schema::FieldType;

/// Statistic applied to a column when its rows are dissolved together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationOperator {
    First,
    Last,
    Sum,
    Mean,
    Min,
    Max,
    Range,
    Std,
    Count,
    Median,
    Variance,
    Concatenate,
    Unique,
}

impl AggregationOperator {
    pub const ALL: [AggregationOperator; 13] = [
        AggregationOperator::First,
        AggregationOperator::Last,
        AggregationOperator::Sum,
        AggregationOperator::Mean,
        AggregationOperator::Min,
        AggregationOperator::Max,
        AggregationOperator::Range,
        AggregationOperator::Std,
        AggregationOperator::Count,
        AggregationOperator::Median,
        AggregationOperator::Variance,
        AggregationOperator::Concatenate,
        AggregationOperator::Unique,
    ];

    /// The upper-case keyword, also the prefix the dissolve puts on output fields.
    pub fn keyword(self) -> &'static str {
        match self {
            AggregationOperator::First => "FIRST",
            AggregationOperator::Last => "LAST",
            AggregationOperator::Sum => "SUM",
            AggregationOperator::Mean => "MEAN",
            AggregationOperator::Min => "MIN",
            AggregationOperator::Max => "MAX",
            AggregationOperator::Range => "RANGE",
            AggregationOperator::Std => "STD",
            AggregationOperator::Count => "COUNT",
            AggregationOperator::Median => "MEDIAN",
            AggregationOperator::Variance => "VARIANCE",
            AggregationOperator::Concatenate => "CONCATENATE",
            AggregationOperator::Unique => "UNIQUE",
        }
    }

    /// Name the dissolve gives the statistic column for `field`.
    pub fn decorate(self, field: &str) -> String {
        format!("{}_{}", self.keyword(), field)
    }

    /// Statistics computed over the numeric value of each row.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            AggregationOperator::Sum
                | AggregationOperator::Mean
                | AggregationOperator::Min
                | AggregationOperator::Max
                | AggregationOperator::Range
                | AggregationOperator::Std
                | AggregationOperator::Median
                | AggregationOperator::Variance
        )
    }

    /// Whether the statistic can be computed over a column of `source` type.
    /// MIN and MAX also order dates.
    pub fn supports(self, source: FieldType) -> bool {
        if !self.is_numeric() {
            return true;
        }
        source.is_numeric()
            || (source == FieldType::Date && matches!(self, AggregationOperator::Min | AggregationOperator::Max))
    }
}

impl fmt::Display for AggregationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for AggregationOperator {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.keyword().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MergeError::InvalidRule {
                input: s.to_string(),
                reason: "not a known aggregation operator".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRule {
    pub field: String,
    pub operator: AggregationOperator,
}

impl AggregationRule {
    pub fn new(field: impl Into<String>, operator: AggregationOperator) -> Self {
        Self {
            field: field.into(),
            operator,
        }
    }
}

/// One rule per eligible field, in the source layer's schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationPlan {
    rules: Vec<AggregationRule>,
}

impl AggregationPlan {
    pub(crate) fn from_rules(rules: Vec<AggregationRule>) -> Self {
        Self { rules }
    }

    pub fn operator_for(&self, field: &str) -> Option<AggregationOperator> {
        self.rules.iter().find(|r| r.field == field).map(|r| r.operator)
    }

    pub fn rules(&self) -> &[AggregationRule] {
        &self.rules
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AggregationRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Display for AggregationPlan {
    /// Two-column listing: `field OPERATOR;field OPERATOR`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<String> = self.rules.iter().map(|r| format!("{} {}", r.field, r.operator)).collect();
        f.write_str(&rows.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_statistics_need_numeric_or_date_fields() {
        assert!(AggregationOperator::Sum.supports(FieldType::Short));
        assert!(AggregationOperator::Max.supports(FieldType::Date));
        assert!(!AggregationOperator::Sum.supports(FieldType::Date));
        assert!(!AggregationOperator::Mean.supports(FieldType::Guid));
        assert!(AggregationOperator::Count.supports(FieldType::Blob));
    }

    #[test]
    fn test_operator_parse_is_case_insensitive() {
        assert_eq!("sum".parse::<AggregationOperator>().unwrap(), AggregationOperator::Sum);
        assert_eq!(" Variance ".parse::<AggregationOperator>().unwrap(), AggregationOperator::Variance);
        assert!(matches!(
            "AVERAGE".parse::<AggregationOperator>(),
            Err(MergeError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_decorate_matches_dissolve_naming() {
        assert_eq!(AggregationOperator::Sum.decorate("area"), "SUM_area");
        assert_eq!(AggregationOperator::First.decorate("parcel_id"), "FIRST_parcel_id");
    }

    #[test]
    fn test_plan_display() {
        let plan = AggregationPlan::from_rules(vec![
            AggregationRule::new("owner", AggregationOperator::First),
            AggregationRule::new("area", AggregationOperator::Sum),
        ]);
        assert_eq!(plan.to_string(), "owner FIRST;area SUM");
    }
}
