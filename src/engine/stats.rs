//! Per-column statistics computed by the in-memory dissolve.

use crate::plan::AggregationOperator;
use crate::schema::{FieldType, FieldValue};

/// Type the dissolve gives a statistic column. Numeric reductions always
/// come out as Double, whatever the source type was; MIN and MAX of a date
/// stay dates.
pub(crate) fn output_type(operator: AggregationOperator, source: FieldType) -> FieldType {
    match operator {
        AggregationOperator::First | AggregationOperator::Last => source,
        AggregationOperator::Min | AggregationOperator::Max if source == FieldType::Date => FieldType::Date,
        AggregationOperator::Count | AggregationOperator::Unique => FieldType::Long,
        AggregationOperator::Concatenate => FieldType::Text,
        _ => FieldType::Double,
    }
}

/// Callers check `operator.supports(source)` first.
pub(crate) fn reduce(
    operator: AggregationOperator,
    source: FieldType,
    values: &[FieldValue],
    separator: &str,
) -> FieldValue {
    match operator {
        AggregationOperator::First => values.first().cloned().unwrap_or_default(),
        AggregationOperator::Last => values.last().cloned().unwrap_or_default(),
        AggregationOperator::Count => FieldValue::Integer(values.iter().filter(|v| !v.is_null()).count() as i64),
        AggregationOperator::Unique => {
            let mut seen: Vec<&FieldValue> = Vec::new();
            for v in values.iter().filter(|v| !v.is_null()) {
                if !seen.contains(&v) {
                    seen.push(v);
                }
            }
            FieldValue::Integer(seen.len() as i64)
        }
        AggregationOperator::Concatenate => {
            let parts: Vec<String> = values.iter().filter(|v| !v.is_null()).map(|v| v.to_string()).collect();
            FieldValue::Text(parts.join(separator))
        }
        AggregationOperator::Min | AggregationOperator::Max if source == FieldType::Date => {
            let dates = values.iter().filter_map(|v| match v {
                FieldValue::Date(d) => Some(*d),
                _ => None,
            });
            let extreme = if operator == AggregationOperator::Min {
                dates.min()
            } else {
                dates.max()
            };
            extreme.map(FieldValue::Date).unwrap_or_default()
        }
        numeric => {
            let mut numbers: Vec<f64> = values.iter().filter_map(FieldValue::as_f64).collect();
            if numbers.is_empty() {
                return FieldValue::Null;
            }
            FieldValue::Double(numeric_reduce(numeric, &mut numbers))
        }
    }
}

fn numeric_reduce(operator: AggregationOperator, numbers: &mut [f64]) -> f64 {
    let n = numbers.len() as f64;
    let sum: f64 = numbers.iter().sum();
    let mean = sum / n;
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    // Population variance.
    let variance = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    match operator {
        AggregationOperator::Sum => sum,
        AggregationOperator::Mean => mean,
        AggregationOperator::Min => min,
        AggregationOperator::Max => max,
        AggregationOperator::Range => max - min,
        AggregationOperator::Variance => variance,
        AggregationOperator::Std => variance.sqrt(),
        AggregationOperator::Median => {
            numbers.sort_by(|a, b| a.total_cmp(b));
            let mid = numbers.len() / 2;
            if numbers.len() % 2 == 0 {
                (numbers[mid - 1] + numbers[mid]) / 2.0
            } else {
                numbers[mid]
            }
        }
        _ => unreachable!("non-numeric operator {}", operator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn areas() -> Vec<FieldValue> {
        vec![FieldValue::Double(100.0), FieldValue::Double(150.0), FieldValue::Null, FieldValue::Double(200.0)]
    }

    #[test]
    fn test_numeric_reductions() {
        assert_eq!(reduce(AggregationOperator::Sum, FieldType::Double, &areas(), ""), FieldValue::Double(450.0));
        assert_eq!(reduce(AggregationOperator::Mean, FieldType::Double, &areas(), ""), FieldValue::Double(150.0));
        assert_eq!(reduce(AggregationOperator::Range, FieldType::Double, &areas(), ""), FieldValue::Double(100.0));
        assert_eq!(reduce(AggregationOperator::Median, FieldType::Double, &areas(), ""), FieldValue::Double(150.0));
        assert_eq!(reduce(AggregationOperator::Count, FieldType::Double, &areas(), ""), FieldValue::Integer(3));
    }

    #[test]
    fn test_first_last_keep_nulls_in_position() {
        let values = vec![FieldValue::Null, "b".into()];
        assert_eq!(reduce(AggregationOperator::First, FieldType::Text, &values, ""), FieldValue::Null);
        assert_eq!(reduce(AggregationOperator::Last, FieldType::Text, &values, ""), FieldValue::text("b"));
    }

    #[test]
    fn test_concatenate_and_unique() {
        let values: Vec<FieldValue> = vec!["A".into(), "B".into(), "A".into()];
        assert_eq!(reduce(AggregationOperator::Concatenate, FieldType::Text, &values, ","), FieldValue::text("A,B,A"));
        assert_eq!(reduce(AggregationOperator::Unique, FieldType::Text, &values, ""), FieldValue::Integer(2));
    }

    #[test]
    fn test_min_max_order_dates() {
        let date = |s: &str| FieldValue::text(s).cast(FieldType::Date).unwrap();
        let values = vec![date("2023-06-01"), FieldValue::Null, date("2023-01-01")];

        assert_eq!(reduce(AggregationOperator::Max, FieldType::Date, &values, ""), date("2023-06-01"));
        assert_eq!(reduce(AggregationOperator::Min, FieldType::Date, &values, ""), date("2023-01-01"));
        assert_eq!(output_type(AggregationOperator::Max, FieldType::Date), FieldType::Date);
    }

    #[test]
    fn test_output_types() {
        assert_eq!(output_type(AggregationOperator::Sum, FieldType::Short), FieldType::Double);
        assert_eq!(output_type(AggregationOperator::First, FieldType::Text), FieldType::Text);
        assert_eq!(output_type(AggregationOperator::Count, FieldType::Text), FieldType::Long);
    }
}
