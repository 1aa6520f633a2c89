//! User-supplied field → operator mapping.
//!
//! Accepted as a two-column value table (`area SUM;owner 'Common Attribute'`,
//! rows also separated by newlines) or as a JSON/YAML map.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::AggregationOperator;
use crate::error::{MergeError, MergeResult};

/// Sentinel meaning "take the value of the record appended last".
pub const COMMON_ATTRIBUTE: &str = "Common Attribute";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OperatorChoice {
    CommonAttribute,
    Operator(AggregationOperator),
}

impl FromStr for OperatorChoice {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == '_' { ' ' } else { c })
            .collect();
        if normalized.eq_ignore_ascii_case(COMMON_ATTRIBUTE) {
            return Ok(OperatorChoice::CommonAttribute);
        }
        s.parse().map(OperatorChoice::Operator)
    }
}

impl TryFrom<String> for OperatorChoice {
    type Error = MergeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperatorChoice> for String {
    fn from(value: OperatorChoice) -> Self {
        value.to_string()
    }
}

impl From<AggregationOperator> for OperatorChoice {
    fn from(value: AggregationOperator) -> Self {
        OperatorChoice::Operator(value)
    }
}

impl fmt::Display for OperatorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorChoice::CommonAttribute => f.write_str(COMMON_ATTRIBUTE),
            OperatorChoice::Operator(op) => write!(f, "{}", op),
        }
    }
}

/// Ordered field → choice mapping. A later entry for the same field replaces
/// the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRules {
    entries: Vec<(String, OperatorChoice)>,
}

impl UserRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, choice: impl Into<OperatorChoice>) -> Self {
        self.insert(field, choice);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, choice: impl Into<OperatorChoice>) {
        let field = field.into();
        let choice = choice.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => {
                debug!("Rule for '{}' replaced: {} -> {}", field, entry.1, choice);
                entry.1 = choice;
            }
            None => self.entries.push((field, choice)),
        }
    }

    pub fn get(&self, field: &str) -> Option<OperatorChoice> {
        self.entries.iter().find(|(f, _)| f == field).map(|(_, c)| *c)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, OperatorChoice)> + '_ {
        self.entries.iter().map(|(f, c)| (f.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a value-table string. Rows split on `;` or newlines, the first
    /// token of a row is the field and the remainder (quotes stripped) the choice.
    pub fn from_value_table(text: &str) -> MergeResult<Self> {
        let mut rules = UserRules::new();
        for row in text.split(|c| c == ';' || c == '\n') {
            let row = row.trim();
            if row.is_empty() || row.starts_with('#') {
                continue;
            }
            let (field, choice) = row
                .split_once(|c: char| c.is_whitespace() || c == ':' || c == ',')
                .ok_or_else(|| MergeError::InvalidRule {
                    input: row.to_string(),
                    reason: "expected a field name followed by an operator".to_string(),
                })?;
            let choice = choice.trim().trim_matches(|c| c == '\'' || c == '"');
            rules.insert(field.trim(), choice.parse::<OperatorChoice>()?);
        }
        Ok(rules)
    }

    /// Parse a JSON or YAML map of field → choice, keeping document order.
    pub fn from_yaml(text: &str) -> MergeResult<Self> {
        let invalid = |reason: String| MergeError::InvalidRule {
            input: text.trim().to_string(),
            reason,
        };
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| invalid(e.to_string()))?;
        let mapping = match value {
            serde_yaml::Value::Mapping(m) => m,
            serde_yaml::Value::Null => return Ok(UserRules::new()),
            _ => return Err(invalid("expected a map of field names to operators".to_string())),
        };

        let mut rules = UserRules::new();
        for (key, choice) in mapping {
            let field = key
                .as_str()
                .ok_or_else(|| invalid(format!("field name {:?} is not a string", key)))?;
            let choice = choice
                .as_str()
                .ok_or_else(|| invalid(format!("operator for '{}' is not a string", field)))?;
            rules.insert(field, choice.parse::<OperatorChoice>()?);
        }
        Ok(rules)
    }
}

impl FromIterator<(String, OperatorChoice)> for UserRules {
    fn from_iter<I: IntoIterator<Item = (String, OperatorChoice)>>(iter: I) -> Self {
        let mut rules = UserRules::new();
        for (field, choice) in iter {
            rules.insert(field, choice);
        }
        rules
    }
}
