//! Row filters in `column=op.value` form.
//!
//! The same syntax is used for subscription filters (`status=eq.completed`)
//! and for row-count queries (`plant_id=eq.plant-7`).
//!
//! ```
//! use greenleaf_core::filter::RowFilter;
//!
//! let filter: RowFilter = "status=eq.completed".parse().unwrap();
//! assert!(filter.matches(&serde_json::json!({ "status": "completed" })));
//! assert!(!filter.matches(&serde_json::json!({ "status": "pending" })));
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a filter expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    /// No `=` separating column from condition
    #[error("Filter '{0}' is missing '=' between column and condition")]
    MissingColumn(String),

    /// No `.` separating operator from value
    #[error("Filter '{0}' is missing '.' between operator and value")]
    MissingOperator(String),

    /// Operator is not supported
    #[error("Unsupported filter operator '{0}'")]
    UnknownOperator(String),

    /// `in` list not wrapped in parentheses
    #[error("Malformed list in filter '{0}', expected in.(a,b,...)")]
    MalformedList(String),
}

/// Comparison operator of a [`RowFilter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equal
    Eq,
    /// Not equal
    Neq,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Member of a list
    In,
}

impl FilterOp {
    /// Wire name of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
        }
    }
}

impl FromStr for FilterOp {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "in" => Ok(Self::In),
            other => Err(FilterParseError::UnknownOperator(other.to_string())),
        }
    }
}

/// A single-column predicate over a JSON row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    column: String,
    op: FilterOp,
    values: Vec<String>,
}

impl RowFilter {
    /// `column = value`
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            values: vec![value.into()],
        }
    }

    /// `column IN (values...)`
    #[must_use]
    pub fn one_of<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            column: column.into(),
            op: FilterOp::In,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Column the filter reads.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Comparison operator.
    #[must_use]
    pub const fn op(&self) -> FilterOp {
        self.op
    }

    /// Evaluate the filter against a JSON object.
    ///
    /// Missing columns never match. Ordering operators compare numerically
    /// when both sides are numbers and lexically otherwise.
    #[must_use]
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        let Some(actual) = record.get(&self.column).and_then(scalar_text) else {
            return false;
        };

        match self.op {
            FilterOp::In => self.values.iter().any(|v| *v == actual),
            FilterOp::Eq => self.first() == actual,
            FilterOp::Neq => self.first() != actual,
            FilterOp::Gt => compare(&actual, self.first()) == Ordering::Greater,
            FilterOp::Gte => compare(&actual, self.first()) != Ordering::Less,
            FilterOp::Lt => compare(&actual, self.first()) == Ordering::Less,
            FilterOp::Lte => compare(&actual, self.first()) != Ordering::Greater,
        }
    }

    fn first(&self) -> &str {
        self.values.first().map_or("", String::as_str)
    }
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => Some("null".to_string()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

fn compare(actual: &str, expected: &str) -> Ordering {
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.cmp(expected),
    }
}

impl FromStr for RowFilter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, condition) = s
            .split_once('=')
            .filter(|(column, _)| !column.is_empty())
            .ok_or_else(|| FilterParseError::MissingColumn(s.to_string()))?;
        let (op, raw) = condition
            .split_once('.')
            .ok_or_else(|| FilterParseError::MissingOperator(s.to_string()))?;
        let op: FilterOp = op.parse()?;

        let values = if op == FilterOp::In {
            let inner = raw
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| FilterParseError::MalformedList(s.to_string()))?;
            inner
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            vec![raw.to_string()]
        };

        Ok(Self {
            column: column.to_string(),
            op,
            values,
        })
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == FilterOp::In {
            write!(f, "{}=in.({})", self.column, self.values.join(","))
        } else {
            write!(f, "{}={}.{}", self.column, self.op.as_str(), self.first())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parses_equality() {
        let filter: RowFilter = "plant_id=eq.plant-7".parse().unwrap();
        assert_eq!(filter, RowFilter::eq("plant_id", "plant-7"));
        assert_eq!(filter.column(), "plant_id");
        assert_eq!(filter.op(), FilterOp::Eq);
    }

    #[test]
    fn values_may_contain_dots() {
        let filter: RowFilter = "species=eq.Ficus.lyrata".parse().unwrap();
        assert!(filter.matches(&json!({ "species": "Ficus.lyrata" })));
    }

    #[test]
    fn parses_lists() {
        let filter: RowFilter = "status=in.(completed, skipped)".parse().unwrap();
        assert_eq!(filter, RowFilter::one_of("status", ["completed", "skipped"]));
        assert!(filter.matches(&json!({ "status": "skipped" })));
        assert!(!filter.matches(&json!({ "status": "pending" })));
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(matches!(
            "status".parse::<RowFilter>(),
            Err(FilterParseError::MissingColumn(_))
        ));
        assert!(matches!(
            "=eq.x".parse::<RowFilter>(),
            Err(FilterParseError::MissingColumn(_))
        ));
        assert!(matches!(
            "status=completed".parse::<RowFilter>(),
            Err(FilterParseError::MissingOperator(_))
        ));
        assert!(matches!(
            "status=like.done".parse::<RowFilter>(),
            Err(FilterParseError::UnknownOperator(_))
        ));
        assert!(matches!(
            "status=in.done".parse::<RowFilter>(),
            Err(FilterParseError::MalformedList(_))
        ));
    }

    #[test]
    fn ordering_is_numeric_for_numbers() {
        let filter: RowFilter = "height_cm=gt.9".parse().unwrap();
        assert!(filter.matches(&json!({ "height_cm": 10 })));
        assert!(!filter.matches(&json!({ "height_cm": 9 })));

        let filter: RowFilter = "height_cm=lte.9".parse().unwrap();
        assert!(filter.matches(&json!({ "height_cm": 9 })));
    }

    #[test]
    fn missing_or_nested_columns_never_match() {
        let filter = RowFilter::eq("status", "completed");
        assert!(!filter.matches(&json!({ "title": "Water" })));
        assert!(!filter.matches(&json!({ "status": { "value": "completed" } })));
    }

    #[test]
    fn neq_matches_other_values() {
        let filter: RowFilter = "status=neq.completed".parse().unwrap();
        assert!(filter.matches(&json!({ "status": "pending" })));
        assert!(!filter.matches(&json!({ "status": "completed" })));
    }

    proptest! {
        #[test]
        fn display_parses_back(column in "[a-z_]{1,12}", value in "[a-zA-Z0-9._-]{1,16}") {
            let filter = RowFilter::eq(column, value);
            let parsed: RowFilter = filter.to_string().parse().unwrap();
            prop_assert_eq!(parsed, filter);
        }
    }
}
