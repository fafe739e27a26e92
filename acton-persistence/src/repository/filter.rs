//! Filter types for repository queries
//!
//! A [`Filter`] is a conjunction of [`FilterCondition`]s plus, for document
//! backends, an optional raw native sub-document that is AND-ed with the
//! structured conditions.
//!
//! # Example
//!
//! ```rust
//! use acton_persistence::repository::{Filter, FilterCondition};
//!
//! let filter = Filter::new()
//!     .and(FilterCondition::eq("status", "active"))
//!     .and(FilterCondition::gte("age", 18));
//!
//! assert_eq!(filter.conditions.len(), 2);
//! assert!(filter.raw.is_none());
//! ```

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::payload::Document;

/// Comparison operator of a [`FilterCondition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// SQL LIKE pattern (`%` any run, `_` any single character)
    Like,
    /// Value is in a list
    In,
    /// Value is not in a list
    NotIn,
    /// Field is null or absent
    IsNull,
    /// Field is present and not null
    IsNotNull,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::In => write!(f, "IN"),
            Self::NotIn => write!(f, "NOT IN"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Value compared by a [`FilterCondition`]
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// String value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Point in time
    Timestamp(DateTime<Utc>),
    /// List of strings (for IN / NOT IN)
    StringList(Vec<String>),
    /// List of integers (for IN / NOT IN)
    IntegerList(Vec<i64>),
    /// Null value (for IS NULL / IS NOT NULL)
    Null,
}

impl FilterValue {
    /// JSON representation used by document stores and in-memory evaluation
    ///
    /// Timestamps render as RFC 3339, the same shape chrono's serde support
    /// writes for `DateTime<Utc>` fields.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(n) => Value::from(*n),
            Self::Float(n) => Value::from(*n),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::StringList(list) => {
                Value::Array(list.iter().cloned().map(Value::String).collect())
            }
            Self::IntegerList(list) => Value::Array(list.iter().copied().map(Value::from).collect()),
            Self::Null => Value::Null,
        }
    }

    /// Whether this value is a list
    pub fn is_list(&self) -> bool {
        matches!(self, Self::StringList(_) | Self::IntegerList(_))
    }

    /// Scalar filter value for a stored JSON value, `None` for arrays and objects
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(list: Vec<String>) -> Self {
        Self::StringList(list)
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(list: Vec<&str>) -> Self {
        Self::StringList(list.into_iter().map(String::from).collect())
    }
}

impl From<Vec<i64>> for FilterValue {
    fn from(list: Vec<i64>) -> Self {
        Self::IntegerList(list)
    }
}

/// A single predicate over one entity field
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// Field (document key or column) the condition applies to
    pub field: String,
    /// Comparison operator
    pub operator: FilterOperator,
    /// Value to compare against
    pub value: FilterValue,
}

impl FilterCondition {
    /// Create a filter condition from its parts
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Equal, value.into())
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::NotEqual, value.into())
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value.into())
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThanOrEqual, value.into())
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThan, value.into())
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThanOrEqual, value.into())
    }

    /// `field LIKE pattern`
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, FilterValue::String(pattern.into()))
    }

    /// `field IN (values)`
    pub fn is_in(field: impl Into<String>, values: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::In, values.into())
    }

    /// `field NOT IN (values)`
    pub fn not_in(field: impl Into<String>, values: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::NotIn, values.into())
    }

    /// `field IS NULL` (absent fields count as null)
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, FilterValue::Null)
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, FilterValue::Null)
    }
}

/// Conjunction of conditions selecting the entities an operation targets
///
/// An empty filter matches every entity (subject to soft-delete visibility).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Structured conditions, all of which must hold
    pub conditions: Vec<FilterCondition>,
    /// Native sub-document for document stores, AND-ed with `conditions`
    ///
    /// Relational backends reject filters carrying this with
    /// `InvalidArgument`.
    pub raw: Option<Document>,
}

impl Filter {
    /// A filter matching everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter built from a list of conditions
    pub fn from_conditions(conditions: Vec<FilterCondition>) -> Self {
        Self {
            conditions,
            raw: None,
        }
    }

    /// Shorthand for a single equality condition
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::from_conditions(vec![FilterCondition::eq(field, value)])
    }

    /// Add a condition
    #[must_use]
    pub fn and(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attach a native sub-document (document backends only)
    #[must_use]
    pub fn with_raw(mut self, raw: Document) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Whether the filter has no conditions and no raw part
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.raw.is_none()
    }
}

impl From<FilterCondition> for Filter {
    fn from(condition: FilterCondition) -> Self {
        Self::from_conditions(vec![condition])
    }
}

impl From<Vec<FilterCondition>> for Filter {
    fn from(conditions: Vec<FilterCondition>) -> Self {
        Self::from_conditions(conditions)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "*");
        }
        let mut first = true;
        for condition in &self.conditions {
            if !first {
                write!(f, " AND ")?;
            }
            first = false;
            match condition.operator {
                FilterOperator::IsNull | FilterOperator::IsNotNull => {
                    write!(f, "{} {}", condition.field, condition.operator)?
                }
                _ => write!(
                    f,
                    "{} {} {}",
                    condition.field,
                    condition.operator,
                    condition.value.to_json()
                )?,
            }
        }
        if let Some(raw) = &self.raw {
            if !first {
                write!(f, " AND ")?;
            }
            write!(f, "{}", Value::Object(raw.clone()))?;
        }
        Ok(())
    }
}
