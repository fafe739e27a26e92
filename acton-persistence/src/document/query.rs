//! Translation of the filter/options model into native document queries
//!
//! Native filters use the operator vocabulary of document stores (`$and`,
//! `$or`, `$ne`, `$in`, `$regex`, ...). The soft-delete predicate is always
//! injected as an explicit clause:
//!
//! | Visibility | Predicate on the marker field `m` |
//! |---|---|
//! | [`Visibility::Active`] | `{m: null}` (absent or null) |
//! | [`Visibility::All`] | `{"$or": [{m: null}, {m: {"$ne": null}}]}` |
//! | [`Visibility::Deleted`] | `{m: {"$ne": null}}` |

use serde_json::{json, Value};

use super::driver::SortSpec;
use super::id::IdScheme;
use crate::repository::{
    Document, Filter, FilterCondition, FilterOperator, FilterValue, Projection,
    RepositoryError, RepositoryOperation, Sort,
};

/// Native primary-key field of document collections
pub const ID_FIELD: &str = "_id";

/// Which entities a query may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only entities without a delete marker
    Active,
    /// Active and soft-deleted entities
    All,
    /// Only soft-deleted entities
    Deleted,
}

impl Visibility {
    /// Visibility implied by a `with_deleted` option
    #[must_use]
    pub const fn from_with_deleted(with_deleted: bool) -> Self {
        if with_deleted {
            Self::All
        } else {
            Self::Active
        }
    }
}

/// Soft-delete clause for a marker field
pub fn soft_delete_predicate(marker_field: &str, visibility: Visibility) -> Value {
    match visibility {
        Visibility::Active => json!({ marker_field: null }),
        Visibility::Deleted => json!({ marker_field: { "$ne": null } }),
        Visibility::All => json!({
            "$or": [
                { marker_field: null },
                { marker_field: { "$ne": null } }
            ]
        }),
    }
}

/// Compile a filter into a native query with the soft-delete clause appended
pub fn build_query<S: IdScheme>(
    filter: &Filter,
    marker_field: &str,
    visibility: Visibility,
    operation: RepositoryOperation,
) -> Result<Document, RepositoryError> {
    let mut clauses = Vec::with_capacity(filter.conditions.len() + 2);
    for condition in &filter.conditions {
        clauses.push(compile_condition::<S>(condition, operation)?);
    }
    if let Some(raw) = &filter.raw {
        clauses.push(Value::Object(raw.clone()));
    }
    clauses.push(soft_delete_predicate(marker_field, visibility));
    Ok(conjunction(clauses))
}

/// AND a list of clauses, collapsing the single-clause case
pub fn conjunction(mut clauses: Vec<Value>) -> Document {
    if clauses.len() == 1 {
        if let Some(Value::Object(only)) = clauses.pop() {
            return only;
        }
        return Document::new();
    }
    let mut query = Document::new();
    query.insert("$and".to_string(), Value::Array(clauses));
    query
}

fn compile_condition<S: IdScheme>(
    condition: &FilterCondition,
    operation: RepositoryOperation,
) -> Result<Value, RepositoryError> {
    let field = condition.field.as_str();
    let value = condition_value::<S>(condition, operation)?;

    let clause = match condition.operator {
        FilterOperator::Equal => json!({ field: value }),
        FilterOperator::NotEqual => json!({ field: { "$ne": value } }),
        FilterOperator::GreaterThan => json!({ field: { "$gt": value } }),
        FilterOperator::GreaterThanOrEqual => json!({ field: { "$gte": value } }),
        FilterOperator::LessThan => json!({ field: { "$lt": value } }),
        FilterOperator::LessThanOrEqual => json!({ field: { "$lte": value } }),
        FilterOperator::In => json!({ field: { "$in": as_list(value, condition, operation)? } }),
        FilterOperator::NotIn => {
            json!({ field: { "$nin": as_list(value, condition, operation)? } })
        }
        FilterOperator::IsNull => json!({ field: null }),
        FilterOperator::IsNotNull => json!({ field: { "$ne": null } }),
        FilterOperator::Like => match &condition.value {
            FilterValue::String(pattern) => json!({ field: { "$regex": like_to_regex(pattern) } }),
            _ => {
                return Err(RepositoryError::invalid_argument(
                    operation,
                    format!("LIKE on '{}' needs a string pattern", field),
                ))
            }
        },
    };
    Ok(clause)
}

/// Native value of a condition; values on `_id` go through the id scheme
fn condition_value<S: IdScheme>(
    condition: &FilterCondition,
    operation: RepositoryOperation,
) -> Result<Value, RepositoryError> {
    if condition.field != ID_FIELD {
        return Ok(condition.value.to_json());
    }
    match &condition.value {
        FilterValue::String(raw) => S::native_from_str(raw, operation),
        FilterValue::StringList(list) => list
            .iter()
            .map(|raw| S::native_from_str(raw, operation))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.to_json()),
    }
}

fn as_list(
    value: Value,
    condition: &FilterCondition,
    operation: RepositoryOperation,
) -> Result<Value, RepositoryError> {
    match value {
        Value::Array(_) => Ok(value),
        _ => Err(RepositoryError::invalid_argument(
            operation,
            format!("{} on '{}' needs a list value", condition.operator, condition.field),
        )),
    }
}

/// Convert a SQL LIKE pattern into an anchored regular expression
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                regex.push_str(&regex::escape(&literal));
                literal.clear();
                regex.push_str(if ch == '%' { ".*" } else { "." });
            }
            _ => literal.push(ch),
        }
    }
    regex.push_str(&regex::escape(&literal));
    regex.push('$');
    regex
}

/// Native sort specification, in precedence order
pub fn sort_spec(sort: &Sort) -> SortSpec {
    sort.fields()
        .iter()
        .map(|(field, order)| (field.clone(), order.as_native()))
        .collect()
}

/// Native projection document (`{field: 1, ...}`), `None` when selecting all
pub fn projection_document(projection: Option<&Projection>) -> Option<Document> {
    let projection = projection.filter(|p| !p.is_empty())?;
    let mut document = Document::new();
    for field in projection.selected() {
        document.insert(field.to_string(), Value::from(1));
    }
    document.insert(ID_FIELD.to_string(), Value::from(1));
    Some(document)
}

/// `{"$set": {field: value, ...}}`
pub fn set_update(fields: Document) -> Document {
    let mut update = Document::new();
    update.insert("$set".to_string(), Value::Object(fields));
    update
}
