//! Evaluation of native document queries against in-memory rows
//!
//! Supported filter vocabulary: `$and`, `$or`, `$nor`, `$eq`, `$ne`, `$gt`,
//! `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`, `$regex` (with
//! `$options: "i"`), `$not` and implicit equality. A `null` operand matches
//! both null and absent fields. Dotted paths reach into nested objects.
//!
//! Values compare the way document stores order them: numbers numerically,
//! RFC 3339 strings as instants, other strings lexically, and mixed types by
//! a fixed type rank (null < number < string < object < array < boolean).

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::engine::Rows;
use crate::document::SortSpec;
use crate::repository::{json_type, Document, RepositoryError, RepositoryOperation, RepositoryResult};

/// Whether a document satisfies a native filter
pub(crate) fn matches(
    document: &Document,
    filter: &Document,
    operation: RepositoryOperation,
) -> RepositoryResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(condition, key, operation)? {
                    if !matches(document, clause, operation)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(document, condition, key, operation)?,
            "$nor" => !any_clause(document, condition, key, operation)?,
            other if other.starts_with('$') => {
                return Err(invalid(operation, format!("unsupported query operator '{}'", other)))
            }
            path => field_matches(lookup(document, path), condition, operation)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_clause(
    document: &Document,
    condition: &Value,
    key: &str,
    operation: RepositoryOperation,
) -> RepositoryResult<bool> {
    for clause in clauses(condition, key, operation)? {
        if matches(document, clause, operation)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn clauses<'a>(
    condition: &'a Value,
    key: &str,
    operation: RepositoryOperation,
) -> RepositoryResult<Vec<&'a Document>> {
    let list = condition
        .as_array()
        .ok_or_else(|| invalid(operation, format!("'{}' needs an array of clauses", key)))?;
    list.iter()
        .map(|clause| {
            clause
                .as_object()
                .ok_or_else(|| invalid(operation, format!("'{}' clauses must be objects", key)))
        })
        .collect()
}

/// Value at a dotted path
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// An object whose keys are all operators (an `{"$oid": ..}` literal is a value)
fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty()
                && map.keys().all(|k| k.starts_with('$'))
                && !(map.len() == 1 && map.contains_key("$oid"))
        }
        _ => false,
    }
}

fn field_matches(
    value: Option<&Value>,
    condition: &Value,
    operation: RepositoryOperation,
) -> RepositoryResult<bool> {
    if !is_operator_object(condition) {
        return Ok(equals(value, condition));
    }
    let Value::Object(operators) = condition else {
        return Ok(false);
    };

    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" => list(operand, operator, operation)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$nin" => !list(operand, operator, operation)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$exists" => value.is_some() == operand.as_bool().unwrap_or(true),
            "$regex" => {
                let case_insensitive = operators
                    .get("$options")
                    .and_then(Value::as_str)
                    .is_some_and(|o| o.contains('i'));
                regex_matches(value, operand, case_insensitive, operation)?
            }
            "$options" => true,
            "$not" => !field_matches(value, operand, operation)?,
            other => {
                return Err(invalid(operation, format!("unsupported field operator '{}'", other)))
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list<'a>(
    operand: &'a Value,
    operator: &str,
    operation: RepositoryOperation,
) -> RepositoryResult<&'a Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| invalid(operation, format!("'{}' needs an array operand", operator)))
}

fn regex_matches(
    value: Option<&Value>,
    pattern: &Value,
    case_insensitive: bool,
    operation: RepositoryOperation,
) -> RepositoryResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| invalid(operation, "'$regex' needs a string pattern"))?;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| invalid(operation, format!("invalid regex '{}': {}", pattern, e)))?;
    Ok(match value {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| regex.is_match(s))),
        _ => false,
    })
}

/// Equality with null matching absent and arrays matching any element
fn equals(value: Option<&Value>, operand: &Value) -> bool {
    match (value, operand) {
        (None | Some(Value::Null), Value::Null) => true,
        (None, _) => false,
        (Some(Value::Array(items)), operand) if !operand.is_array() => {
            items.iter().any(|item| same(item, operand))
        }
        (Some(value), operand) => same(value, operand),
    }
}

fn same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn ordered(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(value) => comparable(value, operand).is_some_and(accept),
        None => false,
    }
}

/// Ordering between values of compatible types
fn comparable(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(compare_strings(a, b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_strings(a: &str, b: &str) -> Ordering {
    match (parse_instant(a), parse_instant(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting
fn sort_order(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let by_rank = type_rank(left).cmp(&type_rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (left, right) {
        (Some(l), Some(r)) => comparable(l, r).unwrap_or_else(|| l.to_string().cmp(&r.to_string())),
        _ => Ordering::Equal,
    }
}

/// Stable sort by a native sort specification
pub(crate) fn sort_rows(rows: &mut Rows, spec: &SortSpec) {
    if spec.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (field, direction) in spec {
            let ordering = sort_order(lookup(a, field), lookup(b, field));
            let ordering = if *direction < 0 { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Apply skip and limit
pub(crate) fn window(rows: Rows, skip: Option<u64>, limit: Option<u64>) -> Rows {
    let skip = usize::try_from(skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = limit
        .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    rows.into_iter().skip(skip).take(limit).collect()
}

/// Apply an inclusion (`{f: 1}`) or exclusion (`{f: 0}`) projection
pub(crate) fn project(
    document: Document,
    projection: &Document,
    operation: RepositoryOperation,
) -> RepositoryResult<Document> {
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut keep_id = true;
    for (field, flag) in projection {
        let on = match flag {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            other => {
                return Err(invalid(
                    operation,
                    format!("projection of '{}' cannot be a {}", field, json_type(other)),
                ))
            }
        };
        match (field.as_str(), on) {
            ("_id", false) => keep_id = false,
            ("_id", true) => {}
            (_, true) => included.push(field.as_str()),
            (_, false) => excluded.push(field.as_str()),
        }
    }
    if !included.is_empty() && !excluded.is_empty() {
        return Err(invalid(operation, "projection cannot mix inclusion and exclusion"));
    }

    let mut document = document;
    if !included.is_empty() {
        document.retain(|key, _| included.contains(&key.as_str()) || (keep_id && key == "_id"));
    } else {
        document.retain(|key, _| !excluded.contains(&key.as_str()) && (keep_id || key != "_id"));
    }
    Ok(document)
}

/// Apply a `$set` / `$unset` update in place
pub(crate) fn apply_update(
    document: &mut Document,
    update: &Document,
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    if update.is_empty() {
        return Err(invalid(operation, "update document is empty"));
    }
    for (operator, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| invalid(operation, format!("'{}' needs an object", operator)))?;
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(document, path, value.clone());
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(document, path);
                }
            }
            other => {
                return Err(invalid(operation, format!("unsupported update operator '{}'", other)))
            }
        }
    }
    Ok(())
}

fn set_path(document: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            document.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(map)) = document.get_mut(head) {
                unset_path(map, rest);
            }
        }
    }
}

/// Run an aggregation pipeline over a collection's rows
///
/// Stages: `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count`.
pub(crate) fn run_pipeline(
    mut rows: Rows,
    pipeline: &[Document],
    operation: RepositoryOperation,
) -> RepositoryResult<Rows> {
    for stage in pipeline {
        if stage.len() != 1 {
            return Err(invalid(operation, "pipeline stage must have exactly one operator"));
        }
        let Some((name, spec)) = stage.iter().next() else {
            continue;
        };
        rows = match name.as_str() {
            "$match" => {
                let filter = stage_object(spec, name, operation)?;
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if matches(&row, filter, operation)? {
                        kept.push(row);
                    }
                }
                kept
            }
            "$sort" => {
                let mut sort = SortSpec::new();
                for (field, direction) in stage_object(spec, name, operation)? {
                    let direction = direction
                        .as_i64()
                        .filter(|d| *d == 1 || *d == -1)
                        .ok_or_else(|| invalid(operation, "'$sort' directions must be 1 or -1"))?;
                    sort.push((field.clone(), direction as i32));
                }
                sort_rows(&mut rows, &sort);
                rows
            }
            "$skip" => window(rows, Some(stage_count(spec, name, operation)?), None),
            "$limit" => window(rows, None, Some(stage_count(spec, name, operation)?)),
            "$project" => {
                let projection = stage_object(spec, name, operation)?;
                rows.into_iter()
                    .map(|row| project(row, projection, operation))
                    .collect::<RepositoryResult<_>>()?
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| invalid(operation, "'$count' needs a field name"))?;
                if rows.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field.to_string(), Value::from(rows.len() as u64));
                    vec![counted]
                }
            }
            other => {
                return Err(invalid(operation, format!("unsupported pipeline stage '{}'", other)))
            }
        };
    }
    Ok(rows)
}

fn stage_object<'a>(
    spec: &'a Value,
    name: &str,
    operation: RepositoryOperation,
) -> RepositoryResult<&'a Document> {
    spec.as_object()
        .ok_or_else(|| invalid(operation, format!("'{}' needs an object", name)))
}

fn stage_count(spec: &Value, name: &str, operation: RepositoryOperation) -> RepositoryResult<u64> {
    spec.as_u64()
        .ok_or_else(|| invalid(operation, format!("'{}' needs a non-negative integer", name)))
}

fn invalid(operation: RepositoryOperation, message: impl Into<String>) -> RepositoryError {
    RepositoryError::invalid_argument(operation, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OP: RepositoryOperation = RepositoryOperation::FindAll;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn check(document: Value, filter: Value) -> bool {
        matches(&doc(document), &doc(filter), OP).unwrap()
    }

    #[test]
    fn test_null_matches_absent_and_null() {
        assert!(check(json!({"a": 1}), json!({"deleted_at": null})));
        assert!(check(json!({"deleted_at": null}), json!({"deleted_at": null})));
        assert!(!check(
            json!({"deleted_at": "2024-01-01T00:00:00Z"}),
            json!({"deleted_at": null})
        ));
    }

    #[test]
    fn test_ne_null_requires_present_value() {
        let filter = json!({"deleted_at": {"$ne": null}});
        assert!(!check(json!({}), filter.clone()));
        assert!(check(json!({"deleted_at": "2024-01-01T00:00:00Z"}), filter));
    }

    #[test]
    fn test_inclusive_or_matches_everything() {
        let filter = json!({"$or": [{"m": null}, {"m": {"$ne": null}}]});
        assert!(check(json!({}), filter.clone()));
        assert!(check(json!({"m": "x"}), filter));
    }

    #[test]
    fn test_oid_literal_is_a_value() {
        let id = json!({"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"});
        assert!(check(json!({"_id": id.clone()}), json!({"_id": id})));
        assert!(check(
            json!({"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}}),
            json!({"_id": {"$in": [{"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}]}})
        ));
    }

    #[test]
    fn test_comparisons_and_sets() {
        let row = json!({"age": 30, "tags": ["a", "b"], "name": "Ann"});
        assert!(check(row.clone(), json!({"age": {"$gte": 30, "$lt": 31}})));
        assert!(!check(row.clone(), json!({"age": {"$gt": 30}})));
        assert!(check(row.clone(), json!({"tags": "a"})));
        assert!(check(row.clone(), json!({"name": {"$nin": ["Bob"]}})));
        assert!(check(row.clone(), json!({"name": {"$regex": "^an", "$options": "i"}})));
        assert!(check(row.clone(), json!({"missing": {"$exists": false}})));
        assert!(check(row, json!({"$nor": [{"age": 1}]})));
    }

    #[test]
    fn test_timestamps_compare_as_instants() {
        let row = json!({"at": "2024-01-01T10:00:00+02:00"});
        assert!(check(row, json!({"at": {"$lt": "2024-01-01T09:00:00Z"}})));
    }

    #[test]
    fn test_unknown_operator_is_invalid() {
        let err = matches(&doc(json!({})), &doc(json!({"a": {"$near": 1}})), OP).unwrap_err();
        assert_eq!(err.kind, crate::repository::RepositoryErrorKind::InvalidArgument);
    }

    #[test]
    fn test_sort_rows_multi_field() {
        let mut rows = vec![
            doc(json!({"g": 1, "n": "b"})),
            doc(json!({"g": 2, "n": "a"})),
            doc(json!({"g": 1, "n": "a"})),
        ];
        sort_rows(&mut rows, &vec![("g".to_string(), -1), ("n".to_string(), 1)]);
        let order: Vec<_> = rows.iter().map(|r| (r["g"].clone(), r["n"].clone())).collect();
        assert_eq!(
            order,
            vec![(json!(2), json!("a")), (json!(1), json!("a")), (json!(1), json!("b"))]
        );
    }

    #[test]
    fn test_update_set_and_unset() {
        let mut row = doc(json!({"a": 1, "b": {"c": 2}}));
        apply_update(
            &mut row,
            &doc(json!({"$set": {"b.d": 3}, "$unset": {"a": ""}})),
            RepositoryOperation::Update,
        )
        .unwrap();
        assert_eq!(Value::Object(row), json!({"b": {"c": 2, "d": 3}}));
    }

    #[test]
    fn test_pipeline_stages() {
        let rows = vec![
            doc(json!({"_id": 1, "n": 3})),
            doc(json!({"_id": 2, "n": 1})),
            doc(json!({"_id": 3, "n": 2})),
        ];
        let pipeline = vec![
            doc(json!({"$match": {"n": {"$gte": 2}}})),
            doc(json!({"$sort": {"n": 1}})),
            doc(json!({"$project": {"n": 1, "_id": 0}})),
        ];
        let out = run_pipeline(rows.clone(), &pipeline, RepositoryOperation::Raw).unwrap();
        assert_eq!(out, vec![doc(json!({"n": 2})), doc(json!({"n": 3}))]);

        let counted =
            run_pipeline(rows, &[doc(json!({"$count": "total"}))], RepositoryOperation::Raw).unwrap();
        assert_eq!(counted, vec![doc(json!({"total": 3}))]);
    }

    #[test]
    fn test_window() {
        let rows: Rows = (0..5).map(|i| doc(json!({"i": i}))).collect();
        assert_eq!(window(rows.clone(), Some(4), Some(2)).len(), 1);
        assert!(window(rows, Some(5), Some(2)).is_empty());
    }
}
