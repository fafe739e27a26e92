//! Conversion between entities, payloads and native documents
//!
//! Both backends move data as JSON objects. [`merge_fields`] is the single
//! definition of "update" shared by every repository: each top-level field
//! present in the payload overwrites the stored field, absent fields are left
//! untouched.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::error::{RepositoryError, RepositoryOperation};

/// Native document / row shape shared by all backends
pub type Document = Map<String, Value>;

/// Serialize a payload into a document
///
/// The payload must serialize to a JSON object; anything else is a caller
/// mistake and fails with `InvalidArgument`.
pub fn to_document<T>(value: &T, operation: RepositoryOperation) -> Result<Document, RepositoryError>
where
    T: Serialize + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RepositoryError::invalid_argument(
            operation,
            format!("payload must serialize to an object, got {}", json_type(&other)),
        )),
        Err(e) => Err(RepositoryError::serialization_error(operation, e.to_string())),
    }
}

/// Deserialize a stored document into an entity
pub fn from_document<E>(document: Document, operation: RepositoryOperation) -> Result<E, RepositoryError>
where
    E: DeserializeOwned,
{
    serde_json::from_value(Value::Object(document))
        .map_err(|e| RepositoryError::serialization_error(operation, e.to_string()))
}

/// Deserialize a list of stored documents
pub fn from_documents<E>(
    documents: Vec<Document>,
    operation: RepositoryOperation,
) -> Result<Vec<E>, RepositoryError>
where
    E: DeserializeOwned,
{
    documents
        .into_iter()
        .map(|doc| from_document(doc, operation))
        .collect()
}

/// Overwrite every field of `snapshot` that `patch` carries
///
/// Fields listed in `protected` (the identifier and the delete marker) are
/// never taken from the patch.
pub fn merge_fields(snapshot: &mut Document, patch: &Document, protected: &[&str]) {
    for (key, value) in patch {
        if protected.contains(&key.as_str()) {
            continue;
        }
        snapshot.insert(key.clone(), value.clone());
    }
}

/// Remove the protected fields from a patch, returning what is left
pub fn strip_fields(mut patch: Document, protected: &[&str]) -> Document {
    for key in protected {
        patch.remove(*key);
    }
    patch
}

/// Keep only the selected keys of a document (plus the always-kept ones)
pub fn project(document: &mut Document, selected: &[&str], always: &[&str]) {
    document.retain(|key, _| selected.contains(&key.as_str()) || always.contains(&key.as_str()));
}

/// Human name of a JSON value's type, for error messages
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Patch {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        age: Option<u32>,
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_to_document_rejects_scalars() {
        let err = to_document(&42, RepositoryOperation::Create).unwrap_err();
        assert_eq!(err.kind, crate::repository::RepositoryErrorKind::InvalidArgument);
        assert!(err.message.contains("number"));
    }

    #[test]
    fn test_merge_overwrites_only_present_fields() {
        let mut snapshot = doc(json!({"id": "1", "name": "a", "age": 3}));
        let patch = to_document(
            &Patch {
                name: Some("b".into()),
                age: None,
            },
            RepositoryOperation::Update,
        )
        .unwrap();

        merge_fields(&mut snapshot, &patch, &["id"]);

        assert_eq!(snapshot, doc(json!({"id": "1", "name": "b", "age": 3})));
    }

    #[test]
    fn test_merge_ignores_protected_fields() {
        let mut snapshot = doc(json!({"id": "1", "deleted_at": null}));
        let patch = doc(json!({"id": "2", "deleted_at": "2024-01-01T00:00:00Z", "x": 1}));

        merge_fields(&mut snapshot, &patch, &["id", "deleted_at"]);

        assert_eq!(snapshot, doc(json!({"id": "1", "deleted_at": null, "x": 1})));
    }

    #[test]
    fn test_merge_writes_explicit_null() {
        let mut snapshot = doc(json!({"nickname": "bob"}));
        merge_fields(&mut snapshot, &doc(json!({"nickname": null})), &[]);
        assert_eq!(snapshot.get("nickname"), Some(&Value::Null));
    }

    #[test]
    fn test_project_keeps_selected_and_always() {
        let mut document = doc(json!({"_id": "1", "name": "a", "secret": "s"}));
        project(&mut document, &["name"], &["_id"]);
        assert_eq!(document, doc(json!({"_id": "1", "name": "a"})));
    }

    #[test]
    fn test_from_document_reports_serialization_error() {
        let err = from_document::<Patch>(doc(json!({"age": "old"})), RepositoryOperation::FindOne)
            .unwrap_err();
        assert_eq!(err.operation, RepositoryOperation::FindOne);
        assert_eq!(
            err.kind,
            crate::repository::RepositoryErrorKind::SerializationError
        );
    }
}
