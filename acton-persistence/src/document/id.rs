//! Identifier schemes for document repositories
//!
//! The document repository is generic over an [`IdScheme`] that knows how to
//! build native key values from caller-supplied strings, validate keys found
//! in payloads, and generate fresh keys. Swapping the scheme is the only
//! difference between the object-id and string-id repositories.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::object_id::ObjectId;
use crate::repository::{json_type, RepositoryError, RepositoryOperation};

/// Primary-key handling of a document collection
pub trait IdScheme: Send + Sync + 'static {
    /// Typed identifier
    type Id: Clone + Send + Sync + fmt::Display + Serialize;

    /// Scheme name used in log fields
    const NAME: &'static str;

    /// Generate a fresh identifier
    fn generate() -> Self::Id;

    /// Build an identifier from a caller-supplied string
    fn parse(raw: &str) -> Result<Self::Id, String>;

    /// Native value stored in the `_id` field
    fn to_native(id: &Self::Id) -> Value;

    /// Read an identifier back from a native or payload value
    fn from_native(value: &Value) -> Result<Self::Id, String>;

    /// Native `_id` value for a caller-supplied string
    ///
    /// Fails with `InvalidArgument` when the string is not a valid key.
    fn native_from_str(raw: &str, operation: RepositoryOperation) -> Result<Value, RepositoryError> {
        Self::parse(raw)
            .map(|id| Self::to_native(&id))
            .map_err(|e| RepositoryError::invalid_argument(operation, e))
    }

    /// Validate a payload `_id` value and bring it into native form
    fn normalize(value: &Value, operation: RepositoryOperation) -> Result<Value, RepositoryError> {
        Self::from_native(value)
            .map(|id| Self::to_native(&id))
            .map_err(|e| RepositoryError::invalid_argument(operation, e))
    }

    /// Fresh native `_id` value
    fn generate_native() -> Value {
        Self::to_native(&Self::generate())
    }
}

/// Keys are store-native [`ObjectId`]s built from 24-character hex strings
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectIdScheme;

impl IdScheme for ObjectIdScheme {
    type Id = ObjectId;

    const NAME: &'static str = "object_id";

    fn generate() -> Self::Id {
        ObjectId::new()
    }

    fn parse(raw: &str) -> Result<Self::Id, String> {
        ObjectId::parse_str(raw).map_err(|e| format!("'{}' is not a valid object id: {}", raw, e))
    }

    fn to_native(id: &Self::Id) -> Value {
        serde_json::json!({ "$oid": id.to_hex() })
    }

    fn from_native(value: &Value) -> Result<Self::Id, String> {
        match value {
            Value::String(raw) => Self::parse(raw),
            Value::Object(map) => match map.get("$oid") {
                Some(Value::String(raw)) if map.len() == 1 => Self::parse(raw),
                _ => Err("object id must be {\"$oid\": \"<hex>\"}".to_string()),
            },
            other => Err(format!("object id cannot be a {}", json_type(other))),
        }
    }
}

/// Keys are opaque caller-supplied strings; UUIDv4 when generated
#[derive(Debug, Clone, Copy, Default)]
pub struct StringIdScheme;

impl IdScheme for StringIdScheme {
    type Id = String;

    const NAME: &'static str = "string_id";

    fn generate() -> Self::Id {
        uuid::Uuid::new_v4().to_string()
    }

    fn parse(raw: &str) -> Result<Self::Id, String> {
        Ok(raw.to_string())
    }

    fn to_native(id: &Self::Id) -> Value {
        Value::String(id.clone())
    }

    fn from_native(value: &Value) -> Result<Self::Id, String> {
        match value {
            Value::String(raw) => Ok(raw.clone()),
            other => Err(format!("string id cannot be a {}", json_type(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;
    use serde_json::json;

    const HEX: &str = "65a1f0c2e4b0a1b2c3d4e5f6";

    #[test]
    fn test_object_id_native_from_str() {
        let native = ObjectIdScheme::native_from_str(HEX, RepositoryOperation::FindOneById).unwrap();
        assert_eq!(native, json!({"$oid": HEX}));
    }

    #[test]
    fn test_object_id_rejects_malformed_string() {
        let err = ObjectIdScheme::native_from_str("not-an-id", RepositoryOperation::FindOneById)
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert_eq!(err.operation, RepositoryOperation::FindOneById);
    }

    #[test]
    fn test_object_id_normalize_accepts_both_forms() {
        let op = RepositoryOperation::CreateMany;
        assert_eq!(
            ObjectIdScheme::normalize(&json!(HEX), op).unwrap(),
            json!({"$oid": HEX})
        );
        assert_eq!(
            ObjectIdScheme::normalize(&json!({"$oid": HEX}), op).unwrap(),
            json!({"$oid": HEX})
        );
        assert!(ObjectIdScheme::normalize(&json!(12), op).is_err());
        assert!(ObjectIdScheme::normalize(&json!({"$oid": HEX, "x": 1}), op).is_err());
    }

    #[test]
    fn test_string_id_used_as_is() {
        let native =
            StringIdScheme::native_from_str("anything goes", RepositoryOperation::FindOneById)
                .unwrap();
        assert_eq!(native, json!("anything goes"));
    }

    #[test]
    fn test_string_id_generates_uuid() {
        let id = StringIdScheme::generate();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_string_id_rejects_non_string_payload() {
        let err = StringIdScheme::normalize(&json!(42), RepositoryOperation::Create).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
    }
}
