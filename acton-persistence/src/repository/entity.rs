//! Entity trait and the soft-delete marker

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payload::Document;

/// A persisted record type
///
/// The repositories never look inside an entity beyond its identifier and
/// its delete marker; everything else is carried through serde untouched.
///
/// # Example
///
/// ```rust
/// use acton_persistence::repository::{DeleteMarker, Entity};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct User {
///     #[serde(rename = "_id")]
///     id: String,
///     name: String,
///     #[serde(default)]
///     deleted_at: DeleteMarker,
/// }
///
/// impl Entity for User {
///     const NAME: &'static str = "User";
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type name used in errors and log fields
    const NAME: &'static str;
}

/// Nullable soft-delete timestamp
///
/// `None` means the entity is active; `Some(ts)` means it was soft-deleted at
/// `ts`. There is no separate flag that could drift from the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeleteMarker(Option<DateTime<Utc>>);

impl DeleteMarker {
    /// Marker of an active entity
    #[must_use]
    pub const fn active() -> Self {
        Self(None)
    }

    /// Marker of an entity soft-deleted at `at`
    #[must_use]
    pub const fn deleted_at(at: DateTime<Utc>) -> Self {
        Self(Some(at))
    }

    /// Whether the entity is active
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.0.is_none()
    }

    /// Whether the entity is soft-deleted
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.0.is_some()
    }

    /// When the entity was soft-deleted, if it was
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
    }
}

impl From<Option<DateTime<Utc>>> for DeleteMarker {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        Self(value)
    }
}

/// Native value written into the marker field when soft-deleting
pub(crate) fn marker_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Whether a stored document is active (marker absent or null)
pub fn is_active_document(document: &Document, marker_field: &str) -> bool {
    matches!(document.get(marker_field), None | Some(Value::Null))
}

/// Whether a stored document is soft-deleted (marker present and not null)
pub fn is_deleted_document(document: &Document, marker_field: &str) -> bool {
    !is_active_document(document, marker_field)
}
