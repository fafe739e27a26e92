//! Repository error types
//!
//! Every backend reports failures through [`RepositoryError`], so callers can
//! translate the same [`RepositoryErrorKind`] into a transport-level response
//! no matter which store produced it.
//!
//! # Example
//!
//! ```rust
//! use acton_persistence::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
//!
//! let error = RepositoryError::not_found(RepositoryOperation::FindOneById, "User", "usr_123");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Listing entities matching a filter
    FindAll,
    /// Finding a single entity by filter
    FindOne,
    /// Finding a single entity by its identifier
    FindOneById,
    /// Counting entities matching a filter
    Count,
    /// Checking whether a matching entity exists
    Exists,
    /// Creating a single entity
    Create,
    /// Creating a batch of entities
    CreateMany,
    /// Updating a single entity
    Update,
    /// Updating every entity matching a filter
    UpdateMany,
    /// Hard deleting a single entity
    Delete,
    /// Hard deleting a batch of entities
    DeleteMany,
    /// Soft deleting a single entity
    SoftDelete,
    /// Soft deleting a batch of entities
    SoftDeleteMany,
    /// Restoring a single soft-deleted entity
    Restore,
    /// Restoring a batch of soft-deleted entities
    RestoreMany,
    /// Executing a backend-native query
    Raw,
    /// Loading related entities for a join
    Join,
    /// Finishing a caller-owned transaction
    Transaction,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FindAll => write!(f, "find_all"),
            Self::FindOne => write!(f, "find_one"),
            Self::FindOneById => write!(f, "find_one_by_id"),
            Self::Count => write!(f, "count"),
            Self::Exists => write!(f, "exists"),
            Self::Create => write!(f, "create"),
            Self::CreateMany => write!(f, "create_many"),
            Self::Update => write!(f, "update"),
            Self::UpdateMany => write!(f, "update_many"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteMany => write!(f, "delete_many"),
            Self::SoftDelete => write!(f, "soft_delete"),
            Self::SoftDeleteMany => write!(f, "soft_delete_many"),
            Self::Restore => write!(f, "restore"),
            Self::RestoreMany => write!(f, "restore_many"),
            Self::Raw => write!(f, "raw"),
            Self::Join => write!(f, "join"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// A single-target operation matched no entity
    NotFound,
    /// The caller passed something the backend can never accept
    /// (malformed id, non-array pipeline, unknown relation, foreign session)
    InvalidArgument,
    /// Uniqueness, foreign key or check constraint rejected the write
    ConstraintViolation,
    /// Failed to reach the store
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Underlying driver error
    DatabaseError,
    /// Serialization or deserialization error
    SerializationError,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::DatabaseError => write!(f, "database_error"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// Provides detailed information about what operation failed, why it failed,
/// and which entity was involved. Driver errors are wrapped with their
/// original message preserved.
///
/// # Example
///
/// ```rust
/// use acton_persistence::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::not_found(RepositoryOperation::Update, "User", "usr_abc123");
/// assert_eq!(
///     error.to_string(),
///     "Repository not_found error during update: Entity not found [User: usr_abc123]"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "User", "Order")
    pub entity_type: Option<String>,
    /// The identifier or filter description of the entity involved
    pub entity_id: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a "not found" error with entity context
    ///
    /// # Example
    ///
    /// ```rust
    /// use acton_persistence::repository::{RepositoryError, RepositoryOperation};
    ///
    /// let error = RepositoryError::not_found(RepositoryOperation::FindOne, "User", "usr_123");
    /// assert_eq!(error.entity_type, Some("User".to_string()));
    /// ```
    pub fn not_found(
        operation: RepositoryOperation,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::NotFound,
            message: "Entity not found".to_string(),
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
        }
    }

    /// Create an "invalid argument" error
    ///
    /// Raised for programming errors, always before any I/O takes place.
    pub fn invalid_argument(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::InvalidArgument, message)
    }

    /// Create a constraint violation error
    ///
    /// # Example
    ///
    /// ```rust
    /// use acton_persistence::repository::{RepositoryError, RepositoryOperation};
    ///
    /// let error = RepositoryError::constraint_violation(
    ///     RepositoryOperation::Create,
    ///     "duplicate key value violates unique constraint \"users_name_key\"",
    /// );
    /// ```
    pub fn constraint_violation(
        operation: RepositoryOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::ConstraintViolation, message)
    }

    /// Create a connection failed error
    pub fn connection_failed(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::ConnectionFailed, message)
    }

    /// Create a timeout error
    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    /// Create a database error
    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    /// Create a serialization error
    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    /// Add entity context to an existing error
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Add the entity type to an existing error, keeping any id already set
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Set the operation that caused the error
    ///
    /// Drivers report errors against the native call they were running;
    /// repositories re-tag them with the contract operation.
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Whether this error reports a missing entity
    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    ///
    /// The repositories never retry on their own; this is a hint for callers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use acton_persistence::repository::{RepositoryError, RepositoryOperation};
    ///
    /// let reset = RepositoryError::connection_failed(RepositoryOperation::FindAll, "Connection reset");
    /// assert!(reset.is_retriable());
    ///
    /// let missing = RepositoryError::not_found(RepositoryOperation::FindOne, "User", "123");
    /// assert!(!missing.is_retriable());
    /// ```
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let (Some(ref entity_type), Some(ref entity_id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " [{}: {}]", entity_type, entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(RepositoryOperation::FindAll, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_operation_display() {
        assert_eq!(format!("{}", RepositoryOperation::FindOneById), "find_one_by_id");
        assert_eq!(format!("{}", RepositoryOperation::SoftDeleteMany), "soft_delete_many");
        assert_eq!(format!("{}", RepositoryOperation::Restore), "restore");
        assert_eq!(format!("{}", RepositoryOperation::Raw), "raw");
    }

    #[test]
    fn test_repository_error_kind_display() {
        assert_eq!(format!("{}", RepositoryErrorKind::NotFound), "not_found");
        assert_eq!(
            format!("{}", RepositoryErrorKind::InvalidArgument),
            "invalid_argument"
        );
        assert_eq!(
            format!("{}", RepositoryErrorKind::ConstraintViolation),
            "constraint_violation"
        );
    }

    #[test]
    fn test_not_found_carries_operation() {
        let error = RepositoryError::not_found(RepositoryOperation::Restore, "User", "usr_123");
        assert_eq!(error.operation, RepositoryOperation::Restore);
        assert_eq!(error.kind, RepositoryErrorKind::NotFound);
        assert!(error.is_not_found());
        assert_eq!(error.entity_id, Some("usr_123".to_string()));
    }

    #[test]
    fn test_with_operation_retags() {
        let error = RepositoryError::database_error(RepositoryOperation::FindAll, "boom")
            .with_operation(RepositoryOperation::UpdateMany);
        assert_eq!(error.operation, RepositoryOperation::UpdateMany);
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn test_with_entity_type_keeps_id() {
        let error = RepositoryError::not_found(RepositoryOperation::Delete, "Old", "1")
            .with_entity_type("New");
        assert_eq!(error.entity_type, Some("New".to_string()));
        assert_eq!(error.entity_id, Some("1".to_string()));
    }

    #[test]
    fn test_is_retriable() {
        assert!(RepositoryError::timeout(RepositoryOperation::Count, "slow").is_retriable());
        assert!(!RepositoryError::invalid_argument(RepositoryOperation::Raw, "bad").is_retriable());
        assert!(
            !RepositoryError::constraint_violation(RepositoryOperation::Create, "dup")
                .is_retriable()
        );
    }

    #[test]
    fn test_display_without_entity() {
        let error = RepositoryError::invalid_argument(RepositoryOperation::Raw, "pipeline must be an array");
        let display = format!("{}", error);
        assert!(display.contains("invalid_argument"));
        assert!(display.contains("raw"));
        assert!(!display.contains('['));
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let error: RepositoryError = err.into();
        assert_eq!(error.kind, RepositoryErrorKind::SerializationError);
    }
}
