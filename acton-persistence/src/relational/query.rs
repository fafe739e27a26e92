//! Relational query model handed to drivers
//!
//! Unlike the document variant, soft-delete visibility is not a predicate
//! the repository injects: it is the `with_deleted` flag of a
//! [`SelectQuery`], and the driver adds `deleted_column IS NULL` itself when
//! the flag is off.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::repository::{FilterCondition, RelationKind, SortOrder};

/// Table layout a relational repository works against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub table: String,
    /// Primary-key column
    pub primary_key: String,
    /// Nullable soft-delete timestamp column
    pub deleted_column: String,
}

impl TableSchema {
    /// Schema with the default `id` key and `deleted_at` marker
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            deleted_column: "deleted_at".to_string(),
        }
    }

    /// Schema with key and marker columns taken from configuration
    pub fn from_config(table: impl Into<String>, config: &RepositoryConfig) -> Self {
        Self {
            table: table.into(),
            primary_key: config.primary_key.clone(),
            deleted_column: config.soft_delete_field.clone(),
        }
    }

    /// Override the primary-key column
    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Override the soft-delete column
    #[must_use]
    pub fn deleted_column(mut self, column: impl Into<String>) -> Self {
        self.deleted_column = column.into();
        self
    }
}

/// Eagerly loaded relation
///
/// Rows of `table` whose `foreign_column` equals the local row's
/// `local_column` are attached under the relation name. Soft-deleted related
/// rows are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Related table
    pub table: String,
    /// Column of the local row holding the join value
    pub local_column: String,
    /// Column of the related row compared to `local_column`
    pub foreign_column: String,
    /// Single row or list
    pub kind: RelationKind,
    /// Soft-delete column of the related table
    pub deleted_column: String,
}

impl Relation {
    /// Many-to-one: `local_column` holds the related row's `id`
    pub fn belongs_to(table: impl Into<String>, local_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            local_column: local_column.into(),
            foreign_column: "id".to_string(),
            kind: RelationKind::One,
            deleted_column: "deleted_at".to_string(),
        }
    }

    /// One-to-many: related rows hold this row's `id` in `foreign_column`
    pub fn has_many(table: impl Into<String>, foreign_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            local_column: "id".to_string(),
            foreign_column: foreign_column.into(),
            kind: RelationKind::Many,
            deleted_column: "deleted_at".to_string(),
        }
    }

    /// Override the local column
    #[must_use]
    pub fn local_column(mut self, column: impl Into<String>) -> Self {
        self.local_column = column.into();
        self
    }

    /// Override the foreign column
    #[must_use]
    pub fn foreign_column(mut self, column: impl Into<String>) -> Self {
        self.foreign_column = column.into();
        self
    }

    /// Override the related table's soft-delete column
    #[must_use]
    pub fn deleted_column(mut self, column: impl Into<String>) -> Self {
        self.deleted_column = column.into();
        self
    }
}

/// A SELECT (or the WHERE part of an UPDATE / DELETE)
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    /// ANDed conditions
    pub conditions: Vec<FilterCondition>,
    /// Include soft-deleted rows
    pub with_deleted: bool,
    /// Relations to load, keyed by relation name
    pub relations: Vec<(String, Relation)>,
    /// ORDER BY, in precedence order
    pub order: Vec<(String, SortOrder)>,
    /// OFFSET
    pub skip: Option<u64>,
    /// LIMIT
    pub take: Option<u64>,
    /// Selected columns; empty selects all
    pub select: Vec<String>,
}

impl SelectQuery {
    /// Query over the given conditions
    pub fn new(conditions: Vec<FilterCondition>) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }

    /// Include soft-deleted rows
    #[must_use]
    pub fn with_deleted(mut self, with_deleted: bool) -> Self {
        self.with_deleted = with_deleted;
        self
    }

    /// Add a condition
    #[must_use]
    pub fn and(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Restrict to the first row
    #[must_use]
    pub fn first(mut self) -> Self {
        self.take = Some(1);
        self
    }
}

/// Parameterised SQL for `raw`
///
/// Parameters bind positionally to `$1`, `$2`, ...
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSql {
    /// Statement text
    pub sql: String,
    /// Positional parameters
    pub params: Vec<Value>,
}

impl RawSql {
    /// Statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}
