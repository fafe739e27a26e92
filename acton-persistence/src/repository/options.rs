//! Per-call options for repository operations
//!
//! Each operation category gets its own options struct so call sites only
//! see the knobs that apply to them. Every field is independently optional
//! and `Default` gives the documented behaviour:
//!
//! | Struct | Used by | Defaults |
//! |---|---|---|
//! | [`ReadOptions`] | `find_all`, `find_one`, `find_one_by_id` | active only, all fields, store order, no window, no join |
//! | [`CountOptions`] | `get_total`, `exists` | active only, nothing excluded |
//! | [`CreateOptions`] | `create` | generated id |
//! | [`WriteOptions`] | single-row update / delete / soft delete / restore | active only |
//! | [`BulkOptions`] | `*_many` operations | active only |
//! | [`RawOptions`] | `raw` | active only |
//!
//! # Example
//!
//! ```rust
//! use acton_persistence::repository::{Join, Pagination, ReadOptions, SortOrder};
//!
//! let options = ReadOptions::default()
//!     .sort("created_at", SortOrder::Desc)
//!     .paging(Pagination::new(0, 2))
//!     .join(Join::Default);
//!
//! assert!(!options.with_deleted);
//! assert_eq!(options.paging, Some(Pagination::new(0, 2)));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::session::TransactionHandle;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    /// Ascending order (A-Z, 0-9, oldest first)
    #[default]
    Asc,
    /// Descending order (Z-A, 9-0, newest first)
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

impl SortOrder {
    /// Native document-store direction (`1` ascending, `-1` descending)
    #[must_use]
    pub const fn as_native(&self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }

    /// SQL ORDER BY fragment
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Ordered multi-field sort; earlier entries take precedence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort(Vec<(String, SortOrder)>);

impl Sort {
    /// Empty sort (store order)
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field
    #[must_use]
    pub fn then(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.push(field, order);
        self
    }

    /// Append a field in place
    ///
    /// A field sorted twice keeps its first position and takes the new
    /// direction.
    pub fn push(&mut self, field: impl Into<String>, order: SortOrder) {
        let field = field.into();
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = order,
            None => self.0.push((field, order)),
        }
    }

    /// Fields in precedence order
    pub fn fields(&self) -> &[(String, SortOrder)] {
        &self.0
    }

    /// Whether no field is sorted
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, SortOrder)> for Sort {
    fn from_iter<I: IntoIterator<Item = (S, SortOrder)>>(iter: I) -> Self {
        let mut sort = Sort::new();
        for (field, order) in iter {
            sort.push(field, order);
        }
        sort
    }
}

/// Result window: skip `offset` entities, return at most `limit`
///
/// An offset beyond the number of matches yields an empty list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of items to skip
    pub offset: u64,
    /// Maximum number of items to return
    pub limit: u64,
}

impl Pagination {
    /// Create pagination with explicit offset and limit
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Create pagination for the first page
    #[must_use]
    pub const fn first_page(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    /// Create pagination for a specific page (1-indexed)
    ///
    /// Page 0 is treated as page 1.
    #[must_use]
    pub const fn page(page_number: u64, page_size: u64) -> Self {
        let offset = page_number.saturating_sub(1) * page_size;
        Self {
            offset,
            limit: page_size,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}

/// Field selection; `true` fields are returned, the rest omitted
///
/// The identifier is always returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection(Vec<(String, bool)>);

impl Projection {
    /// Empty projection
    pub fn new() -> Self {
        Self::default()
    }

    /// Projection including exactly the given fields
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(|f| (f.into(), true)).collect())
    }

    /// Set a field's inclusion
    #[must_use]
    pub fn field(mut self, field: impl Into<String>, included: bool) -> Self {
        let field = field.into();
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = included,
            None => self.0.push((field, included)),
        }
        self
    }

    /// Names of the fields set to `true`, in insertion order
    pub fn selected(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, included)| *included)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Whether the projection selects nothing (i.e. returns all fields)
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|(_, included)| !included)
    }
}

/// Relation inclusion for reads
///
/// Relation names resolve through the repository's
/// [`RelationRegistry`](super::RelationRegistry); unknown names fail with
/// `InvalidArgument`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Join {
    /// Load no relations
    #[default]
    None,
    /// Load the repository's default relation set
    Default,
    /// Load a named relation set registered on the repository
    Set(String),
    /// Load exactly these relations
    Only(Vec<String>),
}

impl From<bool> for Join {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Default
        } else {
            Self::None
        }
    }
}

/// Options for `find_all`, `find_one` and `find_one_by_id`
#[derive(Debug, Clone, Default)]
pub struct ReadOptions<'a> {
    /// Include soft-deleted entities
    pub with_deleted: bool,
    /// Field selection
    pub select: Option<Projection>,
    /// Sort order
    pub sort: Sort,
    /// Result window
    pub paging: Option<Pagination>,
    /// Relations to load
    pub join: Join,
    /// Caller-owned transaction
    pub session: Option<&'a dyn TransactionHandle>,
}

impl<'a> ReadOptions<'a> {
    /// Include soft-deleted entities
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Select fields
    #[must_use]
    pub fn select(mut self, projection: Projection) -> Self {
        self.select = Some(projection);
        self
    }

    /// Append a sort field
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(field, order);
        self
    }

    /// Set the result window
    #[must_use]
    pub fn paging(mut self, paging: Pagination) -> Self {
        self.paging = Some(paging);
        self
    }

    /// Set relation inclusion
    #[must_use]
    pub fn join(mut self, join: impl Into<Join>) -> Self {
        self.join = join.into();
        self
    }

    /// Run inside a caller-owned transaction
    #[must_use]
    pub fn session(mut self, session: &'a dyn TransactionHandle) -> Self {
        self.session = Some(session);
        self
    }
}

/// Options for `get_total` and `exists`
#[derive(Debug, Clone, Default)]
pub struct CountOptions<'a> {
    /// Include soft-deleted entities
    pub with_deleted: bool,
    /// Identifiers excluded from the match (`exists` only)
    pub exclude_ids: Vec<String>,
    /// Caller-owned transaction
    pub session: Option<&'a dyn TransactionHandle>,
}

impl<'a> CountOptions<'a> {
    /// Include soft-deleted entities
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Exclude identifiers from an existence check
    #[must_use]
    pub fn exclude_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Run inside a caller-owned transaction
    #[must_use]
    pub fn session(mut self, session: &'a dyn TransactionHandle) -> Self {
        self.session = Some(session);
        self
    }
}

/// Options for `create`
#[derive(Debug, Clone, Default)]
pub struct CreateOptions<'a> {
    /// Explicit identifier overriding generation and any id in the payload
    pub id: Option<String>,
    /// Caller-owned transaction
    pub session: Option<&'a dyn TransactionHandle>,
}

impl<'a> CreateOptions<'a> {
    /// Use an explicit identifier
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Run inside a caller-owned transaction
    #[must_use]
    pub fn session(mut self, session: &'a dyn TransactionHandle) -> Self {
        self.session = Some(session);
        self
    }
}

/// Options for single-row update, delete, soft delete and restore
///
/// `with_deleted` widens updates and hard deletes to soft-deleted rows.
/// Soft delete always targets active rows and restore always targets
/// soft-deleted rows, so they ignore it.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions<'a> {
    /// Include soft-deleted entities
    pub with_deleted: bool,
    /// Caller-owned transaction
    pub session: Option<&'a dyn TransactionHandle>,
}

impl<'a> WriteOptions<'a> {
    /// Include soft-deleted entities
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Run inside a caller-owned transaction
    #[must_use]
    pub fn session(mut self, session: &'a dyn TransactionHandle) -> Self {
        self.session = Some(session);
        self
    }
}

/// Options for the bulk (`*_many`) operations
///
/// Same visibility rules as [`WriteOptions`].
#[derive(Debug, Clone, Default)]
pub struct BulkOptions<'a> {
    /// Include soft-deleted entities
    pub with_deleted: bool,
    /// Caller-owned transaction
    pub session: Option<&'a dyn TransactionHandle>,
}

impl<'a> BulkOptions<'a> {
    /// Include soft-deleted entities
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Run inside a caller-owned transaction
    #[must_use]
    pub fn session(mut self, session: &'a dyn TransactionHandle) -> Self {
        self.session = Some(session);
        self
    }
}

/// Options for `raw`
#[derive(Debug, Clone, Default)]
pub struct RawOptions<'a> {
    /// Include soft-deleted entities (document backends append the
    /// inclusive predicate instead of the active-only one)
    pub with_deleted: bool,
    /// Caller-owned transaction
    pub session: Option<&'a dyn TransactionHandle>,
}

impl<'a> RawOptions<'a> {
    /// Include soft-deleted entities
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Run inside a caller-owned transaction
    #[must_use]
    pub fn session(mut self, session: &'a dyn TransactionHandle) -> Self {
        self.session = Some(session);
        self
    }
}
