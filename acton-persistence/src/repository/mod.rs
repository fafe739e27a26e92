//! Backend-independent repository contract
//!
//! This module holds everything the document and relational repositories
//! share: the [`Repository`] trait, the filter and options model, the error
//! taxonomy, the soft-delete marker, payload merging, caller-owned
//! transaction handles and relation registries.
//!
//! # Features
//!
//! - **Contract**: [`Repository`] with CRUD, soft delete, restore, bulk, raw and model access
//! - **Soft delete**: [`DeleteMarker`] nullable timestamp, excluded from reads by default
//! - **Filtering**: [`Filter`] and [`FilterCondition`] for predicates
//! - **Options**: [`ReadOptions`], [`CountOptions`], [`CreateOptions`], [`WriteOptions`], [`BulkOptions`], [`RawOptions`]
//! - **Joins**: [`Join`] resolved through a per-repository [`RelationRegistry`]
//! - **Transactions**: [`TransactionHandle`] passed through untouched
//!
//! # Example
//!
//! ```rust
//! use acton_persistence::repository::{Filter, FilterCondition, Pagination, ReadOptions, SortOrder};
//!
//! let filter = Filter::eq("status", "active").and(FilterCondition::gte("age", 18));
//! let options = ReadOptions::default()
//!     .sort("created_at", SortOrder::Desc)
//!     .paging(Pagination::first_page(20));
//! # let _ = (filter, options);
//! ```

mod entity;
mod error;
mod filter;
mod options;
mod payload;
mod relations;
mod session;
mod traits;

// Re-export all public types
pub use entity::{is_active_document, is_deleted_document, DeleteMarker, Entity};
pub(crate) use entity::marker_value;
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use filter::{Filter, FilterCondition, FilterOperator, FilterValue};
pub use options::{
    BulkOptions, CountOptions, CreateOptions, Join, Pagination, Projection, RawOptions,
    ReadOptions, Sort, SortOrder, WriteOptions,
};
pub use payload::{from_document, from_documents, merge_fields, project, strip_fields, to_document, Document};
pub(crate) use payload::json_type;
pub use relations::{RelationKind, RelationRegistry};
pub use session::{downcast_session, TransactionHandle};
pub use traits::{Repository, RepositoryResult};
