//! # acton-persistence
//!
//! One repository contract over document and relational stores, with soft
//! delete built in.
//!
//! ## Features
//!
//! - **Contract**: [`repository::Repository`] with CRUD, soft delete, restore, bulk, paging, joins and raw access
//! - **Document stores**: [`document::ObjectIdRepository`] and [`document::StringIdRepository`]
//! - **Relational stores**: [`relational::RelationalRepository`], PostgreSQL driver behind the `postgres` feature
//! - **In-memory backends**: [`memory`] stores with sessions and unique indexes
//! - **Configuration**: Figment-based layered config
//! - **Observability**: structured `tracing` events per operation
//!
//! ## Example
//!
//! ```rust
//! use acton_persistence::prelude::*;
//! use acton_persistence::memory::MemoryDocumentStore;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     #[serde(rename = "_id")]
//!     id: String,
//!     name: String,
//!     #[serde(default)]
//!     deleted_at: DeleteMarker,
//! }
//!
//! impl Entity for User {
//!     const NAME: &'static str = "User";
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> RepositoryResult<()> {
//! let store = MemoryDocumentStore::new();
//! let users: StringIdRepository<User, _> = StringIdRepository::new(store.collection("users"));
//!
//! let user = users
//!     .create(&serde_json::json!({ "name": "ada" }), CreateOptions::default())
//!     .await?;
//! users.soft_delete_one_by_id(&user.id, WriteOptions::default()).await?;
//!
//! assert!(users.find_one_by_id(&user.id, ReadOptions::default()).await.is_err());
//! let user = users.restore_one_by_id(&user.id, WriteOptions::default()).await?;
//! assert!(user.deleted_at.is_active());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod memory;
pub mod observability;
pub mod relational;
pub mod repository;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, RepositoryConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;

    pub use crate::repository::{
        BulkOptions, CountOptions, CreateOptions, DeleteMarker, Entity, Filter, FilterCondition,
        FilterOperator, FilterValue, Join, Pagination, Projection, RawOptions, ReadOptions,
        RelationRegistry, Repository, RepositoryError, RepositoryErrorKind, RepositoryOperation,
        RepositoryResult, Sort, SortOrder, TransactionHandle, WriteOptions,
    };

    pub use crate::document::{
        DocumentDriver, Lookup, ObjectId, ObjectIdRepository, StringIdRepository,
    };
    pub use crate::relational::{
        RawSql, Relation, RelationalDriver, RelationalRepository, TableSchema,
    };

    #[cfg(feature = "postgres")]
    pub use crate::database::create_pool;
    #[cfg(feature = "postgres")]
    pub use crate::relational::{PgTableDriver, PgTransaction};
}
