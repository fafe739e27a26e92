//! Repository contract
//!
//! [`Repository`] is the operation set every backend implements with
//! identical observable behaviour. It uses RPITIT (Return Position Impl Trait
//! In Traits), so implementations write plain `async fn`s.
//!
//! # Visibility
//!
//! Every read, count, existence check, update and hard delete excludes
//! soft-deleted entities unless the options set `with_deleted`. Soft delete
//! only targets active entities and restore only targets soft-deleted ones.
//!
//! # Misses
//!
//! Single-target operations fail with `NotFound` when nothing matches; they
//! never return an absent value.
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_persistence::prelude::*;
//!
//! async fn deactivate<R: Repository<User>>(users: &R, id: &str) -> RepositoryResult<User> {
//!     let user = users.soft_delete_one_by_id(id, WriteOptions::default()).await?;
//!     assert!(user.deleted_at.is_deleted());
//!     Ok(user)
//! }
//! ```

use std::future::Future;

use serde::Serialize;

use super::entity::Entity;
use super::error::RepositoryError;
use super::filter::Filter;
use super::options::{
    BulkOptions, CountOptions, CreateOptions, RawOptions, ReadOptions, WriteOptions,
};

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// CRUD, soft-delete, bulk, pagination, join and raw access to one entity type
///
/// Identifiers are passed as strings; each backend builds its native key from
/// them (an object id backend rejects malformed strings with
/// `InvalidArgument`).
pub trait Repository<E: Entity>: Send + Sync {
    /// Native collection or table handle returned by [`Repository::model`]
    type Model: ?Sized;
    /// Backend-native query accepted by [`Repository::raw`]
    type RawQuery: Send;
    /// Backend-native result row returned by [`Repository::raw`]
    type RawRow: Send;

    /// Entities matching `filter`
    ///
    /// An empty result is a valid answer, not an error.
    fn find_all(
        &self,
        filter: &Filter,
        options: ReadOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<Vec<E>>> + Send;

    /// First entity matching `filter` (after sorting)
    fn find_one(
        &self,
        filter: &Filter,
        options: ReadOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Entity with the given identifier
    fn find_one_by_id(
        &self,
        id: &str,
        options: ReadOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Number of entities matching `filter`
    fn get_total(
        &self,
        filter: &Filter,
        options: CountOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Whether any entity matches `filter`, ignoring `options.exclude_ids`
    fn exists(
        &self,
        filter: &Filter,
        options: CountOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Insert a new, active entity
    ///
    /// `options.id` overrides both generation and any id in the payload.
    fn create<D>(
        &self,
        data: &D,
        options: CreateOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send
    where
        D: Serialize + Sync;

    /// Overwrite the supplied fields of the entity with the given identifier
    fn update_one_by_id<D>(
        &self,
        id: &str,
        data: &D,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send
    where
        D: Serialize + Sync;

    /// Overwrite the supplied fields of the first entity matching `filter`
    fn update_one<D>(
        &self,
        filter: &Filter,
        data: &D,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send
    where
        D: Serialize + Sync;

    /// Permanently remove the entity with the given identifier
    fn delete_one_by_id(
        &self,
        id: &str,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Permanently remove the first entity matching `filter`
    fn delete_one(
        &self,
        filter: &Filter,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Set the delete marker of the active entity with the given identifier
    fn soft_delete_one_by_id(
        &self,
        id: &str,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Set the delete marker of the first active entity matching `filter`
    fn soft_delete_one(
        &self,
        filter: &Filter,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Clear the delete marker of the soft-deleted entity with the given identifier
    fn restore_one_by_id(
        &self,
        id: &str,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Clear the delete marker of the first soft-deleted entity matching `filter`
    fn restore_one(
        &self,
        filter: &Filter,
        options: WriteOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Insert a batch in a single backend call
    fn create_many<D>(
        &self,
        data: &[D],
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send
    where
        D: Serialize + Sync;

    /// Permanently remove the entities with the given identifiers
    fn delete_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Permanently remove every entity matching `filter`
    fn delete_many(
        &self,
        filter: &Filter,
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Soft delete the active entities with the given identifiers
    fn soft_delete_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Soft delete every active entity matching `filter`
    fn soft_delete_many(
        &self,
        filter: &Filter,
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Restore the soft-deleted entities with the given identifiers
    fn restore_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Restore every soft-deleted entity matching `filter`
    fn restore_many(
        &self,
        filter: &Filter,
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Overwrite the supplied fields of every entity matching `filter`
    fn update_many<D>(
        &self,
        filter: &Filter,
        data: &D,
        options: BulkOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send
    where
        D: Serialize + Sync;

    /// Run a backend-native query, bypassing the filter/options model
    ///
    /// Shape errors fail with `InvalidArgument` before any I/O.
    fn raw(
        &self,
        query: Self::RawQuery,
        options: RawOptions<'_>,
    ) -> impl Future<Output = RepositoryResult<Vec<Self::RawRow>>> + Send;

    /// The underlying native handle
    fn model(&self) -> &Self::Model;
}
