//! Generic document repository
//!
//! [`DocumentRepository`] implements the full [`Repository`] contract once,
//! over any [`DocumentDriver`], parameterised by an [`IdScheme`]. The
//! object-id and string-id repositories are type aliases over it, so the two
//! variants cannot drift apart.
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_persistence::prelude::*;
//! use acton_persistence::memory::MemoryDocumentStore;
//!
//! let store = MemoryDocumentStore::new();
//! let users = ObjectIdRepository::<User, _>::new(store.collection("users"));
//!
//! let created = users.create(&NewUser { name: "a".into() }, CreateOptions::default()).await?;
//! let found = users.find_one_by_id(&created.id.to_hex(), ReadOptions::default()).await?;
//! ```

use std::marker::PhantomData;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::driver::{DocumentDriver, FindSpec, Lookup};
use super::id::{IdScheme, ObjectIdScheme, StringIdScheme};
use super::query::{
    build_query, conjunction, projection_document, set_update, soft_delete_predicate, sort_spec,
    Visibility, ID_FIELD,
};
use crate::config::RepositoryConfig;
use crate::repository::{
    from_document, from_documents, marker_value, merge_fields, strip_fields, to_document,
    BulkOptions, CountOptions, CreateOptions, Document, Entity, Filter, FilterCondition,
    RawOptions, ReadOptions, RelationRegistry, Repository, RepositoryError, RepositoryOperation,
    RepositoryResult, TransactionHandle, WriteOptions,
};

/// Document repository keyed by store-native object ids
pub type ObjectIdRepository<E, D> = DocumentRepository<E, ObjectIdScheme, D>;

/// Document repository keyed by opaque strings
pub type StringIdRepository<E, D> = DocumentRepository<E, StringIdScheme, D>;

/// Repository over one document collection
pub struct DocumentRepository<E, S, D> {
    driver: D,
    relations: RelationRegistry<Lookup>,
    soft_delete_field: String,
    _entity: PhantomData<fn() -> (E, S)>,
}

impl<E, S, D> DocumentRepository<E, S, D>
where
    E: Entity,
    S: IdScheme,
    D: DocumentDriver,
{
    /// Create a repository over a driver with default settings
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            relations: RelationRegistry::new(),
            soft_delete_field: RepositoryConfig::default().soft_delete_field,
            _entity: PhantomData,
        }
    }

    /// Register the relations available to `join`
    #[must_use]
    pub fn with_relations(mut self, relations: RelationRegistry<Lookup>) -> Self {
        self.relations = relations;
        self
    }

    /// Apply repository settings from configuration
    #[must_use]
    pub fn with_config(mut self, config: &RepositoryConfig) -> Self {
        self.soft_delete_field = config.soft_delete_field.clone();
        self
    }

    /// Use a different soft-delete marker field
    #[must_use]
    pub fn soft_delete_field(mut self, field: impl Into<String>) -> Self {
        self.soft_delete_field = field.into();
        self
    }

    /// The underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Name of the soft-delete marker field
    pub fn marker_field(&self) -> &str {
        &self.soft_delete_field
    }

    fn query(
        &self,
        filter: &Filter,
        visibility: Visibility,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Document> {
        build_query::<S>(filter, &self.soft_delete_field, visibility, operation)
            .map_err(|e| e.with_entity_type(E::NAME))
    }

    fn find_spec(
        &self,
        options: &ReadOptions<'_>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<FindSpec> {
        let lookups = self
            .relations
            .resolve(&options.join, operation)
            .map_err(|e| e.with_entity_type(E::NAME))?;
        Ok(FindSpec {
            projection: projection_document(options.select.as_ref()),
            sort: sort_spec(&options.sort),
            skip: options.paging.map(|p| p.offset),
            limit: options.paging.map(|p| p.limit),
            lookups,
        })
    }

    fn tag(operation: RepositoryOperation) -> impl Fn(RepositoryError) -> RepositoryError {
        move |e| e.with_operation(operation).with_entity_type(E::NAME)
    }

    fn not_found(operation: RepositoryOperation, target: &str) -> RepositoryError {
        RepositoryError::not_found(operation, E::NAME, target)
    }

    /// Serialise a payload for insertion: key stamped or validated, marker cleared
    fn prepare_insert<P>(
        &self,
        data: &P,
        explicit_id: Option<&str>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Document>
    where
        P: Serialize + ?Sized,
    {
        let mut document = to_document(data, operation)?;
        let id = match (explicit_id, document.get(ID_FIELD)) {
            (Some(raw), _) => S::native_from_str(raw, operation)?,
            (None, Some(Value::Null)) | (None, None) => S::generate_native(),
            (None, Some(existing)) => S::normalize(existing, operation)?,
        };
        document.insert(ID_FIELD.to_string(), id);
        document.insert(self.soft_delete_field.clone(), Value::Null);
        Ok(document)
    }

    async fn read_one(
        &self,
        filter: &Filter,
        options: ReadOptions<'_>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E> {
        let query = self.query(
            filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;
        let spec = self.find_spec(&options, operation)?.first();

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            target,
            "Reading one document"
        );

        let document = self
            .driver
            .find(&query, &spec, options.session)
            .await
            .map_err(Self::tag(operation))?
            .into_iter()
            .next()
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(document, operation)
    }

    async fn update_matching<P>(
        &self,
        filter: &Filter,
        data: &P,
        options: WriteOptions<'_>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E>
    where
        P: Serialize + Sync + ?Sized,
    {
        let visibility = Visibility::from_with_deleted(options.with_deleted);
        let protected = [ID_FIELD, self.soft_delete_field.as_str()];
        let patch = strip_fields(to_document(data, operation)?, &protected);
        let query = self.query(filter, visibility, operation)?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            target,
            fields = patch.len(),
            "Updating document"
        );

        let mut snapshot = self
            .driver
            .find(&query, &FindSpec::default().first(), options.session)
            .await
            .map_err(Self::tag(operation))?
            .into_iter()
            .next()
            .ok_or_else(|| Self::not_found(operation, target))?;

        let key = snapshot.get(ID_FIELD).cloned().unwrap_or(Value::Null);
        merge_fields(&mut snapshot, &patch, &protected);

        let guard = conjunction(vec![
            serde_json::json!({ ID_FIELD: key }),
            soft_delete_predicate(&self.soft_delete_field, visibility),
        ]);
        let updated = self
            .driver
            .replace_one(&guard, snapshot, options.session)
            .await
            .map_err(Self::tag(operation))?
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(updated, operation)
    }

    async fn delete_matching(
        &self,
        filter: &Filter,
        options: WriteOptions<'_>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E> {
        let query = self.query(
            filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            target,
            "Deleting document"
        );

        let removed = self
            .driver
            .find_one_and_delete(&query, options.session)
            .await
            .map_err(Self::tag(operation))?
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(removed, operation)
    }

    /// Set or clear the marker on the first match of the given visibility
    async fn mark_one(
        &self,
        filter: &Filter,
        visibility: Visibility,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E> {
        let query = self.query(filter, visibility, operation)?;
        let update = self.marker_update(visibility);

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            target,
            "Changing delete marker"
        );

        let document = self
            .driver
            .find_one_and_update(&query, &update, session)
            .await
            .map_err(Self::tag(operation))?
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(document, operation)
    }

    /// Set or clear the marker on every match of the given visibility
    async fn mark_many(
        &self,
        filter: &Filter,
        visibility: Visibility,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<bool> {
        let query = self.query(filter, visibility, operation)?;
        let update = self.marker_update(visibility);

        let matched = self
            .driver
            .update_many(&query, &update, session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            matched,
            "Changed delete markers"
        );
        Ok(true)
    }

    /// Active rows get a fresh marker; deleted rows get it cleared
    fn marker_update(&self, visibility: Visibility) -> Document {
        let value = match visibility {
            Visibility::Deleted => Value::Null,
            Visibility::Active | Visibility::All => marker_value(Utc::now()),
        };
        let mut fields = Document::new();
        fields.insert(self.soft_delete_field.clone(), value);
        set_update(fields)
    }

    fn ids_filter(ids: &[String]) -> Filter {
        Filter::from(FilterCondition::is_in(ID_FIELD, ids.to_vec()))
    }
}

impl<E, S, D> Repository<E> for DocumentRepository<E, S, D>
where
    E: Entity,
    S: IdScheme,
    D: DocumentDriver,
{
    type Model = D::Collection;
    type RawQuery = Value;
    type RawRow = Document;

    async fn find_all(&self, filter: &Filter, options: ReadOptions<'_>) -> RepositoryResult<Vec<E>> {
        let operation = RepositoryOperation::FindAll;
        let query = self.query(
            filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;
        let spec = self.find_spec(&options, operation)?;

        let documents = self
            .driver
            .find(&query, &spec, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            count = documents.len(),
            "Found documents"
        );
        from_documents(documents, operation)
    }

    async fn find_one(&self, filter: &Filter, options: ReadOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.read_one(filter, options, RepositoryOperation::FindOne, &target)
            .await
    }

    async fn find_one_by_id(&self, id: &str, options: ReadOptions<'_>) -> RepositoryResult<E> {
        self.read_one(
            &Filter::eq(ID_FIELD, id),
            options,
            RepositoryOperation::FindOneById,
            id,
        )
        .await
    }

    async fn get_total(&self, filter: &Filter, options: CountOptions<'_>) -> RepositoryResult<u64> {
        let operation = RepositoryOperation::Count;
        let query = self.query(
            filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;
        self.driver
            .count(&query, options.session)
            .await
            .map_err(Self::tag(operation))
    }

    async fn exists(&self, filter: &Filter, options: CountOptions<'_>) -> RepositoryResult<bool> {
        let operation = RepositoryOperation::Exists;
        let mut filter = filter.clone();
        if !options.exclude_ids.is_empty() {
            filter = filter.and(FilterCondition::not_in(
                ID_FIELD,
                options.exclude_ids.clone(),
            ));
        }
        let query = self.query(
            &filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;
        let mut projection = Document::new();
        projection.insert(ID_FIELD.to_string(), Value::from(1));
        let spec = FindSpec {
            projection: Some(projection),
            ..FindSpec::default()
        }
        .first();

        let found = self
            .driver
            .find(&query, &spec, options.session)
            .await
            .map_err(Self::tag(operation))?;
        Ok(!found.is_empty())
    }

    async fn create<P>(&self, data: &P, options: CreateOptions<'_>) -> RepositoryResult<E>
    where
        P: Serialize + Sync,
    {
        let operation = RepositoryOperation::Create;
        let document = self.prepare_insert(data, options.id.as_deref(), operation)?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            id_scheme = S::NAME,
            operation = %operation,
            "Creating document"
        );

        let stored = self
            .driver
            .insert_one(document, options.session)
            .await
            .map_err(Self::tag(operation))?;
        from_document(stored, operation)
    }

    async fn update_one_by_id<P>(
        &self,
        id: &str,
        data: &P,
        options: WriteOptions<'_>,
    ) -> RepositoryResult<E>
    where
        P: Serialize + Sync,
    {
        self.update_matching(
            &Filter::eq(ID_FIELD, id),
            data,
            options,
            RepositoryOperation::Update,
            id,
        )
        .await
    }

    async fn update_one<P>(
        &self,
        filter: &Filter,
        data: &P,
        options: WriteOptions<'_>,
    ) -> RepositoryResult<E>
    where
        P: Serialize + Sync,
    {
        let target = filter.to_string();
        self.update_matching(filter, data, options, RepositoryOperation::Update, &target)
            .await
    }

    async fn delete_one_by_id(&self, id: &str, options: WriteOptions<'_>) -> RepositoryResult<E> {
        self.delete_matching(
            &Filter::eq(ID_FIELD, id),
            options,
            RepositoryOperation::Delete,
            id,
        )
        .await
    }

    async fn delete_one(&self, filter: &Filter, options: WriteOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.delete_matching(filter, options, RepositoryOperation::Delete, &target)
            .await
    }

    async fn soft_delete_one_by_id(
        &self,
        id: &str,
        options: WriteOptions<'_>,
    ) -> RepositoryResult<E> {
        self.mark_one(
            &Filter::eq(ID_FIELD, id),
            Visibility::Active,
            options.session,
            RepositoryOperation::SoftDelete,
            id,
        )
        .await
    }

    async fn soft_delete_one(&self, filter: &Filter, options: WriteOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.mark_one(
            filter,
            Visibility::Active,
            options.session,
            RepositoryOperation::SoftDelete,
            &target,
        )
        .await
    }

    async fn restore_one_by_id(&self, id: &str, options: WriteOptions<'_>) -> RepositoryResult<E> {
        self.mark_one(
            &Filter::eq(ID_FIELD, id),
            Visibility::Deleted,
            options.session,
            RepositoryOperation::Restore,
            id,
        )
        .await
    }

    async fn restore_one(&self, filter: &Filter, options: WriteOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.mark_one(
            filter,
            Visibility::Deleted,
            options.session,
            RepositoryOperation::Restore,
            &target,
        )
        .await
    }

    async fn create_many<P>(&self, data: &[P], options: BulkOptions<'_>) -> RepositoryResult<bool>
    where
        P: Serialize + Sync,
    {
        let operation = RepositoryOperation::CreateMany;
        let documents = data
            .iter()
            .map(|item| self.prepare_insert(item, None, operation))
            .collect::<RepositoryResult<Vec<_>>>()?;
        if documents.is_empty() {
            return Ok(true);
        }

        let inserted = self
            .driver
            .insert_many(documents, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            inserted,
            "Created documents"
        );
        Ok(true)
    }

    async fn delete_many_by_ids(&self, ids: &[String], options: BulkOptions<'_>) -> RepositoryResult<bool> {
        self.delete_many(&Self::ids_filter(ids), options).await
    }

    async fn delete_many(&self, filter: &Filter, options: BulkOptions<'_>) -> RepositoryResult<bool> {
        let operation = RepositoryOperation::DeleteMany;
        let query = self.query(
            filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;
        let removed = self
            .driver
            .delete_many(&query, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            removed,
            "Deleted documents"
        );
        Ok(true)
    }

    async fn soft_delete_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> RepositoryResult<bool> {
        self.mark_many(
            &Self::ids_filter(ids),
            Visibility::Active,
            options.session,
            RepositoryOperation::SoftDeleteMany,
        )
        .await
    }

    async fn soft_delete_many(&self, filter: &Filter, options: BulkOptions<'_>) -> RepositoryResult<bool> {
        self.mark_many(
            filter,
            Visibility::Active,
            options.session,
            RepositoryOperation::SoftDeleteMany,
        )
        .await
    }

    async fn restore_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> RepositoryResult<bool> {
        self.mark_many(
            &Self::ids_filter(ids),
            Visibility::Deleted,
            options.session,
            RepositoryOperation::RestoreMany,
        )
        .await
    }

    async fn restore_many(&self, filter: &Filter, options: BulkOptions<'_>) -> RepositoryResult<bool> {
        self.mark_many(
            filter,
            Visibility::Deleted,
            options.session,
            RepositoryOperation::RestoreMany,
        )
        .await
    }

    async fn update_many<P>(
        &self,
        filter: &Filter,
        data: &P,
        options: BulkOptions<'_>,
    ) -> RepositoryResult<bool>
    where
        P: Serialize + Sync,
    {
        let operation = RepositoryOperation::UpdateMany;
        let protected = [ID_FIELD, self.soft_delete_field.as_str()];
        let patch = strip_fields(to_document(data, operation)?, &protected);
        let query = self.query(
            filter,
            Visibility::from_with_deleted(options.with_deleted),
            operation,
        )?;
        if patch.is_empty() {
            return Ok(true);
        }

        let matched = self
            .driver
            .update_many(&query, &set_update(patch), options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            matched,
            "Updated documents"
        );
        Ok(true)
    }

    async fn raw(&self, query: Value, options: RawOptions<'_>) -> RepositoryResult<Vec<Document>> {
        let operation = RepositoryOperation::Raw;
        let stages = match query {
            Value::Array(stages) => stages,
            other => {
                return Err(RepositoryError::invalid_argument(
                    operation,
                    format!(
                        "raw query must be an array of pipeline stages, got {}",
                        crate::repository::json_type(&other)
                    ),
                )
                .with_entity_type(E::NAME))
            }
        };

        let mut pipeline = Vec::with_capacity(stages.len() + 1);
        for (index, stage) in stages.into_iter().enumerate() {
            match stage {
                Value::Object(stage) => pipeline.push(stage),
                _ => {
                    return Err(RepositoryError::invalid_argument(
                        operation,
                        format!("pipeline stage {} is not an object", index),
                    )
                    .with_entity_type(E::NAME))
                }
            }
        }
        let mut terminal = Document::new();
        terminal.insert(
            "$match".to_string(),
            soft_delete_predicate(
                &self.soft_delete_field,
                Visibility::from_with_deleted(options.with_deleted),
            ),
        );
        pipeline.push(terminal);

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            stages = pipeline.len(),
            "Running aggregation pipeline"
        );

        self.driver
            .aggregate(pipeline, options.session)
            .await
            .map_err(Self::tag(operation))
    }

    fn model(&self) -> &D::Collection {
        self.driver.collection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ObjectId;
    use crate::memory::{MemoryCollection, MemoryDocumentStore};
    use crate::repository::{
        DeleteMarker, Join, Pagination, Projection, RelationKind, RepositoryErrorKind, SortOrder,
    };
    use chrono::{DateTime, Duration, TimeZone};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        #[serde(rename = "_id")]
        id: ObjectId,
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        created_at: Option<DateTime<Utc>>,
        #[serde(default)]
        deleted_at: DeleteMarker,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team: Option<Value>,
    }

    impl Entity for User {
        const NAME: &'static str = "User";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        #[serde(rename = "_id")]
        id: String,
        label: String,
        #[serde(default)]
        deleted_at: DeleteMarker,
    }

    impl Entity for Tag {
        const NAME: &'static str = "Tag";
    }

    #[derive(Serialize)]
    struct NewUser<'a> {
        name: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
    }

    #[derive(Serialize)]
    struct Rename<'a> {
        name: &'a str,
    }

    fn new_user(name: &str) -> NewUser<'_> {
        NewUser {
            name,
            created_at: None,
        }
    }

    fn users() -> (MemoryDocumentStore, ObjectIdRepository<User, MemoryCollection>) {
        let store = MemoryDocumentStore::new();
        let repo = ObjectIdRepository::new(store.collection("users"));
        (store, repo)
    }

    #[tokio::test]
    async fn test_soft_delete_twice_is_not_found() {
        let (_store, repo) = users();
        let created = repo.create(&new_user("a"), CreateOptions::default()).await.unwrap();
        let id = created.id.to_hex();

        repo.soft_delete_one_by_id(&id, WriteOptions::default())
            .await
            .unwrap();
        let err = repo
            .soft_delete_one_by_id(&id, WriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_raw_appends_soft_delete_stage() {
        let (_store, repo) = users();
        for name in ["a", "b"] {
            repo.create(&new_user(name), CreateOptions::default()).await.unwrap();
        }
        repo.soft_delete_one(&Filter::eq("name", "a"), WriteOptions::default())
            .await
            .unwrap();

        let rows = repo
            .raw(json!([{"$project": {"name": 1, "deleted_at": 1}}]), RawOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("b"));

        let rows = repo
            .raw(json!([]), RawOptions::default().with_deleted())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_object_id_is_invalid_argument() {
        let (_store, repo) = users();
        let before = repo.model().call_count();
        let err = repo
            .find_one_by_id("not-hex", ReadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert_eq!(repo.model().call_count(), before);
    }

    #[tokio::test]
    async fn test_create_honours_explicit_id() {
        let (_store, repo) = users();
        let hex = "65a1f0c2e4b0a1b2c3d4e5f6";
        let created = repo
            .create(&new_user("a"), CreateOptions::default().id(hex))
            .await
            .unwrap();
        assert_eq!(created.id.to_hex(), hex);
    }

    #[tokio::test]
    async fn test_update_overwrites_supplied_fields_only() {
        let (_store, repo) = users();
        let created = repo
            .create(
                &json!({"name": "a", "email": "a@example.com"}),
                CreateOptions::default(),
            )
            .await
            .unwrap();

        let updated = repo
            .update_one_by_id(&created.id.to_hex(), &Rename { name: "b" }, WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(updated.name, "b");
        assert_eq!(updated.email.as_deref(), Some("a@example.com"));
        assert_eq!(updated.id, created.id);
    }

    #[tokio::test]
    async fn test_update_ignores_soft_deleted_unless_asked() {
        let (_store, repo) = users();
        let created = repo.create(&new_user("a"), CreateOptions::default()).await.unwrap();
        let id = created.id.to_hex();
        repo.soft_delete_one_by_id(&id, WriteOptions::default())
            .await
            .unwrap();

        let err = repo
            .update_one_by_id(&id, &Rename { name: "b" }, WriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let updated = repo
            .update_one_by_id(&id, &Rename { name: "b" }, WriteOptions::default().with_deleted())
            .await
            .unwrap();
        assert_eq!(updated.name, "b");
        assert!(updated.deleted_at.is_deleted());
    }

    #[tokio::test]
    async fn test_delete_one_by_id_returns_snapshot() {
        let (_store, repo) = users();
        let created = repo.create(&new_user("a"), CreateOptions::default()).await.unwrap();
        let id = created.id.to_hex();

        let removed = repo
            .delete_one_by_id(&id, WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(removed, created);

        let err = repo
            .find_one_by_id(&id, ReadOptions::default().with_deleted())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_exists_with_exclude_ids() {
        let (_store, repo) = users();
        let created = repo.create(&new_user("a"), CreateOptions::default()).await.unwrap();
        let filter = Filter::eq("name", "a");

        assert!(repo.exists(&filter, CountOptions::default()).await.unwrap());
        assert!(!repo
            .exists(
                &filter,
                CountOptions::default().exclude_ids([created.id.to_hex()])
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_bulk_soft_delete_and_restore_by_ids() {
        let (_store, repo) = users();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let user = repo.create(&new_user(name), CreateOptions::default()).await.unwrap();
            ids.push(user.id.to_hex());
        }

        assert!(repo
            .soft_delete_many_by_ids(&ids[..2], BulkOptions::default())
            .await
            .unwrap());
        assert_eq!(
            repo.get_total(&Filter::new(), CountOptions::default()).await.unwrap(),
            1
        );

        assert!(repo
            .restore_many(&Filter::new(), BulkOptions::default())
            .await
            .unwrap());
        assert_eq!(
            repo.get_total(&Filter::new(), CountOptions::default()).await.unwrap(),
            3
        );

        assert!(repo
            .delete_many_by_ids(&ids, BulkOptions::default())
            .await
            .unwrap());
        assert_eq!(
            repo.get_total(&Filter::new(), CountOptions::default().with_deleted())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_update_many_skips_soft_deleted() {
        let (_store, repo) = users();
        for name in ["a", "b"] {
            repo.create(&new_user(name), CreateOptions::default()).await.unwrap();
        }
        repo.soft_delete_one(&Filter::eq("name", "a"), WriteOptions::default())
            .await
            .unwrap();

        repo.update_many(&Filter::new(), &json!({"email": "x@example.com"}), BulkOptions::default())
            .await
            .unwrap();

        let all = repo
            .find_all(&Filter::new(), ReadOptions::default().with_deleted())
            .await
            .unwrap();
        for user in all {
            match user.name.as_str() {
                "a" => assert!(user.email.is_none()),
                _ => assert_eq!(user.email.as_deref(), Some("x@example.com")),
            }
        }
    }

    #[tokio::test]
    async fn test_projection_keeps_id() {
        let (_store, repo) = users();
        repo.create(
            &json!({"name": "a", "email": "a@example.com"}),
            CreateOptions::default(),
        )
        .await
        .unwrap();

        let rows = repo
            .find_all(
                &Filter::new(),
                ReadOptions::default().select(Projection::include(["name"])),
            )
            .await
            .unwrap();
        assert_eq!(rows[0].name, "a");
        assert!(rows[0].email.is_none());
    }

    #[tokio::test]
    async fn test_join_default_relation() {
        let store = MemoryDocumentStore::new();
        let teams: StringIdRepository<Tag, _> = StringIdRepository::new(store.collection("teams"));
        teams
            .create(&json!({"label": "core"}), CreateOptions::default().id("t1"))
            .await
            .unwrap();

        let repo: ObjectIdRepository<User, _> = ObjectIdRepository::new(store.collection("users"))
            .with_relations(RelationRegistry::new().default_relation("team", Lookup::one("teams", "team")));
        repo.create(&json!({"name": "a", "team": "t1"}), CreateOptions::default())
            .await
            .unwrap();

        let plain = repo.find_one(&Filter::eq("name", "a"), ReadOptions::default()).await.unwrap();
        assert_eq!(plain.team, Some(json!("t1")));

        let joined = repo
            .find_one(&Filter::eq("name", "a"), ReadOptions::default().join(true))
            .await
            .unwrap();
        assert_eq!(joined.team.unwrap()["label"], json!("core"));

        let err = repo
            .find_all(&Filter::new(), ReadOptions::default().join(Join::Only(vec!["ghost".into()])))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert_eq!(Lookup::one("teams", "team").kind, RelationKind::One);
    }

    #[tokio::test]
    async fn test_string_ids_used_as_is() {
        let store = MemoryDocumentStore::new();
        let tags: StringIdRepository<Tag, _> = StringIdRepository::new(store.collection("tags"));

        let explicit = tags
            .create(&json!({"_id": "rust", "label": "Rust"}), CreateOptions::default())
            .await
            .unwrap();
        assert_eq!(explicit.id, "rust");

        let generated = tags
            .create(&json!({"label": "Go"}), CreateOptions::default())
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&generated.id).is_ok());

        let found = tags.find_one_by_id("rust", ReadOptions::default()).await.unwrap();
        assert_eq!(found.label, "Rust");
        assert!(tags
            .exists(&Filter::new(), CountOptions::default().exclude_ids(["rust"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_custom_marker_field() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Note {
            #[serde(rename = "_id")]
            id: String,
            #[serde(default)]
            removed_on: DeleteMarker,
        }
        impl Entity for Note {
            const NAME: &'static str = "Note";
        }

        let store = MemoryDocumentStore::new();
        let notes: StringIdRepository<Note, _> =
            StringIdRepository::new(store.collection("notes")).soft_delete_field("removed_on");
        notes
            .create(&json!({}), CreateOptions::default().id("n1"))
            .await
            .unwrap();
        let deleted = notes
            .soft_delete_one_by_id("n1", WriteOptions::default())
            .await
            .unwrap();
        assert!(deleted.removed_on.is_deleted());
        assert_eq!(notes.marker_field(), "removed_on");
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member<I> {
        #[serde(rename = "_id")]
        id: I,
        name: String,
        #[serde(default)]
        created_at: Option<DateTime<Utc>>,
        #[serde(default)]
        deleted_at: DeleteMarker,
    }

    impl<I> Entity for Member<I>
    where
        I: Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        const NAME: &'static str = "Member";
    }

    /// Contract scenarios run once per id scheme
    macro_rules! id_scheme_scenarios {
        ($module:ident, $scheme:ty) => {
            mod $module {
                use super::*;

                type Members =
                    DocumentRepository<Member<<$scheme as IdScheme>::Id>, $scheme, MemoryCollection>;

                fn members() -> (MemoryDocumentStore, Members) {
                    let store = MemoryDocumentStore::new();
                    let repo = Members::new(store.collection("members"));
                    (store, repo)
                }

                #[tokio::test]
                async fn test_create_then_find_by_id() {
                    let (_store, repo) = members();
                    let created = repo
                        .create(&new_user("a"), CreateOptions::default())
                        .await
                        .unwrap();

                    let found = repo
                        .find_one_by_id(&created.id.to_string(), ReadOptions::default())
                        .await
                        .unwrap();
                    assert!(found.deleted_at.is_active());
                    assert_eq!(found, created);
                }

                #[tokio::test]
                async fn test_soft_delete_restore_inverse() {
                    let (_store, repo) = members();
                    let created = repo
                        .create(&new_user("a"), CreateOptions::default())
                        .await
                        .unwrap();
                    let id = created.id.to_string();

                    let deleted = repo
                        .soft_delete_one_by_id(&id, WriteOptions::default())
                        .await
                        .unwrap();
                    assert!(deleted.deleted_at.is_deleted());
                    let err = repo
                        .find_one_by_id(&id, ReadOptions::default())
                        .await
                        .unwrap_err();
                    assert!(err.is_not_found());
                    let hidden = repo
                        .find_one_by_id(&id, ReadOptions::default().with_deleted())
                        .await
                        .unwrap();
                    assert!(hidden.deleted_at.timestamp().is_some());

                    let restored = repo
                        .restore_one_by_id(&id, WriteOptions::default())
                        .await
                        .unwrap();
                    assert_eq!(restored, created);
                    let all = repo
                        .find_all(&Filter::new(), ReadOptions::default())
                        .await
                        .unwrap();
                    assert_eq!(all, vec![created]);
                }

                #[tokio::test]
                async fn test_restore_of_active_entity_is_not_found() {
                    let (_store, repo) = members();
                    let created = repo
                        .create(&new_user("a"), CreateOptions::default())
                        .await
                        .unwrap();

                    let err = repo
                        .restore_one_by_id(&created.id.to_string(), WriteOptions::default())
                        .await
                        .unwrap_err();
                    assert_eq!(err.kind, RepositoryErrorKind::NotFound);
                    assert_eq!(err.operation, RepositoryOperation::Restore);
                }

                #[tokio::test]
                async fn test_default_visibility_of_find_all() {
                    let (_store, repo) = members();
                    for name in ["a", "b", "c"] {
                        repo.create(&new_user(name), CreateOptions::default())
                            .await
                            .unwrap();
                    }
                    repo.soft_delete_one(&Filter::eq("name", "b"), WriteOptions::default())
                        .await
                        .unwrap();

                    let active = repo
                        .find_all(&Filter::new(), ReadOptions::default())
                        .await
                        .unwrap();
                    assert_eq!(active.len(), 2);
                    assert!(active.iter().all(|m| m.deleted_at.is_active()));

                    let everything = repo
                        .find_all(&Filter::new(), ReadOptions::default().with_deleted())
                        .await
                        .unwrap();
                    assert_eq!(everything.len(), 3);
                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default())
                            .await
                            .unwrap(),
                        2
                    );
                }

                #[tokio::test]
                async fn test_paging_newest_first() {
                    let (_store, repo) = members();
                    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
                    for i in 0..5 {
                        repo.create(
                            &NewUser {
                                name: &format!("u{}", i),
                                created_at: Some(base + Duration::hours(i)),
                            },
                            CreateOptions::default(),
                        )
                        .await
                        .unwrap();
                    }

                    let page = repo
                        .find_all(
                            &Filter::new(),
                            ReadOptions::default()
                                .sort("created_at", SortOrder::Desc)
                                .paging(Pagination::new(0, 2)),
                        )
                        .await
                        .unwrap();
                    let names: Vec<_> = page.iter().map(|m| m.name.as_str()).collect();
                    assert_eq!(names, vec!["u4", "u3"]);
                }

                #[tokio::test]
                async fn test_paging_boundaries() {
                    let (_store, repo) = members();
                    for i in 0..5 {
                        repo.create(&new_user(&format!("u{}", i)), CreateOptions::default())
                            .await
                            .unwrap();
                    }

                    for (offset, limit, expected) in
                        [(0, 2, 2), (4, 2, 1), (5, 2, 0), (9, 3, 0), (1, 10, 4)]
                    {
                        let page = repo
                            .find_all(
                                &Filter::new(),
                                ReadOptions::default().paging(Pagination::new(offset, limit)),
                            )
                            .await
                            .unwrap();
                        assert_eq!(page.len(), expected, "offset {} limit {}", offset, limit);
                    }
                }

                #[tokio::test]
                async fn test_create_many_unique_violation() {
                    let store = MemoryDocumentStore::new();
                    store.create_unique_index("members", "name");
                    let repo = Members::new(store.collection("members"));

                    let err = repo
                        .create_many(&[new_user("x"), new_user("x")], BulkOptions::default())
                        .await
                        .unwrap_err();
                    assert_eq!(err.kind, RepositoryErrorKind::ConstraintViolation);
                    assert_eq!(err.operation, RepositoryOperation::CreateMany);

                    let stored = repo
                        .get_total(
                            &Filter::eq("name", "x"),
                            CountOptions::default().with_deleted(),
                        )
                        .await
                        .unwrap();
                    assert_eq!(stored, 0);
                }

                #[tokio::test]
                async fn test_raw_rejects_non_array_before_io() {
                    let (_store, repo) = members();
                    let before = repo.model().call_count();

                    let err = repo
                        .raw(json!({"not": "an array"}), RawOptions::default())
                        .await
                        .unwrap_err();
                    assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
                    assert_eq!(repo.model().call_count(), before);
                }

                #[tokio::test]
                async fn test_session_writes_invisible_until_commit() {
                    let (store, repo) = members();
                    let session = store.start_session();

                    repo.create(&new_user("a"), CreateOptions::default().session(&session))
                        .await
                        .unwrap();
                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default())
                            .await
                            .unwrap(),
                        0
                    );
                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default().session(&session))
                            .await
                            .unwrap(),
                        1
                    );

                    session.commit().await.unwrap();
                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default())
                            .await
                            .unwrap(),
                        1
                    );
                }

                #[tokio::test]
                async fn test_session_abort_discards_writes() {
                    let (store, repo) = members();
                    let session = store.start_session();
                    repo.create(&new_user("a"), CreateOptions::default().session(&session))
                        .await
                        .unwrap();
                    session.abort().await;

                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default().with_deleted())
                            .await
                            .unwrap(),
                        0
                    );
                }

                #[tokio::test]
                async fn test_read_only_session_commit_keeps_outside_writes() {
                    let (store, repo) = members();
                    let session = store.start_session();
                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default().session(&session))
                            .await
                            .unwrap(),
                        0
                    );

                    repo.create(&new_user("a"), CreateOptions::default())
                        .await
                        .unwrap();
                    session.commit().await.unwrap();

                    assert_eq!(
                        repo.get_total(&Filter::new(), CountOptions::default())
                            .await
                            .unwrap(),
                        1
                    );
                }
            }
        };
    }

    id_scheme_scenarios!(object_id_scheme, ObjectIdScheme);
    id_scheme_scenarios!(string_id_scheme, StringIdScheme);
}
