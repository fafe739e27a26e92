//! PostgreSQL table driver
//!
//! Rows cross the wire as `jsonb`: reads select `to_jsonb(r)` and writes
//! expand a JSON payload with `jsonb_populate_record`, so any table whose
//! columns map onto the entity's fields works without per-entity SQL.
//!
//! Column and table names are validated as plain identifiers and quoted;
//! every value is a bound parameter.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::Mutex;

use super::driver::RelationalDriver;
use super::query::{RawSql, Relation, SelectQuery, TableSchema};
use crate::repository::{
    downcast_session, project, Document, FilterCondition, FilterOperator, FilterValue,
    RelationKind, RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult,
    SortOrder, TransactionHandle,
};

const BACKEND: &str = "postgres";

/// SQLSTATE raised when a statement is cancelled by `statement_timeout`
const QUERY_CANCELED: &str = "57014";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("Identifier regex should be valid")
});

/// Caller-owned PostgreSQL transaction
///
/// Pass it through repository options; finish it with [`commit`] or
/// [`rollback`]. Using it after either fails with `InvalidArgument`.
///
/// [`commit`]: PgTransaction::commit
/// [`rollback`]: PgTransaction::rollback
pub struct PgTransaction {
    inner: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

impl PgTransaction {
    /// Begin a transaction on a pooled connection
    pub async fn begin(pool: &PgPool) -> RepositoryResult<Self> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| classify(e, RepositoryOperation::Transaction))?;
        Ok(Self {
            inner: Mutex::new(Some(tx)),
        })
    }

    /// Commit the transaction
    pub async fn commit(&self) -> RepositoryResult<()> {
        let operation = RepositoryOperation::Transaction;
        let tx = self.inner.lock().await.take().ok_or_else(|| finished(operation))?;
        tx.commit().await.map_err(|e| classify(e, operation))
    }

    /// Roll the transaction back
    pub async fn rollback(&self) -> RepositoryResult<()> {
        let operation = RepositoryOperation::Transaction;
        let tx = self.inner.lock().await.take().ok_or_else(|| finished(operation))?;
        tx.rollback().await.map_err(|e| classify(e, operation))
    }
}

impl fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTransaction").finish_non_exhaustive()
    }
}

impl TransactionHandle for PgTransaction {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn finished(operation: RepositoryOperation) -> RepositoryError {
    RepositoryError::invalid_argument(operation, "transaction is already finished")
}

/// Map a sqlx error onto the repository taxonomy
fn classify(err: sqlx::Error, operation: RepositoryOperation) -> RepositoryError {
    use sqlx::Error as E;
    match err {
        E::Database(db_err) => {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                RepositoryError::constraint_violation(operation, db_err.to_string())
            } else if db_err.code().as_deref() == Some(QUERY_CANCELED) {
                RepositoryError::timeout(operation, db_err.to_string())
            } else {
                RepositoryError::database_error(operation, db_err.to_string())
            }
        }
        E::PoolTimedOut => RepositoryError::timeout(operation, "Connection pool timed out"),
        E::PoolClosed => RepositoryError::connection_failed(operation, "Connection pool is closed"),
        E::WorkerCrashed => RepositoryError::connection_failed(operation, "Database worker crashed"),
        E::Io(e) => RepositoryError::connection_failed(operation, e.to_string()),
        E::Tls(e) => RepositoryError::connection_failed(operation, format!("TLS error: {}", e)),
        E::ColumnDecode { index, source } => RepositoryError::serialization_error(
            operation,
            format!("Failed to decode column {}: {}", index, source),
        ),
        E::Decode(e) => RepositoryError::serialization_error(operation, e.to_string()),
        other => RepositoryError::database_error(operation, other.to_string()),
    }
}

/// Quote a validated identifier
fn ident(name: &str, operation: RepositoryOperation) -> RepositoryResult<String> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(RepositoryError::invalid_argument(
            operation,
            format!("'{}' is not a valid column or table name", name),
        ))
    }
}

/// Text form of a key value, as compared against `column::text`
fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::String(s) => builder.push_bind(s.clone()),
        FilterValue::Integer(i) => builder.push_bind(*i),
        FilterValue::Float(f) => builder.push_bind(*f),
        FilterValue::Boolean(b) => builder.push_bind(*b),
        FilterValue::Timestamp(ts) => builder.push_bind(*ts),
        FilterValue::StringList(list) => builder.push_bind(list.clone()),
        FilterValue::IntegerList(list) => builder.push_bind(list.clone()),
        FilterValue::Null => builder.push_bind(Option::<String>::None),
    };
}

/// Column reference, cast to text when compared against a string
fn column_for(column: &str, value: &FilterValue) -> String {
    match value {
        FilterValue::String(_) | FilterValue::StringList(_) => format!("{}::text", column),
        _ => column.to_string(),
    }
}

fn push_condition(
    builder: &mut QueryBuilder<'static, Postgres>,
    condition: &FilterCondition,
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    let column = ident(&condition.field, operation)?;
    let value = &condition.value;

    match condition.operator {
        FilterOperator::IsNull => {
            builder.push(column).push(" IS NULL");
        }
        FilterOperator::IsNotNull => {
            builder.push(column).push(" IS NOT NULL");
        }
        FilterOperator::Equal if *value == FilterValue::Null => {
            builder.push(column).push(" IS NULL");
        }
        FilterOperator::NotEqual if *value == FilterValue::Null => {
            builder.push(column).push(" IS NOT NULL");
        }
        FilterOperator::In | FilterOperator::NotIn => {
            if !value.is_list() {
                return Err(RepositoryError::invalid_argument(
                    operation,
                    format!("'{}' needs a list value for {}", condition.field, condition.operator),
                ));
            }
            if condition.operator == FilterOperator::NotIn {
                builder.push("NOT (");
            } else {
                builder.push("(");
            }
            builder.push(column_for(&column, value)).push(" = ANY(");
            push_value(builder, value);
            builder.push("))");
        }
        FilterOperator::Like => {
            let FilterValue::String(pattern) = value else {
                return Err(RepositoryError::invalid_argument(
                    operation,
                    format!("'{}' needs a string pattern for LIKE", condition.field),
                ));
            };
            builder
                .push(format!("{}::text LIKE ", column))
                .push_bind(pattern.clone());
        }
        comparison => {
            if value.is_list() {
                return Err(RepositoryError::invalid_argument(
                    operation,
                    format!("'{}' cannot compare against a list", condition.field),
                ));
            }
            let symbol = match comparison {
                FilterOperator::Equal => "=",
                FilterOperator::NotEqual => "<>",
                FilterOperator::GreaterThan => ">",
                FilterOperator::GreaterThanOrEqual => ">=",
                FilterOperator::LessThan => "<",
                _ => "<=",
            };
            builder
                .push(column_for(&column, value))
                .push(format!(" {} ", symbol));
            push_value(builder, value);
        }
    }
    Ok(())
}

/// Append ` WHERE ...` for a query, soft-delete visibility included
fn push_where(
    builder: &mut QueryBuilder<'static, Postgres>,
    query: &SelectQuery,
    schema: &TableSchema,
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    builder.push(" WHERE TRUE");
    for condition in &query.conditions {
        builder.push(" AND ");
        push_condition(builder, condition, operation)?;
    }
    if !query.with_deleted {
        builder
            .push(" AND ")
            .push(ident(&schema.deleted_column, operation)?)
            .push(" IS NULL");
    }
    Ok(())
}

/// Correlated sub-select loading one relation for row alias `r`
fn relation_sql(relation: &Relation, operation: RepositoryOperation) -> RepositoryResult<String> {
    let table = ident(&relation.table, operation)?;
    let local = ident(&relation.local_column, operation)?;
    let foreign = ident(&relation.foreign_column, operation)?;
    let deleted = ident(&relation.deleted_column, operation)?;
    let predicate = format!("j.{} = r.{} AND j.{} IS NULL", foreign, local, deleted);
    Ok(match relation.kind {
        RelationKind::One => format!(
            "(SELECT to_jsonb(j) FROM {} j WHERE {} LIMIT 1)",
            table, predicate
        ),
        RelationKind::Many => format!(
            "COALESCE((SELECT jsonb_agg(to_jsonb(j)) FROM {} j WHERE {}), '[]'::jsonb)",
            table, predicate
        ),
    })
}

fn into_document(value: Value, operation: RepositoryOperation) -> RepositoryResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RepositoryError::serialization_error(
            operation,
            format!("expected a row object, got {}", other),
        )),
    }
}

fn decode_row(row: &PgRow, operation: RepositoryOperation) -> RepositoryResult<Document> {
    let Json(value) = row
        .try_get::<Json<Value>, _>("row")
        .map_err(|e| classify(e, operation))?;
    into_document(value, operation)
}

/// Bind a JSON parameter of a raw statement with its natural SQL type
fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(Json(other.clone())),
    }
}

/// Whether a statement yields rows that can be wrapped in a sub-select
fn is_query(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_lowercase();
    head.starts_with("select") || head.starts_with("with") || head.starts_with("values")
}

/// One table of a PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgTableDriver {
    pool: PgPool,
    schema: TableSchema,
}

impl PgTableDriver {
    /// Driver over a table reachable through `pool`
    pub fn new(pool: PgPool, schema: TableSchema) -> Self {
        Self { pool, schema }
    }

    fn table(&self, operation: RepositoryOperation) -> RepositoryResult<String> {
        ident(&self.schema.table, operation)
    }

    async fn fetch(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Vec<PgRow>> {
        let result = match downcast_session::<PgTransaction>(session, operation)? {
            Some(tx) => {
                let mut guard = tx.inner.lock().await;
                let conn = guard.as_mut().ok_or_else(|| finished(operation))?;
                query.fetch_all(&mut **conn).await
            }
            None => query.fetch_all(&self.pool).await,
        };
        result.map_err(|e| classify(e, operation))
    }

    async fn execute(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<u64> {
        let result = match downcast_session::<PgTransaction>(session, operation)? {
            Some(tx) => {
                let mut guard = tx.inner.lock().await;
                let conn = guard.as_mut().ok_or_else(|| finished(operation))?;
                query.execute(&mut **conn).await
            }
            None => query.execute(&self.pool).await,
        };
        result
            .map(|done| done.rows_affected())
            .map_err(|e| classify(e, operation))
    }

    /// Quoted column list shared by a set of rows, key excluded when asked
    fn columns<'a, I>(
        rows: I,
        skip: Option<&str>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<String>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let names: BTreeSet<&str> = rows
            .into_iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .filter(|name| Some(*name) != skip)
            .collect();
        let quoted = names
            .into_iter()
            .map(|name| ident(name, operation))
            .collect::<RepositoryResult<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }

    fn select_sql(
        &self,
        query: &SelectQuery,
        operation: RepositoryOperation,
    ) -> RepositoryResult<QueryBuilder<'static, Postgres>> {
        let mut builder = QueryBuilder::new("SELECT to_jsonb(r) AS row");
        for (index, (_, relation)) in query.relations.iter().enumerate() {
            builder.push(format!(", {} AS rel_{}", relation_sql(relation, operation)?, index));
        }
        builder.push(" FROM ").push(self.table(operation)?).push(" r");
        push_where(&mut builder, query, &self.schema, operation)?;

        if !query.order.is_empty() {
            let mut terms = Vec::with_capacity(query.order.len());
            for (column, order) in &query.order {
                let direction = match order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                terms.push(format!("r.{} {}", ident(column, operation)?, direction));
            }
            builder.push(" ORDER BY ").push(terms.join(", "));
        }
        push_paging(&mut builder, query, operation)?;
        Ok(builder)
    }
}

/// Append LIMIT / OFFSET, rejecting values PostgreSQL's `bigint` cannot hold
fn push_paging(
    builder: &mut QueryBuilder<'static, Postgres>,
    query: &SelectQuery,
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    let bigint = |value: u64, clause: &str| {
        i64::try_from(value).map_err(|_| {
            RepositoryError::invalid_argument(
                operation,
                format!("{} {} is out of range", clause, value),
            )
        })
    };
    if let Some(take) = query.take {
        builder.push(" LIMIT ").push_bind(bigint(take, "LIMIT")?);
    }
    if let Some(skip) = query.skip {
        builder.push(" OFFSET ").push_bind(bigint(skip, "OFFSET")?);
    }
    Ok(())
}

#[async_trait]
impl RelationalDriver for PgTableDriver {
    type Handle = PgPool;

    fn handle(&self) -> &PgPool {
        &self.pool
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn find(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        let operation = RepositoryOperation::FindAll;
        let mut builder = self.select_sql(query, operation)?;
        let rows = self.fetch(builder.build(), session, operation).await?;

        let selected: Vec<&str> = query.select.iter().map(String::as_str).collect();
        let mut output = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut document = decode_row(row, operation)?;
            if !selected.is_empty() {
                project(&mut document, &selected, &[self.schema.primary_key.as_str()]);
            }
            for (index, (name, _)) in query.relations.iter().enumerate() {
                if !selected.is_empty() && !selected.contains(&name.as_str()) {
                    continue;
                }
                let related = row
                    .try_get::<Option<Json<Value>>, _>(format!("rel_{}", index).as_str())
                    .map_err(|e| classify(e, operation))?
                    .map(|Json(value)| value)
                    .unwrap_or(Value::Null);
                document.insert(name.clone(), related);
            }
            output.push(document);
        }
        Ok(output)
    }

    async fn count(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        let operation = RepositoryOperation::Count;
        let mut builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM ");
        builder.push(self.table(operation)?);
        push_where(&mut builder, query, &self.schema, operation)?;

        let rows = self.fetch(builder.build(), session, operation).await?;
        let total: i64 = match rows.first() {
            Some(row) => row.try_get("total").map_err(|e| classify(e, operation))?,
            None => 0,
        };
        Ok(total.max(0) as u64)
    }

    async fn insert(
        &self,
        rows: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        let operation = RepositoryOperation::CreateMany;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table(operation)?;
        let columns = Self::columns(&rows, None, operation)?;
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        let mut builder = QueryBuilder::new(format!(
            "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{table}, "
        ));
        builder
            .push_bind(Json(payload))
            .push(format!(") RETURNING to_jsonb({}.*) AS row", table));

        let stored = self.fetch(builder.build(), session, operation).await?;
        stored.iter().map(|row| decode_row(row, operation)).collect()
    }

    async fn save(
        &self,
        row: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>> {
        let operation = RepositoryOperation::Update;
        let table = self.table(operation)?;
        let key_column = ident(&self.schema.primary_key, operation)?;
        let key = row
            .get(&self.schema.primary_key)
            .filter(|v| !v.is_null())
            .map(key_text)
            .ok_or_else(|| {
                RepositoryError::invalid_argument(
                    operation,
                    format!("row has no '{}' value", self.schema.primary_key),
                )
            })?;
        let columns = Self::columns([&row], Some(&self.schema.primary_key), operation)?;
        if columns.is_empty() {
            let query = SelectQuery::new(vec![FilterCondition::eq(self.schema.primary_key.as_str(), key)])
                .with_deleted(true)
                .first();
            return Ok(self.find(&query, session).await?.into_iter().next());
        }

        let mut builder = QueryBuilder::new(format!(
            "UPDATE {table} SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
        ));
        builder
            .push_bind(Json(Value::Object(row)))
            .push(format!(")) WHERE {}::text = ", key_column))
            .push_bind(key)
            .push(format!(" RETURNING to_jsonb({}.*) AS row", table));

        let saved = self.fetch(builder.build(), session, operation).await?;
        saved.first().map(|row| decode_row(row, operation)).transpose()
    }

    async fn save_many(
        &self,
        rows: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        let operation = RepositoryOperation::UpdateMany;
        if rows.is_empty() {
            return Ok(0);
        }
        let table = self.table(operation)?;
        let key_column = ident(&self.schema.primary_key, operation)?;
        let columns = Self::columns(&rows, Some(&self.schema.primary_key), operation)?;
        if columns.is_empty() {
            return Ok(0);
        }
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        let mut builder = QueryBuilder::new(format!(
            "UPDATE {table} AS t SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, v.doc)) \
             FROM jsonb_array_elements("
        ));
        builder.push_bind(Json(payload)).push(format!(
            ") AS v(doc) WHERE t.{}::text = v.doc->>'{}'",
            key_column, self.schema.primary_key
        ));

        self.execute(builder.build(), session, operation).await
    }

    async fn update_where(
        &self,
        query: &SelectQuery,
        changes: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        let operation = RepositoryOperation::UpdateMany;
        let table = self.table(operation)?;
        let columns = Self::columns([changes], None, operation)?;
        if columns.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::new(format!(
            "UPDATE {table} SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
        ));
        builder.push_bind(Json(Value::Object(changes.clone()))).push("))");
        push_where(&mut builder, query, &self.schema, operation)?;

        self.execute(builder.build(), session, operation).await
    }

    async fn delete(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        let operation = RepositoryOperation::DeleteMany;
        let table = self.table(operation)?;
        let mut builder = QueryBuilder::new(format!("DELETE FROM {}", table));
        push_where(&mut builder, query, &self.schema, operation)?;
        builder.push(format!(" RETURNING to_jsonb({}.*) AS row", table));

        let removed = self.fetch(builder.build(), session, operation).await?;
        removed.iter().map(|row| decode_row(row, operation)).collect()
    }

    /// Run caller-written SQL
    ///
    /// Row-returning statements (`SELECT`, `WITH`, `VALUES`) are wrapped so
    /// every row comes back as a JSON object; anything else is executed and
    /// yields an empty list.
    async fn raw(
        &self,
        statement: &RawSql,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        let operation = RepositoryOperation::Raw;
        let sql = statement.sql.trim().trim_end_matches(';');

        if is_query(sql) {
            let wrapped = format!("SELECT to_jsonb(q) AS row FROM ({}) q", sql);
            let query = statement
                .params
                .iter()
                .fold(sqlx::query(&wrapped), bind_json);
            let rows = self.fetch(query, session, operation).await?;
            rows.iter().map(|row| decode_row(row, operation)).collect()
        } else {
            let query = statement.params.iter().fold(sqlx::query(sql), bind_json);
            self.execute(query, session, operation).await?;
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn where_sql(query: &SelectQuery) -> RepositoryResult<String> {
        let mut builder = QueryBuilder::new("SELECT 1 FROM \"users\"");
        push_where(&mut builder, query, &TableSchema::new("users"), RepositoryOperation::FindAll)?;
        Ok(builder.sql().to_string())
    }

    #[test]
    fn test_identifier_validation() {
        assert_eq!(ident("created_at", RepositoryOperation::FindAll).unwrap(), "\"created_at\"");
        let err = ident("name; DROP TABLE users", RepositoryOperation::FindAll).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert!(ident("1abc", RepositoryOperation::FindAll).is_err());
    }

    #[test]
    fn test_paging_out_of_bigint_range() {
        let mut query = SelectQuery::default();
        query.take = Some(10);
        query.skip = Some(20);
        let mut builder = QueryBuilder::new("SELECT 1");
        push_paging(&mut builder, &query, RepositoryOperation::FindAll).unwrap();
        assert_eq!(builder.sql(), "SELECT 1 LIMIT $1 OFFSET $2");

        query.skip = Some(u64::MAX);
        let mut builder = QueryBuilder::new("SELECT 1");
        let err = push_paging(&mut builder, &query, RepositoryOperation::FindAll).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert!(err.message.contains("OFFSET"));

        query.skip = None;
        query.take = Some(i64::MAX as u64 + 1);
        let mut builder = QueryBuilder::new("SELECT 1");
        assert!(push_paging(&mut builder, &query, RepositoryOperation::FindAll).is_err());
    }

    #[test]
    fn test_where_adds_visibility_clause() {
        let sql = where_sql(&SelectQuery::default()).unwrap();
        assert_eq!(sql, "SELECT 1 FROM \"users\" WHERE TRUE AND \"deleted_at\" IS NULL");

        let sql = where_sql(&SelectQuery::default().with_deleted(true)).unwrap();
        assert_eq!(sql, "SELECT 1 FROM \"users\" WHERE TRUE");
    }

    #[test]
    fn test_conditions_bind_values() {
        let query = SelectQuery::new(vec![
            FilterCondition::eq("name", "a"),
            FilterCondition::gte("age", 18),
            FilterCondition::is_in("role", vec!["admin", "owner"]),
            FilterCondition::eq("team_id", FilterValue::Null),
        ])
        .with_deleted(true);
        let sql = where_sql(&query).unwrap();
        assert_eq!(
            sql,
            "SELECT 1 FROM \"users\" WHERE TRUE AND \"name\"::text = $1 AND \"age\" >= $2 \
             AND (\"role\"::text = ANY($3)) AND \"team_id\" IS NULL"
        );
    }

    #[test]
    fn test_in_requires_list() {
        let query = SelectQuery::new(vec![FilterCondition::is_in("role", "admin")]);
        let err = where_sql(&query).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
    }

    #[test]
    fn test_relation_sql_skips_deleted() {
        let sql = relation_sql(
            &Relation::has_many("posts", "author_id"),
            RepositoryOperation::Join,
        )
        .unwrap();
        assert!(sql.starts_with("COALESCE((SELECT jsonb_agg(to_jsonb(j)) FROM \"posts\" j"));
        assert!(sql.contains("j.\"author_id\" = r.\"id\" AND j.\"deleted_at\" IS NULL"));
    }

    #[test]
    fn test_is_query() {
        assert!(is_query("  select * from users"));
        assert!(is_query("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_query("UPDATE users SET name = $1"));
    }
}
