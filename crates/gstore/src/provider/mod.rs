//! Storage provider over a relational engine.
//!
//! Reads go through [`Cursor`]s bound to a category: the provider compiles as
//! much of the cursor program as SQL preserves and evaluates the rest in
//! memory. Writes are validated against the [`Schema`] before any statement
//! is sent. Writes spanning several tables run in one transaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

#[cfg(feature = "postgres")]
use crate::PgConnector;
use crate::{
    CategoryExecutor, CategorySchema, Connection, ConnectionPool, Connector, Cursor, Error,
    ID_FIELD, IdentifierPool, Param, Query, Record, Result, Schema, SchemaValidator, ShardSuffix,
    SqlIdentifierStore, StrictValidator, Transaction, ValidateOptions,
    cursor::{Operation, memory},
    record_id,
    sql::{
        compile_select, delete_statement, details_statement, insert_statement, link_statement,
        unlink_statement, update_by_id_statement, update_statement,
    },
};

const CATEGORY_OF: &str = "SELECT \"Category\".\"Name\" FROM \"Identifier\", \"Category\" \
     WHERE \"Identifier\".\"Category\" = \"Category\".\"Id\" AND \"Identifier\".\"Id\" = $1";

/// Tuning of a [`RelationalProvider`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Upper bound on simultaneously open connections.
    pub max_connections: usize,
    /// Shard whose identifiers this node hands out.
    pub shard: ShardSuffix,
    /// Size a refill restores the identifier pool to.
    pub id_capacity: u64,
    /// Refill once fewer than this percentage of `id_capacity` is left.
    pub refill_percent: u8,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            shard: ShardSuffix::default(),
            id_capacity: 1000,
            refill_percent: 30,
        }
    }
}

/// One identifier or several, as accepted by the link operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdList(pub Vec<u64>);

impl From<u64> for IdList {
    fn from(id: u64) -> Self {
        Self(vec![id])
    }
}

impl From<Vec<u64>> for IdList {
    fn from(ids: Vec<u64>) -> Self {
        Self(ids)
    }
}

impl From<&[u64]> for IdList {
    fn from(ids: &[u64]) -> Self {
        Self(ids.to_vec())
    }
}

impl<const N: usize> From<[u64; N]> for IdList {
    fn from(ids: [u64; N]) -> Self {
        Self(ids.to_vec())
    }
}

pub struct RelationalProvider<C: Connector> {
    pool: ConnectionPool<C>,
    schema: Arc<Schema>,
    validator: Arc<dyn SchemaValidator>,
    ids: IdentifierPool,
}

/// The provider over PostgreSQL.
#[cfg(feature = "postgres")]
pub type PostgresProvider = RelationalProvider<PgConnector>;

impl<C: Connector> RelationalProvider<C> {
    /// Creates a provider validating writes with a [`StrictValidator`].
    /// No connection is opened until the first operation.
    pub fn new(connector: C, schema: Schema, options: ProviderOptions) -> Self {
        let schema = Arc::new(schema);
        Self {
            pool: ConnectionPool::new(connector, options.max_connections),
            validator: Arc::new(StrictValidator::new(Arc::clone(&schema))),
            schema,
            ids: IdentifierPool::new(options.shard, options.id_capacity, options.refill_percent),
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub const fn identifiers(&self) -> &IdentifierPool {
        &self.ids
    }

    pub const fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    fn validate(&self, category: &str, record: &Record, patch: bool) -> Result<()> {
        match self
            .validator
            .validate("category", category, record, ValidateOptions { patch })
        {
            Some(problem) => Err(Error::InvalidSchema(problem)),
            None => Ok(()),
        }
    }

    fn category(&self, name: &str) -> Result<&CategorySchema> {
        self.schema.category(name)
    }

    /// A cursor over every record of `category`.
    pub fn cursor(self: &Arc<Self>, category: &str) -> Cursor {
        let cursor = Cursor::for_category(Arc::clone(self) as Arc<dyn CategoryExecutor>, category);
        match self.schema.category(category) {
            Ok(schema) => cursor.definition(schema.definition().clone()),
            Err(_) => cursor,
        }
    }

    /// A cursor over the records of `category` matching `query`.
    pub fn select(self: &Arc<Self>, category: &str, query: Query) -> Cursor {
        self.cursor(category).select(query)
    }

    /// Name of the category the global identifier `id` was created in.
    pub async fn category_of(&self, id: u64) -> Result<String> {
        let rows = {
            let mut conn = self.pool.acquire().await?;
            conn.query(CATEGORY_OF, &[Param::id(id)]).await?
        };
        rows.first()
            .and_then(|row| row.get("Name"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::NotFound(format!("No object with Id {id} available")))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub async fn get(&self, id: u64) -> Result<Record> {
        let category = self.category_of(id).await?;
        let query = Query::new().with(ID_FIELD, id);
        self.execute(&category, vec![Operation::Select(query), Operation::One])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("No object with Id {id} available")))
    }

    /// Records linked to `id` through its `Many` field `field`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub async fn get_details(&self, id: u64, field: &str) -> Result<Vec<Record>> {
        let left = self.category_of(id).await?;
        let right = self
            .category(&left)?
            .definition()
            .many_target(field)
            .ok_or_else(|| {
                Error::NotFound(format!("No 'Many' field {field} in object with Id {id} available"))
            })?;
        let stmt = details_statement(&left, right, field, id)?;
        let mut conn = self.pool.acquire().await?;
        conn.query(&stmt.sql, &stmt.params).await
    }

    /// Overwrites the fields present in `record`, which must carry its `Id`.
    /// Included sub-records are updated in the same transaction.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn set(&self, record: Record) -> Result<()> {
        let id = record_id(&record).ok_or_else(|| Error::InvalidArgument("Id is not provided".to_owned()))?;
        let category = self.category_of(id).await?;
        self.validate(&category, &record, false)?;
        let definition = self.category(&category)?.definition();

        let mut statements = Vec::new();
        for (included, mut value) in definition.include_data(&record) {
            value.insert(ID_FIELD.to_owned(), Value::from(id));
            let included_definition = self.category(&included)?.definition();
            statements.extend(update_by_id_statement(&included, included_definition, &value, id)?);
        }
        statements.extend(update_by_id_statement(&category, definition, &record, id)?);

        let mut conn = self.pool.acquire().await?;
        let mut tx = Transaction::begin(&mut conn).await?;
        let mut outcome = Ok(());
        for stmt in &statements {
            if let Err(err) = tx.connection().execute(&stmt.sql, &stmt.params).await {
                outcome = Err(err);
                break;
            }
        }
        tx.finish(outcome).await
    }

    /// Stores `record` in `category` and returns its new identifier.
    ///
    /// A global category draws the identifier from the shared pool and
    /// registers it together with the rows in one transaction. Any other
    /// category lets the engine assign it.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, record)))]
    pub async fn create(&self, category: &str, record: Record) -> Result<u64> {
        self.validate(category, &record, false)?;
        let schema = self.category(category)?;
        if schema.ignored {
            return Err(Error::InvalidCategoryType(format!(
                "Record creation in ignored category: {category}"
            )));
        }
        if !schema.included_by.is_empty() {
            return Err(Error::InvalidCreationOperation(format!(
                "Cannot create instances of category {category} individually, it is included in categories {}",
                schema.included_by.join(", ")
            )));
        }

        let mut conn = self.pool.acquire().await?;
        if schema.global {
            let mut tx = Transaction::begin(&mut conn).await?;
            let outcome = self.create_global(tx.connection(), category, schema, &record).await;
            return tx.finish(outcome).await;
        }

        let stmt = insert_statement(category, schema.definition(), &record, None)?;
        let rows = conn.query(&stmt.sql, &stmt.params).await?;
        rows.first()
            .and_then(record_id)
            .ok_or_else(|| Error::backend(format!("insert into {category} returned no Id")))
    }

    async fn create_global<Cn: Connection>(
        &self,
        conn: &mut Cn,
        category: &str,
        schema: &CategorySchema,
        record: &Record,
    ) -> Result<u64> {
        let id = self.ids.take_id(&mut SqlIdentifierStore::new(&mut *conn)).await?;
        for (included, value) in schema.definition().include_data(record) {
            let stmt = insert_statement(&included, self.category(&included)?.definition(), &value, Some(id))?;
            conn.query(&stmt.sql, &stmt.params).await?;
        }
        let stmt = insert_statement(category, schema.definition(), record, Some(id))?;
        conn.query(&stmt.sql, &stmt.params).await?;
        self.ids
            .commit_id(&mut SqlIdentifierStore::new(conn), id, category, record)
            .await?;
        Ok(id)
    }

    /// Applies `patch` to every record of `category` matching `query`.
    /// Returns the number of rows changed.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, patch)))]
    pub async fn update(&self, category: &str, query: Query, patch: Record) -> Result<u64> {
        self.validate(category, &patch, true)?;
        let definition = self.category(category)?.definition();
        let stmt = update_statement(category, definition, &query, &patch)?;
        let mut conn = self.pool.acquire().await?;
        conn.execute(&stmt.sql, &stmt.params).await
    }

    /// Deletes the records of `category` matching `query`, together with
    /// their included sub-records. Returns the number of records deleted.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub async fn delete(&self, category: &str, query: Query) -> Result<u64> {
        let schema = self.category(category)?;
        if !schema.included_by.is_empty() {
            return Err(Error::InvalidDeletionOperation(format!(
                "Cannot delete instances of category {category}, it is included in categories {}",
                schema.included_by.join(", ")
            )));
        }
        let includes: Vec<&str> = schema.definition().includes().map(|(_, target)| target).collect();
        let stmt = delete_statement(category, &includes, &query)?;
        let mut conn = self.pool.acquire().await?;
        conn.execute(&stmt.sql, &stmt.params).await
    }

    fn many_target<'a>(&'a self, category: &str, field: &str) -> Result<&'a str> {
        self.category(category)?
            .definition()
            .many_target(field)
            .ok_or_else(|| Error::NotFound(format!("No 'Many' field {field} in category {category}")))
    }

    /// Links `from` in `category` to each target through the `Many` field `field`.
    // TODO: link records whose identifiers route to another server.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, to)))]
    pub async fn link_details(&self, category: &str, field: &str, from: u64, to: impl Into<IdList>) -> Result<()> {
        let right = self.many_target(category, field)?;
        let stmt = link_statement(category, right, field, from, &to.into().0)?;
        let mut conn = self.pool.acquire().await?;
        conn.execute(&stmt.sql, &stmt.params).await?;
        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, to)))]
    pub async fn unlink_details(&self, category: &str, field: &str, from: u64, to: impl Into<IdList>) -> Result<()> {
        let right = self.many_target(category, field)?;
        let stmt = unlink_statement(category, right, field, from, &to.into().0)?;
        let mut conn = self.pool.acquire().await?;
        conn.execute(&stmt.sql, &stmt.params).await?;
        Ok(())
    }

    /// Claims one identifier of this node's shard outside any creation.
    pub async fn take_id(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        self.ids.take_id(&mut SqlIdentifierStore::new(&mut *conn)).await
    }

    /// Tops up this node's identifier pool. Returns the number added.
    pub async fn refill_identifiers(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = Transaction::begin(&mut conn).await?;
        let outcome = self.ids.refill(&mut SqlIdentifierStore::new(tx.connection())).await;
        tx.finish(outcome).await
    }

    /// Returns an identifier left in `Init` by an interrupted creation.
    pub async fn reclaim_identifier(&self, id: u64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.ids.reclaim(&mut SqlIdentifierStore::new(&mut *conn), id).await
    }

    /// The schema this provider validates against, in its JSON form.
    pub fn schema_sources(&self) -> Result<Value> {
        serde_json::to_value(&*self.schema).map_err(|e| Error::InvalidSchema(e.to_string()))
    }

    /// Closes the connection pool. Pending and later operations fail.
    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl<C: Connector> CategoryExecutor for RelationalProvider<C> {
    async fn execute(&self, category: &str, program: Vec<Operation>) -> Result<Vec<Record>> {
        self.category(category)?;
        let (stmt, remainder) = compile_select(category, program)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %stmt.sql, in_memory = remainder.len(), "compiled cursor program");
        let rows = {
            let mut conn = self.pool.acquire().await?;
            conn.query(&stmt.sql, &stmt.params).await?
        };
        if remainder.is_empty() {
            Ok(rows)
        } else {
            memory::evaluate(remainder, rows).await
        }
    }
}
