//! Statement execution and transaction connection lifecycle.
//!
//! [`Database`] compiles queries and runs them on connections from a
//! [`ConnectionSource`]. Statements outside a transaction borrow a
//! connection for one statement. Statements bound to a transaction share a
//! slot keyed by the handle id:
//!
//! - the outermost BEGIN acquires the connection and binds it to the slot
//! - every statement locks the slot, so concurrent statements of one
//!   transaction serialize on its single connection
//! - the terminal COMMIT or ROLLBACK releases the connection exactly once,
//!   whether it succeeded or not

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::lock::Mutex as AsyncMutex;
use sqlrel_core::{
    Connection, ConnectionSource, Connector, Cx, Error, Outcome, QueryResult, Result, Row, Schema,
    TransactionErrorKind, Value,
};
use sqlrel_pool::Pool;
use sqlrel_query::{CompiledQuery, Compiler, DialectKind, Phrasing, Query, TransactionHandle, TxRole};

use crate::config::DatabaseConfig;

/// What a statement produced, after the query's row transforms ran.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    /// Key generated by an INSERT with `returning`, whether the dialect
    /// returned it natively or the driver reported it as last-insert-id
    pub generated_key: Option<Value>,
}

enum Slot<C> {
    Empty,
    Bound(C),
    Released,
}

type SharedSlot<C> = Arc<AsyncMutex<Slot<C>>>;

/// Executes queries against a connection source with one dialect.
pub struct Database<S: ConnectionSource> {
    source: S,
    schema: Arc<Schema>,
    phrasing: Box<dyn Phrasing>,
    slots: Mutex<HashMap<u64, SharedSlot<S::Conn>>>,
}

impl<S: ConnectionSource> std::fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.phrasing.name())
            .field("open_transactions", &self.open_transactions())
            .finish_non_exhaustive()
    }
}

fn attach_sql(err: Error, sql: &str) -> Error {
    match err {
        Error::Query(mut q) if q.sql.is_none() => {
            q.sql = Some(sql.to_string());
            Error::Query(q)
        }
        other => other,
    }
}

impl<K: Connector> Database<Pool<K>> {
    /// Build a pooled database from configuration.
    pub fn connect(connector: K, schema: Arc<Schema>, config: &DatabaseConfig) -> Result<Self> {
        let pool = Pool::new(connector, config.pool.clone())?;
        Ok(Self::new(pool, schema, config.dialect))
    }
}

impl<S: ConnectionSource> Database<S> {
    pub fn new(source: S, schema: Arc<Schema>, dialect: DialectKind) -> Self {
        Self::with_phrasing(source, schema, dialect.phrasing())
    }

    /// Use a custom phrasing implementation.
    pub fn with_phrasing(source: S, schema: Arc<Schema>, phrasing: Box<dyn Phrasing>) -> Self {
        Self {
            source,
            schema,
            phrasing,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn phrasing(&self) -> &dyn Phrasing {
        self.phrasing.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(self.phrasing.as_ref(), &self.schema)
    }

    /// Validate and compile without executing.
    pub fn compile(&self, query: &Query) -> Result<CompiledQuery> {
        self.compiler().compile(query)
    }

    /// Statement text with values inlined, for diagnostics.
    pub fn render_inline(&self, query: &Query) -> Result<String> {
        self.compiler().render_inline(query)
    }

    /// Transactions currently holding a slot.
    pub fn open_transactions(&self) -> usize {
        self.lock_slots().len()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<u64, SharedSlot<S::Conn>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, id: u64) -> SharedSlot<S::Conn> {
        let mut slots = self.lock_slots();
        Arc::clone(
            slots
                .entry(id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(Slot::Empty))),
        )
    }

    /// Drop the map entry for `id` if it still points at `slot`.
    fn discard_slot(&self, id: u64, slot: &SharedSlot<S::Conn>) {
        let mut slots = self.lock_slots();
        if slots.get(&id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&id);
        }
    }

    /// Compile and execute one query.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(kind = ?query.kind(), table = %query.table()))]
    pub async fn execute(&self, cx: &Cx, query: &Query) -> Outcome<QueryOutput, Error> {
        let compiled = match self.compile(query) {
            Ok(compiled) => compiled,
            Err(e) => return Outcome::Err(e),
        };
        if compiled.noop {
            tracing::trace!("nested transaction marker, nothing to send");
            return Outcome::Ok(QueryOutput::default());
        }

        let result = match query.transaction() {
            None => self.run_detached(cx, &compiled).await,
            Some(handle) => {
                let role = query.tx_role().unwrap_or(TxRole::Statement);
                self.run_in_transaction(cx, handle, role, &compiled).await
            }
        };
        result.map(|r| Self::output(query, &compiled, r))
    }

    /// Run every `CREATE TABLE` statement of the schema, in entity name order.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn create_tables(&self, cx: &Cx) -> Outcome<(), Error> {
        let mut statements = Vec::new();
        for entity in self.schema.entities() {
            match self.compiler().create_table(entity) {
                Ok(sql) => statements.push(sql),
                Err(e) => return Outcome::Err(e),
            }
        }
        for sql in statements {
            match self.execute(cx, &Query::raw(sql, Vec::new())).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }

    async fn run_detached(&self, cx: &Cx, compiled: &CompiledQuery) -> Outcome<QueryResult, Error> {
        let conn = match self.source.acquire(cx).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let outcome = conn.query(cx, &compiled.sql, &compiled.params).await;
        self.source.release(conn);
        match outcome {
            Outcome::Err(e) => Outcome::Err(attach_sql(e, &compiled.sql)),
            other => other,
        }
    }

    async fn run_in_transaction(
        &self,
        cx: &Cx,
        handle: &Arc<TransactionHandle>,
        role: TxRole,
        compiled: &CompiledQuery,
    ) -> Outcome<QueryResult, Error> {
        let slot = self.slot(handle.id());
        let mut guard = slot.lock().await;

        // Another statement may have closed the handle while this one waited.
        if let Err(e) = handle.validate(role) {
            if matches!(*guard, Slot::Empty) {
                drop(guard);
                self.discard_slot(handle.id(), &slot);
            }
            return Outcome::Err(e);
        }

        if matches!(*guard, Slot::Empty) {
            tracing::debug!(tx = handle.id(), "acquiring transaction connection");
            let failed = match self.source.acquire(cx).await {
                Outcome::Ok(conn) => {
                    *guard = Slot::Bound(conn);
                    None
                }
                Outcome::Err(e) => Some(Outcome::Err(e)),
                Outcome::Cancelled(r) => Some(Outcome::Cancelled(r)),
                Outcome::Panicked(p) => Some(Outcome::Panicked(p)),
            };
            if let Some(failed) = failed {
                drop(guard);
                self.discard_slot(handle.id(), &slot);
                return failed;
            }
        }

        let outcome = match &*guard {
            Slot::Bound(conn) => conn.query(cx, &compiled.sql, &compiled.params).await,
            Slot::Empty | Slot::Released => {
                return Outcome::Err(Error::transaction(
                    TransactionErrorKind::ConnectionUnavailable,
                    format!("transaction {} has no connection", handle.id()),
                ));
            }
        };
        let succeeded = matches!(outcome, Outcome::Ok(_));

        match role {
            TxRole::Begin if succeeded => {
                handle.mark_begun();
                handle.mark_active();
            }
            TxRole::Begin => {
                if let Slot::Bound(conn) = std::mem::replace(&mut *guard, Slot::Empty) {
                    tracing::warn!(tx = handle.id(), "BEGIN failed, returning its connection");
                    self.source.release(conn);
                }
                drop(guard);
                self.discard_slot(handle.id(), &slot);
            }
            TxRole::Terminal => {
                if let Slot::Bound(conn) = std::mem::replace(&mut *guard, Slot::Released) {
                    if !succeeded {
                        tracing::warn!(tx = handle.id(), "releasing connection after failed terminal statement");
                    }
                    self.source.release(conn);
                }
                handle.mark_closed();
                drop(guard);
                self.lock_slots().remove(&handle.id());
                tracing::debug!(tx = handle.id(), "transaction closed");
            }
            TxRole::Nested | TxRole::Statement => {}
        }

        match outcome {
            Outcome::Err(e) => Outcome::Err(attach_sql(e, &compiled.sql)),
            other => other,
        }
    }

    fn output(query: &Query, compiled: &CompiledQuery, result: QueryResult) -> QueryOutput {
        let generated_key = match compiled.returning.first() {
            None => None,
            Some(_) if compiled.emulate_returning => result.last_insert_id.map(Value::Int),
            Some(column) => result
                .rows
                .first()
                .and_then(|row| row.get_by_name(column).or_else(|| row.get(0)))
                .cloned(),
        };
        QueryOutput {
            fields: result.fields,
            rows: query.apply_transforms(result.rows),
            rows_affected: result.rows_affected,
            generated_key,
        }
    }
}
