//! Driver-facing connection contracts.
//!
//! - [`Connection`] executes one statement at a time and reports rows,
//!   affected counts and generated keys
//! - [`Connector`] opens and closes driver connections
//! - [`ConnectionSource`] hands out connections for transactions and plain
//!   statements (implemented by the pool)
//!
//! All async operations take a `Cx` context for cancellation and budget
//! handling and return an asupersync `Outcome`.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Everything a driver reports back for one executed statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names of the result set, in order
    pub fields: Vec<String>,
    /// Returned rows (empty for statements without a result set)
    pub rows: Vec<Row>,
    /// Rows inserted, updated or deleted
    pub rows_affected: u64,
    /// Generated key of the last inserted row, when the driver knows it
    pub last_insert_id: Option<i64>,
}

impl QueryResult {
    /// A result carrying rows only.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let fields = rows
            .first()
            .map(|r| r.column_names().map(str::to_string).collect())
            .unwrap_or_default();
        Self {
            fields,
            rows,
            rows_affected: 0,
            last_insert_id: None,
        }
    }

    /// A result for a statement that only touched rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }
}

/// A database connection capable of executing statements.
///
/// Implementations must be `Send + Sync`; a connection bound to a
/// transaction is shared by every statement of that transaction.
///
/// # Example
///
/// ```rust,ignore
/// let result = conn.query(&cx, "SELECT * FROM people WHERE id = $1", &[Value::Int(1)]).await;
/// ```
pub trait Connection: Send + Sync {
    /// Execute one statement with positional parameters.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send;

    /// Ping the server to check the connection is alive.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Check if the connection is still usable.
    fn is_valid(&self, cx: &Cx) -> impl Future<Output = bool> + Send {
        async { matches!(self.ping(cx).await, Outcome::Ok(())) }
    }
}

/// Opens and closes driver connections.
pub trait Connector: Send + Sync {
    type Conn: Connection;

    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send;

    fn disconnect(
        &self,
        cx: &Cx,
        conn: Self::Conn,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// Source of connections for statement execution.
///
/// `release` takes the connection by value, so a connection cannot be
/// released twice.
pub trait ConnectionSource: Send + Sync {
    type Conn: Connection;

    fn acquire(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send;

    fn release(&self, conn: Self::Conn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_from_rows_takes_field_names() {
        let rows = vec![Row::new(vec!["id".into()], vec![Value::Int(1)])];
        let result = QueryResult::from_rows(rows);
        assert_eq!(result.fields, vec!["id".to_string()]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.last_insert_id, None);
    }

    #[test]
    fn affected_result_carries_generated_key() {
        let result = QueryResult::affected(1).with_last_insert_id(42);
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(42));
        assert!(result.rows.is_empty());
    }
}
