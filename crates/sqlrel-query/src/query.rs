//! Immutable query nodes.
//!
//! A [`Query`] never changes after construction. Every builder method
//! returns a new node that shares all untouched clauses with its parent
//! through `Arc`s, so cloning and deriving queries is cheap.
//!
//! # Example
//!
//! ```ignore
//! let adults = Query::select("people")
//!     .where_map(&json!({"age": {"gte": 21}}))?
//!     .order_by("-name")
//!     .limit(10);
//! ```

use std::fmt;
use std::sync::Arc;

use sqlrel_core::{Result, Row, Value};

use crate::clause::{Column, JoinKind, JoinRequest, OrderBy, Projection};
use crate::condition::Condition;
use crate::transaction::{TransactionHandle, TxRole};

/// Kind of statement a query compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
    Begin,
    Commit,
    Rollback,
}

impl QueryKind {
    pub const fn is_transaction_control(self) -> bool {
        matches!(self, QueryKind::Begin | QueryKind::Commit | QueryKind::Rollback)
    }
}

/// Row-to-row function applied to results after execution.
#[derive(Clone)]
pub struct RowTransform(Arc<dyn Fn(Row) -> Row + Send + Sync>);

impl RowTransform {
    pub fn apply(&self, row: Row) -> Row {
        (self.0)(row)
    }
}

impl fmt::Debug for RowTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowTransform(..)")
    }
}

#[derive(Debug)]
struct RawSql {
    sql: String,
    params: Vec<Value>,
}

/// An immutable query node.
#[derive(Debug, Clone)]
pub struct Query {
    kind: QueryKind,
    table: Arc<str>,
    projection: Arc<Projection>,
    condition: Option<Arc<Condition>>,
    joins: Arc<Vec<JoinRequest>>,
    order: Arc<Vec<OrderBy>>,
    group_by: Arc<Vec<String>>,
    limit: Option<u64>,
    offset: Option<u64>,
    rows: Arc<Vec<Vec<(String, Value)>>>,
    returning: Arc<Vec<String>>,
    eager: Arc<Vec<String>>,
    transforms: Arc<Vec<RowTransform>>,
    raw: Option<Arc<RawSql>>,
    tx: Option<Arc<TransactionHandle>>,
    tx_role: Option<TxRole>,
}

impl Query {
    fn base(kind: QueryKind, table: &str) -> Self {
        Self {
            kind,
            table: Arc::from(table),
            projection: Arc::new(Projection::All),
            condition: None,
            joins: Arc::new(Vec::new()),
            order: Arc::new(Vec::new()),
            group_by: Arc::new(Vec::new()),
            limit: None,
            offset: None,
            rows: Arc::new(Vec::new()),
            returning: Arc::new(Vec::new()),
            eager: Arc::new(Vec::new()),
            transforms: Arc::new(Vec::new()),
            raw: None,
            tx: None,
            tx_role: Some(TxRole::Statement),
        }
    }

    pub fn select(table: &str) -> Self {
        Self::base(QueryKind::Select, table)
    }

    pub fn insert(table: &str) -> Self {
        Self::base(QueryKind::Insert, table)
    }

    pub fn update(table: &str) -> Self {
        Self::base(QueryKind::Update, table)
    }

    pub fn delete(table: &str) -> Self {
        Self::base(QueryKind::Delete, table)
    }

    /// A statement passed to the driver verbatim.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        let mut q = Self::base(QueryKind::Raw, "");
        q.raw = Some(Arc::new(RawSql {
            sql: sql.into(),
            params,
        }));
        q
    }

    /// Open a new transaction.
    pub fn begin_transaction() -> Self {
        Self::base(QueryKind::Raw, "").begin()
    }

    // ==================== Accessors ====================

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_deref()
    }

    pub fn join_requests(&self) -> &[JoinRequest] {
        &self.joins
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn grouping(&self) -> &[String] {
        &self.group_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Assignment rows: one per inserted row, or the single SET list of an
    /// update.
    pub fn value_rows(&self) -> &[Vec<(String, Value)>] {
        &self.rows
    }

    pub fn returning_columns(&self) -> &[String] {
        &self.returning
    }

    pub fn eager_paths(&self) -> &[String] {
        &self.eager
    }

    pub fn raw_sql(&self) -> Option<(&str, &[Value])> {
        self.raw
            .as_deref()
            .map(|raw| (raw.sql.as_str(), raw.params.as_slice()))
    }

    pub fn transaction(&self) -> Option<&Arc<TransactionHandle>> {
        self.tx.as_ref()
    }

    /// Role of this query within its transaction. `None` for a commit or
    /// rollback issued on a handle that had already reached depth zero.
    pub fn tx_role(&self) -> Option<TxRole> {
        self.tx_role
    }

    /// Apply the transform pipeline to result rows.
    pub fn apply_transforms(&self, rows: Vec<Row>) -> Vec<Row> {
        if self.transforms.is_empty() {
            return rows;
        }
        rows.into_iter()
            .map(|row| self.transforms.iter().fold(row, |row, t| t.apply(row)))
            .collect()
    }

    // ==================== Builders ====================

    /// AND a condition onto the WHERE clause.
    #[must_use]
    pub fn filter(&self, condition: Condition) -> Query {
        let mut next = self.clone();
        next.condition = Some(Arc::new(match self.condition.as_deref() {
            Some(existing) => existing.clone().and(condition),
            None => condition,
        }));
        next
    }

    /// AND a JSON condition mapping onto the WHERE clause.
    ///
    /// Fails immediately on unknown operators or malformed keys.
    pub fn where_map(&self, map: &serde_json::Value) -> Result<Query> {
        Ok(self.filter(Condition::from_json(map)?))
    }

    /// Append an ordering: `"name"`, `"-name"` or `"author.name"`.
    #[must_use]
    pub fn order_by(&self, key: &str) -> Query {
        self.push_order(OrderBy::parse(key))
    }

    #[must_use]
    pub fn order_by_desc(&self, field: &str) -> Query {
        self.push_order(OrderBy::desc(field))
    }

    fn push_order(&self, entry: OrderBy) -> Query {
        let mut next = self.clone();
        let mut order = (*self.order).clone();
        order.push(entry);
        next.order = Arc::new(order);
        next
    }

    #[must_use]
    pub fn limit(&self, n: u64) -> Query {
        let mut next = self.clone();
        next.limit = Some(n);
        next
    }

    #[must_use]
    pub fn offset(&self, n: u64) -> Query {
        let mut next = self.clone();
        next.offset = Some(n);
        next
    }

    /// Replace the GROUP BY fields.
    #[must_use]
    pub fn group_by(&self, fields: &[&str]) -> Query {
        let mut next = self.clone();
        next.group_by = Arc::new(fields.iter().map(|f| (*f).to_string()).collect());
        next
    }

    /// Inner-join a relation path.
    #[must_use]
    pub fn join(&self, path: &str) -> Query {
        self.push_join(path, JoinKind::Inner, None)
    }

    /// Left-join a relation path.
    #[must_use]
    pub fn join_left(&self, path: &str) -> Query {
        self.push_join(path, JoinKind::Left, None)
    }

    /// Inner-join a relation path with an extra ON predicate, ANDed onto
    /// the key equality. Bare fields in `on` refer to the joined entity.
    #[must_use]
    pub fn join_on(&self, path: &str, on: Condition) -> Query {
        self.push_join(path, JoinKind::Inner, Some(on))
    }

    fn push_join(&self, path: &str, kind: JoinKind, on: Option<Condition>) -> Query {
        let mut next = self.clone();
        let mut joins = (*self.joins).clone();
        joins.push(JoinRequest {
            path: path.to_string(),
            kind,
            on,
        });
        next.joins = Arc::new(joins);
        next
    }

    /// Project the given field references.
    #[must_use]
    pub fn columns(&self, fields: &[&str]) -> Query {
        let mut next = self.clone();
        next.projection = Arc::new(Projection::Columns(
            fields.iter().map(|f| Column::Field((*f).to_string())).collect(),
        ));
        next
    }

    /// Append an aggregate or field column to the projection.
    #[must_use]
    pub fn column(&self, column: Column) -> Query {
        let mut next = self.clone();
        let mut cols = match &*self.projection {
            Projection::All => Vec::new(),
            Projection::Columns(cols) => cols.clone(),
        };
        cols.push(column);
        next.projection = Arc::new(Projection::Columns(cols));
        next
    }

    /// Set the assigned values (INSERT row or UPDATE SET list).
    #[must_use]
    pub fn values<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Query
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut next = self.clone();
        next.rows = Arc::new(vec![collect_pairs(pairs)]);
        next
    }

    /// Alias of [`values`](Self::values) reading naturally on updates.
    #[must_use]
    pub fn set<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Query
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.values(pairs)
    }

    /// Append one more row to a multi-row INSERT.
    #[must_use]
    pub fn add_row<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Query
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut next = self.clone();
        let mut rows = (*self.rows).clone();
        rows.push(collect_pairs(pairs));
        next.rows = Arc::new(rows);
        next
    }

    /// Request columns back from an INSERT, UPDATE or DELETE.
    #[must_use]
    pub fn returning(&self, fields: &[&str]) -> Query {
        let mut next = self.clone();
        next.returning = Arc::new(fields.iter().map(|f| (*f).to_string()).collect());
        next
    }

    /// Eager-load a relation path with the results.
    #[must_use]
    pub fn with(&self, path: &str) -> Query {
        let mut next = self.clone();
        let mut eager = (*self.eager).clone();
        if !eager.iter().any(|p| p == path) {
            eager.push(path.to_string());
        }
        next.eager = Arc::new(eager);
        next
    }

    /// Append a row transform applied after execution.
    #[must_use]
    pub fn transform<F>(&self, f: F) -> Query
    where
        F: Fn(Row) -> Row + Send + Sync + 'static,
    {
        let mut next = self.clone();
        let mut transforms = (*self.transforms).clone();
        transforms.push(RowTransform(Arc::new(f)));
        next.transforms = Arc::new(transforms);
        next
    }

    // ==================== Transactions ====================

    /// Bind this query to the transaction of `other` (or unbind it when
    /// `other` has none).
    #[must_use]
    pub fn chain(&self, other: &Query) -> Query {
        let mut next = self.clone();
        next.tx = other.tx.clone();
        next
    }

    /// Bind this query to `handle`.
    #[must_use]
    pub fn bind(&self, handle: &Arc<TransactionHandle>) -> Query {
        let mut next = self.clone();
        next.tx = Some(Arc::clone(handle));
        next
    }

    fn control(&self, kind: QueryKind, tx: Option<Arc<TransactionHandle>>, role: Option<TxRole>) -> Query {
        let mut q = Self::base(kind, "");
        q.tx = tx;
        q.tx_role = role;
        q
    }

    /// Begin a transaction, or nest one level deeper into the bound one.
    ///
    /// Only the outermost begin emits SQL. Nesting increments the shared
    /// handle's depth when this query is built, not when it executes.
    #[must_use]
    pub fn begin(&self) -> Query {
        match &self.tx {
            Some(handle) if handle.is_open_for_nesting() => {
                handle.enter();
                self.control(QueryKind::Begin, Some(Arc::clone(handle)), Some(TxRole::Nested))
            }
            _ => self.control(
                QueryKind::Begin,
                Some(Arc::new(TransactionHandle::new())),
                Some(TxRole::Begin),
            ),
        }
    }

    /// Commit one nesting level; the outermost commit emits SQL and closes
    /// the handle.
    ///
    /// Building the commit decrements the shared handle's depth. Build it
    /// once per level: a second `commit()` on the same query ends another
    /// level.
    #[must_use]
    pub fn commit(&self) -> Query {
        self.finish(QueryKind::Commit)
    }

    /// Roll back one nesting level; the outermost rollback emits SQL and
    /// closes the handle.
    ///
    /// Like [`Query::commit`], building it decrements the shared handle's
    /// depth.
    #[must_use]
    pub fn rollback(&self) -> Query {
        self.finish(QueryKind::Rollback)
    }

    fn finish(&self, kind: QueryKind) -> Query {
        match &self.tx {
            Some(handle) => {
                let role = handle.exit();
                self.control(kind, Some(Arc::clone(handle)), role)
            }
            None => self.control(kind, None, Some(TxRole::Terminal)),
        }
    }
}

fn collect_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Vec<(String, Value)>
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutators_leave_the_original_untouched() {
        let base = Query::select("people");
        let derived = base
            .filter(Condition::eq("id", 1_i64))
            .order_by("-name")
            .limit(5)
            .offset(2)
            .group_by(&["team_id"])
            .join("team")
            .columns(&["id", "name"])
            .with("team")
            .transform(|row| row);

        assert!(base.condition().is_none());
        assert!(base.ordering().is_empty());
        assert_eq!(base.limit_value(), None);
        assert_eq!(base.offset_value(), None);
        assert!(base.grouping().is_empty());
        assert!(base.join_requests().is_empty());
        assert_eq!(base.projection(), &Projection::All);
        assert!(base.eager_paths().is_empty());

        assert_eq!(derived.limit_value(), Some(5));
        assert_eq!(derived.ordering(), &[OrderBy::desc("name")]);
        assert_eq!(derived.eager_paths(), &["team".to_string()]);
    }

    #[test]
    fn unchanged_clauses_are_shared() {
        let base = Query::select("people").order_by("name");
        let derived = base.limit(3);
        assert!(Arc::ptr_eq(&base.order, &derived.order));
        let reordered = base.order_by("age");
        assert!(!Arc::ptr_eq(&base.order, &reordered.order));
        assert_eq!(base.ordering().len(), 1);
    }

    #[test]
    fn filters_are_anded() {
        let q = Query::select("people")
            .filter(Condition::eq("a", 1_i64))
            .where_map(&json!({"b": 2}))
            .unwrap();
        assert_eq!(
            q.condition(),
            Some(&Condition::All(vec![
                Condition::eq("a", 1_i64),
                Condition::eq("b", 2_i64)
            ]))
        );
    }

    #[test]
    fn where_map_reports_unknown_operators_at_build_time() {
        let err = Query::select("people")
            .where_map(&json!({"age[near]": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("'near'"));
    }

    #[test]
    fn nested_begin_and_commit_track_depth() {
        let outer = Query::begin_transaction();
        let handle = Arc::clone(outer.transaction().unwrap());
        assert_eq!(outer.tx_role(), Some(TxRole::Begin));

        let inner = outer.begin();
        assert_eq!(inner.tx_role(), Some(TxRole::Nested));
        assert_eq!(handle.depth(), 2);

        let inner_commit = inner.commit();
        assert_eq!(inner_commit.tx_role(), Some(TxRole::Nested));
        let outer_commit = inner_commit.commit();
        assert_eq!(outer_commit.tx_role(), Some(TxRole::Terminal));
        assert!(handle.needs_release());

        let extra = outer_commit.commit();
        assert_eq!(extra.tx_role(), None);
    }

    #[test]
    fn building_a_commit_twice_ends_two_levels() {
        let inner = Query::begin_transaction().begin();
        let handle = Arc::clone(inner.transaction().unwrap());
        assert_eq!(handle.depth(), 2);

        let first = inner.commit();
        assert_eq!(first.tx_role(), Some(TxRole::Nested));
        let second = inner.commit();
        assert_eq!(second.tx_role(), Some(TxRole::Terminal));
        assert_eq!(handle.depth(), 0);

        let rolled = Query::begin_transaction();
        let _ = rolled.rollback();
        assert_eq!(rolled.transaction().unwrap().depth(), 0);
    }

    #[test]
    fn chained_queries_share_the_handle() {
        let tx = Query::begin_transaction();
        let q = Query::select("people").chain(&tx);
        assert!(Arc::ptr_eq(q.transaction().unwrap(), tx.transaction().unwrap()));
        assert_eq!(q.tx_role(), Some(TxRole::Statement));
    }

    #[test]
    fn transforms_run_in_order() {
        let q = Query::select("people")
            .transform(|row| row.with_value("n", 1_i64))
            .transform(|row| {
                let n = row.get_by_name("n").and_then(Value::as_i64).unwrap_or(0);
                row.with_value("n", n + 1)
            });
        let rows = q.apply_transforms(vec![Row::new(vec![], vec![])]);
        assert_eq!(rows[0].get_by_name("n"), Some(&Value::Int(2)));
    }
}
