//! sqlrel - immutable SQL queries with relation-path joins and eager loading.
//!
//! sqlrel lets applications describe entities and their relationships once,
//! then build queries that reference related fields by path. It provides:
//!
//! - Immutable, shareable query values built by chaining
//! - Join inference from dotted relation paths (`"author.name"`)
//! - Condition maps with operator suffixes (`"age[gte]"`, `"name[icontains]"`)
//! - Dialect-aware compilation for PostgreSQL, MySQL and SQLite
//! - Transactions bound to one pooled connection, with nesting
//! - Eager loading of relation paths with one statement per level
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlrel::prelude::*;
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityDef::new("author", "authors")
//!             .field(FieldDef::id("id"))
//!             .field(FieldDef::new("name", SqlType::Text))
//!             .relation(RelationDescriptor::to_many("books", "book")),
//!     )
//!     .entity(
//!         EntityDef::new("book", "books")
//!             .field(FieldDef::id("id"))
//!             .field(FieldDef::new("title", SqlType::Text))
//!             .field(FieldDef::new("author_id", SqlType::BigInt))
//!             .relation(RelationDescriptor::to_one("author", "author")),
//!     )
//!     .build()?;
//!
//! let db = Arc::new(Database::connect(connector, schema, &DatabaseConfig::new(DialectKind::Postgres))?);
//!
//! // SELECT "books".* FROM "books" INNER JOIN "authors" AS "author" ...
//! let query = Query::select("books")
//!     .where_map(&json!({"author.name[icontains]": "le guin"}))?
//!     .order_by("-title");
//! let rows = db.execute(&cx, &query).await;
//!
//! let mut session = Session::new(Arc::clone(&db));
//! let authors = session.fetch(&cx, &Query::select("authors").with("books")).await;
//! ```
//!
//! # Crates
//!
//! - `sqlrel-core`: values, rows, errors, schema and driver contracts
//! - `sqlrel-query`: queries, conditions, join resolution and compilation
//! - `sqlrel-pool`: connection pooling
//! - `sqlrel-session`: execution, transactions and relation loading

use std::sync::Arc;

pub use sqlrel_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Core types
    BuildErrorKind,
    ColumnInfo,
    Connection,
    ConnectionSource,
    Connector,
    EntityDef,
    Error,
    FieldDef,
    GroupKey,
    QueryErrorKind,
    QueryResult,
    RelationDescriptor,
    RelationErrorKind,
    RelationKeys,
    RelationKind,
    ResolutionErrorKind,
    Result,
    Row,
    Schema,
    SchemaBuilder,
    SqlType,
    TransactionErrorKind,
    Value,
};

pub use sqlrel_query::{
    AggregateFn, Column, CompiledQuery, Compiler, Condition, DialectKind, JoinKind, MySql,
    Operator, OrderBy, OrderDirection, Phrasing, Postgres, Query, QueryKind, Sqlite, Standard,
    TransactionHandle, TxRole,
};

pub use sqlrel_pool::{Pool, PoolConfig, PoolStats, PooledConnection};

pub use sqlrel_session::{
    Database, DatabaseConfig, FlushOp, Instance, InstanceId, QueryOutput, RelationCache,
    RelationChange, Session,
};

/// Open a pooled database and a session over it.
///
/// The database is shared; further sessions can be opened with
/// [`Session::new`] on a clone of the returned `Arc`.
pub fn open<K: Connector>(
    connector: K,
    schema: Arc<Schema>,
    config: &DatabaseConfig,
) -> Result<(Arc<Database<Pool<K>>>, Session<Pool<K>>)> {
    let db = Arc::new(Database::connect(connector, schema, config)?);
    let session = Session::new(Arc::clone(&db));
    Ok((db, session))
}

/// Commonly used items.
///
/// ```ignore
/// use sqlrel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Cx,
        Outcome,
        // Schema
        EntityDef,
        FieldDef,
        RelationDescriptor,
        RelationKind,
        Schema,
        SqlType,
        // Values and errors
        Error,
        Result,
        Row,
        Value,
        // Query building
        Condition,
        DialectKind,
        Query,
        // Execution
        Connection,
        Connector,
        Database,
        DatabaseConfig,
        InstanceId,
        Pool,
        PoolConfig,
        Session,
    };
}
