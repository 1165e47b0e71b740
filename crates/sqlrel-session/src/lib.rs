//! Execution, transactions and relation loading for sqlrel.
//!
//! `sqlrel-session` is the **execution layer**. It runs compiled queries on
//! pooled connections and keeps fetched rows as entity instances whose
//! relations can be navigated, mutated and eager-loaded.
//!
//! # Role In The Architecture
//!
//! - **Database**: compiles queries with the configured dialect, binds
//!   transaction statements to a single connection and releases it after
//!   the terminal statement.
//! - **Session**: an arena of [`Instance`]s with an identity map, relation
//!   caches and in-flight relation changes flushed on save.
//! - **Eager loading**: `Query::with(path)` fetches each relation level with
//!   one IN-list statement and attaches results to their owners.
//!
//! # Example
//!
//! ```ignore
//! let db = Arc::new(Database::connect(connector, schema, &config)?);
//! let mut session = Session::new(Arc::clone(&db));
//!
//! let authors = session.fetch(&cx, &Query::select("authors").with("books")).await?;
//! for book in session.related(authors[0], "books")? {
//!     println!("{:?}", session.instance(*book)?.get("title"));
//! }
//! ```

/// Unwrap an `Outcome`, returning anything but `Ok` from the enclosing
/// async fn.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            ::sqlrel_core::Outcome::Ok(v) => v,
            ::sqlrel_core::Outcome::Err(e) => return ::sqlrel_core::Outcome::Err(e),
            ::sqlrel_core::Outcome::Cancelled(r) => return ::sqlrel_core::Outcome::Cancelled(r),
            ::sqlrel_core::Outcome::Panicked(p) => return ::sqlrel_core::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside an async fn returning `Outcome`.
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => return ::sqlrel_core::Outcome::Err(e),
        }
    };
}

pub mod config;
pub mod database;
pub mod eager;
pub mod instance;
pub mod pending;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use config::DatabaseConfig;
pub use database::{Database, QueryOutput};
pub use instance::{Instance, InstanceId, RelationCache};
pub use pending::{FlushOp, RelationChange};
pub use session::Session;
