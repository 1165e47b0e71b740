//! Core types and traits for sqlrel.
//!
//! This crate provides the foundations the query and session layers share:
//!
//! - `Value` and `Row` for parameters and results
//! - `Error` covering build, resolution, transaction and execution failures
//! - `Connection`, `Connector` and `ConnectionSource` driver contracts
//! - `EntityDef`, `FieldDef` and `RelationDescriptor` registered in a `Schema`
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod field;
pub mod model;
pub mod relationship;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use connection::{Connection, ConnectionSource, Connector, QueryResult};
pub use error::{
    BuildError, BuildErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, Error,
    PoolError, PoolErrorKind, QueryError, QueryErrorKind, RelationError, RelationErrorKind,
    ResolutionError, ResolutionErrorKind, Result, TransactionError, TransactionErrorKind,
    TypeError,
};
pub use field::FieldDef;
pub use model::EntityDef;
pub use relationship::{RelationDescriptor, RelationKeys, RelationKind};
pub use row::{ColumnInfo, Row};
pub use schema::{Schema, SchemaBuilder};
pub use types::SqlType;
pub use value::{GroupKey, Value};
