//! Query construction and compilation for sqlrel.
//!
//! `sqlrel-query` is the **statement layer**. It turns immutable [`Query`]
//! nodes into SQL text plus positional parameters.
//!
//! # Role In The Architecture
//!
//! - **Queries**: [`Query`] values are never mutated; every builder call
//!   returns a new node sharing untouched clauses with its parent.
//! - **Conditions**: [`Condition`] trees built in code or parsed from
//!   JSON mappings (`{"age": {"gte": 21}}`, `{"name[icontains]": "x"}`).
//! - **Join resolution**: [`JoinPlan`] turns dotted relation paths into
//!   aliased joins using the relation keys of a [`Schema`](sqlrel_core::Schema).
//! - **Phrasing**: [`Phrasing`] supplies the dialect fragments (quoting,
//!   placeholders, pattern operators) while [`Compiler`] owns the grammar.
//! - **Transactions**: [`TransactionHandle`] tracks nesting depth while
//!   queries are built and phase while they execute.
//!
//! Execution lives in `sqlrel-session`.

pub mod clause;
pub mod compile;
pub mod condition;
pub mod phrasing;
pub mod query;
pub mod resolve;
pub mod transaction;

pub use clause::{AggregateFn, Column, JoinKind, JoinRequest, OrderBy, OrderDirection, Projection};
pub use compile::{CompiledQuery, Compiler};
pub use condition::{Condition, KNOWN_OPERATORS, Operator};
pub use phrasing::{
    DialectKind, MySql, PatternKind, PatternSyntax, Phrasing, Postgres, Sqlite, Standard,
    escape_like,
};
pub use query::{Query, QueryKind, RowTransform};
pub use resolve::{FieldRef, FieldScope, JoinPlan, ResolvedJoin};
pub use transaction::{TransactionHandle, TxPhase, TxRole};
