//! Error types for sqlrel operations.
//!
//! Errors fall into two families. Caller defects (build, resolution,
//! transaction-state and relation errors) are raised synchronously while a
//! query is constructed or compiled and never reach a connection. Execution
//! errors (query, connection, pool) come back from the driver asynchronously
//! and carry the underlying cause.

use std::fmt;

/// The primary error type for all sqlrel operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed query construction (unknown operator, bad key syntax)
    Build(BuildError),
    /// Relation path, field or key resolution failed during compilation
    Resolution(ResolutionError),
    /// Transaction handle used in an invalid state
    Transaction(TransactionError),
    /// Relation cache or in-flight change misuse
    Relation(RelationError),
    /// Statement execution failed in the driver
    Query(QueryError),
    /// Connection-related errors (connect, disconnect)
    Connection(ConnectionError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// Type conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// Operator suffix or operator map key is not known
    UnknownOperator,
    /// Condition key or value has an unusable shape
    InvalidCondition,
    /// Query kind does not support the requested clause
    InvalidClause,
    /// Entity or relation definition is malformed
    InvalidDefinition,
}

#[derive(Debug)]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// Path segment names a relation absent on its host entity
    NoSuchRelation,
    /// Field is not declared on the entity it was resolved against
    NoSuchField,
    /// No entity is registered for a table or name
    UnknownEntity,
    /// Bare field exists on more than one joined table
    AmbiguousField,
    /// Both sides of a relationship declare keys that disagree
    KeyMismatch,
    /// Relation descriptor cannot be resolved to concrete keys
    InvalidRelation,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Commit or rollback without a bound transaction
    MissingTransaction,
    /// Statement issued before the handle's begin executed
    BeginNotExecuted,
    /// Statement issued against a closed handle
    Closed,
    /// The connection slot of a handle could not be used
    ConnectionUnavailable,
}

#[derive(Debug)]
pub struct RelationError {
    pub kind: RelationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationErrorKind {
    /// Relation cache accessed before it was loaded
    NotLoaded,
    /// Instance id is not known to the session
    UnknownInstance,
    /// Instance belongs to a different entity than the relation targets
    WrongEntity,
    /// Operation needs a persisted instance (primary key)
    NotPersisted,
    /// Operation does not apply to this relation kind
    UnsupportedKind,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Pool exhausted (no available connections)
    Exhausted,
    /// Pool is closed
    Closed,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Build error for an unknown operator.
    pub fn unknown_operator(op: &str, known: &[&str]) -> Self {
        Error::Build(BuildError {
            kind: BuildErrorKind::UnknownOperator,
            message: format!("unknown operator '{}' (known: {})", op, known.join(", ")),
        })
    }

    /// Build error with an arbitrary kind.
    pub fn build(kind: BuildErrorKind, message: impl Into<String>) -> Self {
        Error::Build(BuildError {
            kind,
            message: message.into(),
        })
    }

    /// Resolution error with an arbitrary kind.
    pub fn resolution(kind: ResolutionErrorKind, message: impl Into<String>) -> Self {
        Error::Resolution(ResolutionError {
            kind,
            message: message.into(),
        })
    }

    /// Transaction-state error with an arbitrary kind.
    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    /// Relation error with an arbitrary kind.
    pub fn relation(kind: RelationErrorKind, message: impl Into<String>) -> Self {
        Error::Relation(RelationError {
            kind,
            message: message.into(),
        })
    }

    /// Execution error for a statement that failed in the driver.
    pub fn query(kind: QueryErrorKind, sql: Option<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql,
            sqlstate: None,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (deadlock, serialization, pool exhausted, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted),
            _ => false,
        }
    }

    /// Does this error indicate a defect in the calling code rather than a
    /// runtime failure? These errors are raised before any statement runs.
    pub fn is_caller_defect(&self) -> bool {
        matches!(
            self,
            Error::Build(_) | Error::Resolution(_) | Error::Transaction(_) | Error::Relation(_)
        )
    }

    /// Resolution error kind, if this is a resolution error.
    pub fn resolution_kind(&self) -> Option<ResolutionErrorKind> {
        match self {
            Error::Resolution(r) => Some(r.kind),
            _ => None,
        }
    }

    /// Transaction error kind, if this is a transaction-state error.
    pub fn transaction_kind(&self) -> Option<TransactionErrorKind> {
        match self {
            Error::Transaction(t) => Some(t.kind),
            _ => None,
        }
    }

    /// Relation error kind, if this is a relation error.
    pub fn relation_kind(&self) -> Option<RelationErrorKind> {
        match self {
            Error::Relation(r) => Some(r.kind),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Build(e) => write!(f, "Build error: {}", e.message),
            Error::Resolution(e) => write!(f, "Resolution error: {}", e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Relation(e) => write!(f, "Relation error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<BuildError> for Error {
    fn from(err: BuildError) -> Self {
        Error::Build(err)
    }
}

impl From<ResolutionError> for Error {
    fn from(err: ResolutionError) -> Self {
        Error::Resolution(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for sqlrel operations.
pub type Result<T> = std::result::Result<T, Error>;
