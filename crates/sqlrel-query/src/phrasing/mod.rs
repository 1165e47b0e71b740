//! Dialect phrasing.
//!
//! A [`Phrasing`] supplies the backend-specific fragments: identifier
//! quoting, placeholders, literal escaping, type names and pattern-matching
//! operators. The statement grammar itself lives in
//! [`Compiler`](crate::Compiler); dialects can only change the fragments it
//! asks for, never the statement structure.

mod mysql;
mod postgres;
mod sqlite;
mod standard;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlrel_core::{ConfigError, Error, SqlType, Value};

pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use standard::Standard;

/// Family of pattern-matching operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Like,
    Regex,
}

/// How a dialect spells a pattern match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSyntax {
    /// `column OP pattern`
    Infix(&'static str),
    /// `LOWER(column) OP LOWER(pattern)`
    Lowered(&'static str),
    /// The dialect has no way to express this match
    Unsupported,
}

/// Backend-specific SQL fragments.
pub trait Phrasing: Send + Sync + fmt::Debug {
    /// Dialect name for diagnostics.
    fn name(&self) -> &'static str;

    /// Quote an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Render a value as a SQL literal. Only used for diagnostics; compiled
    /// statements always bind values as parameters.
    fn escape_literal(&self, value: &Value) -> String;

    /// Column type name for DDL.
    fn type_name(&self, ty: SqlType, auto_increment: bool) -> String;

    /// Operator for a pattern match.
    fn pattern_operator(&self, kind: PatternKind, case_insensitive: bool) -> PatternSyntax;

    /// Whether `RETURNING` is available on INSERT, UPDATE and DELETE.
    fn supports_returning(&self) -> bool;

    /// Appended after LIKE patterns built from escaped user input.
    fn like_escape_suffix(&self) -> &'static str {
        ""
    }

    /// LIMIT/OFFSET tail, including its leading space.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    /// Tail of an INSERT without columns.
    fn insert_default_values(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// Statement opening a transaction.
    fn begin_transaction(&self) -> &'static str {
        "BEGIN"
    }

    /// Keyword placed after `PRIMARY KEY` on auto-increment columns.
    fn auto_increment_suffix(&self) -> &'static str {
        ""
    }
}

/// Escape LIKE wildcards (and the escape character) in user input.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Built-in dialects, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DialectKind {
    #[default]
    Standard,
    Postgres,
    MySql,
    Sqlite,
}

impl DialectKind {
    /// Boxed phrasing for this dialect.
    pub fn phrasing(self) -> Box<dyn Phrasing> {
        match self {
            DialectKind::Standard => Box::new(Standard),
            DialectKind::Postgres => Box::new(Postgres::default()),
            DialectKind::MySql => Box::new(MySql::default()),
            DialectKind::Sqlite => Box::new(Sqlite::default()),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DialectKind::Standard => "standard",
            DialectKind::Postgres => "postgres",
            DialectKind::MySql => "mysql",
            DialectKind::Sqlite => "sqlite",
        }
    }
}

impl FromStr for DialectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "ansi" => Ok(DialectKind::Standard),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            "mysql" | "mariadb" => Ok(DialectKind::MySql),
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            other => Err(Error::Config(ConfigError {
                message: format!(
                    "unknown dialect '{}' (expected standard, postgres, mysql or sqlite)",
                    other
                ),
                source: None,
            })),
        }
    }
}

impl TryFrom<String> for DialectKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DialectKind> for String {
    fn from(kind: DialectKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn dialect_names_parse_case_insensitively() {
        assert_eq!("PostgreSQL".parse::<DialectKind>().unwrap(), DialectKind::Postgres);
        assert_eq!("MYSQL".parse::<DialectKind>().unwrap(), DialectKind::MySql);
        assert_eq!("sqlite".parse::<DialectKind>().unwrap(), DialectKind::Sqlite);
        assert!("oracle".parse::<DialectKind>().is_err());
        assert_eq!(DialectKind::MySql.phrasing().name(), "mysql");
    }

    #[test]
    fn default_limit_offset() {
        let std = Standard;
        assert_eq!(std.limit_offset(Some(10), None), " LIMIT 10");
        assert_eq!(std.limit_offset(Some(10), Some(20)), " LIMIT 10 OFFSET 20");
        assert_eq!(std.limit_offset(None, None), "");
    }
}
