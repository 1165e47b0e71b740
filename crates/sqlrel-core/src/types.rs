//! Logical column types.
//!
//! Dialects map these onto concrete type names when rendering DDL.

use serde::{Deserialize, Serialize};

/// Column types an entity field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Boolean,
    VarChar(u32),
    Text,
    Blob,
    Timestamp,
    Json,
}

impl SqlType {
    /// ANSI spelling, used when a dialect has no override.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSON".to_string(),
        }
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt | SqlType::Double)
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::VarChar(_) | SqlType::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_names() {
        assert_eq!(SqlType::VarChar(64).sql_name(), "VARCHAR(64)");
        assert_eq!(SqlType::Double.sql_name(), "DOUBLE PRECISION");
        assert!(SqlType::BigInt.is_numeric());
        assert!(SqlType::Text.is_text());
        assert!(!SqlType::Json.is_text());
    }
}
