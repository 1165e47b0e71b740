//! PostgreSQL phrasing.

use sqlrel_core::{SqlType, Value};

use super::{PatternKind, PatternSyntax, Phrasing, Standard};

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres {
    base: Standard,
}

impl Phrasing for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.base.quote_identifier(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        self.base.placeholder(index)
    }

    fn escape_literal(&self, value: &Value) -> String {
        match value {
            Value::Bytes(b) => format!("'\\x{}'::bytea", Standard::hex(b).to_lowercase()),
            Value::Json(j) => format!("{}::jsonb", Standard::quote_text(&j.to_string())),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.escape_literal(v)).collect();
                format!("({})", inner.join(", "))
            }
            other => self.base.escape_literal(other),
        }
    }

    fn type_name(&self, ty: SqlType, auto_increment: bool) -> String {
        match (ty, auto_increment) {
            (SqlType::Integer, true) => "SERIAL".to_string(),
            (SqlType::BigInt, true) => "BIGSERIAL".to_string(),
            (SqlType::Blob, _) => "BYTEA".to_string(),
            (SqlType::Json, _) => "JSONB".to_string(),
            (SqlType::Timestamp, _) => "TIMESTAMPTZ".to_string(),
            (other, auto) => self.base.type_name(other, auto),
        }
    }

    fn pattern_operator(&self, kind: PatternKind, case_insensitive: bool) -> PatternSyntax {
        match (kind, case_insensitive) {
            (PatternKind::Like, false) => PatternSyntax::Infix("LIKE"),
            (PatternKind::Like, true) => PatternSyntax::Infix("ILIKE"),
            (PatternKind::Regex, false) => PatternSyntax::Infix("~"),
            (PatternKind::Regex, true) => PatternSyntax::Infix("~*"),
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_overrides() {
        let pg = Postgres::default();
        assert_eq!(pg.type_name(SqlType::BigInt, true), "BIGSERIAL");
        assert_eq!(pg.type_name(SqlType::Text, false), "TEXT");
        assert_eq!(
            pg.pattern_operator(PatternKind::Like, true),
            PatternSyntax::Infix("ILIKE")
        );
        assert_eq!(pg.escape_literal(&Value::Bytes(vec![0xAB])), "'\\xab'::bytea");
        assert_eq!(pg.like_escape_suffix(), "");
    }
}
