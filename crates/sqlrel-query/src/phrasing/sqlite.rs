//! SQLite phrasing.

use sqlrel_core::{SqlType, Value};

use super::{PatternKind, PatternSyntax, Phrasing, Standard};

#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite {
    base: Standard,
}

impl Phrasing for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.base.quote_identifier(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn escape_literal(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.escape_literal(v)).collect();
                format!("({})", inner.join(", "))
            }
            other => self.base.escape_literal(other),
        }
    }

    fn type_name(&self, ty: SqlType, _auto_increment: bool) -> String {
        match ty {
            SqlType::Integer | SqlType::BigInt | SqlType::Boolean => "INTEGER".to_string(),
            SqlType::Double => "REAL".to_string(),
            SqlType::VarChar(_) | SqlType::Text | SqlType::Json | SqlType::Timestamp => {
                "TEXT".to_string()
            }
            SqlType::Blob => "BLOB".to_string(),
        }
    }

    fn pattern_operator(&self, kind: PatternKind, case_insensitive: bool) -> PatternSyntax {
        match (kind, case_insensitive) {
            (PatternKind::Like, false) => PatternSyntax::Infix("LIKE"),
            (PatternKind::Like, true) => PatternSyntax::Lowered("LIKE"),
            (PatternKind::Regex, false) => PatternSyntax::Infix("REGEXP"),
            (PatternKind::Regex, true) => PatternSyntax::Unsupported,
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn like_escape_suffix(&self) -> &'static str {
        " ESCAPE '\\'"
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {}", offset),
            (limit, offset) => self.base.limit_offset(limit, offset),
        }
    }

    fn auto_increment_suffix(&self) -> &'static str {
        "AUTOINCREMENT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_fragments() {
        let lite = Sqlite::default();
        assert_eq!(lite.placeholder(2), "?2");
        assert_eq!(lite.type_name(SqlType::BigInt, true), "INTEGER");
        assert_eq!(lite.like_escape_suffix(), " ESCAPE '\\'");
        assert_eq!(
            lite.pattern_operator(PatternKind::Regex, true),
            PatternSyntax::Unsupported
        );
        assert_eq!(lite.limit_offset(None, Some(3)), " LIMIT -1 OFFSET 3");
    }
}
