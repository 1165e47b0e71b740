//! MySQL phrasing.
//!
//! MySQL has no RETURNING clause; inserts report their generated key through
//! the driver's last-insert-id instead.

use sqlrel_core::{SqlType, Value};

use super::{PatternKind, PatternSyntax, Phrasing, Standard};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql {
    base: Standard,
}

impl MySql {
    fn quote_text(text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('\'');
        for ch in text.chars() {
            match ch {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                other => out.push(other),
            }
        }
        out.push('\'');
        out
    }
}

impl Phrasing for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        Standard::quote_with(ident, '`')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn escape_literal(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Text(s) => Self::quote_text(s),
            Value::Json(j) => Self::quote_text(&j.to_string()),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.escape_literal(v)).collect();
                format!("({})", inner.join(", "))
            }
            other => self.base.escape_literal(other),
        }
    }

    fn type_name(&self, ty: SqlType, _auto_increment: bool) -> String {
        match ty {
            SqlType::Boolean => "TINYINT(1)".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Blob => "LONGBLOB".to_string(),
            SqlType::Timestamp => "DATETIME(6)".to_string(),
            other => other.sql_name(),
        }
    }

    fn pattern_operator(&self, kind: PatternKind, case_insensitive: bool) -> PatternSyntax {
        // default collations compare case-insensitively
        match (kind, case_insensitive) {
            (PatternKind::Like, false) => PatternSyntax::Infix("LIKE BINARY"),
            (PatternKind::Like, true) => PatternSyntax::Infix("LIKE"),
            (PatternKind::Regex, false) => PatternSyntax::Infix("REGEXP BINARY"),
            (PatternKind::Regex, true) => PatternSyntax::Infix("REGEXP"),
        }
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, Some(offset)) => format!(" LIMIT {} OFFSET {}", u64::MAX, offset),
            (limit, offset) => self.base.limit_offset(limit, offset),
        }
    }

    fn insert_default_values(&self) -> &'static str {
        "() VALUES ()"
    }

    fn begin_transaction(&self) -> &'static str {
        "START TRANSACTION"
    }

    fn auto_increment_suffix(&self) -> &'static str {
        "AUTO_INCREMENT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_fragments() {
        let my = MySql::default();
        assert_eq!(my.quote_identifier("order"), "`order`");
        assert_eq!(my.quote_identifier("a`b"), "`a``b`");
        assert_eq!(my.placeholder(7), "?");
        assert_eq!(my.escape_literal(&Value::Text("a\\'b".into())), "'a\\\\''b'");
        assert!(!my.supports_returning());
        assert_eq!(
            my.limit_offset(None, Some(5)),
            format!(" LIMIT {} OFFSET 5", u64::MAX)
        );
    }
}
