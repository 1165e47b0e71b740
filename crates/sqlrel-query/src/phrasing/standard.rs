//! ANSI base phrasing.

use sqlrel_core::{SqlType, Value};

use super::{PatternKind, PatternSyntax, Phrasing};

/// ANSI SQL: double-quoted identifiers, `$n` placeholders and RETURNING.
///
/// The other dialects delegate to it for everything they do not change.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standard;

impl Standard {
    /// Quote with `quote`, doubling embedded occurrences.
    pub(crate) fn quote_with(ident: &str, quote: char) -> String {
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(quote);
        for ch in ident.chars() {
            if ch == quote {
                out.push(quote);
            }
            out.push(ch);
        }
        out.push(quote);
        out
    }

    pub(crate) fn quote_text(text: &str) -> String {
        Self::quote_with(text, '\'')
    }

    pub(crate) fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl Phrasing for Standard {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        Self::quote_with(ident, '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn escape_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(f) => f.to_string(),
            Value::Text(s) => Self::quote_text(s),
            Value::Bytes(b) => format!("X'{}'", Self::hex(b)),
            Value::Json(j) => Self::quote_text(&j.to_string()),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.escape_literal(v)).collect();
                format!("({})", inner.join(", "))
            }
        }
    }

    fn type_name(&self, ty: SqlType, auto_increment: bool) -> String {
        if auto_increment {
            return format!("{} GENERATED BY DEFAULT AS IDENTITY", ty.sql_name());
        }
        ty.sql_name()
    }

    fn pattern_operator(&self, kind: PatternKind, case_insensitive: bool) -> PatternSyntax {
        match (kind, case_insensitive) {
            (PatternKind::Like, false) => PatternSyntax::Infix("LIKE"),
            (PatternKind::Like, true) => PatternSyntax::Lowered("LIKE"),
            (PatternKind::Regex, false) => PatternSyntax::Infix("SIMILAR TO"),
            (PatternKind::Regex, true) => PatternSyntax::Lowered("SIMILAR TO"),
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn like_escape_suffix(&self) -> &'static str {
        " ESCAPE '\\'"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(Standard.quote_identifier("users"), "\"users\"");
        assert_eq!(Standard.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn literals() {
        assert_eq!(Standard.escape_literal(&Value::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(Standard.escape_literal(&Value::Bool(true)), "TRUE");
        assert_eq!(Standard.escape_literal(&Value::Bytes(vec![0xde, 0xad])), "X'DEAD'");
        assert_eq!(
            Standard.escape_literal(&Value::List(vec![Value::Int(1), Value::Null])),
            "(1, NULL)"
        );
    }

    #[test]
    fn placeholders_are_numbered() {
        assert_eq!(Standard.placeholder(3), "$3");
    }
}
