//! Condition trees.
//!
//! Leaves compare one field reference against a value. A field reference is
//! a bare attribute name (`name`) or a dotted relation path ending in an
//! attribute (`author.name`); paths are resolved to joins at compile time.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Map;
use sqlrel_core::{BuildErrorKind, Error, Result, Value};

/// Comparison operators available in condition leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    IsNull,
    NotNull,
    Like,
    ILike,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Regex,
    IRegex,
}

/// Operator names accepted in `field[op]` keys and operator maps.
pub const KNOWN_OPERATORS: &[&str] = &[
    "eq",
    "ne",
    "not",
    "lt",
    "lte",
    "gt",
    "gte",
    "in",
    "not_in",
    "is_null",
    "not_null",
    "like",
    "ilike",
    "contains",
    "icontains",
    "startswith",
    "istartswith",
    "endswith",
    "iendswith",
    "regex",
    "iregex",
];

impl Operator {
    /// Parse an operator name, failing with the list of known names.
    pub fn parse(name: &str) -> Result<Self> {
        let op = match name {
            "eq" => Operator::Eq,
            "ne" | "not" => Operator::Ne,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "is_null" => Operator::IsNull,
            "not_null" => Operator::NotNull,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "contains" => Operator::Contains,
            "icontains" => Operator::IContains,
            "startswith" => Operator::StartsWith,
            "istartswith" => Operator::IStartsWith,
            "endswith" => Operator::EndsWith,
            "iendswith" => Operator::IEndsWith,
            "regex" => Operator::Regex,
            "iregex" => Operator::IRegex,
            other => return Err(Error::unknown_operator(other, KNOWN_OPERATORS)),
        };
        Ok(op)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsNull => "is_null",
            Operator::NotNull => "not_null",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::IStartsWith => "istartswith",
            Operator::EndsWith => "endswith",
            Operator::IEndsWith => "iendswith",
            Operator::Regex => "regex",
            Operator::IRegex => "iregex",
        }
    }

    /// Whether the operator matches case-insensitively.
    pub const fn is_case_insensitive(self) -> bool {
        matches!(
            self,
            Operator::ILike
                | Operator::IContains
                | Operator::IStartsWith
                | Operator::IEndsWith
                | Operator::IRegex
        )
    }
}

/// A node of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf {
        field: String,
        op: Operator,
        value: Value,
    },
    /// All children must hold (AND)
    All(Vec<Condition>),
    /// At least one child must hold (OR)
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn leaf(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Condition::Leaf {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Lte, value)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::leaf(field, Operator::In, Value::List(values))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::leaf(field, Operator::IsNull, true)
    }

    /// AND this condition with another, flattening nested ANDs.
    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        match (self, other) {
            (Condition::All(mut left), Condition::All(right)) => {
                left.extend(right);
                Condition::All(left)
            }
            (Condition::All(mut left), right) => {
                left.push(right);
                Condition::All(left)
            }
            (left, right) => Condition::All(vec![left, right]),
        }
    }

    /// OR this condition with another.
    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        match self {
            Condition::Any(mut left) => {
                left.push(other);
                Condition::Any(left)
            }
            left => Condition::Any(vec![left, other]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Condition {
        Condition::Not(Box::new(self))
    }

    /// Build a condition from a JSON mapping.
    ///
    /// Keys are field references, optionally suffixed with an operator
    /// (`age[gte]`). Values are compared for equality unless they are an
    /// operator map (`{"gte": 21}`). `$or` and `$and` take arrays of
    /// mappings, `$not` takes a mapping. Multiple keys are ANDed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cond = Condition::from_json(&json!({
    ///     "age": {"gte": 21},
    ///     "name[startswith]": "A",
    ///     "$or": [{"role": "admin"}, {"role": "owner"}],
    /// }))?;
    /// ```
    pub fn from_json(map: &serde_json::Value) -> Result<Condition> {
        let serde_json::Value::Object(entries) = map else {
            return Err(invalid(format!(
                "condition must be a JSON object, got {}",
                map
            )));
        };
        let mut parts = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            parts.push(parse_entry(key, value)?);
        }
        Ok(collapse_all(parts))
    }

    /// Visit every field reference in tree order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Leaf { field, .. } => out.push(field),
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Condition::Not(inner) => inner.collect_fields(out),
        }
    }
}

fn invalid(message: String) -> Error {
    Error::build(BuildErrorKind::InvalidCondition, message)
}

fn collapse_all(mut parts: Vec<Condition>) -> Condition {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Condition::All(parts)
    }
}

fn key_pattern() -> Result<&'static Regex> {
    static KEY: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    KEY.get_or_init(|| {
        Regex::new(r"^(?P<field>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)(?:\[(?P<op>[^\]]*)\])?$")
    })
    .as_ref()
    .map_err(|err| invalid(format!("condition key pattern failed to compile: {}", err)))
}

fn parse_group(key: &str, value: &serde_json::Value) -> Result<Vec<Condition>> {
    let serde_json::Value::Array(items) = value else {
        return Err(invalid(format!("'{}' expects an array of objects", key)));
    };
    items.iter().map(Condition::from_json).collect()
}

fn parse_entry(key: &str, value: &serde_json::Value) -> Result<Condition> {
    match key {
        "$or" => return Ok(Condition::Any(parse_group(key, value)?)),
        "$and" => return Ok(Condition::All(parse_group(key, value)?)),
        "$not" => return Ok(Condition::from_json(value)?.negate()),
        _ => {}
    }

    let caps = key_pattern()?
        .captures(key)
        .ok_or_else(|| invalid(format!("malformed condition key '{}'", key)))?;
    let field = caps.name("field").map_or("", |m| m.as_str());

    if let Some(op) = caps.name("op") {
        let op = Operator::parse(op.as_str())?;
        return Ok(Condition::leaf(field, op, Value::from(value.clone())));
    }

    match value {
        serde_json::Value::Object(ops) => parse_operator_map(field, ops),
        other => Ok(Condition::eq(field, Value::from(other.clone()))),
    }
}

fn parse_operator_map(field: &str, ops: &Map<String, serde_json::Value>) -> Result<Condition> {
    if ops.is_empty() {
        return Err(invalid(format!("empty operator map for '{}'", field)));
    }
    let mut parts = Vec::with_capacity(ops.len());
    for (name, operand) in ops {
        let op = Operator::parse(name)?;
        parts.push(Condition::leaf(field, op, Value::from(operand.clone())));
    }
    Ok(collapse_all(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operator_map_and_suffix_agree() {
        let from_map = Condition::from_json(&json!({"age": {"gte": 21}})).unwrap();
        let from_suffix = Condition::from_json(&json!({"age[gte]": 21})).unwrap();
        assert_eq!(from_map, from_suffix);
        assert_eq!(from_map, Condition::gte("age", 21_i64));
    }

    #[test]
    fn unknown_operator_names_the_operator_and_known_list() {
        let err = Condition::from_json(&json!({"age[between]": [1, 2]})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'between'"));
        assert!(msg.contains("gte"));
        assert!(err.is_caller_defect());

        let err = Condition::from_json(&json!({"age": {"around": 3}})).unwrap_err();
        assert!(err.to_string().contains("'around'"));
    }

    #[test]
    fn multiple_keys_are_anded_and_groups_nest() {
        let cond = Condition::from_json(&json!({
            "name": "ada",
            "$or": [{"role": "admin"}, {"author.name[icontains]": "lace"}],
        }))
        .unwrap();
        let Condition::All(parts) = &cond else {
            panic!("expected AND, got {cond:?}");
        };
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().any(|p| matches!(p, Condition::Any(c) if c.len() == 2)));
        let mut fields = cond.fields();
        fields.sort_unstable();
        assert_eq!(fields, vec!["author.name", "name", "role"]);
    }

    #[test]
    fn not_wraps_a_mapping() {
        let cond = Condition::from_json(&json!({"$not": {"deleted": true}})).unwrap();
        assert_eq!(cond, Condition::eq("deleted", true).negate());
    }

    #[test]
    fn malformed_keys_and_shapes_are_rejected() {
        assert!(Condition::from_json(&json!({"bad key": 1})).is_err());
        assert!(Condition::from_json(&json!([1, 2])).is_err());
        assert!(Condition::from_json(&json!({"$or": {"a": 1}})).is_err());
        assert!(Condition::from_json(&json!({"a": {}})).is_err());
    }

    #[test]
    fn and_flattens() {
        let cond = Condition::eq("a", 1_i64)
            .and(Condition::eq("b", 2_i64))
            .and(Condition::eq("c", 3_i64));
        assert!(matches!(cond, Condition::All(ref v) if v.len() == 3));
    }
}
