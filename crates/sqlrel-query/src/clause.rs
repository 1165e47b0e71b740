//! Clause values held by a [`Query`](crate::Query): projection columns,
//! ordering and join requests.

use crate::condition::Condition;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY entry over a field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Parse `"name"` (ascending) or `"-name"` (descending). Dotted
    /// relation paths are allowed.
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(key.strip_prefix('+').unwrap_or(key)),
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Aggregate functions usable in a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub const fn as_sql(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// One projected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// A field reference (bare or dotted path)
    Field(String),
    /// `FUNC(field) AS alias`; a missing field means `*`
    Aggregate {
        func: AggregateFn,
        field: Option<String>,
        alias: String,
    },
}

impl Column {
    /// `COUNT(*) AS alias`
    pub fn count_all(alias: impl Into<String>) -> Self {
        Column::Aggregate {
            func: AggregateFn::Count,
            field: None,
            alias: alias.into(),
        }
    }

    pub fn aggregate(func: AggregateFn, field: impl Into<String>, alias: impl Into<String>) -> Self {
        Column::Aggregate {
            func,
            field: Some(field.into()),
            alias: alias.into(),
        }
    }

    pub fn field_ref(&self) -> Option<&str> {
        match self {
            Column::Field(f) => Some(f),
            Column::Aggregate { field, .. } => field.as_deref(),
        }
    }
}

/// Projection of a SELECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<Column>),
}

impl Projection {
    pub fn has_aggregate(&self) -> bool {
        match self {
            Projection::All => false,
            Projection::Columns(cols) => cols
                .iter()
                .any(|c| matches!(c, Column::Aggregate { .. })),
        }
    }

    /// Alias names introduced by aggregate columns.
    pub fn aggregate_aliases(&self) -> Vec<&str> {
        match self {
            Projection::All => Vec::new(),
            Projection::Columns(cols) => cols
                .iter()
                .filter_map(|c| match c {
                    Column::Aggregate { alias, .. } => Some(alias.as_str()),
                    Column::Field(_) => None,
                })
                .collect(),
        }
    }
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

impl JoinKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// An explicitly requested join over a relation path.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub path: String,
    pub kind: JoinKind,
    /// Extra predicate ANDed onto the inferred key equality. Bare fields
    /// refer to the joined entity.
    pub on: Option<Condition>,
}
