//! Statement compilation.
//!
//! [`Compiler`] owns the statement grammar (SELECT, INSERT, UPDATE, DELETE
//! and transaction control) and asks its [`Phrasing`] only for fragments.
//! Every value is bound as a parameter; placeholders are numbered in the
//! order their values appear in `params`.

use sqlrel_core::{
    BuildErrorKind, EntityDef, Error, RelationKind, Result, Schema, TransactionErrorKind, Value,
};

use crate::clause::{Column, OrderDirection, Projection};
use crate::condition::{Condition, Operator};
use crate::phrasing::{PatternKind, PatternSyntax, Phrasing, escape_like};
use crate::query::{Query, QueryKind};
use crate::resolve::{FieldRef, FieldScope, JoinPlan};
use crate::transaction::TxRole;

/// SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    /// Storage columns requested back from an INSERT, UPDATE or DELETE
    pub returning: Vec<String>,
    /// The dialect cannot return columns; the generated key must come from
    /// the driver's last-insert-id
    pub emulate_returning: bool,
    /// Nested transaction control: nothing to send to the database
    pub noop: bool,
}

impl CompiledQuery {
    fn statement(sql: String, params: Vec<Value>) -> Self {
        Self {
            sql,
            params,
            returning: Vec::new(),
            emulate_returning: false,
            noop: false,
        }
    }

    fn noop() -> Self {
        let mut compiled = Self::statement(String::new(), Vec::new());
        compiled.noop = true;
        compiled
    }
}

/// Accumulates parameters while a statement is written.
struct Writer<'a> {
    phrasing: &'a dyn Phrasing,
    params: Vec<Value>,
    inline: bool,
}

impl Writer<'_> {
    fn bind(&mut self, value: Value) -> String {
        if self.inline {
            return self.phrasing.escape_literal(&value);
        }
        self.params.push(value);
        self.phrasing.placeholder(self.params.len())
    }

    fn quote(&self, ident: &str) -> String {
        self.phrasing.quote_identifier(ident)
    }
}

/// Compiles queries against a schema with one dialect.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'a> {
    phrasing: &'a dyn Phrasing,
    schema: &'a Schema,
}

impl<'a> Compiler<'a> {
    pub fn new(phrasing: &'a dyn Phrasing, schema: &'a Schema) -> Self {
        Self { phrasing, schema }
    }

    pub fn phrasing(&self) -> &'a dyn Phrasing {
        self.phrasing
    }

    /// Validate and compile a query.
    ///
    /// Resolution and transaction-state errors surface here, before any
    /// statement reaches a connection.
    pub fn compile(&self, query: &Query) -> Result<CompiledQuery> {
        self.validate_transaction(query)?;
        let compiled = self.compile_with(query, false)?;
        tracing::debug!(
            dialect = self.phrasing.name(),
            sql = %compiled.sql,
            params = compiled.params.len(),
            "compiled query"
        );
        Ok(compiled)
    }

    /// Render the statement with values inlined as literals, for logs and
    /// error messages only.
    pub fn render_inline(&self, query: &Query) -> Result<String> {
        Ok(self.compile_with(query, true)?.sql)
    }

    fn validate_transaction(&self, query: &Query) -> Result<()> {
        let control = matches!(query.kind(), QueryKind::Commit | QueryKind::Rollback);
        match query.transaction() {
            None if control => Err(Error::transaction(
                TransactionErrorKind::MissingTransaction,
                format!(
                    "{} issued without a bound transaction",
                    if query.kind() == QueryKind::Commit {
                        "commit"
                    } else {
                        "rollback"
                    }
                ),
            )),
            None => Ok(()),
            Some(handle) => match query.tx_role() {
                Some(role) => handle.validate(role),
                None => Err(Error::transaction(
                    TransactionErrorKind::Closed,
                    format!(
                        "transaction {} was already committed or rolled back",
                        handle.id()
                    ),
                )),
            },
        }
    }

    fn compile_with(&self, query: &Query, inline: bool) -> Result<CompiledQuery> {
        let mut w = Writer {
            phrasing: self.phrasing,
            params: Vec::new(),
            inline,
        };
        match query.kind() {
            QueryKind::Begin | QueryKind::Commit | QueryKind::Rollback => {
                Ok(self.control(query))
            }
            QueryKind::Raw => {
                let (sql, params) = query.raw_sql().unwrap_or_default();
                Ok(CompiledQuery::statement(sql.to_string(), params.to_vec()))
            }
            QueryKind::Select => {
                let plan = JoinPlan::build(self.schema, query)?;
                let sql = self.select(&mut w, query, &plan)?;
                Ok(CompiledQuery::statement(sql, w.params))
            }
            QueryKind::Insert => self.insert(w, query),
            QueryKind::Update | QueryKind::Delete => self.modify(w, query),
        }
    }

    fn control(&self, query: &Query) -> CompiledQuery {
        if query.tx_role() == Some(TxRole::Nested) {
            return CompiledQuery::noop();
        }
        let sql = match query.kind() {
            QueryKind::Begin => self.phrasing.begin_transaction(),
            QueryKind::Commit => "COMMIT",
            _ => "ROLLBACK",
        };
        CompiledQuery::statement(sql.to_string(), Vec::new())
    }

    fn column_sql(w: &Writer<'_>, field: &FieldRef, qualify: bool) -> String {
        if qualify {
            format!("{}.{}", w.quote(&field.alias), w.quote(&field.column))
        } else {
            w.quote(&field.column)
        }
    }

    fn select(&self, w: &mut Writer<'_>, query: &Query, plan: &JoinPlan<'_>) -> Result<String> {
        let qualify = !plan.joins().is_empty();
        let primary = w.quote(plan.primary_table());

        let projection = match query.projection() {
            Projection::All if qualify => format!("{}.*", primary),
            Projection::All => "*".to_string(),
            Projection::Columns(cols) => {
                let mut parts = Vec::with_capacity(cols.len());
                for col in cols {
                    parts.push(match col {
                        Column::Field(f) => {
                            Self::column_sql(w, &plan.resolve_field(f, FieldScope::Primary)?, qualify)
                        }
                        Column::Aggregate { func, field, alias } => {
                            let arg = match field {
                                Some(f) => Self::column_sql(
                                    w,
                                    &plan.resolve_field(f, FieldScope::Primary)?,
                                    qualify,
                                ),
                                None => "*".to_string(),
                            };
                            format!("{}({}) AS {}", func.as_sql(), arg, w.quote(alias))
                        }
                    });
                }
                parts.join(", ")
            }
        };

        let mut sql = format!("SELECT {} FROM {}", projection, primary);

        for (idx, join) in plan.joins().iter().enumerate() {
            sql.push_str(&format!(
                " {} {} AS {} ON {}.{} = {}.{}",
                join.kind.as_str(),
                w.quote(&join.table),
                w.quote(&join.alias),
                w.quote(&join.alias),
                w.quote(&join.target_column),
                w.quote(&join.owner_alias),
                w.quote(&join.owner_column),
            ));
            if let Some(refine) = &join.refine {
                let extra = self.condition(w, plan, refine, FieldScope::Join(idx), true)?;
                if matches!(refine, Condition::All(c) | Condition::Any(c) if c.len() > 1) {
                    sql.push_str(&format!(" AND ({})", extra));
                } else {
                    sql.push_str(&format!(" AND {}", extra));
                }
            }
        }

        if let Some(cond) = query.condition() {
            let rendered = self.condition(w, plan, cond, FieldScope::Primary, qualify)?;
            sql.push_str(&format!(" WHERE {}", rendered));
        }

        if !query.grouping().is_empty() {
            let mut cols = Vec::with_capacity(query.grouping().len());
            for field in query.grouping() {
                cols.push(Self::column_sql(
                    w,
                    &plan.resolve_field(field, FieldScope::Primary)?,
                    qualify,
                ));
            }
            sql.push_str(&format!(" GROUP BY {}", cols.join(", ")));
        } else if plan.needs_primary_grouping() && !query.projection().has_aggregate() {
            if let Some(entity) = plan.primary_entity() {
                let pk = entity.primary_key()?;
                sql.push_str(&format!(
                    " GROUP BY {}.{}",
                    primary,
                    w.quote(&pk.column)
                ));
            }
        }

        if !query.ordering().is_empty() {
            let aliases = query.projection().aggregate_aliases();
            let mut parts = Vec::with_capacity(query.ordering().len());
            for entry in query.ordering() {
                let target = if aliases.contains(&entry.field.as_str()) {
                    w.quote(&entry.field)
                } else {
                    Self::column_sql(
                        w,
                        &plan.resolve_field(&entry.field, FieldScope::Primary)?,
                        qualify,
                    )
                };
                let dir = match entry.direction {
                    OrderDirection::Asc => "ASC",
                    OrderDirection::Desc => "DESC",
                };
                parts.push(format!("{} {}", target, dir));
            }
            sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
        }

        sql.push_str(
            &self
                .phrasing
                .limit_offset(query.limit_value(), query.offset_value()),
        );
        Ok(sql)
    }

    fn condition(
        &self,
        w: &mut Writer<'_>,
        plan: &JoinPlan<'_>,
        cond: &Condition,
        scope: FieldScope,
        qualify: bool,
    ) -> Result<String> {
        match cond {
            Condition::Leaf { field, op, value } => {
                let column = Self::column_sql(w, &plan.resolve_field(field, scope)?, qualify);
                self.leaf(w, &column, *op, value)
            }
            Condition::All(children) | Condition::Any(children) => {
                let (joiner, empty) = if matches!(cond, Condition::All(_)) {
                    (" AND ", "1 = 1")
                } else {
                    (" OR ", "1 = 0")
                };
                if children.is_empty() {
                    return Ok(empty.to_string());
                }
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    let rendered = self.condition(w, plan, child, scope, qualify)?;
                    let grouped = matches!(child, Condition::All(c) | Condition::Any(c) if c.len() > 1);
                    parts.push(if grouped {
                        format!("({})", rendered)
                    } else {
                        rendered
                    });
                }
                Ok(parts.join(joiner))
            }
            Condition::Not(inner) => {
                let rendered = self.condition(w, plan, inner, scope, qualify)?;
                Ok(format!("NOT ({})", rendered))
            }
        }
    }

    fn leaf(&self, w: &mut Writer<'_>, column: &str, op: Operator, value: &Value) -> Result<String> {
        let cmp = |w: &mut Writer<'_>, sym: &str| format!("{} {} {}", column, sym, w.bind(value.clone()));
        let sql = match op {
            Operator::Eq | Operator::Ne if value.is_null() => {
                let not = if op == Operator::Ne { " NOT" } else { "" };
                format!("{} IS{} NULL", column, not)
            }
            Operator::Eq if matches!(value, Value::List(_)) => {
                Self::in_list(w, column, value, false)
            }
            Operator::Ne if matches!(value, Value::List(_)) => {
                Self::in_list(w, column, value, true)
            }
            Operator::Eq => cmp(w, "="),
            Operator::Ne => cmp(w, "<>"),
            Operator::Lt => cmp(w, "<"),
            Operator::Lte => cmp(w, "<="),
            Operator::Gt => cmp(w, ">"),
            Operator::Gte => cmp(w, ">="),
            Operator::In => Self::in_list(w, column, value, false),
            Operator::NotIn => Self::in_list(w, column, value, true),
            Operator::IsNull | Operator::NotNull => {
                let wanted = value.as_bool().unwrap_or(true);
                let is_null = wanted == (op == Operator::IsNull);
                format!("{} IS{} NULL", column, if is_null { "" } else { " NOT" })
            }
            Operator::Like | Operator::ILike => {
                let pattern = w.bind(value.clone());
                self.pattern(op, PatternKind::Like, column, &pattern, "")?
            }
            Operator::Contains
            | Operator::IContains
            | Operator::StartsWith
            | Operator::IStartsWith
            | Operator::EndsWith
            | Operator::IEndsWith => {
                let Some(text) = value.as_str() else {
                    return Err(Error::build(
                        BuildErrorKind::InvalidCondition,
                        format!(
                            "operator '{}' needs a text operand, got {}",
                            op.as_str(),
                            value.type_name()
                        ),
                    ));
                };
                let escaped = escape_like(text);
                let wrapped = match op {
                    Operator::Contains | Operator::IContains => format!("%{}%", escaped),
                    Operator::StartsWith | Operator::IStartsWith => format!("{}%", escaped),
                    _ => format!("%{}", escaped),
                };
                let pattern = w.bind(Value::Text(wrapped));
                let suffix = self.phrasing.like_escape_suffix();
                self.pattern(op, PatternKind::Like, column, &pattern, suffix)?
            }
            Operator::Regex | Operator::IRegex => {
                let pattern = w.bind(value.clone());
                self.pattern(op, PatternKind::Regex, column, &pattern, "")?
            }
        };
        Ok(sql)
    }

    fn in_list(w: &mut Writer<'_>, column: &str, value: &Value, negated: bool) -> String {
        let items = match value {
            Value::List(items) => items.clone(),
            other => vec![other.clone()],
        };
        if items.is_empty() {
            return if negated { "1 = 1" } else { "1 = 0" }.to_string();
        }
        let placeholders: Vec<String> = items.into_iter().map(|v| w.bind(v)).collect();
        let not = if negated { "NOT " } else { "" };
        format!("{} {}IN ({})", column, not, placeholders.join(", "))
    }

    fn pattern(
        &self,
        op: Operator,
        kind: PatternKind,
        column: &str,
        pattern: &str,
        suffix: &str,
    ) -> Result<String> {
        match self
            .phrasing
            .pattern_operator(kind, op.is_case_insensitive())
        {
            PatternSyntax::Infix(sym) => Ok(format!("{} {} {}{}", column, sym, pattern, suffix)),
            PatternSyntax::Lowered(sym) => Ok(format!(
                "LOWER({}) {} LOWER({}){}",
                column, sym, pattern, suffix
            )),
            PatternSyntax::Unsupported => Err(Error::build(
                BuildErrorKind::InvalidClause,
                format!(
                    "dialect '{}' cannot express operator '{}'",
                    self.phrasing.name(),
                    op.as_str()
                ),
            )),
        }
    }

    fn storage_column(entity: Option<&EntityDef>, attr: &str) -> Result<String> {
        match entity {
            Some(def) => Ok(def.column_of(attr)?.to_string()),
            None => Ok(attr.to_string()),
        }
    }

    fn returning_clause(
        &self,
        w: &Writer<'_>,
        query: &Query,
        entity: Option<&EntityDef>,
        compiled: &mut CompiledQuery,
    ) -> Result<()> {
        if query.returning_columns().is_empty() {
            return Ok(());
        }
        let mut cols = Vec::with_capacity(query.returning_columns().len());
        for attr in query.returning_columns() {
            cols.push(Self::storage_column(entity, attr)?);
        }
        if self.phrasing.supports_returning() {
            let quoted: Vec<String> = cols.iter().map(|c| w.quote(c)).collect();
            compiled.sql.push_str(&format!(" RETURNING {}", quoted.join(", ")));
        } else if query.kind() == QueryKind::Insert {
            compiled.emulate_returning = true;
        } else {
            return Err(Error::build(
                BuildErrorKind::InvalidClause,
                format!(
                    "dialect '{}' cannot return columns from {:?} statements",
                    self.phrasing.name(),
                    query.kind()
                ),
            ));
        }
        compiled.returning = cols;
        Ok(())
    }

    fn insert(&self, mut w: Writer<'_>, query: &Query) -> Result<CompiledQuery> {
        let entity = self.schema.entity_for_table(query.table());
        let table = w.quote(query.table());
        let rows = query.value_rows();

        let sql = match rows.first() {
            None => format!("INSERT INTO {} {}", table, self.phrasing.insert_default_values()),
            Some(first) if first.is_empty() => {
                format!("INSERT INTO {} {}", table, self.phrasing.insert_default_values())
            }
            Some(first) => {
                let names: Vec<&str> = first.iter().map(|(k, _)| k.as_str()).collect();
                let mut cols = Vec::with_capacity(names.len());
                for name in &names {
                    cols.push(w.quote(&Self::storage_column(entity, name)?));
                }
                let mut tuples = Vec::with_capacity(rows.len());
                for row in rows {
                    let same_shape = row.len() == names.len()
                        && row.iter().zip(&names).all(|((k, _), n)| k == n);
                    if !same_shape {
                        return Err(Error::build(
                            BuildErrorKind::InvalidClause,
                            format!(
                                "every row of a multi-row INSERT into '{}' must assign the same fields",
                                query.table()
                            ),
                        ));
                    }
                    let values: Vec<String> =
                        row.iter().map(|(_, v)| w.bind(v.clone())).collect();
                    tuples.push(format!("({})", values.join(", ")));
                }
                format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    table,
                    cols.join(", "),
                    tuples.join(", ")
                )
            }
        };

        let mut compiled = CompiledQuery::statement(sql, Vec::new());
        self.returning_clause(&w, query, entity, &mut compiled)?;
        compiled.params = w.params;
        Ok(compiled)
    }

    fn modify(&self, mut w: Writer<'_>, query: &Query) -> Result<CompiledQuery> {
        let plan = JoinPlan::build(self.schema, query)?;
        let entity = plan.primary_entity();
        let table = w.quote(query.table());

        let mut sql = if query.kind() == QueryKind::Update {
            let assignments = query.value_rows().first().filter(|row| !row.is_empty());
            let Some(assignments) = assignments else {
                return Err(Error::build(
                    BuildErrorKind::InvalidClause,
                    format!("UPDATE of '{}' assigns no fields", query.table()),
                ));
            };
            let mut sets = Vec::with_capacity(assignments.len());
            for (attr, value) in assignments {
                let col = w.quote(&Self::storage_column(entity, attr)?);
                sets.push(format!("{} = {}", col, w.bind(value.clone())));
            }
            format!("UPDATE {} SET {}", table, sets.join(", "))
        } else {
            format!("DELETE FROM {}", table)
        };

        if let Some(cond) = query.condition() {
            let rendered = self.condition(&mut w, &plan, cond, FieldScope::Primary, false)?;
            sql.push_str(&format!(" WHERE {}", rendered));
        }

        let mut compiled = CompiledQuery::statement(sql, Vec::new());
        self.returning_clause(&w, query, entity, &mut compiled)?;
        compiled.params = w.params;
        Ok(compiled)
    }

    /// `CREATE TABLE` for a registered entity, including foreign keys for
    /// its to-one relations.
    pub fn create_table(&self, entity: &EntityDef) -> Result<String> {
        let q = |ident: &str| self.phrasing.quote_identifier(ident);
        let mut parts = Vec::with_capacity(entity.fields.len());
        for field in &entity.fields {
            let mut col = format!(
                "{} {}",
                q(&field.column),
                self.phrasing.type_name(field.sql_type, field.auto_increment)
            );
            if field.primary_key {
                col.push_str(" PRIMARY KEY");
                let suffix = self.phrasing.auto_increment_suffix();
                if field.auto_increment && !suffix.is_empty() {
                    col.push(' ');
                    col.push_str(suffix);
                }
            } else if !field.nullable {
                col.push_str(" NOT NULL");
            }
            if field.unique && !field.primary_key {
                col.push_str(" UNIQUE");
            }
            if let Some(default) = &field.default {
                col.push_str(&format!(" DEFAULT {}", default));
            }
            parts.push(col);
        }
        for rel in &entity.relations {
            if rel.kind != RelationKind::ToOne {
                continue;
            }
            let keys = self.schema.relation_keys(&entity.name, &rel.name)?;
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                q(&keys.local_column),
                q(&keys.related_table),
                q(&keys.remote_column)
            ));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            q(&entity.table),
            parts.join(", ")
        ))
    }
}
