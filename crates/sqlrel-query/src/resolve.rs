//! Join inference and field disambiguation.
//!
//! [`JoinPlan::build`] walks every relation path a query mentions (explicit
//! joins first, in call order, then join refinements, conditions, ordering,
//! grouping and projection) and turns each path prefix into exactly one
//! join. Aliases are deterministic: a join uses its relation name unless
//! that alias is taken, its target table is already part of the query, or
//! the relation points back at its own entity; then it gets
//! `<relation>_j<n>` with `n` counting such joins in encounter order.

use std::collections::HashMap;

use sqlrel_core::{
    BuildErrorKind, EntityDef, Error, RelationKeys, RelationKind, ResolutionErrorKind, Result,
    Schema,
};

use crate::clause::{Column, JoinKind};
use crate::condition::Condition;
use crate::query::{Query, QueryKind};

/// One concrete join of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJoin {
    /// Path key (`author`, `author.publisher`, `taggings`)
    pub path: String,
    pub relation: String,
    pub table: String,
    pub alias: String,
    pub kind: JoinKind,
    /// Entity stored in `table`
    pub entity: String,
    pub owner_alias: String,
    pub owner_column: String,
    pub target_column: String,
    /// Predicate ANDed onto the key equality
    pub refine: Option<Condition>,
}

/// Where a bare field name is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    /// The query's primary table, then the joined tables
    Primary,
    /// The target of the join at this index (join refinements)
    Join(usize),
}

/// A field reference resolved to a table alias and storage column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub alias: String,
    pub column: String,
}

/// The joins a query needs, plus what grouping they imply.
#[derive(Debug)]
pub struct JoinPlan<'s> {
    schema: &'s Schema,
    primary_table: String,
    primary_entity: Option<&'s EntityDef>,
    joins: Vec<ResolvedJoin>,
    by_path: HashMap<String, usize>,
    suffix_counter: usize,
    group_by_primary: bool,
}

fn split_field(reference: &str) -> (Option<&str>, &str) {
    match reference.rsplit_once('.') {
        Some((path, attr)) => (Some(path), attr),
        None => (None, reference),
    }
}

impl<'s> JoinPlan<'s> {
    /// Resolve every relation path `query` references.
    pub fn build(schema: &'s Schema, query: &Query) -> Result<Self> {
        let mut plan = JoinPlan {
            schema,
            primary_table: query.table().to_string(),
            primary_entity: schema.entity_for_table(query.table()),
            joins: Vec::new(),
            by_path: HashMap::new(),
            suffix_counter: 0,
            group_by_primary: false,
        };

        for request in query.join_requests() {
            let idx = plan.ensure_path(&request.path, request.kind)?.0;
            if let Some(on) = &request.on {
                let join = &mut plan.joins[idx];
                join.refine = Some(match join.refine.take() {
                    Some(existing) => existing.and(on.clone()),
                    None => on.clone(),
                });
            }
        }
        for request in query.join_requests() {
            if let Some(on) = &request.on {
                plan.ensure_referenced(on.fields(), false)?;
            }
        }
        if let Some(cond) = query.condition() {
            plan.ensure_referenced(cond.fields(), true)?;
        }
        plan.ensure_referenced(query.ordering().iter().map(|o| o.field.as_str()), true)?;
        plan.ensure_referenced(query.grouping().iter().map(String::as_str), false)?;
        if let crate::clause::Projection::Columns(cols) = query.projection() {
            plan.ensure_referenced(cols.iter().filter_map(Column::field_ref), false)?;
        }

        if !plan.joins.is_empty() && query.kind() != QueryKind::Select {
            return Err(Error::build(
                BuildErrorKind::InvalidClause,
                format!(
                    "relation paths are only supported in SELECT queries (table '{}')",
                    plan.primary_table
                ),
            ));
        }
        Ok(plan)
    }

    pub fn joins(&self) -> &[ResolvedJoin] {
        &self.joins
    }

    pub fn primary_table(&self) -> &str {
        &self.primary_table
    }

    pub fn primary_entity(&self) -> Option<&'s EntityDef> {
        self.primary_entity
    }

    /// Whether a to-many path in a condition or ordering may duplicate
    /// primary rows.
    pub fn needs_primary_grouping(&self) -> bool {
        self.group_by_primary
    }

    fn ensure_referenced<'a>(
        &mut self,
        fields: impl IntoIterator<Item = &'a str>,
        may_group: bool,
    ) -> Result<()> {
        for field in fields {
            if let (Some(path), _) = split_field(field) {
                if self.names_primary(path) {
                    continue;
                }
                let (_, to_many) = self.ensure_path(path, JoinKind::Inner)?;
                if may_group && to_many {
                    self.group_by_primary = true;
                }
            }
        }
        Ok(())
    }

    /// `path` is the primary table's own name rather than a relation.
    fn names_primary(&self, path: &str) -> bool {
        path == self.primary_table
            && self
                .primary_entity
                .is_none_or(|e| e.get_relation(path).is_none())
    }

    /// Join every prefix of `path`, returning the index of the last join
    /// and whether any hop on the way is to-many.
    fn ensure_path(&mut self, path: &str, kind: JoinKind) -> Result<(usize, bool)> {
        let Some(mut entity) = self.primary_entity else {
            return Err(Error::resolution(
                ResolutionErrorKind::UnknownEntity,
                format!(
                    "cannot resolve relation path '{}': no entity is registered for table '{}'",
                    path, self.primary_table
                ),
            ));
        };
        let mut owner_alias = self.primary_table.clone();
        let mut prefix = String::new();
        let mut to_many = false;
        let mut last = None;

        for segment in path.split('.') {
            let key = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", prefix, segment)
            };

            let idx = match self.by_path.get(&key) {
                Some(&idx) => {
                    let rel = entity.require_relation(segment)?;
                    to_many |= rel.kind.is_collection();
                    idx
                }
                None => {
                    let hops = self.schema.hops(&entity.name, segment)?;
                    to_many |= hops.iter().any(|h| h.kind == RelationKind::ToMany);
                    if let [first, second] = hops.as_slice() {
                        let through_key = if prefix.is_empty() {
                            first.relation.clone()
                        } else {
                            format!("{}.{}", prefix, first.relation)
                        };
                        let mid = match self.by_path.get(&through_key) {
                            Some(&mid) => mid,
                            None => self.push_join(through_key, first, &owner_alias, kind),
                        };
                        let mid_alias = self.joins[mid].alias.clone();
                        let mut second = second.clone();
                        second.relation = segment.to_string();
                        self.push_join(key, &second, &mid_alias, kind)
                    } else {
                        self.push_join(key, &hops[0], &owner_alias, kind)
                    }
                }
            };

            owner_alias = self.joins[idx].alias.clone();
            entity = self.schema.require_entity(&self.joins[idx].entity)?;
            prefix = self.joins[idx].path.clone();
            last = Some(idx);
        }

        match last {
            Some(idx) => Ok((idx, to_many)),
            None => Err(Error::build(
                BuildErrorKind::InvalidClause,
                "empty relation path".to_string(),
            )),
        }
    }

    fn alias_taken(&self, alias: &str) -> bool {
        alias == self.primary_table || self.joins.iter().any(|j| j.alias == alias)
    }

    fn assign_alias(&mut self, keys: &RelationKeys) -> String {
        let table_seen = keys.related_table == self.primary_table
            || self.joins.iter().any(|j| j.table == keys.related_table);
        let candidate = keys.relation.as_str();
        if !keys.is_self_referential() && !table_seen && !self.alias_taken(candidate) {
            return candidate.to_string();
        }
        loop {
            self.suffix_counter += 1;
            let alias = format!("{}_j{}", candidate, self.suffix_counter);
            if !self.alias_taken(&alias) {
                return alias;
            }
        }
    }

    fn push_join(
        &mut self,
        path: String,
        keys: &RelationKeys,
        owner_alias: &str,
        kind: JoinKind,
    ) -> usize {
        let alias = self.assign_alias(keys);
        tracing::trace!(path = %path, alias = %alias, table = %keys.related_table, "join resolved");
        self.joins.push(ResolvedJoin {
            path: path.clone(),
            relation: keys.relation.clone(),
            table: keys.related_table.clone(),
            alias,
            kind,
            entity: keys.related_entity.clone(),
            owner_alias: owner_alias.to_string(),
            owner_column: keys.local_column.clone(),
            target_column: keys.remote_column.clone(),
            refine: None,
        });
        let idx = self.joins.len() - 1;
        self.by_path.insert(path, idx);
        idx
    }

    /// Resolve a field reference to an alias and storage column.
    ///
    /// Dotted references resolve through their relation path; the primary
    /// table's own name also qualifies its fields. A bare name resolves to
    /// the one table in the query (primary or joined) that declares it.
    /// Two or more such tables make it ambiguous.
    pub fn resolve_field(&self, reference: &str, scope: FieldScope) -> Result<FieldRef> {
        let (path, attr) = split_field(reference);

        if let Some(path) = path {
            if self.names_primary(path) {
                let column = match self.primary_entity {
                    Some(primary) => primary.column_of(attr)?.to_string(),
                    None => attr.to_string(),
                };
                return Ok(FieldRef {
                    alias: self.primary_table.clone(),
                    column,
                });
            }
            let idx = self.by_path.get(path).copied().ok_or_else(|| {
                Error::resolution(
                    ResolutionErrorKind::NoSuchRelation,
                    format!("relation path '{}' was not joined", path),
                )
            })?;
            return self.field_on_join(idx, attr);
        }

        if let FieldScope::Join(idx) = scope {
            return self.field_on_join(idx, attr);
        }

        let Some(primary) = self.primary_entity else {
            return Ok(FieldRef {
                alias: self.primary_table.clone(),
                column: attr.to_string(),
            });
        };
        // (alias, table, column) for every table in the query declaring the attribute
        let mut candidates: Vec<(&str, &str, &str)> = Vec::new();
        if let Some(field) = primary.get_field(attr) {
            candidates.push((
                self.primary_table.as_str(),
                primary.table.as_str(),
                field.column.as_str(),
            ));
        }
        for join in &self.joins {
            let Some(entity) = self.schema.entity(&join.entity) else {
                continue;
            };
            if let Some(field) = entity.get_field(attr) {
                candidates.push((join.alias.as_str(), join.table.as_str(), field.column.as_str()));
            }
        }

        match candidates.as_slice() {
            [(alias, _, column)] => Ok(FieldRef {
                alias: (*alias).to_string(),
                column: (*column).to_string(),
            }),
            [] => Err(Error::resolution(
                ResolutionErrorKind::NoSuchField,
                format!(
                    "no field '{}' on entity '{}' or any joined relation",
                    attr, primary.name
                ),
            )),
            many => {
                let names: Vec<String> = many
                    .iter()
                    .map(|(alias, table, _)| format!("'{}' (table '{}')", alias, table))
                    .collect();
                Err(Error::resolution(
                    ResolutionErrorKind::AmbiguousField,
                    format!(
                        "field '{}' is ambiguous between {}; qualify it with a relation path",
                        attr,
                        names.join(" and ")
                    ),
                ))
            }
        }
    }

    fn field_on_join(&self, idx: usize, attr: &str) -> Result<FieldRef> {
        let join = &self.joins[idx];
        let entity = self.schema.require_entity(&join.entity)?;
        Ok(FieldRef {
            alias: join.alias.clone(),
            column: entity.column_of(attr)?.to_string(),
        })
    }
}
