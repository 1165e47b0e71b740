//! Eager loading of relation paths.
//!
//! Paths are split into levels by depth. Each distinct prefix at a level is
//! fetched with a single statement filtering the related table by the keys
//! of every owner reached so far, so the statement count depends on the
//! number of paths, never on the number of rows. Statements of one level
//! run concurrently and are chained to the primary query's transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use sqlrel_core::{
    ConnectionSource, Cx, Error, GroupKey, Outcome, RelationKeys, RelationKind, Result, Row,
    Schema, Value,
};
use sqlrel_query::{Condition, Query};

use crate::database::QueryOutput;
use crate::instance::{InstanceId, RelationCache};
use crate::session::Session;

/// Check every path against the schema before anything executes.
pub fn validate_paths(schema: &Schema, root: &str, paths: &[String]) -> Result<()> {
    for path in paths {
        let mut entity = schema.require_entity(root)?;
        for segment in path.split('.') {
            let rel = entity.require_relation(segment)?;
            schema.hops(&entity.name, segment)?;
            entity = schema.require_entity(&rel.related)?;
        }
    }
    Ok(())
}

/// One relation step at some depth: `books.tags` has parent `books`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    prefix: String,
    parent: String,
    relation: String,
}

/// Distinct steps grouped by depth, in first-seen order.
fn plan_levels(paths: &[String]) -> Vec<Vec<Step>> {
    let mut levels: Vec<Vec<Step>> = Vec::new();
    let mut seen = HashSet::new();
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        for depth in 0..segments.len() {
            let prefix = segments[..=depth].join(".");
            if !seen.insert(prefix.clone()) {
                continue;
            }
            if levels.len() <= depth {
                levels.push(Vec::new());
            }
            levels[depth].push(Step {
                prefix,
                parent: segments[..depth].join("."),
                relation: segments[depth].to_string(),
            });
        }
    }
    levels
}

enum Plan {
    Direct(RelationKeys),
    /// Owner to join entity, join entity to target.
    Through(RelationKeys, RelationKeys),
}

struct Task {
    step: Step,
    owners: Vec<InstanceId>,
    target: String,
    plan: Plan,
    /// `None` when no owner has a key; nothing is fetched.
    query: Option<Query>,
}

impl<S: ConnectionSource> Session<S> {
    /// Load `paths` for `roots` (all instances of `root`), binding every
    /// statement to the transaction of `anchor`.
    pub(crate) async fn load_paths(
        &mut self,
        cx: &Cx,
        root: &str,
        roots: &[InstanceId],
        paths: &[String],
        anchor: &Query,
    ) -> Outcome<(), Error> {
        if paths.is_empty() {
            return Outcome::Ok(());
        }
        let schema = self.schema();
        try_result!(validate_paths(&schema, root, paths));

        let mut reached: HashMap<String, (String, Vec<InstanceId>)> = HashMap::new();
        reached.insert(String::new(), (root.to_string(), roots.to_vec()));

        for level in plan_levels(paths) {
            let mut tasks = Vec::with_capacity(level.len());
            for step in level {
                let Some((owner_entity, owners)) = reached.get(&step.parent).cloned() else {
                    continue;
                };
                tasks.push(try_result!(self.prepare(&schema, &owner_entity, owners, step, anchor)));
            }

            let db = Arc::clone(&self.db);
            let results = join_all(tasks.iter().map(|task| {
                let db = &db;
                async move {
                    match &task.query {
                        Some(query) => db.execute(cx, query).await.map(Some),
                        None => Outcome::Ok(None),
                    }
                }
            }))
            .await;

            for (task, result) in tasks.into_iter().zip(results) {
                let rows = try_outcome!(result)
                    .map(|output: QueryOutput| output.rows)
                    .unwrap_or_default();
                let children = try_result!(self.attach(&schema, &task, &rows));
                tracing::trace!(
                    path = %task.step.prefix,
                    owners = task.owners.len(),
                    loaded = children.len(),
                    "attached eager level"
                );
                reached.insert(task.step.prefix.clone(), (task.target.clone(), children));
            }
        }
        Outcome::Ok(())
    }

    fn prepare(
        &self,
        schema: &Schema,
        owner_entity: &str,
        owners: Vec<InstanceId>,
        step: Step,
        anchor: &Query,
    ) -> Result<Task> {
        let desc = schema
            .require_entity(owner_entity)?
            .require_relation(&step.relation)?;
        let target = desc.related.clone();

        if desc.kind != RelationKind::ToManyThrough {
            let keys = schema.relation_keys(owner_entity, &step.relation)?;
            let values = self.distinct_keys(&owners, &keys.local_key)?;
            let query = if values.is_empty() {
                None
            } else {
                let mut query = Query::select(&keys.related_table)
                    .filter(Condition::is_in(keys.remote_key.as_str(), values));
                if keys.kind == RelationKind::ToMany {
                    let pk = schema.require_entity(&target)?.primary_key()?;
                    query = query.order_by(&pk.name);
                }
                Some(query.chain(anchor))
            };
            return Ok(Task {
                step,
                owners,
                target,
                plan: Plan::Direct(keys),
                query,
            });
        }

        let mut hops = schema.hops(owner_entity, &step.relation)?.into_iter();
        let (Some(first), Some(second)) = (hops.next(), hops.next()) else {
            return Err(Error::resolution(
                sqlrel_core::ResolutionErrorKind::InvalidRelation,
                format!("'{}.{}' does not walk two hops", owner_entity, step.relation),
            ));
        };
        let target_def = schema.require_entity(&target)?;
        let values = self.distinct_keys(&owners, &first.local_key)?;
        let query = if values.is_empty() {
            None
        } else {
            // Owner key first, then every target field through the source join.
            let mut fields = vec![first.remote_key.clone()];
            fields.extend(
                target_def
                    .fields
                    .iter()
                    .map(|f| format!("{}.{}", second.relation, f.name)),
            );
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let pk = target_def.primary_key()?;
            let query = Query::select(&first.related_table)
                .join(&second.relation)
                .columns(&refs)
                .filter(Condition::is_in(first.remote_key.as_str(), values))
                .order_by(&format!("{}.{}", second.relation, pk.name));
            Some(query.chain(anchor))
        };
        Ok(Task {
            step,
            owners,
            target,
            plan: Plan::Through(first, second),
            query,
        })
    }

    fn distinct_keys(&self, owners: &[InstanceId], attr: &str) -> Result<Vec<Value>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for owner in owners {
            let value = self.instance(*owner)?.value(attr);
            if let Some(key) = value.group_key() {
                if seen.insert(key) {
                    keys.push(value);
                }
            }
        }
        Ok(keys)
    }

    /// Register fetched rows and fill the owners' caches. Owners without
    /// rows get an empty collection (or an empty to-one).
    fn attach(&mut self, schema: &Schema, task: &Task, rows: &[Row]) -> Result<Vec<InstanceId>> {
        let relation = task.step.relation.as_str();
        let mut children = Vec::new();
        let mut groups: HashMap<GroupKey, Vec<InstanceId>> = HashMap::new();

        let owner_attr = match &task.plan {
            Plan::Direct(keys) => {
                for row in rows {
                    let id = self.register(&task.target, row)?;
                    let key = self.instance(id)?.value(&keys.remote_key).group_key();
                    collect(&mut groups, &mut children, key, id);
                }
                keys.local_key.as_str()
            }
            Plan::Through(first, _) => {
                let columns: Vec<String> = schema
                    .require_entity(&task.target)?
                    .fields
                    .iter()
                    .map(|f| f.column.clone())
                    .collect();
                for row in rows {
                    let owner_key = row.get(0).and_then(Value::group_key);
                    let target_row = Row::new(columns.clone(), row.values().skip(1).cloned().collect());
                    let id = self.register(&task.target, &target_row)?;
                    collect(&mut groups, &mut children, owner_key, id);
                }
                first.local_key.as_str()
            }
        };

        for &owner in &task.owners {
            let members = self
                .instance(owner)?
                .value(owner_attr)
                .group_key()
                .and_then(|key| groups.get(&key).cloned())
                .unwrap_or_default();
            match &task.plan {
                Plan::Direct(keys) if keys.kind == RelationKind::ToOne => {
                    self.instance_mut(owner)?
                        .set_cache(relation, RelationCache::One(members.first().copied()));
                }
                Plan::Direct(keys) => {
                    if let Some(inverse) = &keys.inverse {
                        for &member in &members {
                            self.instance_mut(member)?
                                .set_cache(inverse, RelationCache::One(Some(owner)));
                        }
                    }
                    self.instance_mut(owner)?
                        .set_cache(relation, RelationCache::Many(members));
                }
                Plan::Through(..) => {
                    self.instance_mut(owner)?
                        .set_cache(relation, RelationCache::Many(members));
                }
            }
        }
        Ok(children)
    }
}

fn collect(
    groups: &mut HashMap<GroupKey, Vec<InstanceId>>,
    children: &mut Vec<InstanceId>,
    key: Option<GroupKey>,
    id: InstanceId,
) {
    if !children.contains(&id) {
        children.push(id);
    }
    if let Some(key) = key {
        let members = groups.entry(key).or_default();
        if !members.contains(&id) {
            members.push(id);
        }
    }
}
