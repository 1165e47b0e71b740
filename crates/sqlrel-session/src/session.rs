//! The session: an arena of entity instances with relation caches.
//!
//! Instances are addressed by [`InstanceId`] and refer to each other by id,
//! so cyclic relations (an author's books pointing back at the author) need
//! no shared ownership. Fetched rows are deduplicated through an identity
//! map keyed by entity and primary key.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sqlrel_core::{
    ConnectionSource, Cx, Error, GroupKey, Outcome, QueryErrorKind, RelationDescriptor,
    RelationErrorKind, RelationKind, ResolutionErrorKind, Result, Row, Schema, Value,
};
use sqlrel_query::{Condition, Query, TxRole};

use crate::database::Database;
use crate::instance::{Instance, InstanceId, RelationCache};
use crate::pending::FlushOp;

/// Unit of work over one [`Database`].
///
/// A session is single-owner: mutation goes through `&mut self`. Share the
/// database, not the session, between tasks.
pub struct Session<S: ConnectionSource> {
    pub(crate) db: Arc<Database<S>>,
    pub(crate) instances: Vec<Instance>,
    identity: HashMap<(String, GroupKey), InstanceId>,
    tx: Option<Query>,
}

impl<S: ConnectionSource> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instances", &self.instances.len())
            .field("in_transaction", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: ConnectionSource> Session<S> {
    pub fn new(db: Arc<Database<S>>) -> Self {
        Self {
            db,
            instances: Vec::new(),
            identity: HashMap::new(),
            tx: None,
        }
    }

    pub fn database(&self) -> &Arc<Database<S>> {
        &self.db
    }

    pub(crate) fn schema(&self) -> Arc<Schema> {
        Arc::clone(self.db.schema())
    }

    /// Number of instances held.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance(&self, id: InstanceId) -> Result<&Instance> {
        self.instances.get(id.index()).ok_or_else(|| unknown_instance(id))
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance> {
        self.instances
            .get_mut(id.index())
            .ok_or_else(|| unknown_instance(id))
    }

    /// The instance of `entity` with primary key `key`, if held.
    pub fn lookup(&self, entity: &str, key: &Value) -> Option<InstanceId> {
        let key = key.group_key()?;
        self.identity.get(&(entity.to_string(), key)).copied()
    }

    // ==================== Attributes ====================

    /// Create an unsaved instance of `entity`.
    ///
    /// Collection relations start loaded and empty; a to-one relation starts
    /// loaded and empty unless its foreign key was given.
    pub fn create<K, V>(
        &mut self,
        entity: &str,
        attrs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<InstanceId>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let schema = self.schema();
        let def = schema.require_entity(entity)?;
        let id = InstanceId::from_index(self.instances.len());
        let mut instance = Instance::new(id, &def.name, false);
        for (attr, value) in attrs {
            let attr = attr.into();
            def.column_of(&attr)?;
            instance.set_value(&attr, value.into(), true);
        }
        for rel in &def.relations {
            if rel.kind.is_collection() {
                instance.set_cache(&rel.name, RelationCache::Many(Vec::new()));
                continue;
            }
            let keys = schema.relation_keys(&def.name, &rel.name)?;
            if instance.value(&keys.local_key).is_null() {
                instance.set_cache(&rel.name, RelationCache::One(None));
            }
        }
        self.instances.push(instance);
        tracing::trace!(entity = %def.name, %id, "created instance");
        Ok(id)
    }

    pub fn get(&self, id: InstanceId, attr: &str) -> Result<Value> {
        let instance = self.instance(id)?;
        self.schema()
            .require_entity(instance.entity())?
            .column_of(attr)?;
        Ok(instance.value(attr))
    }

    /// Assign an attribute; it is written by the next [`save`](Self::save).
    pub fn set(&mut self, id: InstanceId, attr: &str, value: impl Into<Value>) -> Result<()> {
        let schema = self.schema();
        let instance = self.instance_mut(id)?;
        schema.require_entity(instance.entity())?.column_of(attr)?;
        instance.set_value(attr, value.into(), true);
        Ok(())
    }

    // ==================== Relations ====================

    fn describe(&self, id: InstanceId, relation: &str) -> Result<(String, RelationDescriptor)> {
        let schema = self.schema();
        let entity = self.instance(id)?.entity().to_string();
        let desc = schema.require_entity(&entity)?.require_relation(relation)?.clone();
        Ok((entity, desc))
    }

    fn describe_collection(
        &self,
        id: InstanceId,
        relation: &str,
    ) -> Result<(String, RelationDescriptor)> {
        let (entity, desc) = self.describe(id, relation)?;
        if !desc.kind.is_collection() {
            return Err(Error::relation(
                RelationErrorKind::UnsupportedKind,
                format!("'{entity}.{relation}' is a to-one relation; use related_one"),
            ));
        }
        Ok((entity, desc))
    }

    fn check_target(
        &self,
        entity: &str,
        desc: &RelationDescriptor,
        related: InstanceId,
    ) -> Result<()> {
        let actual = self.instance(related)?.entity();
        if actual != desc.related {
            return Err(Error::relation(
                RelationErrorKind::WrongEntity,
                format!(
                    "relation '{}.{}' holds '{}' instances, got '{}' ({})",
                    entity, desc.name, desc.related, actual, related
                ),
            ));
        }
        Ok(())
    }

    /// Members of a loaded collection relation.
    pub fn related(&self, id: InstanceId, relation: &str) -> Result<&[InstanceId]> {
        let (entity, _) = self.describe_collection(id, relation)?;
        match self.instance(id)?.cache(relation) {
            Some(RelationCache::Many(ids)) => Ok(ids),
            _ => Err(not_loaded(&entity, relation, id)),
        }
    }

    /// Target of a loaded to-one relation.
    pub fn related_one(&self, id: InstanceId, relation: &str) -> Result<Option<InstanceId>> {
        let (entity, desc) = self.describe(id, relation)?;
        if desc.kind.is_collection() {
            return Err(Error::relation(
                RelationErrorKind::UnsupportedKind,
                format!("'{entity}.{relation}' is a collection relation; use related"),
            ));
        }
        match self.instance(id)?.cache(relation) {
            Some(RelationCache::One(target)) => Ok(*target),
            _ => Err(not_loaded(&entity, relation, id)),
        }
    }

    /// Point `relation` of `owner` at `related`, updating foreign keys and
    /// the loaded inverse. Key changes are written by the next save.
    pub fn associate(&mut self, owner: InstanceId, relation: &str, related: InstanceId) -> Result<()> {
        self.link(owner, relation, related, true)
    }

    /// Undo [`associate`](Self::associate).
    pub fn disassociate(
        &mut self,
        owner: InstanceId,
        relation: &str,
        related: InstanceId,
    ) -> Result<()> {
        self.unlink(owner, relation, related, true)
    }

    pub(crate) fn link(
        &mut self,
        owner: InstanceId,
        relation: &str,
        related: InstanceId,
        mark_dirty: bool,
    ) -> Result<()> {
        let schema = self.schema();
        let (entity, desc) = self.describe(owner, relation)?;
        self.check_target(&entity, &desc, related)?;
        match desc.kind {
            RelationKind::ToOne => {
                let keys = schema.relation_keys(&entity, relation)?;
                let key = self.instance(related)?.value(&keys.remote_key);
                let previous = match self.instance(owner)?.cache(relation) {
                    Some(RelationCache::One(Some(prev))) if *prev != related => Some(*prev),
                    _ => None,
                };
                if let Some(inverse) = &keys.inverse {
                    if let Some(prev) = previous {
                        if let Some(cache) = self.instance_mut(prev)?.cache_mut(inverse) {
                            cache.remove(owner);
                        }
                    }
                    if let Some(cache) = self.instance_mut(related)?.cache_mut(inverse) {
                        cache.push(owner);
                    }
                }
                let instance = self.instance_mut(owner)?;
                instance.set_value(&keys.local_key, key, mark_dirty);
                instance.set_cache(relation, RelationCache::One(Some(related)));
            }
            RelationKind::ToMany => {
                let keys = schema.relation_keys(&entity, relation)?;
                let key = self.instance(owner)?.value(&keys.local_key);
                if let Some(inverse) = &keys.inverse {
                    let previous = match self.instance(related)?.cache(inverse) {
                        Some(RelationCache::One(Some(prev))) if *prev != owner => Some(*prev),
                        _ => None,
                    };
                    if let Some(prev) = previous {
                        if let Some(cache) = self.instance_mut(prev)?.cache_mut(relation) {
                            cache.remove(related);
                        }
                    }
                    self.instance_mut(related)?
                        .set_cache(inverse, RelationCache::One(Some(owner)));
                }
                self.instance_mut(related)?
                    .set_value(&keys.remote_key, key, mark_dirty);
                if let Some(cache) = self.instance_mut(owner)?.cache_mut(relation) {
                    cache.push(related);
                }
            }
            RelationKind::ToManyThrough => {
                if let Some(cache) = self.instance_mut(owner)?.cache_mut(relation) {
                    cache.push(related);
                }
            }
        }
        tracing::trace!(%owner, relation, %related, "linked");
        Ok(())
    }

    pub(crate) fn unlink(
        &mut self,
        owner: InstanceId,
        relation: &str,
        related: InstanceId,
        mark_dirty: bool,
    ) -> Result<()> {
        let schema = self.schema();
        let (entity, desc) = self.describe(owner, relation)?;
        self.check_target(&entity, &desc, related)?;
        match desc.kind {
            RelationKind::ToOne => {
                let keys = schema.relation_keys(&entity, relation)?;
                if let Some(inverse) = &keys.inverse {
                    if let Some(cache) = self.instance_mut(related)?.cache_mut(inverse) {
                        cache.remove(owner);
                    }
                }
                let instance = self.instance_mut(owner)?;
                instance.set_value(&keys.local_key, Value::Null, mark_dirty);
                instance.set_cache(relation, RelationCache::One(None));
            }
            RelationKind::ToMany => {
                let keys = schema.relation_keys(&entity, relation)?;
                let instance = self.instance_mut(related)?;
                instance.set_value(&keys.remote_key, Value::Null, mark_dirty);
                if let Some(inverse) = &keys.inverse {
                    if let Some(cache) = instance.cache_mut(inverse) {
                        cache.remove(owner);
                    }
                }
                if let Some(cache) = self.instance_mut(owner)?.cache_mut(relation) {
                    cache.remove(related);
                }
            }
            RelationKind::ToManyThrough => {
                if let Some(cache) = self.instance_mut(owner)?.cache_mut(relation) {
                    cache.remove(related);
                }
            }
        }
        tracing::trace!(%owner, relation, %related, "unlinked");
        Ok(())
    }

    /// Add `related` to a collection relation; written by the next save.
    pub fn add(&mut self, owner: InstanceId, relation: &str, related: InstanceId) -> Result<()> {
        self.describe_collection(owner, relation)?;
        self.link(owner, relation, related, false)?;
        self.instance_mut(owner)?.change_mut(relation).add(related);
        Ok(())
    }

    /// Remove `related` from a collection relation; written by the next save.
    pub fn remove(&mut self, owner: InstanceId, relation: &str, related: InstanceId) -> Result<()> {
        self.describe_collection(owner, relation)?;
        self.unlink(owner, relation, related, false)?;
        self.instance_mut(owner)?.change_mut(relation).remove(related);
        Ok(())
    }

    /// Empty a collection relation; written by the next save.
    pub fn clear(&mut self, owner: InstanceId, relation: &str) -> Result<()> {
        self.describe_collection(owner, relation)?;
        let members = match self.instance(owner)?.cache(relation) {
            Some(RelationCache::Many(ids)) => ids.clone(),
            _ => Vec::new(),
        };
        for member in members {
            self.unlink(owner, relation, member, false)?;
        }
        let instance = self.instance_mut(owner)?;
        instance.set_cache(relation, RelationCache::Many(Vec::new()));
        instance.change_mut(relation).clear();
        Ok(())
    }

    // ==================== Persistence ====================

    /// Write an instance: INSERT when new, UPDATE of dirty attributes
    /// otherwise, then flush pending relation changes.
    ///
    /// A relation's change is discarded only after all of its statements
    /// succeed, so a failed save can be retried.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn save(&mut self, cx: &Cx, id: InstanceId) -> Outcome<(), Error> {
        try_result!(self.sync_to_one_keys(id));
        try_outcome!(self.persist(cx, id).await);

        let relations = try_result!(self.instance(id)).pending_relations();
        for relation in relations {
            let statements = try_result!(self.flush_statements(id, &relation));
            for statement in &statements {
                try_outcome!(self.db.execute(cx, statement).await);
            }
            try_result!(self.instance_mut(id)).finish_change(&relation);
            tracing::debug!(%id, relation = %relation, statements = statements.len(), "flushed relation change");
        }
        Outcome::Ok(())
    }

    /// Copy keys of cached to-one targets into the owner's foreign keys;
    /// targets saved after being associated now have their key.
    fn sync_to_one_keys(&mut self, id: InstanceId) -> Result<()> {
        let schema = self.schema();
        let instance = self.instance(id)?;
        let def = schema.require_entity(instance.entity())?;
        let mut updates = Vec::new();
        for rel in def.relations.iter().filter(|r| r.kind == RelationKind::ToOne) {
            if let Some(RelationCache::One(Some(target))) = instance.cache(&rel.name) {
                let keys = schema.relation_keys(&def.name, &rel.name)?;
                let key = self.instance(*target)?.value(&keys.remote_key);
                if !key.is_null() {
                    updates.push((keys.local_key, key));
                }
            }
        }
        let instance = self.instance_mut(id)?;
        for (attr, key) in updates {
            instance.set_value(&attr, key, true);
        }
        Ok(())
    }

    async fn persist(&mut self, cx: &Cx, id: InstanceId) -> Outcome<(), Error> {
        let schema = self.schema();
        let (query, inserting, pk) = {
            let instance = try_result!(self.instance(id));
            let def = try_result!(schema.require_entity(instance.entity()));
            let pk = try_result!(def.primary_key());
            if !instance.is_persisted() {
                let pairs: Vec<(String, Value)> = def
                    .fields
                    .iter()
                    .filter_map(|f| {
                        let value = instance.get(&f.name)?;
                        (!(f.auto_increment && value.is_null()))
                            .then(|| (f.name.clone(), value.clone()))
                    })
                    .collect();
                let query = Query::insert(&def.table)
                    .values(pairs)
                    .returning(&[pk.name.as_str()]);
                (query, true, pk.name.clone())
            } else if instance.is_dirty() {
                let pairs: Vec<(String, Value)> = instance
                    .dirty_set()
                    .iter()
                    .map(|attr| (attr.clone(), instance.value(attr)))
                    .collect();
                let query = Query::update(&def.table)
                    .set(pairs)
                    .filter(Condition::eq(pk.name.clone(), instance.value(&pk.name)));
                (query, false, pk.name.clone())
            } else {
                return Outcome::Ok(());
            }
        };

        let output = try_outcome!(self.db.execute(cx, &self.bind(&query)).await);
        let instance = try_result!(self.instance_mut(id));
        if !inserting {
            instance.mark_persisted();
            return Outcome::Ok(());
        }
        if instance.value(&pk).is_null() {
            match output.generated_key {
                Some(key) => instance.set_value(&pk, key, false),
                None => {
                    return Outcome::Err(Error::query(
                        QueryErrorKind::Database,
                        None,
                        format!(
                            "insert into '{}' returned no value for '{}'",
                            query.table(),
                            pk
                        ),
                    ));
                }
            }
        }
        instance.mark_persisted();
        let entity = instance.entity().to_string();
        let key = instance.value(&pk).group_key();
        if let Some(key) = key {
            self.identity.insert((entity, key), id);
        }
        Outcome::Ok(())
    }

    /// Statements writing the pending change of one relation.
    pub(crate) fn flush_statements(&self, id: InstanceId, relation: &str) -> Result<Vec<Query>> {
        let schema = self.schema();
        let instance = self.instance(id)?;
        let Some(change) = instance.pending_change(relation) else {
            return Ok(Vec::new());
        };
        let def = schema.require_entity(instance.entity())?;
        let desc = def.require_relation(relation)?;
        let mut statements = Vec::new();
        match desc.kind {
            RelationKind::ToMany => {
                let keys = schema.relation_keys(&def.name, relation)?;
                let owner_key = self.persisted_key(id, &keys.local_key)?;
                let related_pk = schema
                    .require_entity(&keys.related_entity)?
                    .primary_key()?
                    .name
                    .clone();
                let fk = keys.remote_key.as_str();
                for op in change.ops() {
                    statements.push(match op {
                        FlushOp::Clear => Query::update(&keys.related_table)
                            .set([(fk, Value::Null)])
                            .filter(Condition::eq(fk, owner_key.clone())),
                        FlushOp::Remove(ids) => Query::update(&keys.related_table)
                            .set([(fk, Value::Null)])
                            .filter(
                                Condition::is_in(
                                    related_pk.as_str(),
                                    self.persisted_keys(&ids, &related_pk)?,
                                )
                                .and(Condition::eq(fk, owner_key.clone())),
                            ),
                        FlushOp::Add(ids) => Query::update(&keys.related_table)
                            .set([(fk, owner_key.clone())])
                            .filter(Condition::is_in(
                                related_pk.as_str(),
                                self.persisted_keys(&ids, &related_pk)?,
                            )),
                    });
                }
            }
            RelationKind::ToManyThrough => {
                let hops = schema.hops(&def.name, relation)?;
                let [first, second] = hops.as_slice() else {
                    return Err(Error::resolution(
                        ResolutionErrorKind::InvalidRelation,
                        format!("'{}.{}' does not walk two hops", def.name, relation),
                    ));
                };
                let owner_key = self.persisted_key(id, &first.local_key)?;
                let owner_fk = first.remote_key.as_str();
                let target_fk = second.local_key.as_str();
                for op in change.ops() {
                    statements.push(match op {
                        FlushOp::Clear => Query::delete(&first.related_table)
                            .filter(Condition::eq(owner_fk, owner_key.clone())),
                        FlushOp::Remove(ids) => Query::delete(&first.related_table).filter(
                            Condition::eq(owner_fk, owner_key.clone()).and(Condition::is_in(
                                target_fk,
                                self.persisted_keys(&ids, &second.remote_key)?,
                            )),
                        ),
                        FlushOp::Add(ids) => {
                            let mut insert = Query::insert(&first.related_table);
                            for (i, target) in self
                                .persisted_keys(&ids, &second.remote_key)?
                                .into_iter()
                                .enumerate()
                            {
                                let row = [(owner_fk, owner_key.clone()), (target_fk, target)];
                                insert = if i == 0 {
                                    insert.values(row)
                                } else {
                                    insert.add_row(row)
                                };
                            }
                            insert
                        }
                    });
                }
            }
            RelationKind::ToOne => {
                return Err(Error::relation(
                    RelationErrorKind::UnsupportedKind,
                    format!("'{}.{}' is a to-one relation", def.name, relation),
                ));
            }
        }
        Ok(statements.iter().map(|q| self.bind(q)).collect())
    }

    fn persisted_key(&self, id: InstanceId, attr: &str) -> Result<Value> {
        let instance = self.instance(id)?;
        let value = instance.value(attr);
        if value.is_null() {
            return Err(Error::relation(
                RelationErrorKind::NotPersisted,
                format!(
                    "instance {} of '{}' has no value for '{}'; save it first",
                    id,
                    instance.entity(),
                    attr
                ),
            ));
        }
        Ok(value)
    }

    fn persisted_keys(&self, ids: &[InstanceId], attr: &str) -> Result<Vec<Value>> {
        ids.iter().map(|id| self.persisted_key(*id, attr)).collect()
    }

    // ==================== Fetching ====================

    /// Run a select, register its rows as instances and load its eager
    /// paths. Duplicate rows map to one instance.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(table = %query.table()))]
    pub async fn fetch(&mut self, cx: &Cx, query: &Query) -> Outcome<Vec<InstanceId>, Error> {
        let schema = self.schema();
        let entity = match schema.entity_for_table(query.table()) {
            Some(def) => def.name.clone(),
            None => {
                return Outcome::Err(Error::resolution(
                    ResolutionErrorKind::UnknownEntity,
                    format!("no entity is stored in table '{}'", query.table()),
                ));
            }
        };
        try_result!(crate::eager::validate_paths(&schema, &entity, query.eager_paths()));

        let bound = self.bind(query);
        let output = try_outcome!(self.db.execute(cx, &bound).await);
        let mut ids = Vec::with_capacity(output.rows.len());
        let mut seen = HashSet::new();
        for row in &output.rows {
            let id = try_result!(self.register(&entity, row));
            if seen.insert(id) {
                ids.push(id);
            }
        }
        tracing::debug!(entity = %entity, rows = output.rows.len(), instances = ids.len(), "fetched");

        try_outcome!(self.load_paths(cx, &entity, &ids, query.eager_paths(), &bound).await);
        Outcome::Ok(ids)
    }

    /// Eager-load `path` for instances already held.
    pub async fn load(&mut self, cx: &Cx, ids: &[InstanceId], path: &str) -> Outcome<(), Error> {
        let Some(first) = ids.first() else {
            return Outcome::Ok(());
        };
        let entity = try_result!(self.instance(*first)).entity().to_string();
        for id in ids {
            let other = try_result!(self.instance(*id)).entity();
            if other != entity {
                return Outcome::Err(Error::relation(
                    RelationErrorKind::WrongEntity,
                    format!("cannot load '{path}' for a mix of '{entity}' and '{other}' instances"),
                ));
            }
        }
        let anchor = self.bind(&Query::select(""));
        self.load_paths(cx, &entity, ids, &[path.to_string()], &anchor)
            .await
    }

    /// Turn a row into an instance, refreshing the held one when the
    /// primary key is already known.
    pub(crate) fn register(&mut self, entity: &str, row: &Row) -> Result<InstanceId> {
        let schema = self.schema();
        let def = schema.require_entity(entity)?;
        let mut values = BTreeMap::new();
        for (column, value) in row.iter() {
            let attr = def
                .fields
                .iter()
                .find(|f| f.column == column)
                .map_or(column, |f| f.name.as_str());
            values.insert(attr.to_string(), value.clone());
        }
        let key = values
            .get(&def.primary_key()?.name)
            .and_then(Value::group_key);

        if let Some(key) = &key {
            if let Some(&id) = self.identity.get(&(def.name.clone(), key.clone())) {
                self.instance_mut(id)?.refresh(values);
                return Ok(id);
            }
        }
        let id = InstanceId::from_index(self.instances.len());
        let mut instance = Instance::new(id, &def.name, true);
        for (attr, value) in values {
            instance.set_value(&attr, value, false);
        }
        self.instances.push(instance);
        if let Some(key) = key {
            self.identity.insert((def.name.clone(), key), id);
        }
        Ok(id)
    }

    // ==================== Transactions ====================

    /// Begin a transaction, or nest into the open one.
    ///
    /// Statements issued by the session until the matching commit or
    /// rollback run on the transaction's connection.
    pub async fn begin(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let query = match &self.tx {
            Some(anchor) => anchor.begin(),
            None => Query::begin_transaction(),
        };
        try_outcome!(self.db.execute(cx, &query).await);
        self.tx = Some(query);
        Outcome::Ok(())
    }

    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.finish(cx, true).await
    }

    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.finish(cx, false).await
    }

    async fn finish(&mut self, cx: &Cx, commit: bool) -> Outcome<(), Error> {
        let anchor = self.tx.clone().unwrap_or_else(|| Query::select(""));
        let query = if commit { anchor.commit() } else { anchor.rollback() };
        let outcome = self.db.execute(cx, &query).await;
        self.tx = (query.tx_role() == Some(TxRole::Nested)).then_some(query);
        outcome.map(|_| ())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Bind `query` to the open transaction unless it already carries one.
    pub fn bind(&self, query: &Query) -> Query {
        match (&self.tx, query.transaction()) {
            (Some(anchor), None) => query.chain(anchor),
            _ => query.clone(),
        }
    }
}

fn unknown_instance(id: InstanceId) -> Error {
    Error::relation(
        RelationErrorKind::UnknownInstance,
        format!("no instance {id} in this session"),
    )
}

fn not_loaded(entity: &str, relation: &str, id: InstanceId) -> Error {
    Error::relation(
        RelationErrorKind::NotLoaded,
        format!("relation '{entity}.{relation}' of instance {id} is not loaded; fetch it with `with(\"{relation}\")` or `load`"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSource, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use sqlrel_core::{EntityDef, FieldDef, QueryResult, SqlType};
    use sqlrel_query::DialectKind;

    fn library() -> Arc<Schema> {
        Schema::builder()
            .entity(
                EntityDef::new("author", "authors")
                    .field(FieldDef::id("id"))
                    .field(FieldDef::new("name", SqlType::Text))
                    .relation(RelationDescriptor::to_many("books", "book")),
            )
            .entity(
                EntityDef::new("book", "books")
                    .field(FieldDef::id("id"))
                    .field(FieldDef::new("title", SqlType::Text))
                    .field(FieldDef::new("author_id", SqlType::BigInt).nullable(true))
                    .relation(RelationDescriptor::to_one("author", "author"))
                    .relation(RelationDescriptor::to_many("taggings", "tagging"))
                    .relation(RelationDescriptor::through("tags", "tag", "taggings", "tag")),
            )
            .entity(
                EntityDef::new("tag", "tags")
                    .field(FieldDef::id("id"))
                    .field(FieldDef::new("name", SqlType::Text)),
            )
            .entity(
                EntityDef::new("tagging", "taggings")
                    .field(FieldDef::id("id"))
                    .field(FieldDef::new("book_id", SqlType::BigInt))
                    .field(FieldDef::new("tag_id", SqlType::BigInt))
                    .relation(RelationDescriptor::to_one("book", "book"))
                    .relation(RelationDescriptor::to_one("tag", "tag")),
            )
            .build()
            .unwrap()
    }

    fn session(source: &MockSource) -> Session<MockSource> {
        let db = Database::new(source.clone(), library(), DialectKind::Postgres);
        Session::new(Arc::new(db))
    }

    fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> QueryResult {
        let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        QueryResult::from_rows(
            data.into_iter()
                .map(|values| Row::new(columns.clone(), values))
                .collect(),
        )
    }

    fn persisted(session: &mut Session<MockSource>, table: &str, row: QueryResult) -> Vec<InstanceId> {
        let entity = session
            .schema()
            .entity_for_table(table)
            .unwrap()
            .name
            .clone();
        row.rows
            .iter()
            .map(|r| session.register(&entity, r).unwrap())
            .collect()
    }

    #[test]
    fn associate_updates_key_and_inverse_cache() {
        let source = MockSource::new();
        let mut s = session(&source);
        let author = persisted(&mut s, "authors", rows(&["id", "name"], vec![vec![Value::Int(7), Value::from("Le Guin")]]))[0];
        s.instance_mut(author)
            .unwrap()
            .set_cache("books", RelationCache::Many(Vec::new()));
        let book = s.create("book", [("title", "Earthsea")]).unwrap();

        s.associate(book, "author", author).unwrap();
        assert_eq!(s.get(book, "author_id").unwrap(), Value::Int(7));
        assert_eq!(s.related(author, "books").unwrap(), &[book]);
        assert_eq!(s.related_one(book, "author").unwrap(), Some(author));

        s.disassociate(book, "author", author).unwrap();
        assert_eq!(s.get(book, "author_id").unwrap(), Value::Null);
        assert!(s.related(author, "books").unwrap().is_empty());
        assert!(source.statements().is_empty());
    }

    #[test]
    fn associate_rejects_wrong_entity() {
        let source = MockSource::new();
        let mut s = session(&source);
        let tag = s.create("tag", [("name", "fantasy")]).unwrap();
        let book = s.create("book", [("title", "Earthsea")]).unwrap();
        let err = s.associate(book, "author", tag).unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::WrongEntity));
    }

    #[test]
    fn unloaded_relation_is_an_error() {
        let source = MockSource::new();
        let mut s = session(&source);
        let author = persisted(&mut s, "authors", rows(&["id", "name"], vec![vec![Value::Int(1), Value::from("A")]]))[0];
        let err = s.related(author, "books").unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::NotLoaded));
        assert!(err.to_string().contains("author.books"));

        let err = s.related(author, "name").unwrap_err();
        assert_eq!(
            err.resolution_kind(),
            Some(ResolutionErrorKind::NoSuchRelation)
        );
    }

    #[test]
    fn register_refreshes_known_instance() {
        let source = MockSource::new();
        let mut s = session(&source);
        let first = persisted(&mut s, "authors", rows(&["id", "name"], vec![vec![Value::Int(1), Value::from("A")]]))[0];
        s.set(first, "name", "edited").unwrap();
        let again = persisted(&mut s, "authors", rows(&["id", "name"], vec![vec![Value::Int(1), Value::from("B")]]))[0];
        assert_eq!(first, again);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(first, "name").unwrap(), Value::from("edited"));
        assert_eq!(s.lookup("author", &Value::Int(1)), Some(first));
    }

    #[test]
    fn save_inserts_then_updates() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let source = MockSource::new();
            source.respond("INSERT INTO \"authors\"", rows(&["id"], vec![vec![Value::Int(42)]]));
            let mut s = session(&source);
            let author = s.create("author", [("name", "Butler")]).unwrap();

            unwrap_outcome(s.save(&cx, author).await);
            assert!(s.instance(author).unwrap().is_persisted());
            assert_eq!(s.get(author, "id").unwrap(), Value::Int(42));
            assert_eq!(s.lookup("author", &Value::Int(42)), Some(author));

            s.set(author, "name", "Octavia Butler").unwrap();
            unwrap_outcome(s.save(&cx, author).await);
            // Clean instances issue nothing.
            unwrap_outcome(s.save(&cx, author).await);

            let calls = source.calls();
            assert_eq!(calls.len(), 2);
            assert_eq!(
                calls[0].0,
                "INSERT INTO \"authors\" (\"name\") VALUES ($1) RETURNING \"id\""
            );
            assert_eq!(calls[1].0, "UPDATE \"authors\" SET \"name\" = $1 WHERE \"id\" = $2");
            assert_eq!(calls[1].1, vec![Value::from("Octavia Butler"), Value::Int(42)]);
        });
    }

    #[test]
    fn relation_change_flushes_clear_then_add() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let source = MockSource::new();
            let mut s = session(&source);
            let author = persisted(&mut s, "authors", rows(&["id", "name"], vec![vec![Value::Int(1), Value::from("A")]]))[0];
            let books = persisted(
                &mut s,
                "books",
                rows(
                    &["id", "title", "author_id"],
                    vec![
                        vec![Value::Int(10), Value::from("x"), Value::Null],
                        vec![Value::Int(11), Value::from("y"), Value::Null],
                    ],
                ),
            );
            let (x, y) = (books[0], books[1]);
            s.instance_mut(author)
                .unwrap()
                .set_cache("books", RelationCache::Many(Vec::new()));

            s.add(author, "books", x).unwrap();
            s.remove(author, "books", x).unwrap();
            s.add(author, "books", y).unwrap();
            s.clear(author, "books").unwrap();
            s.add(author, "books", x).unwrap();
            assert_eq!(s.related(author, "books").unwrap(), &[x]);

            unwrap_outcome(s.save(&cx, author).await);
            let calls = source.calls();
            assert_eq!(calls.len(), 2);
            assert_eq!(
                calls[0].0,
                "UPDATE \"books\" SET \"author_id\" = $1 WHERE \"author_id\" = $2"
            );
            assert_eq!(calls[0].1, vec![Value::Null, Value::Int(1)]);
            assert_eq!(
                calls[1].0,
                "UPDATE \"books\" SET \"author_id\" = $1 WHERE \"id\" IN ($2)"
            );
            assert_eq!(calls[1].1, vec![Value::Int(1), Value::Int(10)]);
            assert!(!s.instance(author).unwrap().has_pending_changes());
        });
    }

    #[test]
    fn failed_flush_keeps_change_for_retry() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let source = MockSource::new();
            source.fail_on("INSERT INTO \"taggings\"", "constraint violated");
            let mut s = session(&source);
            let book = persisted(&mut s, "books", rows(&["id", "title", "author_id"], vec![vec![Value::Int(3), Value::from("b"), Value::Null]]))[0];
            let tags = persisted(
                &mut s,
                "tags",
                rows(&["id", "name"], vec![vec![Value::Int(5), Value::from("a")], vec![Value::Int(6), Value::from("b")]]),
            );
            s.instance_mut(book)
                .unwrap()
                .set_cache("tags", RelationCache::Many(Vec::new()));
            s.add(book, "tags", tags[0]).unwrap();
            s.add(book, "tags", tags[1]).unwrap();

            match s.save(&cx, book).await {
                Outcome::Err(e) => assert!(e.to_string().contains("constraint violated")),
                other => panic!("expected failure, got {other:?}"),
            }
            assert_eq!(
                s.instance(book).unwrap().pending_change("tags").unwrap().added(),
                &[tags[0], tags[1]]
            );

            unwrap_outcome(s.save(&cx, book).await);
            let statements = source.statements();
            assert_eq!(statements.len(), 2);
            assert_eq!(statements[0], statements[1]);
            assert_eq!(
                statements[1],
                "INSERT INTO \"taggings\" (\"book_id\", \"tag_id\") VALUES ($1, $2), ($3, $4)"
            );
            assert!(!s.instance(book).unwrap().has_pending_changes());
        });
    }

    #[test]
    fn flush_requires_persisted_members() {
        let source = MockSource::new();
        let mut s = session(&source);
        let author = persisted(&mut s, "authors", rows(&["id", "name"], vec![vec![Value::Int(1), Value::from("A")]]))[0];
        s.instance_mut(author)
            .unwrap()
            .set_cache("books", RelationCache::Many(Vec::new()));
        let draft = s.create("book", [("title", "draft")]).unwrap();
        s.add(author, "books", draft).unwrap();
        let err = s.flush_statements(author, "books").unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::NotPersisted));
    }

    #[test]
    fn session_transaction_uses_one_connection() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let source = MockSource::new();
            source.respond("INSERT INTO \"authors\"", rows(&["id"], vec![vec![Value::Int(1)]]));
            let mut s = session(&source);
            let author = s.create("author", [("name", "A")]).unwrap();

            unwrap_outcome(s.begin(&cx).await);
            unwrap_outcome(s.begin(&cx).await);
            unwrap_outcome(s.save(&cx, author).await);
            unwrap_outcome(s.commit(&cx).await);
            assert!(s.in_transaction());
            unwrap_outcome(s.commit(&cx).await);
            assert!(!s.in_transaction());

            assert_eq!(source.acquired(), 1);
            assert_eq!(source.released(), 1);
            let statements = source.statements();
            assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
            assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
            assert_eq!(statements.len(), 3);
        });
    }
}
