//! Entity registry and relation key resolution.
//!
//! Keys are resolved lazily: declaring a relation never fails, the first
//! [`Schema::relation_keys`] call on it does when the two sides disagree.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BuildErrorKind, Error, ResolutionErrorKind, Result};
use crate::model::EntityDef;
use crate::relationship::{RelationDescriptor, RelationKeys, RelationKind};

/// Registry of entity definitions, keyed by entity name and by table.
#[derive(Debug, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<EntityDef>>,
    by_table: HashMap<String, String>,
}

/// Collects entity definitions before they are frozen into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    /// Freeze the registry. Fails on duplicate names or tables and on
    /// entities without a primary key.
    pub fn build(self) -> Result<Arc<Schema>> {
        let mut schema = Schema::default();
        for def in self.entities {
            def.primary_key()?;
            if schema.entities.contains_key(&def.name) {
                return Err(Error::build(
                    BuildErrorKind::InvalidDefinition,
                    format!("entity '{}' registered twice", def.name),
                ));
            }
            if schema.by_table.contains_key(&def.table) {
                return Err(Error::build(
                    BuildErrorKind::InvalidDefinition,
                    format!("table '{}' registered twice", def.table),
                ));
            }
            tracing::trace!(entity = %def.name, table = %def.table, "registering entity");
            schema.by_table.insert(def.table.clone(), def.name.clone());
            schema.entities.insert(def.name.clone(), Arc::new(def));
        }
        Ok(Arc::new(schema))
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name).map(Arc::as_ref)
    }

    /// Look up an entity, failing with a resolution error.
    pub fn require_entity(&self, name: &str) -> Result<&EntityDef> {
        self.entity(name).ok_or_else(|| {
            Error::resolution(
                ResolutionErrorKind::UnknownEntity,
                format!("no entity named '{}' is registered", name),
            )
        })
    }

    /// Entity stored in `table`, if registered.
    pub fn entity_for_table(&self, table: &str) -> Option<&EntityDef> {
        self.by_table.get(table).and_then(|name| self.entity(name))
    }

    /// Every registered entity, ordered by name.
    pub fn entities(&self) -> Vec<&EntityDef> {
        let mut all: Vec<&EntityDef> = self.entities.values().map(Arc::as_ref).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Inverse of `relation` on its related entity.
    ///
    /// An explicit declaration on either side wins; otherwise the single
    /// complementary relation pointing back at the owner is used. Returns
    /// `None` when no inverse exists or the choice is ambiguous.
    pub fn inverse_of(&self, entity: &str, relation: &str) -> Result<Option<String>> {
        let owner = self.require_entity(entity)?;
        let rel = owner.require_relation(relation)?;
        let Some(wanted) = rel.kind.complement() else {
            return Ok(None);
        };
        let related = self.require_entity(&rel.related)?;

        if let Some(explicit) = &rel.inverse {
            let inverse = related.require_relation(explicit)?;
            if inverse.related != owner.name || inverse.kind != wanted {
                return Err(Error::resolution(
                    ResolutionErrorKind::InvalidRelation,
                    format!(
                        "'{}.{}' declares inverse '{}.{}' which does not point back",
                        owner.name, rel.name, related.name, explicit
                    ),
                ));
            }
            return Ok(Some(explicit.clone()));
        }

        let candidates: Vec<&RelationDescriptor> = related
            .relations
            .iter()
            .filter(|r| r.related == owner.name && r.kind == wanted)
            // a self-referential relation is never its own inverse
            .filter(|r| !(related.name == owner.name && r.name == rel.name))
            .collect();

        if let Some(named) = candidates
            .iter()
            .find(|r| r.inverse.as_deref() == Some(rel.name.as_str()))
        {
            return Ok(Some(named.name.clone()));
        }
        let undeclared: Vec<&&RelationDescriptor> =
            candidates.iter().filter(|r| r.inverse.is_none()).collect();
        let [only] = undeclared.as_slice() else {
            return Ok(None);
        };
        // the pairing must be unique from the owner's side too
        let rivals = owner
            .relations
            .iter()
            .filter(|r| r.related == related.name && r.kind == rel.kind)
            .filter(|r| r.inverse.is_none() || r.inverse.as_deref() == Some(only.name.as_str()))
            .count();
        if rivals == 1 {
            return Ok(Some(only.name.clone()));
        }
        Ok(None)
    }

    /// Resolve the keys of a direct relation.
    ///
    /// Missing keys come from the inverse's explicit declaration, then from
    /// defaults: to-one uses `<relation>_id` locally and the related primary
    /// key remotely; to-many uses the owner primary key locally and
    /// `<owner entity>_id` remotely. Explicit keys on both sides must agree.
    pub fn relation_keys(&self, entity: &str, relation: &str) -> Result<RelationKeys> {
        let owner = self.require_entity(entity)?;
        let rel = owner.require_relation(relation)?;
        if rel.kind == RelationKind::ToManyThrough {
            return Err(Error::resolution(
                ResolutionErrorKind::InvalidRelation,
                format!(
                    "'{}.{}' is a through relation and has no direct keys",
                    owner.name, rel.name
                ),
            ));
        }
        let related = self.require_entity(&rel.related)?;
        let inverse_name = self.inverse_of(entity, relation)?;
        let inverse = inverse_name
            .as_deref()
            .and_then(|name| related.get_relation(name));

        let inverse_local = inverse.and_then(|i| i.local_key.clone());
        let inverse_remote = inverse.and_then(|i| i.remote_key.clone());

        for (mine, theirs, side) in [
            (&rel.local_key, &inverse_remote, "local"),
            (&rel.remote_key, &inverse_local, "remote"),
        ] {
            if let (Some(mine), Some(theirs)) = (mine, theirs) {
                if mine != theirs {
                    return Err(Error::resolution(
                        ResolutionErrorKind::KeyMismatch,
                        format!(
                            "{} key of '{}.{}' is '{}' but its inverse '{}.{}' declares '{}'",
                            side,
                            owner.name,
                            rel.name,
                            mine,
                            related.name,
                            inverse_name.as_deref().unwrap_or_default(),
                            theirs
                        ),
                    ));
                }
            }
        }

        let (local_key, remote_key) = match rel.kind {
            RelationKind::ToOne => (
                rel.local_key
                    .clone()
                    .or(inverse_remote)
                    .unwrap_or_else(|| format!("{}_id", rel.name)),
                match rel.remote_key.clone().or(inverse_local) {
                    Some(key) => key,
                    None => related.primary_key()?.name.clone(),
                },
            ),
            _ => (
                match rel.local_key.clone().or(inverse_remote) {
                    Some(key) => key,
                    None => owner.primary_key()?.name.clone(),
                },
                rel.remote_key
                    .clone()
                    .or(inverse_local)
                    .unwrap_or_else(|| format!("{}_id", owner.name)),
            ),
        };

        let local_column = owner.column_of(&local_key)?.to_string();
        let remote_column = related.column_of(&remote_key)?.to_string();

        Ok(RelationKeys {
            relation: rel.name.clone(),
            kind: rel.kind,
            owner_entity: owner.name.clone(),
            owner_table: owner.table.clone(),
            related_entity: related.name.clone(),
            related_table: related.table.clone(),
            local_key,
            local_column,
            remote_key,
            remote_column,
            inverse: inverse_name,
        })
    }

    /// The direct hops a relation walks: one for to-one and to-many, two
    /// (owner to join entity, join entity to target) for through relations.
    pub fn hops(&self, entity: &str, relation: &str) -> Result<Vec<RelationKeys>> {
        let owner = self.require_entity(entity)?;
        let rel = owner.require_relation(relation)?;
        if rel.kind != RelationKind::ToManyThrough {
            return Ok(vec![self.relation_keys(entity, relation)?]);
        }
        let (Some(through), Some(source)) = (&rel.through, &rel.source) else {
            return Err(Error::resolution(
                ResolutionErrorKind::InvalidRelation,
                format!(
                    "through relation '{}.{}' needs both a through and a source relation",
                    owner.name, rel.name
                ),
            ));
        };
        let first = self.relation_keys(entity, through)?;
        if first.kind != RelationKind::ToMany {
            return Err(Error::resolution(
                ResolutionErrorKind::InvalidRelation,
                format!(
                    "'{}.{}' must be a to-many relation to serve as a through relation",
                    owner.name, through
                ),
            ));
        }
        let second = self.relation_keys(&first.related_entity, source)?;
        if second.kind != RelationKind::ToOne || second.related_entity != rel.related {
            return Err(Error::resolution(
                ResolutionErrorKind::InvalidRelation,
                format!(
                    "source relation '{}.{}' must be a to-one relation to '{}'",
                    first.related_entity, source, rel.related
                ),
            ));
        }
        Ok(vec![first, second])
    }
}
