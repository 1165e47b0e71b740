//! Entity definitions.
//!
//! An [`EntityDef`] describes one table: its attributes and its declared
//! relations. Definitions are assembled with builder calls and registered
//! once in a [`Schema`](crate::Schema); they are not changed afterwards.

use crate::error::{BuildErrorKind, Error, ResolutionErrorKind, Result};
use crate::field::FieldDef;
use crate::relationship::RelationDescriptor;

/// Runtime description of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    /// Entity name, used by relation descriptors.
    pub name: String,
    /// Storage table name.
    pub table: String,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDescriptor>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up an attribute by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Storage column for an attribute.
    pub fn column_of(&self, name: &str) -> Result<&str> {
        self.get_field(name)
            .map(|f| f.column.as_str())
            .ok_or_else(|| {
                Error::resolution(
                    ResolutionErrorKind::NoSuchField,
                    format!("no field '{}' on entity '{}'", name, self.name),
                )
            })
    }

    /// The primary key field.
    pub fn primary_key(&self) -> Result<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key).ok_or_else(|| {
            Error::build(
                BuildErrorKind::InvalidDefinition,
                format!("entity '{}' declares no primary key", self.name),
            )
        })
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Look up a relation, failing with the list of relations that do exist.
    pub fn require_relation(&self, name: &str) -> Result<&RelationDescriptor> {
        self.get_relation(name).ok_or_else(|| {
            Error::resolution(
                ResolutionErrorKind::NoSuchRelation,
                format!(
                    "no relation '{}' on entity '{}' (known relations: [{}])",
                    name,
                    self.name,
                    self.relation_names().join(", ")
                ),
            )
        })
    }

    pub fn relation_names(&self) -> Vec<&str> {
        self.relations.iter().map(|r| r.name.as_str()).collect()
    }
}
