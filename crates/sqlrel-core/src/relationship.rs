//! Relationship descriptors.
//!
//! A [`RelationDescriptor`] is declared on the owning entity and names the
//! related entity plus, optionally, the keys joining them. Missing keys are
//! filled in from the inverse relation or from naming defaults when the
//! relation is first resolved by [`Schema::relation_keys`](crate::Schema::relation_keys).

/// The type of relationship between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Belongs-to: the owner holds the foreign key (`book.author`).
    ToOne,
    /// Has-many: the related entity holds the foreign key (`author.books`).
    ToMany,
    /// Many-to-many through a join entity (`book.tags` via `book.taggings`).
    ToManyThrough,
}

impl RelationKind {
    /// Whether loading this relation yields a collection.
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationKind::ToMany | RelationKind::ToManyThrough)
    }

    /// Kind an inverse of this relation would have.
    pub const fn complement(self) -> Option<RelationKind> {
        match self {
            RelationKind::ToOne => Some(RelationKind::ToMany),
            RelationKind::ToMany => Some(RelationKind::ToOne),
            RelationKind::ToManyThrough => None,
        }
    }
}

/// Declared metadata for one side of a relationship.
///
/// # Example
///
/// ```ignore
/// let author = RelationDescriptor::to_one("author", "author");
/// let books = RelationDescriptor::to_many("books", "book").inverse("author");
/// let tags = RelationDescriptor::through("tags", "tag", "taggings", "tag");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Relation name, used as path segment and default join alias.
    pub name: String,
    pub kind: RelationKind,
    /// Name of the related entity.
    pub related: String,
    /// Key attribute on the declaring entity.
    ///
    /// For to-one this is the foreign key (`author_id`); for to-many it is
    /// the owner's primary key.
    pub local_key: Option<String>,
    /// Key attribute on the related entity.
    ///
    /// For to-one this is the related primary key; for to-many it is the
    /// foreign key pointing back at the owner.
    pub remote_key: Option<String>,
    /// For through relations: the to-many relation on the owner that
    /// reaches the join entity.
    pub through: Option<String>,
    /// For through relations: the to-one relation on the join entity that
    /// reaches the target.
    pub source: Option<String>,
    /// Explicitly declared inverse relation on the related entity.
    pub inverse: Option<String>,
}

impl RelationDescriptor {
    fn new(name: impl Into<String>, kind: RelationKind, related: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            related: related.into(),
            local_key: None,
            remote_key: None,
            through: None,
            source: None,
            inverse: None,
        }
    }

    pub fn to_one(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ToOne, related)
    }

    pub fn to_many(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self::new(name, RelationKind::ToMany, related)
    }

    /// A many-to-many relation reaching `related` by following the owner's
    /// `through` relation and then the join entity's `source` relation.
    pub fn through(
        name: impl Into<String>,
        related: impl Into<String>,
        through: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let mut rel = Self::new(name, RelationKind::ToManyThrough, related);
        rel.through = Some(through.into());
        rel.source = Some(source.into());
        rel
    }

    #[must_use]
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }
}

/// Fully resolved keys of a direct (to-one or to-many) relation.
///
/// Attribute names are what callers reference; column names are what
/// reaches SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationKeys {
    pub relation: String,
    pub kind: RelationKind,
    pub owner_entity: String,
    pub owner_table: String,
    pub related_entity: String,
    pub related_table: String,
    pub local_key: String,
    pub local_column: String,
    pub remote_key: String,
    pub remote_column: String,
    /// Inverse relation on the related entity, explicit or uniquely inferred.
    pub inverse: Option<String>,
}

impl RelationKeys {
    /// Whether the relation points back at its own entity.
    pub fn is_self_referential(&self) -> bool {
        self.owner_entity == self.related_entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        let rel = RelationDescriptor::to_one("author", "author").local_key("writer_id");
        assert_eq!(rel.kind, RelationKind::ToOne);
        assert_eq!(rel.local_key.as_deref(), Some("writer_id"));
        assert!(!rel.kind.is_collection());

        let rel = RelationDescriptor::through("tags", "tag", "taggings", "tag");
        assert_eq!(rel.kind, RelationKind::ToManyThrough);
        assert_eq!(rel.through.as_deref(), Some("taggings"));
        assert_eq!(rel.source.as_deref(), Some("tag"));
        assert!(rel.kind.is_collection());
        assert_eq!(rel.kind.complement(), None);
    }

    #[test]
    fn complements() {
        assert_eq!(RelationKind::ToOne.complement(), Some(RelationKind::ToMany));
        assert_eq!(RelationKind::ToMany.complement(), Some(RelationKind::ToOne));
    }
}
