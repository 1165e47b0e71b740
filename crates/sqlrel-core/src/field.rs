//! Field and column definitions.

use crate::types::SqlType;

/// Metadata about one attribute of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Attribute name used in conditions, orderings and instance maps
    pub name: String,
    /// Storage column name (may differ from the attribute name)
    pub column: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Key is generated by the database on insert
    pub auto_increment: bool,
    pub unique: bool,
    /// Default value expression (SQL)
    pub default: Option<String>,
}

impl FieldDef {
    /// A non-null field whose column name equals its attribute name.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            sql_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
        }
    }

    /// An auto-incrementing integer primary key.
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true)
    }

    /// Set the storage column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    #[must_use]
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    #[must_use]
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    #[must_use]
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let field = FieldDef::new("author_id", SqlType::BigInt)
            .column("authorId")
            .nullable(true);
        assert_eq!(field.name, "author_id");
        assert_eq!(field.column, "authorId");
        assert!(field.nullable);
        assert!(!field.primary_key);

        let id = FieldDef::id("id");
        assert!(id.primary_key && id.auto_increment);
        assert_eq!(id.sql_type, SqlType::BigInt);
    }
}
