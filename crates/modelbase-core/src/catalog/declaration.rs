//! Domain declarations: named, typed descriptions of business entities.

use super::field::FieldDef;
use super::mixin::{BuiltinMixin, MixinRef};
use super::naming;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A seed row: column name to JSON value.
pub type SeedRow = serde_json::Map<String, serde_json::Value>;

static NEXT_DECLARATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a declaration object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeclarationId(u64);

impl DeclarationId {
    fn next() -> Self {
        Self(NEXT_DECLARATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// An immutable domain declaration.
///
/// Declarations are created through [`Declaration::builder`] and shared as
/// `Arc<Declaration>`. Two declarations are the same object only when their
/// [`DeclarationId`]s match; equal contents do not make them identical.
#[derive(Debug)]
pub struct Declaration {
    id: DeclarationId,
    name: String,
    table_name: Option<String>,
    friendly_name: Option<String>,
    fields: Vec<FieldDef>,
    mixins: Vec<MixinRef>,
    extension: Option<String>,
    comment: Option<String>,
    system: bool,
    is_abstract: bool,
    seed_data: Vec<SeedRow>,
}

/// Builder for [`Declaration`].
#[derive(Debug, Clone)]
pub struct DeclarationBuilder {
    name: String,
    table_name: Option<String>,
    friendly_name: Option<String>,
    fields: Vec<FieldDef>,
    mixins: Vec<MixinRef>,
    extension: Option<String>,
    comment: Option<String>,
    system: bool,
    is_abstract: bool,
    seed_data: Vec<SeedRow>,
}

impl Declaration {
    /// Start building a declaration with the given name.
    pub fn builder(name: impl Into<String>) -> DeclarationBuilder {
        DeclarationBuilder {
            name: name.into(),
            table_name: None,
            friendly_name: None,
            fields: Vec::new(),
            mixins: Vec::new(),
            extension: None,
            comment: None,
            system: false,
            is_abstract: false,
            seed_data: Vec::new(),
        }
    }

    /// Identity of this declaration object.
    pub fn id(&self) -> DeclarationId {
        self.id
    }

    /// Unique declaration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name: the explicit override or the pluralized snake case name.
    pub fn table_name(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| naming::table_name_for(&self.name))
    }

    /// Human readable name.
    pub fn friendly_name(&self) -> String {
        self.friendly_name
            .clone()
            .unwrap_or_else(|| naming::friendly_name_for(&self.name))
    }

    /// Fields declared directly on this declaration.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Get a declared field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Mixins in declaration order.
    pub fn mixins(&self) -> &[MixinRef] {
        &self.mixins
    }

    /// Builtin mixins used directly by this declaration.
    pub fn builtin_mixins(&self) -> impl Iterator<Item = BuiltinMixin> + '_ {
        self.mixins.iter().filter_map(|m| match m {
            MixinRef::Builtin(b) => Some(*b),
            MixinRef::Declaration(_) => None,
        })
    }

    /// Names of declarations used as mixins. These are structural dependencies.
    pub fn declaration_mixins(&self) -> impl Iterator<Item = &str> + '_ {
        self.mixins.iter().filter_map(|m| match m {
            MixinRef::Declaration(name) => Some(name.as_str()),
            MixinRef::Builtin(_) => None,
        })
    }

    /// Whether the declaration directly uses a builtin mixin.
    pub fn has_mixin(&self, mixin: BuiltinMixin) -> bool {
        self.builtin_mixins().any(|m| m == mixin)
    }

    /// Owning extension, `None` for core declarations.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Table comment.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Whether this is a system entity.
    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Abstract declarations resolve fields for their dependents but own no table.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Rows inserted when the table is first created.
    pub fn seed_data(&self) -> &[SeedRow] {
        &self.seed_data
    }

    /// Whether `other` is this very declaration object.
    pub fn same_as(&self, other: &Declaration) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.extension {
            Some(ext) => write!(f, "{} (extension {ext})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl DeclarationBuilder {
    /// Add a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Compose a mixin.
    pub fn mixin(mut self, mixin: impl Into<MixinRef>) -> Self {
        let mixin = mixin.into();
        if !self.mixins.contains(&mixin) {
            self.mixins.push(mixin);
        }
        self
    }

    /// Compose another declaration, by name, as a mixin.
    pub fn mixin_declaration(self, name: impl Into<String>) -> Self {
        self.mixin(MixinRef::Declaration(name.into()))
    }

    /// Override the computed table name.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Override the humanized name.
    pub fn friendly_name(mut self, friendly_name: impl Into<String>) -> Self {
        self.friendly_name = Some(friendly_name.into());
        self
    }

    /// Tag the declaration as owned by an extension.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Set the table comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Mark as a system entity.
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Mark as abstract (fields only, no table).
    pub fn abstract_base(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Add a seed row.
    pub fn seed(mut self, row: SeedRow) -> Self {
        self.seed_data.push(row);
        self
    }

    /// Finish the declaration, assigning it a fresh identity.
    pub fn build(self) -> Arc<Declaration> {
        Arc::new(Declaration {
            id: DeclarationId::next(),
            name: self.name,
            table_name: self.table_name,
            friendly_name: self.friendly_name,
            fields: self.fields,
            mixins: self.mixins,
            extension: self.extension,
            comment: self.comment,
            system: self.system,
            is_abstract: self.is_abstract,
            seed_data: self.seed_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, ScalarType};

    #[test]
    fn test_declaration_builder() {
        let user = Declaration::builder("User")
            .mixin(BuiltinMixin::Identity)
            .mixin(BuiltinMixin::Audit)
            .field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
            .field(FieldDef::optional_scalar("email", ScalarType::String))
            .comment("Application users")
            .build();

        assert_eq!(user.name(), "User");
        assert_eq!(user.table_name(), "users");
        assert_eq!(user.fields().len(), 2);
        assert!(user.has_mixin(BuiltinMixin::Audit));
        assert!(!user.has_mixin(BuiltinMixin::SoftDelete));
        assert_eq!(user.comment(), Some("Application users"));
        assert!(user.get_field("email").is_some());
        assert!(user.get_field("nonexistent").is_none());
    }

    #[test]
    fn test_identity_is_per_build() {
        let builder = Declaration::builder("Team").mixin(BuiltinMixin::Identity);
        let a = builder.clone().build();
        let b = builder.build();

        assert!(a.same_as(&a));
        assert!(!a.same_as(&b));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_overrides_and_mixins() {
        let decl = Declaration::builder("Person")
            .table_name("humans")
            .friendly_name("Human Being")
            .mixin(BuiltinMixin::Identity)
            .mixin(BuiltinMixin::Identity)
            .mixin_declaration("Named")
            .extension("crm")
            .build();

        assert_eq!(decl.table_name(), "humans");
        assert_eq!(decl.friendly_name(), "Human Being");
        assert_eq!(decl.mixins().len(), 2);
        assert_eq!(decl.declaration_mixins().collect::<Vec<_>>(), vec!["Named"]);
        assert_eq!(decl.extension(), Some("crm"));
        assert_eq!(decl.to_string(), "Person (extension crm)");
    }
}
