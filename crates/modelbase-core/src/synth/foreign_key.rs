//! Name-based foreign key resolution.
//!
//! A relationship field becomes a column pointing at `<target_table>.<column>`
//! by name, whether or not the target has been synthesized yet. The storage
//! engine validates the reference when DDL is emitted, so synthesis never
//! waits on relationship order. When the target already exists the column is
//! annotated immediately; otherwise a [`ForeignKeyPlaceholder`] is handed to
//! the catalog, which annotates the column once the target table registers.

use super::synthesizer::{DeclarationLookup, SynthesisCache};
use crate::catalog::{
    naming, ColumnDef, Declaration, FieldDef, FieldOrigin, FieldType,
    ForeignKeyPlaceholder, ForeignKeyRef, TableCatalog, IDENTIFIER_COLUMN_TYPE,
};
use crate::error::{Error, Result};
use std::sync::Arc;

/// A reference column plus the placeholder to record if its target is missing.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    /// The foreign key column.
    pub column: ColumnDef,
    /// Set when the target table is not yet in the catalog.
    pub placeholder: Option<ForeignKeyPlaceholder>,
}

/// Builds foreign key columns for one catalog.
pub struct ForeignKeyResolver<'a> {
    cache: &'a SynthesisCache,
    catalog: &'a Arc<TableCatalog>,
    lookup: &'a dyn DeclarationLookup,
}

impl<'a> ForeignKeyResolver<'a> {
    /// Create a resolver over a synthesis cache and a catalog.
    pub fn new(
        cache: &'a SynthesisCache,
        catalog: &'a Arc<TableCatalog>,
        lookup: &'a dyn DeclarationLookup,
    ) -> Self {
        Self {
            cache,
            catalog,
            lookup,
        }
    }

    /// Build the column for a relationship `field` of `source`.
    ///
    /// Extension and core targets are treated alike; only table names matter.
    pub fn resolve(
        &self,
        source: &Declaration,
        source_table: &str,
        field: &FieldDef,
        origin: FieldOrigin,
    ) -> Result<ResolvedReference> {
        let FieldType::Reference {
            target,
            target_field,
            on_delete,
            ..
        } = &field.field_type
        else {
            return Err(Error::InvalidDeclaration {
                declaration: source.name().to_string(),
                reason: format!("field {} is not a relationship", field.name),
            });
        };

        let target_decl = if target == source.name() {
            None
        } else {
            self.lookup.find(target)
        };
        if target != source.name() && target_decl.is_none() {
            tracing::warn!(
                declaration = %source.name(),
                field = %field.name,
                target = %target,
                "relationship targets a declaration that is not bound"
            );
        }
        if target_decl.as_ref().is_some_and(|d| d.is_abstract()) {
            return Err(Error::InvalidDeclaration {
                declaration: source.name().to_string(),
                reason: format!("field {} references abstract declaration {target}", field.name),
            });
        }

        let target_table = match (&target_decl, target == source.name()) {
            (_, true) => source_table.to_string(),
            (Some(decl), false) => decl.table_name(),
            (None, false) => naming::table_name_for(target),
        };

        // The target is observable when its schema is cached for this catalog
        // or its table was registered by another path.
        let target_known = target_decl
            .as_ref()
            .and_then(|d| self.cache.get(d.id(), self.catalog.id()))
            .and_then(|schema| schema.table())
            .or_else(|| self.catalog.table(&target_table));

        let column_type = target_known
            .as_ref()
            .and_then(|t| t.column(target_field).map(|c| c.column_type))
            .unwrap_or(IDENTIFIER_COLUMN_TYPE);
        let target_label = target_known.as_ref().map(|t| t.label.clone());

        let comment = field.description.clone().or_else(|| target_label.clone());
        let placeholder = target_label.is_none().then(|| ForeignKeyPlaceholder {
            source_table: source_table.to_string(),
            source_column: field.name.clone(),
            target_table: target_table.clone(),
            target_column: target_field.clone(),
        });

        let column = ColumnDef {
            name: field.name.clone(),
            column_type,
            nullable: field.is_nullable(),
            primary_key: false,
            unique: field.unique,
            indexed: field.indexed,
            default: field.default.clone(),
            comment,
            foreign_key: Some(ForeignKeyRef {
                target_declaration: target.clone(),
                target_table,
                target_column: target_field.clone(),
                on_delete: *on_delete,
                target_label,
            }),
            origin,
        };

        Ok(ResolvedReference {
            column,
            placeholder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BuiltinMixin, ColumnType, DeleteBehavior, ScalarType};
    use crate::synth::Synthesizer;
    use std::collections::HashMap;

    fn lookup(decls: &[&Arc<Declaration>]) -> HashMap<String, Arc<Declaration>> {
        decls
            .iter()
            .map(|d| (d.name().to_string(), Arc::clone(d)))
            .collect()
    }

    #[test]
    fn test_forward_reference_emits_placeholder() {
        let team = Declaration::builder("Team").mixin(BuiltinMixin::Identity).build();
        let user = Declaration::builder("User").mixin(BuiltinMixin::Identity).build();
        let decls = lookup(&[&team, &user]);
        let catalog = Arc::new(TableCatalog::new("app"));
        let cache = SynthesisCache::default();

        let resolver = ForeignKeyResolver::new(&cache, &catalog, &decls);
        let field = FieldDef::new("team_id", FieldType::reference("Team"));
        let resolved = resolver
            .resolve(&user, "users", &field, FieldOrigin::Declared("User".into()))
            .unwrap();

        let fk = resolved.column.foreign_key.as_ref().unwrap();
        assert_eq!(fk.target_table, "teams");
        assert_eq!(fk.target_column, "id");
        assert_eq!(fk.on_delete, DeleteBehavior::Restrict);
        assert!(!fk.is_resolved());
        assert!(resolved.column.comment.is_none());
        assert!(!resolved.column.nullable);
        assert_eq!(
            resolved.placeholder.unwrap().to_string(),
            "users.team_id -> teams.id"
        );
    }

    #[test]
    fn test_cached_target_is_annotated_immediately() {
        let team = Declaration::builder("Team")
            .mixin(BuiltinMixin::Identity)
            .friendly_name("Workspace Team")
            .build();
        let user = Declaration::builder("User").mixin(BuiltinMixin::Identity).build();
        let decls = lookup(&[&team, &user]);
        let catalog = Arc::new(TableCatalog::new("app"));
        let synthesizer = Synthesizer::new();
        synthesizer.synthesize(&team, &catalog, &decls).unwrap();

        let resolver = ForeignKeyResolver::new(synthesizer.cache(), &catalog, &decls);
        let field = FieldDef::new("team_id", FieldType::optional_reference("Team"));
        let resolved = resolver
            .resolve(&user, "users", &field, FieldOrigin::Declared("User".into()))
            .unwrap();

        assert!(resolved.placeholder.is_none());
        assert_eq!(resolved.column.comment.as_deref(), Some("Workspace Team"));
        assert!(resolved.column.nullable);
        assert_eq!(resolved.column.column_type, ColumnType::Varchar(36));
    }

    #[test]
    fn test_unbound_target_uses_naming_convention() {
        let note = Declaration::builder("Note").mixin(BuiltinMixin::Identity).build();
        let decls = lookup(&[&note]);
        let catalog = Arc::new(TableCatalog::new("app"));
        let cache = SynthesisCache::default();

        let resolver = ForeignKeyResolver::new(&cache, &catalog, &decls);
        let field = FieldDef::new("category_id", FieldType::optional_reference("Category"));
        let resolved = resolver
            .resolve(&note, "notes", &field, FieldOrigin::Declared("Note".into()))
            .unwrap();

        assert_eq!(
            resolved.column.foreign_key.unwrap().target_table,
            "categories"
        );
        assert!(resolved.placeholder.is_some());
    }

    #[test]
    fn test_non_reference_field_is_rejected() {
        let note = Declaration::builder("Note").build();
        let decls = lookup(&[&note]);
        let catalog = Arc::new(TableCatalog::new("app"));
        let cache = SynthesisCache::default();

        let resolver = ForeignKeyResolver::new(&cache, &catalog, &decls);
        let field = FieldDef::new("title", FieldType::scalar(ScalarType::String));
        assert!(resolver
            .resolve(&note, "notes", &field, FieldOrigin::Declared("Note".into()))
            .is_err());
    }
}
