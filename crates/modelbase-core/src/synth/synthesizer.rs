//! Declaration to storage schema synthesis.

use super::foreign_key::ForeignKeyResolver;
use crate::catalog::{
    BuiltinMixin, CatalogId, ColumnDef, ColumnType, Declaration, DeclarationId, FieldDef,
    FieldOrigin, FieldType, ForeignKeyPlaceholder, TableCatalog, TableDef,
};
use crate::error::{Error, Result};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Bound for enum columns without an explicit `max_length`.
pub const ENUM_LENGTH: u32 = 64;

/// Finds declarations by name while resolving mixins and relationships.
pub trait DeclarationLookup {
    /// Get the declaration bound under `name`.
    fn find(&self, name: &str) -> Option<Arc<Declaration>>;
}

impl DeclarationLookup for HashMap<String, Arc<Declaration>> {
    fn find(&self, name: &str) -> Option<Arc<Declaration>> {
        self.get(name).cloned()
    }
}

impl DeclarationLookup for IndexMap<String, Arc<Declaration>> {
    fn find(&self, name: &str) -> Option<Arc<Declaration>> {
        self.get(name).cloned()
    }
}

impl DeclarationLookup for Vec<Arc<Declaration>> {
    fn find(&self, name: &str) -> Option<Arc<Declaration>> {
        self.iter().find(|d| d.name() == name).cloned()
    }
}

/// A flattened field and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// The field definition.
    pub field: FieldDef,
    /// The mixin or declaration that contributed it.
    pub origin: FieldOrigin,
}

/// Synthesis output for one declaration against one catalog.
///
/// The table itself lives in the catalog; [`StorageSchema::table`] reads it
/// back, so foreign keys resolved after synthesis are visible here.
#[derive(Debug)]
pub struct StorageSchema {
    declaration: Arc<Declaration>,
    catalog: Arc<TableCatalog>,
    table_name: Option<String>,
    mixins: BTreeSet<BuiltinMixin>,
    fields: Vec<ResolvedField>,
}

impl StorageSchema {
    /// The originating declaration.
    pub fn declaration(&self) -> &Arc<Declaration> {
        &self.declaration
    }

    /// The catalog the table is attached to.
    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    /// Table name, `None` for abstract declarations.
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    /// Whether the declaration only contributes fields to its dependents.
    pub fn is_abstract(&self) -> bool {
        self.table_name.is_none()
    }

    /// Builtin mixins in effect, including inherited ones.
    pub fn mixins(&self) -> &BTreeSet<BuiltinMixin> {
        &self.mixins
    }

    /// Flattened fields in column order.
    pub fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// Current table definition from the catalog.
    pub fn table(&self) -> Option<TableDef> {
        self.table_name.as_deref().and_then(|name| self.catalog.table(name))
    }

    /// Current definition of one column.
    pub fn column(&self, name: &str) -> Option<ColumnDef> {
        self.table().and_then(|t| t.column(name).cloned())
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.field.name.clone()).collect()
    }
}

/// Memoized synthesis results keyed by declaration and catalog identity.
#[derive(Debug, Default)]
pub struct SynthesisCache {
    entries: DashMap<(DeclarationId, CatalogId), Arc<StorageSchema>>,
}

impl SynthesisCache {
    /// Cached schema for a (declaration, catalog) pair.
    pub fn get(&self, declaration: DeclarationId, catalog: CatalogId) -> Option<Arc<StorageSchema>> {
        self.entries
            .get(&(declaration, catalog))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn insert(&self, schema: Arc<StorageSchema>) {
        self.entries
            .insert((schema.declaration.id(), schema.catalog.id()), schema);
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been synthesized.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Turns declarations into tables of a catalog, at most once per pair.
#[derive(Debug, Default)]
pub struct Synthesizer {
    cache: SynthesisCache,
    misses: Mutex<()>,
}

impl Synthesizer {
    /// Create a synthesizer with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoization cache.
    pub fn cache(&self) -> &SynthesisCache {
        &self.cache
    }

    /// Synthesize `declaration` into `catalog`.
    ///
    /// Returns the cached schema when the pair was synthesized before.
    /// Declaration mixins are synthesized first so their fields are
    /// observable; relationship targets are not, see [`ForeignKeyResolver`].
    pub fn synthesize(
        &self,
        declaration: &Arc<Declaration>,
        catalog: &Arc<TableCatalog>,
        lookup: &dyn DeclarationLookup,
    ) -> Result<Arc<StorageSchema>> {
        if let Some(schema) = self.cache.get(declaration.id(), catalog.id()) {
            return Ok(schema);
        }
        // Cache misses run one at a time so a pair registers its table once.
        let _miss = self.misses.lock();
        let mut stack = Vec::new();
        self.synthesize_inner(declaration, catalog, lookup, &mut stack)
    }

    fn synthesize_inner(
        &self,
        declaration: &Arc<Declaration>,
        catalog: &Arc<TableCatalog>,
        lookup: &dyn DeclarationLookup,
        stack: &mut Vec<String>,
    ) -> Result<Arc<StorageSchema>> {
        if let Some(schema) = self.cache.get(declaration.id(), catalog.id()) {
            return Ok(schema);
        }

        if let Some(pos) = stack.iter().position(|n| n == declaration.name()) {
            let mut members = stack[pos..].to_vec();
            members.push(declaration.name().to_string());
            return Err(Error::MixinCycle { members });
        }
        stack.push(declaration.name().to_string());

        let mut mixins: BTreeSet<BuiltinMixin> = declaration.builtin_mixins().collect();
        let mut inherited = Vec::new();
        for name in declaration.declaration_mixins() {
            let base = lookup.find(name).ok_or_else(|| Error::UnknownMixin {
                declaration: declaration.name().to_string(),
                mixin: name.to_string(),
            })?;
            let base_schema = self.synthesize_inner(&base, catalog, lookup, stack)?;
            mixins.extend(base_schema.mixins.iter().copied());
            inherited.extend(
                base_schema
                    .fields
                    .iter()
                    .filter(|f| matches!(f.origin, FieldOrigin::Declared(_)))
                    .cloned(),
            );
        }
        stack.pop();

        let fields = flatten(declaration, &mixins, inherited)?;
        let table_name = (!declaration.is_abstract()).then(|| declaration.table_name());

        if let Some(table_name) = &table_name {
            self.register(declaration, catalog, lookup, table_name, &fields)?;
        }

        let schema = Arc::new(StorageSchema {
            declaration: Arc::clone(declaration),
            catalog: Arc::clone(catalog),
            table_name,
            mixins,
            fields,
        });
        self.cache.insert(Arc::clone(&schema));
        tracing::debug!(
            declaration = %declaration.name(),
            catalog = %catalog.name(),
            table = ?schema.table_name(),
            "synthesized declaration"
        );
        Ok(schema)
    }

    fn register(
        &self,
        declaration: &Declaration,
        catalog: &Arc<TableCatalog>,
        lookup: &dyn DeclarationLookup,
        table_name: &str,
        fields: &[ResolvedField],
    ) -> Result<()> {
        let resolver = ForeignKeyResolver::new(&self.cache, catalog, lookup);
        let mut columns = Vec::with_capacity(fields.len());
        let mut placeholders: Vec<ForeignKeyPlaceholder> = Vec::new();

        for ResolvedField { field, origin } in fields {
            if field.field_type.is_reference() {
                let resolved = resolver.resolve(declaration, table_name, field, origin.clone())?;
                columns.push(resolved.column);
                placeholders.extend(resolved.placeholder);
            } else {
                columns.push(column_for(field, origin.clone()));
            }
        }

        let table = TableDef {
            name: table_name.to_string(),
            declaration: declaration.name().to_string(),
            label: declaration.friendly_name(),
            extension: declaration.extension().map(String::from),
            comment: declaration.comment().map(String::from),
            system: declaration.is_system(),
            columns,
            seed_data: declaration.seed_data().to_vec(),
        };
        catalog.register_table(table, placeholders)
    }
}

/// Flatten builtin mixins, inherited fields and own fields into column order.
fn flatten(
    declaration: &Declaration,
    mixins: &BTreeSet<BuiltinMixin>,
    inherited: Vec<ResolvedField>,
) -> Result<Vec<ResolvedField>> {
    let mut flattened: IndexMap<String, ResolvedField> = IndexMap::new();
    let name = declaration.name();

    let builtin = |mixin: &BuiltinMixin| {
        let mixin = *mixin;
        mixin.fields(name).into_iter().map(move |field| ResolvedField {
            field,
            origin: FieldOrigin::Mixin(mixin),
        })
    };
    let own = declaration.fields().iter().cloned().map(|field| ResolvedField {
        field,
        origin: FieldOrigin::Declared(name.to_string()),
    });

    let ordered = mixins
        .iter()
        .filter(|m| m.precedes_declared_fields())
        .flat_map(builtin)
        .chain(inherited)
        .chain(own)
        .chain(
            mixins
                .iter()
                .filter(|m| !m.precedes_declared_fields())
                .flat_map(builtin),
        );

    for entry in ordered {
        match flattened.get(&entry.field.name) {
            // The same base reached through two paths.
            Some(existing) if existing.origin == entry.origin && !is_own(&entry.origin, name) => {
                continue
            }
            Some(existing) => {
                return Err(Error::MixinFieldCollision {
                    declaration: name.to_string(),
                    field: entry.field.name.clone(),
                    first: existing.origin.to_string(),
                    second: entry.origin.to_string(),
                })
            }
            None => {
                flattened.insert(entry.field.name.clone(), entry);
            }
        }
    }

    Ok(flattened.into_values().collect())
}

fn is_own(origin: &FieldOrigin, declaration: &str) -> bool {
    matches!(origin, FieldOrigin::Declared(owner) if owner == declaration)
}

/// Column for a non-relationship field.
fn column_for(field: &FieldDef, origin: FieldOrigin) -> ColumnDef {
    let column_type = match &field.field_type {
        FieldType::Scalar(scalar) | FieldType::OptionalScalar(scalar) => {
            scalar.column_type(field.max_length)
        }
        FieldType::ArrayScalar(_) | FieldType::Map => ColumnType::Json,
        FieldType::Enum { .. } | FieldType::OptionalEnum { .. } => {
            ColumnType::Varchar(field.max_length.unwrap_or(ENUM_LENGTH))
        }
        FieldType::Reference { .. } => crate::catalog::IDENTIFIER_COLUMN_TYPE,
    };
    let primary_key = field.name == "id";

    ColumnDef {
        name: field.name.clone(),
        column_type,
        nullable: !primary_key && field.is_nullable(),
        primary_key,
        unique: field.unique,
        indexed: field.indexed,
        default: field.default.clone(),
        comment: field.description.clone(),
        foreign_key: None,
        origin,
    }
}
