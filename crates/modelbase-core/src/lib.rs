//! Modelbase Core - declarations, schema synthesis, and the model registry.
//!
//! Domain declarations bind into a [`ModelRegistry`], which commits them in
//! mixin-dependency order and synthesizes each one into a table of the
//! registry's [`TableCatalog`].

pub mod catalog;
pub mod ddl;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod synth;

pub use catalog::{
    BuiltinMixin, CatalogPartition, ColumnDef, ColumnType, Declaration, DeclarationBuilder,
    DeclarationId, DeclarativeBase, DefaultValue, DeleteBehavior, FieldDef, FieldOrigin,
    FieldType, ForeignKeyPlaceholder, ForeignKeyRef, MixinRef, PartitionKey, ScalarType, SeedRow,
    TableCatalog, TableDef,
};
pub use ddl::{Dialect, Scope};
pub use error::{Error, Result};
pub use manifest::Manifest;
pub use registry::{
    clear_registries, registry, DanglingForeignKeyPolicy, ModelRegistry, RegistryConfig,
    RegistryPhase,
};
pub use synth::{DeclarationLookup, StorageSchema, SynthesisCache, Synthesizer};
