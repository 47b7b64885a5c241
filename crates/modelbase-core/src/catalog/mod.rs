//! Domain declarations, mixins and the table catalog they synthesize into.

mod catalog;
mod declaration;
mod field;
mod mixin;
pub mod naming;
mod table;
mod types;

pub use catalog::{
    CatalogId, CatalogPartition, DeclarativeBase, ForeignKeyPlaceholder, PartitionKey,
    TableCatalog,
};
pub use declaration::{Declaration, DeclarationBuilder, DeclarationId, SeedRow};
pub use field::{DefaultValue, FieldDef};
pub use mixin::{BuiltinMixin, FieldOrigin, MixinRef};
pub use table::{ColumnDef, ForeignKeyRef, TableDef};
pub use types::{
    ColumnType, DeleteBehavior, FieldType, ScalarType, DEFAULT_STRING_LENGTH,
    IDENTIFIER_COLUMN_TYPE, IDENTIFIER_LENGTH,
};
