//! Reusable field bundles composed into declarations.

use super::field::{DefaultValue, FieldDef};
use super::types::{FieldType, ScalarType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mixins shipped with the registry.
///
/// The declaration order of the variants is the order their fields are
/// flattened into a table: identity, audit and ownership come before the
/// declaration's own fields, soft delete and parent linkage after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinMixin {
    /// `id` primary key.
    Identity,
    /// `created_at` / `updated_at` timestamps.
    Audit,
    /// `user_id` / `team_id` owner references.
    Ownership,
    /// `deleted_at` tombstone.
    SoftDelete,
    /// `parent_id` self reference.
    ParentLink,
}

/// A mixin reference inside a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixinRef {
    /// One of the builtin bundles.
    Builtin(BuiltinMixin),
    /// Another declaration whose fields are inherited.
    Declaration(String),
}

/// Where a flattened field came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    /// Contributed by a builtin mixin.
    Mixin(BuiltinMixin),
    /// Declared by the named declaration.
    Declared(String),
}

impl BuiltinMixin {
    /// All builtin mixins in flattening order.
    pub const ALL: [BuiltinMixin; 5] = [
        BuiltinMixin::Identity,
        BuiltinMixin::Audit,
        BuiltinMixin::Ownership,
        BuiltinMixin::SoftDelete,
        BuiltinMixin::ParentLink,
    ];

    /// Whether the bundle is flattened before the declaration's own fields.
    pub fn precedes_declared_fields(&self) -> bool {
        matches!(
            self,
            BuiltinMixin::Identity | BuiltinMixin::Audit | BuiltinMixin::Ownership
        )
    }

    /// Stable name of the mixin.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinMixin::Identity => "identity",
            BuiltinMixin::Audit => "audit",
            BuiltinMixin::Ownership => "ownership",
            BuiltinMixin::SoftDelete => "soft_delete",
            BuiltinMixin::ParentLink => "parent_link",
        }
    }

    /// Look a mixin up by its stable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Fields contributed by this mixin to `declaration`.
    pub fn fields(&self, declaration: &str) -> Vec<FieldDef> {
        match self {
            BuiltinMixin::Identity => vec![FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
                .with_default(DefaultValue::AutoUuid)
                .with_description("Unique identifier")],
            BuiltinMixin::Audit => vec![
                FieldDef::new("created_at", FieldType::scalar(ScalarType::Timestamp))
                    .with_default(DefaultValue::CurrentTimestamp)
                    .with_description("Creation time"),
                FieldDef::new("updated_at", FieldType::scalar(ScalarType::Timestamp))
                    .with_default(DefaultValue::CurrentTimestamp)
                    .with_description("Last modification time"),
            ],
            BuiltinMixin::Ownership => vec![
                FieldDef::new("user_id", FieldType::optional_reference("User")).with_index(),
                FieldDef::new("team_id", FieldType::optional_reference("Team")).with_index(),
            ],
            BuiltinMixin::SoftDelete => vec![FieldDef::optional_scalar(
                "deleted_at",
                ScalarType::Timestamp,
            )
            .with_description("Deletion time, null while the row is live")],
            BuiltinMixin::ParentLink => vec![FieldDef::new(
                "parent_id",
                FieldType::optional_reference(declaration),
            )
            .with_index()],
        }
    }
}

impl fmt::Display for FieldOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldOrigin::Mixin(mixin) => write!(f, "mixin {}", mixin.name()),
            FieldOrigin::Declared(name) => write!(f, "declaration {name}"),
        }
    }
}

impl From<BuiltinMixin> for MixinRef {
    fn from(mixin: BuiltinMixin) -> Self {
        MixinRef::Builtin(mixin)
    }
}
