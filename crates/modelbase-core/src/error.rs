//! Core error types.

use thiserror::Error;

/// Registry, synthesis and catalog errors.
///
/// Every variant except [`Error::Io`] and [`Error::Json`] describes a mistake
/// in the model declarations themselves and is not meant to be recovered
/// from at runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A declaration was bound after the registry was committed.
    #[error("registry is committed; cannot bind declaration {name}")]
    RegistryLocked {
        /// Name of the rejected declaration.
        name: String,
    },

    /// The registry failed to commit and refuses further work.
    #[error("registry commit failed: {reason}")]
    RegistryFailed {
        /// Why the commit failed.
        reason: String,
    },

    /// Synthesis was requested before `commit`.
    #[error("registry is not committed")]
    NotCommitted,

    /// Two different declarations share a name.
    #[error("declaration name {name} is already bound to a different declaration")]
    DuplicateName {
        /// The contested name.
        name: String,
    },

    /// The mixin dependency graph contains a cycle.
    #[error("mixin dependency cycle: {}", members.join(" -> "))]
    MixinCycle {
        /// Declarations on the cycle, in traversal order.
        members: Vec<String>,
    },

    /// A declaration uses a declaration mixin that is not bound.
    #[error("declaration {declaration} uses unknown mixin {mixin}")]
    UnknownMixin {
        /// The declaration with the bad mixin.
        declaration: String,
        /// The missing mixin name.
        mixin: String,
    },

    /// A declaration depends on a declaration that will not be synthesized
    /// before it (an extension that is disabled or owned by core's dependents).
    #[error("declaration {declaration} ({partition}) cannot use mixin {mixin} from {mixin_partition}")]
    MixinOutsidePartition {
        /// The dependent declaration.
        declaration: String,
        /// Partition of the dependent declaration.
        partition: String,
        /// The mixin declaration.
        mixin: String,
        /// Partition of the mixin declaration.
        mixin_partition: String,
    },

    /// Two mixins (or a mixin and the declaration) contribute the same field.
    #[error("field {field} of {declaration} is contributed by both {first} and {second}")]
    MixinFieldCollision {
        /// The declaration being flattened.
        declaration: String,
        /// The duplicated field name.
        field: String,
        /// Origin of the first definition.
        first: String,
        /// Origin of the redefinition.
        second: String,
    },

    /// A table name is already registered by another declaration.
    #[error("table {table} is already registered by {existing}; {incoming} cannot register it")]
    TableCollision {
        /// The contested table name.
        table: String,
        /// Declaration that owns the table.
        existing: String,
        /// Declaration that tried to register it again.
        incoming: String,
    },

    /// Foreign keys whose target table never appeared in the catalog.
    #[error("unresolved foreign keys: {}", references.join(", "))]
    DanglingForeignKeys {
        /// `source_table.source_column -> target_table.target_column` entries.
        references: Vec<String>,
    },

    /// A declaration is malformed.
    #[error("invalid declaration {declaration}: {reason}")]
    InvalidDeclaration {
        /// The declaration name.
        declaration: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A model manifest could not be interpreted.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_names_members() {
        let err = Error::MixinCycle {
            members: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "mixin dependency cycle: A -> B -> A");
    }

    #[test]
    fn test_collision_display_names_both_declarations() {
        let err = Error::TableCollision {
            table: "users".into(),
            existing: "User".into(),
            incoming: "Users".into(),
        };
        let text = err.to_string();
        assert!(text.contains("User "));
        assert!(text.contains("Users"));
    }
}
