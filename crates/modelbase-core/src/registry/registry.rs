//! The model registry: bound declarations, commit, and synthesis.

use super::order::synthesis_order;
use crate::catalog::{Declaration, DeclarativeBase, PartitionKey, TableCatalog};
use crate::error::{Error, Result};
use crate::synth::{DeclarationLookup, StorageSchema, Synthesizer};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// What `synthesize_all` does with foreign keys whose target never appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanglingForeignKeyPolicy {
    /// Log a warning per dangling key and continue.
    #[default]
    Warn,
    /// Fail synthesis.
    Error,
}

/// Registry configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Handling of unresolved foreign keys after synthesis.
    pub dangling_foreign_keys: DanglingForeignKeyPolicy,
}

impl RegistryConfig {
    /// Set the dangling foreign key policy.
    pub fn with_dangling_foreign_keys(mut self, policy: DanglingForeignKeyPolicy) -> Self {
        self.dangling_foreign_keys = policy;
        self
    }
}

/// Lifecycle phase of a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryPhase {
    /// Accepting bindings.
    Open,
    /// Bindings frozen, order fixed.
    Committed,
    /// Commit failed; the reason is kept.
    Failed(String),
}

#[derive(Debug)]
struct RegistryState {
    phase: RegistryPhase,
    declarations: IndexMap<String, Arc<Declaration>>,
    order: Vec<Arc<Declaration>>,
    enabled: BTreeSet<String>,
}

/// Holds the bound declarations of one logical database and drives their
/// synthesis into that database's catalog.
///
/// Binding happens during single-threaded bootstrap; the lock only keeps the
/// registry shareable across threads afterwards.
pub struct ModelRegistry {
    name: String,
    config: RegistryConfig,
    base: DeclarativeBase,
    synthesizer: Synthesizer,
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    /// Create an open registry targeting a fresh declarative base.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, RegistryConfig::default())
    }

    /// Create an open registry with explicit configuration.
    pub fn with_config(name: impl Into<String>, config: RegistryConfig) -> Self {
        let name = name.into();
        Self {
            base: DeclarativeBase::new(name.clone()),
            name,
            config,
            synthesizer: Synthesizer::new(),
            state: RwLock::new(RegistryState {
                phase: RegistryPhase::Open,
                declarations: IndexMap::new(),
                order: Vec::new(),
                enabled: BTreeSet::new(),
            }),
        }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The declarative base synthesized tables attach to.
    pub fn base(&self) -> &DeclarativeBase {
        &self.base
    }

    /// The table catalog.
    pub fn catalog(&self) -> &Arc<TableCatalog> {
        self.base.catalog()
    }

    /// The synthesizer and its cache.
    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    /// Current phase.
    pub fn phase(&self) -> RegistryPhase {
        self.state.read().phase.clone()
    }

    /// Bind a declaration.
    ///
    /// Binding the same declaration object again is a no-op; binding a
    /// different object under a taken name is an error.
    pub fn bind(&self, declaration: &Arc<Declaration>) -> Result<()> {
        let mut state = self.state.write();
        match &state.phase {
            RegistryPhase::Open => {}
            RegistryPhase::Committed => {
                return Err(Error::RegistryLocked {
                    name: declaration.name().to_string(),
                })
            }
            RegistryPhase::Failed(reason) => {
                return Err(Error::RegistryFailed {
                    reason: reason.clone(),
                })
            }
        }

        if let Some(existing) = state.declarations.get(declaration.name()) {
            if existing.same_as(declaration) {
                return Ok(());
            }
            return Err(Error::DuplicateName {
                name: declaration.name().to_string(),
            });
        }

        tracing::debug!(
            registry = %self.name,
            declaration = %declaration.name(),
            extension = ?declaration.extension(),
            "bound declaration"
        );
        state
            .declarations
            .insert(declaration.name().to_string(), Arc::clone(declaration));
        Ok(())
    }

    /// Bind several declarations in order.
    pub fn bind_all<'a>(
        &self,
        declarations: impl IntoIterator<Item = &'a Arc<Declaration>>,
    ) -> Result<()> {
        declarations.into_iter().try_for_each(|d| self.bind(d))
    }

    /// Freeze the bound set and fix the synthesis order.
    ///
    /// Calling this on a committed registry is a no-op, even with a
    /// different extension set. A mixin cycle leaves the registry failed.
    pub fn commit<I, S>(&self, extensions_enabled: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write();
        match &state.phase {
            RegistryPhase::Open => {}
            RegistryPhase::Committed => {
                tracing::debug!(registry = %self.name, "registry already committed");
                return Ok(());
            }
            RegistryPhase::Failed(reason) => {
                return Err(Error::RegistryFailed {
                    reason: reason.clone(),
                })
            }
        }

        let enabled: BTreeSet<String> = extensions_enabled.into_iter().map(Into::into).collect();
        match synthesis_order(&state.declarations, &enabled) {
            Ok(order) => {
                tracing::info!(
                    registry = %self.name,
                    declarations = state.declarations.len(),
                    synthesized = order.len(),
                    extensions = ?enabled,
                    "registry committed"
                );
                state.order = order;
                state.enabled = enabled;
                state.phase = RegistryPhase::Committed;
                Ok(())
            }
            Err(err) => {
                tracing::error!(registry = %self.name, error = %err, "registry commit failed");
                state.phase = RegistryPhase::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Whether `commit` succeeded.
    pub fn is_committed(&self) -> bool {
        self.state.read().phase == RegistryPhase::Committed
    }

    /// Bound declarations in bind order.
    pub fn get_bound_models(&self) -> Vec<Arc<Declaration>> {
        self.state.read().declarations.values().cloned().collect()
    }

    /// Get a bound declaration by name.
    pub fn get(&self, name: &str) -> Option<Arc<Declaration>> {
        self.state.read().declarations.get(name).cloned()
    }

    /// Committed synthesis order; empty before commit.
    pub fn synthesis_order(&self) -> Vec<Arc<Declaration>> {
        self.state.read().order.clone()
    }

    /// Extensions enabled at commit.
    pub fn enabled_extensions(&self) -> BTreeSet<String> {
        self.state.read().enabled.clone()
    }

    /// Every extension with at least one bound declaration, mapped to the
    /// names of the declarations it owns, enabled or not.
    pub fn extensions(&self) -> BTreeMap<String, Vec<String>> {
        let mut extensions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for decl in self.state.read().declarations.values() {
            if let Some(ext) = decl.extension() {
                extensions
                    .entry(ext.to_string())
                    .or_default()
                    .push(decl.name().to_string());
            }
        }
        extensions
    }

    /// Committed declarations grouped by partition, in synthesis order.
    pub fn partitions(&self) -> BTreeMap<PartitionKey, Vec<Arc<Declaration>>> {
        let mut partitions: BTreeMap<PartitionKey, Vec<Arc<Declaration>>> = BTreeMap::new();
        for decl in &self.state.read().order {
            partitions
                .entry(PartitionKey::of(decl.extension()))
                .or_default()
                .push(Arc::clone(decl));
        }
        partitions
    }

    /// Synthesize every committed declaration, in order, into the catalog.
    pub fn synthesize_all(&self) -> Result<Vec<Arc<StorageSchema>>> {
        let (order, lookup) = self.snapshot()?;

        let schemas = order
            .iter()
            .map(|decl| self.synthesizer.synthesize(decl, self.catalog(), &lookup))
            .collect::<Result<Vec<_>>>()?;

        let dangling = self.catalog().pending_placeholders();
        if !dangling.is_empty() {
            match self.config.dangling_foreign_keys {
                DanglingForeignKeyPolicy::Warn => {
                    for placeholder in &dangling {
                        tracing::warn!(
                            registry = %self.name,
                            foreign_key = %placeholder,
                            "foreign key target table does not exist"
                        );
                    }
                }
                DanglingForeignKeyPolicy::Error => {
                    return Err(Error::DanglingForeignKeys {
                        references: dangling.iter().map(ToString::to_string).collect(),
                    });
                }
            }
        }

        tracing::info!(
            registry = %self.name,
            tables = self.catalog().len(),
            dangling_foreign_keys = dangling.len(),
            "synthesis complete"
        );
        Ok(schemas)
    }

    /// Storage schema of a bound declaration, synthesizing it if needed.
    pub fn db(&self, declaration: &Arc<Declaration>) -> Result<Arc<StorageSchema>> {
        let (_, lookup) = self.snapshot()?;
        match lookup.get(declaration.name()) {
            Some(bound) if bound.same_as(declaration) => {}
            _ => {
                return Err(Error::InvalidDeclaration {
                    declaration: declaration.name().to_string(),
                    reason: format!("not bound to registry {}", self.name),
                })
            }
        }
        self.synthesizer
            .synthesize(declaration, self.catalog(), &lookup)
    }

    /// Storage schema of the declaration bound under `name`.
    pub fn schema_for_name(&self, name: &str) -> Result<Arc<StorageSchema>> {
        let declaration = self.get(name).ok_or_else(|| Error::InvalidDeclaration {
            declaration: name.to_string(),
            reason: format!("not bound to registry {}", self.name),
        })?;
        self.db(&declaration)
    }

    /// Reset to an open, empty registry with an empty catalog.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.phase = RegistryPhase::Open;
        state.declarations.clear();
        state.order.clear();
        state.enabled.clear();
        self.synthesizer.cache().clear();
        self.catalog().clear();
        tracing::debug!(registry = %self.name, "registry cleared");
    }

    /// Committed order plus a name lookup, taken without holding the lock
    /// during synthesis.
    fn snapshot(&self) -> Result<(Vec<Arc<Declaration>>, IndexMap<String, Arc<Declaration>>)> {
        let state = self.state.read();
        match &state.phase {
            RegistryPhase::Committed => Ok((state.order.clone(), state.declarations.clone())),
            RegistryPhase::Open => Err(Error::NotCommitted),
            RegistryPhase::Failed(reason) => Err(Error::RegistryFailed {
                reason: reason.clone(),
            }),
        }
    }
}

impl DeclarationLookup for ModelRegistry {
    fn find(&self, name: &str) -> Option<Arc<Declaration>> {
        self.get(name)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ModelRegistry")
            .field("name", &self.name)
            .field("phase", &state.phase)
            .field("declarations", &state.declarations.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BuiltinMixin, FieldDef, FieldType, ScalarType};

    fn team() -> Arc<Declaration> {
        Declaration::builder("Team")
            .mixin(BuiltinMixin::Identity)
            .mixin(BuiltinMixin::Audit)
            .field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
            .build()
    }

    fn user() -> Arc<Declaration> {
        Declaration::builder("User")
            .mixin(BuiltinMixin::Identity)
            .mixin(BuiltinMixin::Audit)
            .field(FieldDef::new("team_id", FieldType::reference("Team")))
            .build()
    }

    #[test]
    fn test_rebinding_same_object_is_noop() {
        let registry = ModelRegistry::new("app");
        let team = team();

        registry.bind(&team).unwrap();
        registry.bind(&team).unwrap();

        assert_eq!(registry.get_bound_models().len(), 1);
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let registry = ModelRegistry::new("app");
        let first = team();
        let second = team();

        registry.bind(&first).unwrap();
        let err = registry.bind(&second).unwrap_err();

        assert!(matches!(err, Error::DuplicateName { ref name } if name == "Team"));
        let bound = registry.get_bound_models();
        assert_eq!(bound.len(), 1);
        assert!(bound[0].same_as(&first));
    }

    #[test]
    fn test_bind_after_commit_is_rejected() {
        let registry = ModelRegistry::new("app");
        registry.bind(&team()).unwrap();
        registry.commit(Vec::<String>::new()).unwrap();

        let err = registry.bind(&user()).unwrap_err();

        assert!(matches!(err, Error::RegistryLocked { ref name } if name == "User"));
        assert_eq!(registry.get_bound_models().len(), 1);
        assert!(registry.catalog().is_empty());
    }

    #[test]
    fn test_commit_twice_is_noop() {
        let registry = ModelRegistry::new("app");
        registry.bind(&team()).unwrap();

        registry.commit(["billing"]).unwrap();
        registry.commit(["crm"]).unwrap();

        assert!(registry.is_committed());
        assert_eq!(
            registry.enabled_extensions().into_iter().collect::<Vec<_>>(),
            vec!["billing"]
        );
    }

    #[test]
    fn test_failed_commit_poisons_registry() {
        let registry = ModelRegistry::new("app");
        registry
            .bind(&Declaration::builder("A").mixin_declaration("B").build())
            .unwrap();
        registry
            .bind(&Declaration::builder("B").mixin_declaration("A").build())
            .unwrap();

        assert!(matches!(
            registry.commit(Vec::<String>::new()),
            Err(Error::MixinCycle { .. })
        ));
        assert!(matches!(registry.phase(), RegistryPhase::Failed(_)));
        assert!(matches!(
            registry.commit(Vec::<String>::new()),
            Err(Error::RegistryFailed { .. })
        ));
        assert!(matches!(registry.synthesize_all(), Err(Error::RegistryFailed { .. })));
    }

    #[test]
    fn test_synthesize_requires_commit() {
        let registry = ModelRegistry::new("app");
        registry.bind(&team()).unwrap();
        assert!(matches!(registry.synthesize_all(), Err(Error::NotCommitted)));
    }

    #[test]
    fn test_synthesize_all_in_bind_order() {
        let registry = ModelRegistry::new("app");
        let user = user();
        let team = team();
        registry.bind_all([&user, &team]).unwrap();
        registry.commit(Vec::<String>::new()).unwrap();

        let schemas = registry.synthesize_all().unwrap();

        assert_eq!(schemas.len(), 2);
        assert_eq!(registry.catalog().table_names(), vec!["users", "teams"]);
        let column = registry.db(&user).unwrap().column("team_id").unwrap();
        assert_eq!(column.comment.as_deref(), Some("Team"));
        assert!(Arc::ptr_eq(&schemas[0], &registry.db(&user).unwrap()));
    }

    #[test]
    fn test_dangling_policy_error() {
        let registry = ModelRegistry::with_config(
            "app",
            RegistryConfig::default().with_dangling_foreign_keys(DanglingForeignKeyPolicy::Error),
        );
        registry.bind(&user()).unwrap();
        registry.commit(Vec::<String>::new()).unwrap();

        match registry.synthesize_all().unwrap_err() {
            Error::DanglingForeignKeys { references } => {
                assert_eq!(references, vec!["users.team_id -> teams.id"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dangling_policy_warn() {
        let registry = ModelRegistry::new("app");
        registry.bind(&user()).unwrap();
        registry.commit(Vec::<String>::new()).unwrap();

        registry.synthesize_all().unwrap();
        assert_eq!(registry.catalog().pending_placeholders().len(), 1);
    }

    #[test]
    fn test_partitions_and_extension_registry() {
        let registry = ModelRegistry::new("app");
        registry.bind(&team()).unwrap();
        registry
            .bind(&Declaration::builder("Invoice").extension("billing").build())
            .unwrap();
        registry
            .bind(&Declaration::builder("Lead").extension("crm").build())
            .unwrap();
        registry.commit(["billing"]).unwrap();

        let extensions = registry.extensions();
        assert_eq!(extensions["billing"], vec!["Invoice"]);
        assert_eq!(extensions["crm"], vec!["Lead"]);

        let partitions = registry.partitions();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[&PartitionKey::Core][0].name(), "Team");
        assert!(!partitions.contains_key(&PartitionKey::Extension("crm".into())));

        registry.synthesize_all().unwrap();
        assert_eq!(registry.catalog().extension_of("invoices"), Some(Some("billing".into())));
        assert!(!registry.catalog().contains("leads"));
    }

    #[test]
    fn test_db_rejects_unbound_declaration() {
        let registry = ModelRegistry::new("app");
        registry.bind(&team()).unwrap();
        registry.commit(Vec::<String>::new()).unwrap();

        assert!(registry.db(&team()).is_err());
        assert!(registry.schema_for_name("Team").is_ok());
        assert!(registry.schema_for_name("Ghost").is_err());
    }

    #[test]
    fn test_clear_reopens() {
        let registry = ModelRegistry::new("app");
        registry.bind(&team()).unwrap();
        registry.commit(Vec::<String>::new()).unwrap();
        registry.synthesize_all().unwrap();

        registry.clear();

        assert_eq!(registry.phase(), RegistryPhase::Open);
        assert!(registry.get_bound_models().is_empty());
        assert!(registry.catalog().is_empty());
        assert!(registry.synthesizer().cache().is_empty());
        registry.bind(&team()).unwrap();
    }
}
