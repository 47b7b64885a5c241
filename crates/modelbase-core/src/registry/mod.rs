//! Model registry: binding, commit ordering and synthesis orchestration.

mod global;
mod order;
mod registry;

pub use global::{clear_registries, registry, registry_names, registry_with_config};
pub use registry::{DanglingForeignKeyPolicy, ModelRegistry, RegistryConfig, RegistryPhase};
