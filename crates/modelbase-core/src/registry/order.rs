//! Synthesis order over declaration mixin dependencies.

use crate::catalog::{Declaration, PartitionKey};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Compute the order declarations are synthesized in.
///
/// Core declarations come first, then each enabled extension in name order;
/// within a group, bind order is kept except that a declaration mixin is
/// always placed before its dependents. Declarations of disabled extensions
/// are left out. Relationships play no part here.
pub(crate) fn synthesis_order(
    declarations: &IndexMap<String, Arc<Declaration>>,
    enabled: &BTreeSet<String>,
) -> Result<Vec<Arc<Declaration>>> {
    let included = |decl: &Declaration| match decl.extension() {
        None => true,
        Some(ext) => enabled.contains(ext),
    };

    let groups = std::iter::once(None).chain(enabled.iter().map(|e| Some(e.as_str())));
    let mut order = Vec::with_capacity(declarations.len());
    let mut visited = HashSet::new();
    let mut stack = Vec::new();

    for group in groups {
        for decl in declarations.values().filter(|d| d.extension() == group) {
            visit(decl, declarations, &included, &mut visited, &mut stack, &mut order)?;
        }
    }

    Ok(order)
}

fn visit(
    decl: &Arc<Declaration>,
    declarations: &IndexMap<String, Arc<Declaration>>,
    included: &dyn Fn(&Declaration) -> bool,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
    order: &mut Vec<Arc<Declaration>>,
) -> Result<()> {
    if visited.contains(decl.name()) {
        return Ok(());
    }
    if let Some(pos) = stack.iter().position(|n| n == decl.name()) {
        let mut members = stack[pos..].to_vec();
        members.push(decl.name().to_string());
        return Err(Error::MixinCycle { members });
    }

    stack.push(decl.name().to_string());
    for name in decl.declaration_mixins() {
        let dependency = declarations.get(name).ok_or_else(|| Error::UnknownMixin {
            declaration: decl.name().to_string(),
            mixin: name.to_string(),
        })?;
        check_partition(decl, dependency, included)?;
        visit(dependency, declarations, included, visited, stack, order)?;
    }
    stack.pop();

    visited.insert(decl.name().to_string());
    order.push(Arc::clone(decl));
    Ok(())
}

/// Core may only build on core; nothing may build on a disabled extension.
fn check_partition(
    decl: &Declaration,
    dependency: &Declaration,
    included: &dyn Fn(&Declaration) -> bool,
) -> Result<()> {
    let allowed = included(dependency) && (decl.extension().is_some() || dependency.extension().is_none());
    if allowed {
        return Ok(());
    }
    Err(Error::MixinOutsidePartition {
        declaration: decl.name().to_string(),
        partition: PartitionKey::of(decl.extension()).to_string(),
        mixin: dependency.name().to_string(),
        mixin_partition: PartitionKey::of(dependency.extension()).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(decls: &[Arc<Declaration>]) -> IndexMap<String, Arc<Declaration>> {
        decls
            .iter()
            .map(|d| (d.name().to_string(), Arc::clone(d)))
            .collect()
    }

    fn names(order: &[Arc<Declaration>]) -> Vec<&str> {
        order.iter().map(|d| d.name()).collect()
    }

    fn enabled(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_bind_order_without_dependencies() {
        let decls = bind(&[
            Declaration::builder("User").build(),
            Declaration::builder("Team").build(),
        ]);

        let order = synthesis_order(&decls, &enabled(&[])).unwrap();
        assert_eq!(names(&order), vec!["User", "Team"]);
    }

    #[test]
    fn test_mixin_dependency_comes_first() {
        let decls = bind(&[
            Declaration::builder("Tag").mixin_declaration("Named").build(),
            Declaration::builder("Named").abstract_base().build(),
            Declaration::builder("Label").mixin_declaration("Named").build(),
        ]);

        let order = synthesis_order(&decls, &enabled(&[])).unwrap();
        assert_eq!(names(&order), vec!["Named", "Tag", "Label"]);
    }

    #[test]
    fn test_extensions_follow_core_and_disabled_are_skipped() {
        let decls = bind(&[
            Declaration::builder("Invoice").extension("billing").build(),
            Declaration::builder("User").build(),
            Declaration::builder("Lead").extension("crm").build(),
            Declaration::builder("Ticket").extension("support").build(),
            Declaration::builder("Team").build(),
        ]);

        let order = synthesis_order(&decls, &enabled(&["crm", "billing"])).unwrap();
        assert_eq!(names(&order), vec!["User", "Team", "Invoice", "Lead"]);
    }

    #[test]
    fn test_cycle_names_members() {
        let decls = bind(&[
            Declaration::builder("A").mixin_declaration("B").build(),
            Declaration::builder("B").mixin_declaration("C").build(),
            Declaration::builder("C").mixin_declaration("A").build(),
        ]);

        match synthesis_order(&decls, &enabled(&[])).unwrap_err() {
            Error::MixinCycle { members } => assert_eq!(members, vec!["A", "B", "C", "A"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_mixin() {
        let decls = bind(&[Declaration::builder("A").mixin_declaration("Ghost").build()]);
        assert!(matches!(
            synthesis_order(&decls, &enabled(&[])),
            Err(Error::UnknownMixin { .. })
        ));
    }

    #[test]
    fn test_core_cannot_build_on_extension() {
        let decls = bind(&[
            Declaration::builder("Base").extension("billing").build(),
            Declaration::builder("User").mixin_declaration("Base").build(),
        ]);

        let err = synthesis_order(&decls, &enabled(&["billing"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "declaration User (core) cannot use mixin Base from extension:billing"
        );
    }

    #[test]
    fn test_extension_can_build_on_core() {
        let decls = bind(&[
            Declaration::builder("Named").abstract_base().build(),
            Declaration::builder("Invoice")
                .extension("billing")
                .mixin_declaration("Named")
                .build(),
        ]);

        let order = synthesis_order(&decls, &enabled(&["billing"])).unwrap();
        assert_eq!(names(&order), vec!["Named", "Invoice"]);
    }

    #[test]
    fn test_dependency_on_disabled_extension() {
        let decls = bind(&[
            Declaration::builder("Base").extension("crm").build(),
            Declaration::builder("Invoice")
                .extension("billing")
                .mixin_declaration("Base")
                .build(),
        ]);

        assert!(matches!(
            synthesis_order(&decls, &enabled(&["billing"])),
            Err(Error::MixinOutsidePartition { .. })
        ));
    }
}
