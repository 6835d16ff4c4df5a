//! Stack inheritance resolution.
//!
//! Each stack's base chain is walked depth-first. A stack is `Resolving`
//! while its chain is being walked; meeting a `Resolving` stack again means
//! the chain loops, and every stack on the loop fails with
//! [`BindError::InheritanceCycle`]. Stacks that merely lead into a failed
//! chain fail with [`BindError::DependencyFailed`].
//!
//! On success the stack's `bound_base` is written and its [`Effective`]
//! declarations are computed: the base's effective declarations, overridden
//! by the stack's own same-named ones.
//!
//! # Example
//!
//! ```
//! use stackdef_core::*;
//!
//! let mut arena = StackArena::new();
//! let base = arena.add(
//!     Stack::new("server")
//!         .abstract_stack()
//!         .with_property("port", Property::new("number").readonly(true)),
//! );
//! let web = arena.add(
//!     Stack::new("web")
//!         .with_base("server")
//!         .with_property("port", Property::new("number").with_default(serde_json::json!(80))),
//! );
//!
//! let failed = resolve_inheritance(&mut arena, &BindOptions::default());
//! assert!(failed.is_empty());
//!
//! let port = &arena.effective(web).unwrap().properties["port"];
//! assert_eq!(port.owner, web);
//! assert!(port.property.is_readonly());
//! assert_eq!(arena.stack(web).bound_base.get(), Some(&base));
//! ```

use tracing::{debug, warn};

use crate::arena::{
    Effective, EffectiveProperty, EffectiveSchema, EffectiveService, StackArena, StackId,
    StackState,
};
use crate::ast::Stack;
use crate::error::BindError;
use crate::options::{BindOptions, FlagInheritance};

/// A failed walk: the error, and the stacks on the cycle if it was one.
struct Failure {
    error: BindError,
    cycle: Vec<StackId>,
}

impl Failure {
    fn own(error: BindError) -> Self {
        Self {
            error,
            cycle: Vec::new(),
        }
    }
}

/// Resolves the base chain of every stack that has not been resolved yet.
///
/// Returns the stacks that failed; their errors are recorded in the arena.
pub fn resolve_inheritance(arena: &mut StackArena, options: &BindOptions) -> Vec<StackId> {
    let ids: Vec<StackId> = arena.ids().collect();
    let failed_before: Vec<StackId> = ids
        .iter()
        .copied()
        .filter(|id| arena.state(*id) == StackState::Error)
        .collect();
    let mut failed = Vec::new();
    for id in ids {
        if arena.effective(id).is_some() || arena.state(id).is_terminal() {
            continue;
        }
        let mut path = Vec::new();
        if resolve_stack(arena, id, options, &mut path).is_err() {
            failed.push(id);
        }
    }
    // Stacks failed indirectly, while walking another stack's chain.
    for id in arena.ids() {
        if arena.state(id) == StackState::Error
            && !failed.contains(&id)
            && !failed_before.contains(&id)
        {
            failed.push(id);
        }
    }
    failed.sort();
    failed
}

fn resolve_stack(
    arena: &mut StackArena,
    id: StackId,
    options: &BindOptions,
    path: &mut Vec<StackId>,
) -> Result<(), Failure> {
    if arena.effective(id).is_some() {
        return Ok(());
    }
    match arena.state(id) {
        StackState::Error => {
            let error = arena
                .error(id)
                .cloned()
                .unwrap_or_else(|| BindError::UnknownType {
                    ty: arena.label(id),
                });
            return Err(Failure::own(error));
        }
        StackState::Resolving => {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let cycle = path[start..].to_vec();
            let mut chain: Vec<String> = cycle.iter().map(|s| arena.label(*s)).collect();
            chain.push(arena.label(id));
            return Err(Failure {
                error: BindError::InheritanceCycle { chain },
                cycle,
            });
        }
        StackState::Unbound | StackState::Bound => {}
    }

    arena
        .transition(id, StackState::Resolving)
        .map_err(Failure::own)?;
    path.push(id);
    let result = bind_base(arena, id, options, path);
    path.pop();

    if let Err(failure) = &result {
        warn!(stack = %arena.label(id), error = %failure.error, "Inheritance resolution failed");
        arena.fail(id, failure.error.clone());
    }
    result
}

fn bind_base(
    arena: &mut StackArena,
    id: StackId,
    options: &BindOptions,
    path: &mut Vec<StackId>,
) -> Result<(), Failure> {
    let stack = arena.stack(id);
    let base_ref = stack.base.clone();
    if stack.intrinsic {
        if let Some(base) = &base_ref {
            return Err(Failure::own(BindError::TypeMismatch {
                path: format!("{}.base", stack.label()),
                expected: "no base for an intrinsic stack".to_string(),
                actual: base.to_string(),
            }));
        }
    }

    let base_id = match base_ref {
        None => None,
        Some(base) => {
            let base_id = arena.find(&base).map_err(Failure::own)?;
            if let Err(failure) = resolve_stack(arena, base_id, options, path) {
                if failure.cycle.contains(&id) {
                    return Err(failure);
                }
                return Err(Failure::own(BindError::DependencyFailed {
                    stack: arena.label(id),
                    dependency: arena.label(base_id),
                    root_cause: Box::new(failure.error.root_cause().clone()),
                }));
            }
            Some(base_id)
        }
    };

    let stack = arena.stack(id);
    if let Some(base_id) = base_id {
        stack
            .bound_base
            .set(base_id)
            .map_err(|_| {
                Failure::own(BindError::AlreadyBound {
                    what: format!("base of `{}`", stack.label()),
                })
            })?;
    }
    let effective = merge_declarations(
        base_id.and_then(|b| arena.effective(b)),
        id,
        stack,
        options.flag_inheritance,
    );
    arena.set_effective(id, effective).map_err(Failure::own)?;
    debug!(
        stack = %arena.label(id),
        base = ?base_id.map(|b| arena.label(b)),
        "Resolved inheritance"
    );
    Ok(())
}

/// Overlays `stack`'s own declarations on its base's effective ones.
///
/// Same-named declarations in `stack` replace the base's. With
/// [`FlagInheritance::Inherit`], a redeclared property keeps the base's
/// `readonly`/`perturbs` flags unless it sets them itself.
pub fn merge_declarations(
    base: Option<&Effective>,
    id: StackId,
    stack: &Stack,
    flags: FlagInheritance,
) -> Effective {
    let mut merged = base.cloned().unwrap_or_default();

    for (name, property) in &stack.properties {
        let mut property = property.clone();
        if flags == FlagInheritance::Inherit {
            if let Some(parent) = merged.properties.get(name) {
                property.readonly = property.readonly.or(parent.property.readonly);
                property.perturbs = property.perturbs.or(parent.property.perturbs);
            }
        }
        merged
            .properties
            .insert(name.clone(), EffectiveProperty { owner: id, property });
    }

    for (name, schema) in stack.declared_schemas() {
        merged.schemas.insert(
            name.clone(),
            EffectiveSchema {
                owner: id,
                public: schema.public,
            },
        );
    }

    for (name, _, public) in stack.untyped_services() {
        merged
            .services
            .insert(name.clone(), EffectiveService { owner: id, public });
    }

    merged
}
