//! The binding pass and its scheduler.
//!
//! Binding runs in three steps:
//!
//! 1. Refs no stack in the arena satisfies are handed to the external
//!    [`StackLookup`], transitively, until nothing new turns up.
//! 2. Every base chain is resolved ([`resolve_inheritance`]).
//! 3. Stacks bind in waves. A stack is ready once everything it depends on
//!    (its base and its service targets) is `Bound`. Each wave is computed in
//!    parallel against a shared, read-only arena and then applied
//!    sequentially, so bound fields are written exactly once.
//!
//! A stack whose dependency failed is marked `Error` with
//! [`BindError::DependencyFailed`] without being attempted; unrelated stacks
//! keep binding. Stacks still waiting when no wave is ready instantiate each
//! other and fail with [`BindError::InstantiationCycle`].
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use stackdef_core::*;
//!
//! let mut services = PropertyBag::new();
//! services.insert("type".into(), json!("mysql"));
//! services.insert("size".into(), json!(10));
//!
//! let mut binder = Binder::new(BindOptions::default());
//! let mysql = binder.add(Stack::new("mysql").with_property("size", Property::new("number")));
//! let app = binder.add(Stack::new("app").with_service("db", services, true));
//!
//! let report = binder.bind();
//! assert!(report.is_ok(), "{:?}", report.diagnostics);
//!
//! let arena = binder.arena();
//! let db = arena.stack(app).service("db").unwrap();
//! assert_eq!(db.bound_type.get(), Some(&mysql));
//! assert_eq!(arena.state(app), StackState::Bound);
//! ```

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::arena::{Lookup, StackArena, StackId, StackLookup, StackState};
use crate::ast::{LiteralBag, ServiceMap, Stack, Workspace};
use crate::error::{BindError, Diagnostic};
use crate::ident::Ref;
use crate::inherit::resolve_inheritance;
use crate::literal::{Type, TypeExpr};
use crate::node::Node;
use crate::options::BindOptions;
use crate::services::{ServiceResolver, target_ref};
use crate::validate::Validator;

/// Outcome of a binding run.
#[derive(Debug, Clone, Default)]
pub struct BindReport {
    /// Every problem found, in the order it was found.
    pub diagnostics: Vec<Diagnostic>,
    pub bound: Vec<StackId>,
    pub failed: Vec<StackId>,
}

impl BindReport {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &BindError> {
        self.diagnostics.iter().map(|d| &d.error)
    }
}

/// Everything one stack's bind computes, ready to be written.
#[derive(Debug)]
struct StackBinding {
    property_types: Vec<(String, StackId)>,
    public: ServiceMap,
    private: ServiceMap,
    values: Option<LiteralBag>,
}

/// Collects stacks and binds them.
pub struct Binder<'l> {
    arena: StackArena,
    options: BindOptions,
    lookup: Option<&'l dyn StackLookup>,
    diagnostics: Vec<Diagnostic>,
}

impl Default for Binder<'_> {
    fn default() -> Self {
        Self::new(BindOptions::default())
    }
}

impl<'l> Binder<'l> {
    pub fn new(options: BindOptions) -> Self {
        Self {
            arena: StackArena::new(),
            options,
            lookup: None,
            diagnostics: Vec::new(),
        }
    }

    /// Consults `lookup` for refs no registered stack satisfies.
    pub fn with_lookup(mut self, lookup: &'l dyn StackLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Applies a workspace: its dependency specs pin unversioned refs and
    /// its dependencies become placeholders until a real stack shows up.
    /// Workspace problems are reported with the next [`Binder::bind`].
    pub fn with_workspace(mut self, workspace: &Workspace) -> Self {
        for error in workspace.validate() {
            self.diagnostics.push(Diagnostic::new(error, &workspace.node));
        }
        for (name, spec) in workspace.pins() {
            self.arena.pin(name, spec);
        }
        for placeholder in workspace.dependency_refs().into_values() {
            if let Err(e) = self.arena.add_uninstantiated(placeholder) {
                debug!(error = %e, "Skipping malformed dependency");
            }
        }
        self
    }

    pub fn add(&mut self, stack: Stack) -> StackId {
        self.arena.add(stack)
    }

    pub fn options(&self) -> &BindOptions {
        &self.options
    }

    pub fn arena(&self) -> &StackArena {
        &self.arena
    }

    pub fn into_arena(self) -> StackArena {
        self.arena
    }

    /// Binds every stack that is not bound yet.
    pub fn bind(&mut self) -> BindReport {
        let mut report = BindReport {
            diagnostics: std::mem::take(&mut self.diagnostics),
            ..Default::default()
        };
        info!(stacks = self.arena.len(), "Binding stacks");

        self.prepare();

        for id in self.arena.take_duplicates() {
            warn!(stack = %self.arena.label(id), "Duplicate stack");
            report.diagnostics.push(self.failure_diagnostic(id));
        }

        for id in resolve_inheritance(&mut self.arena, &self.options) {
            report.diagnostics.push(self.failure_diagnostic(id));
        }

        let deps = self.dependencies();
        let mut pending: Vec<StackId> = self
            .arena
            .ids()
            .filter(|id| !self.arena.state(*id).is_terminal())
            .collect();

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.unwrap_or(0))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "Failed to build thread pool, using the global pool");
                None
            }
        };

        let mut wave = 0usize;
        loop {
            self.propagate_failures(&mut pending, &deps, &mut report);

            let ready: Vec<StackId> = pending
                .iter()
                .copied()
                .filter(|id| {
                    deps[id]
                        .iter()
                        .all(|d| self.arena.state(*d) == StackState::Bound)
                })
                .collect();
            if ready.is_empty() {
                break;
            }
            wave += 1;
            debug!(wave, stacks = ready.len(), "Binding wave");

            let arena = &self.arena;
            let options = &self.options;
            let compute = || -> Vec<(StackId, Result<StackBinding, Vec<Diagnostic>>)> {
                ready
                    .par_iter()
                    .map(|&id| (id, compute_binding(arena, options, id)))
                    .collect()
            };
            let results = match &pool {
                Some(pool) => pool.install(compute),
                None => compute(),
            };

            for (id, result) in results {
                match result {
                    Ok(binding) => {
                        if let Err(e) = apply(&mut self.arena, id, binding) {
                            report.diagnostics.push(self.stack_diagnostic(id, e.clone()));
                            self.arena.fail(id, e);
                        }
                    }
                    Err(diagnostics) => {
                        let first = diagnostics[0].error.clone();
                        warn!(stack = %self.arena.label(id), error = %first, "Stack failed to bind");
                        report.diagnostics.extend(diagnostics);
                        self.arena.fail(id, first);
                    }
                }
            }
            pending.retain(|id| !self.arena.state(*id).is_terminal());
        }

        self.fail_cycles(&pending, &deps, &mut report);

        for id in self.arena.ids() {
            match self.arena.state(id) {
                StackState::Bound => report.bound.push(id),
                StackState::Error => report.failed.push(id),
                StackState::Unbound | StackState::Resolving => {}
            }
        }
        info!(
            bound = report.bound.len(),
            failed = report.failed.len(),
            waves = wave,
            "Binding finished"
        );
        report
    }

    /// Pulls stacks from the external lookup until every ref is either
    /// satisfied or known to be missing.
    fn prepare(&mut self) {
        let Some(lookup) = self.lookup else {
            return;
        };
        let mut tried: HashSet<String> = HashSet::new();
        let mut next = 0;
        loop {
            let ids: Vec<StackId> = self.arena.ids().skip(next).collect();
            if ids.is_empty() {
                break;
            }
            next += ids.len();
            for id in ids {
                for reference in references(self.arena.stack(id)) {
                    if !tried.insert(reference.normalized()) {
                        continue;
                    }
                    match self.arena.find(&reference) {
                        Err(
                            BindError::UnknownType { .. }
                            | BindError::UninstantiatedStack { .. }
                            | BindError::UnsatisfiableVersion { .. },
                        ) => {}
                        _ => continue,
                    }
                    let Ok(parts) = reference.parse() else {
                        continue;
                    };
                    match lookup.lookup(&parts) {
                        Lookup::Stack(stack) => {
                            debug!(reference = %reference, "Stack found by lookup");
                            self.arena.add(*stack);
                        }
                        Lookup::Uninstantiated(placeholder) => {
                            debug!(reference = %reference, "Stack not instantiated yet");
                            if let Err(e) = self.arena.add_uninstantiated(placeholder) {
                                debug!(error = %e, "Skipping malformed placeholder");
                            }
                        }
                        Lookup::NotFound => {
                            debug!(reference = %reference, "Stack not found by lookup");
                        }
                    }
                }
            }
        }
    }

    /// Base and service targets of every stack still to bind.
    fn dependencies(&self) -> BTreeMap<StackId, Vec<StackId>> {
        let mut deps = BTreeMap::new();
        for id in self.arena.ids() {
            if self.arena.state(id).is_terminal() {
                continue;
            }
            let stack = self.arena.stack(id);
            let mut targets: Vec<StackId> = stack.bound_base.get().copied().into_iter().collect();
            for (name, bag, _) in stack.untyped_services() {
                if let Ok(target) = self.arena.find(&target_ref(name, bag)) {
                    targets.push(target);
                }
            }
            targets.sort();
            targets.dedup();
            deps.insert(id, targets);
        }
        deps
    }

    fn propagate_failures(
        &mut self,
        pending: &mut Vec<StackId>,
        deps: &BTreeMap<StackId, Vec<StackId>>,
        report: &mut BindReport,
    ) {
        let mut changed = true;
        while changed {
            changed = false;
            for &id in pending.iter() {
                if self.arena.state(id).is_terminal() {
                    continue;
                }
                let failed = deps[&id]
                    .iter()
                    .copied()
                    .find(|d| self.arena.state(*d) == StackState::Error);
                let Some(dep) = failed else {
                    continue;
                };
                let root_cause = self
                    .arena
                    .error(dep)
                    .map(|e| e.root_cause().clone())
                    .unwrap_or_else(|| BindError::UnknownType {
                        ty: self.arena.label(dep),
                    });
                let error = BindError::DependencyFailed {
                    stack: self.arena.label(id),
                    dependency: self.arena.label(dep),
                    root_cause: Box::new(root_cause),
                };
                debug!(stack = %self.arena.label(id), dependency = %self.arena.label(dep), "Dependency failed");
                report.diagnostics.push(self.stack_diagnostic(id, error.clone()));
                self.arena.fail(id, error);
                changed = true;
            }
        }
        pending.retain(|id| !self.arena.state(*id).is_terminal());
    }

    /// Fails stacks left waiting on each other through their services.
    fn fail_cycles(
        &mut self,
        pending: &[StackId],
        deps: &BTreeMap<StackId, Vec<StackId>>,
        report: &mut BindReport,
    ) {
        let waiting: HashSet<StackId> = pending.iter().copied().collect();
        let mut errors = Vec::new();
        for &id in pending {
            let mut path = vec![id];
            let mut current = id;
            let cycle = loop {
                let Some(next) = deps[&current].iter().copied().find(|d| waiting.contains(d)) else {
                    break None;
                };
                if let Some(start) = path.iter().position(|p| *p == next) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    break Some(cycle);
                }
                path.push(next);
                current = next;
            };
            let Some(cycle) = cycle else {
                continue;
            };
            let chain: Vec<String> = cycle.iter().map(|s| self.arena.label(*s)).collect();
            let error = BindError::InstantiationCycle { chain };
            let error = if cycle.contains(&id) {
                error
            } else {
                BindError::DependencyFailed {
                    stack: self.arena.label(id),
                    dependency: self.arena.label(path[1]),
                    root_cause: Box::new(error),
                }
            };
            errors.push((id, error));
        }
        for (id, error) in errors {
            warn!(stack = %self.arena.label(id), error = %error, "Stack failed to bind");
            report.diagnostics.push(self.stack_diagnostic(id, error.clone()));
            self.arena.fail(id, error);
        }
    }

    fn failure_diagnostic(&self, id: StackId) -> Diagnostic {
        let error = self
            .arena
            .error(id)
            .cloned()
            .unwrap_or_else(|| BindError::UnknownType {
                ty: self.arena.label(id),
            });
        self.stack_diagnostic(id, error)
    }

    fn stack_diagnostic(&self, id: StackId, error: BindError) -> Diagnostic {
        Diagnostic::new(error, &self.arena.stack(id).node).in_stack(self.arena.label(id))
    }
}

/// Binds `stacks` with `options` and no external lookup.
pub fn bind_stacks(
    stacks: impl IntoIterator<Item = Stack>,
    options: BindOptions,
) -> (StackArena, BindReport) {
    let mut binder = Binder::new(options);
    for stack in stacks {
        binder.add(stack);
    }
    let report = binder.bind();
    (binder.into_arena(), report)
}

/// Every ref a stack mentions that may name another stack.
fn references(stack: &Stack) -> Vec<Ref> {
    let own_schema = |r: &Ref| {
        stack.schemas.public.contains_key(r.as_str()) || stack.schemas.private.contains_key(r.as_str())
    };
    let mut type_refs: Vec<&Ref> = stack.properties.values().map(|p| &p.type_ref).collect();
    for (_, schema) in stack.declared_schemas() {
        if let Some(base) = &schema.base {
            type_refs.push(base);
        }
        type_refs.extend(schema.properties.values().map(|p| &p.type_ref));
    }

    let mut refs: Vec<Ref> = stack.base.iter().cloned().collect();
    for (name, bag, _) in stack.untyped_services() {
        refs.push(target_ref(name, bag));
    }
    for type_ref in type_refs {
        if let Ok(expr) = TypeExpr::parse(type_ref.as_str()) {
            refs.extend(
                expr.named_leaves()
                    .into_iter()
                    .filter(|r| !own_schema(*r))
                    .cloned(),
            );
        }
    }
    refs
}

/// Computes one stack's bind against a read-only arena.
fn compute_binding(
    arena: &StackArena,
    options: &BindOptions,
    id: StackId,
) -> Result<StackBinding, Vec<Diagnostic>> {
    let stack = arena.stack(id);
    let label = stack.label();
    let validator = Validator::new(arena, options);
    let mut diagnostics = Vec::new();
    let mut report = |error: BindError, node: &Node| {
        diagnostics.push(Diagnostic::new(error, node).in_stack(&label));
    };

    if !stack.name.is_valid() {
        report(
            BindError::InvalidName {
                name: stack.name.to_string(),
                container: "stack".to_string(),
            },
            &stack.node,
        );
    }
    for name in stack.schemas.public.keys() {
        if stack.schemas.private.contains_key(name) {
            report(
                BindError::DuplicateSchemaName {
                    name: name.to_string(),
                },
                &stack.node,
            );
        }
    }

    let mut property_types = Vec::new();
    for (name, property) in &stack.properties {
        match validator.check_property(id, name, property) {
            Ok(Type::Stack(target)) => property_types.push((name.clone(), target)),
            Ok(_) => {}
            Err(e) => report(e, &property.node),
        }
    }
    for (name, schema) in stack.declared_schemas() {
        for e in validator.check_schema(id, name, schema) {
            report(e, &schema.node);
        }
    }

    let values = match &stack.property_values {
        Some(bag) => match validator.validate_bag(bag, id, id, &stack.node) {
            Ok(literals) => Some(literals),
            Err(errors) => {
                for e in errors {
                    report(e, &stack.node);
                }
                None
            }
        },
        None => None,
    };

    let (public, private) = match ServiceResolver::new(arena).expand(id, &validator) {
        Ok(maps) => maps,
        Err(errors) => {
            diagnostics.extend(errors);
            Default::default()
        }
    };

    if diagnostics.is_empty() {
        debug!(stack = %label, "Computed binding");
        Ok(StackBinding {
            property_types,
            public,
            private,
            values,
        })
    } else {
        Err(diagnostics)
    }
}

/// Writes a computed binding into the arena and marks the stack bound.
fn apply(arena: &mut StackArena, id: StackId, binding: StackBinding) -> Result<(), BindError> {
    let stack = arena.stack(id);
    let label = stack.label();
    let already = |what: String| BindError::AlreadyBound { what };

    for (name, target) in binding.property_types {
        if let Some(property) = stack.properties.get(&name) {
            property
                .bound_type
                .set(target)
                .map_err(|_| already(format!("type of property `{name}` in `{label}`")))?;
        }
    }
    stack
        .services
        .public
        .set(binding.public)
        .map_err(|_| already(format!("public services of `{label}`")))?;
    stack
        .services
        .private
        .set(binding.private)
        .map_err(|_| already(format!("private services of `{label}`")))?;
    if let Some(values) = binding.values {
        stack
            .bound_property_values
            .set(values)
            .map_err(|_| already(format!("property values of `{label}`")))?;
    }

    arena.transition(id, StackState::Bound)?;
    debug!(stack = %label, "Bound stack");
    Ok(())
}
