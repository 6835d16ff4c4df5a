//! Arena storage for stacks and the ref → stack lookup table.
//!
//! Stacks are addressed by [`StackId`]; every cross-stack edge in the bound
//! AST (`bound_base`, `bound_type`, service keys) is an id into this arena.
//! Each entry carries its binding state. Bound fields on the stacks
//! themselves are write-once, and the arena refuses to move an entry out of
//! a terminal state.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use tracing::debug;

use crate::ast::{Property, Service, ServiceKey, Stack, UninstStack};
use crate::error::BindError;
use crate::ident::{AvailableVersions, Name, Ref, RefParts, Version, VersionSpec};

/// Index of a stack inside a [`StackArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId(usize);

impl StackId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Binding state of one stack.
///
/// `Unbound → Resolving → Bound` on success, `→ Error` on failure. `Bound`
/// and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Unbound,
    Resolving,
    Bound,
    Error,
}

impl StackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Bound | Self::Error)
    }
}

/// Result of asking an external source for a stack.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A fully parsed stack.
    Stack(Box<Stack>),
    /// The stack exists in a document that cannot be loaded yet.
    Uninstantiated(UninstStack),
    NotFound,
}

/// External source of stacks, consulted for refs the arena cannot satisfy.
pub trait StackLookup {
    fn lookup(&self, reference: &RefParts) -> Lookup;
}

/// A lookup that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl StackLookup for NoLookup {
    fn lookup(&self, _reference: &RefParts) -> Lookup {
        Lookup::NotFound
    }
}

/// A property as seen by a derived stack, with the stack that declared it.
#[derive(Debug, Clone)]
pub struct EffectiveProperty {
    pub owner: StackId,
    pub property: Property,
}

/// A schema visible in a stack, addressed by its declaring stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSchema {
    pub owner: StackId,
    pub public: bool,
}

/// A service visible in a stack, addressed by its declaring stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveService {
    pub owner: StackId,
    pub public: bool,
}

/// Declarations of a stack after merging its base chain (child wins).
#[derive(Debug, Clone, Default)]
pub struct Effective {
    pub properties: BTreeMap<String, EffectiveProperty>,
    pub schemas: BTreeMap<Name, EffectiveSchema>,
    pub services: BTreeMap<Name, EffectiveService>,
}

#[derive(Debug)]
struct Entry {
    stack: Stack,
    state: StackState,
    effective: OnceLock<Effective>,
    error: Option<BindError>,
}

/// Owner of every stack taking part in a binding run.
#[derive(Debug, Default)]
pub struct StackArena {
    entries: Vec<Entry>,
    by_name: HashMap<Name, Vec<StackId>>,
    uninstantiated: HashMap<Name, UninstStack>,
    pins: BTreeMap<Name, VersionSpec>,
    duplicates: Vec<StackId>,
}

impl StackArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stack, decorating its contextual names.
    ///
    /// A stack with the same name and version as one already registered
    /// (both unversioned included) is kept out of the name index and enters
    /// [`StackState::Error`] with [`BindError::DuplicateStack`].
    pub fn add(&mut self, mut stack: Stack) -> StackId {
        stack.decorate(None);
        let id = StackId(self.entries.len());
        let candidates = self.by_name.entry(stack.name.clone()).or_default();
        let duplicate = candidates
            .iter()
            .any(|c| self.entries[c.0].stack.version.matches_exactly(&stack.version));

        let (state, error) = if duplicate {
            debug!(stack = %stack.label(), id = id.0, "Rejected duplicate stack");
            self.duplicates.push(id);
            let error = BindError::DuplicateStack {
                stack: stack.label(),
            };
            (StackState::Error, Some(error))
        } else {
            debug!(stack = %stack.label(), id = id.0, "Registered stack");
            candidates.push(id);
            (StackState::Unbound, None)
        };
        self.entries.push(Entry {
            stack,
            state,
            effective: OnceLock::new(),
            error,
        });
        id
    }

    /// Duplicates rejected by [`StackArena::add`] since the last call.
    pub(crate) fn take_duplicates(&mut self) -> Vec<StackId> {
        std::mem::take(&mut self.duplicates)
    }

    /// Remembers a placeholder for a stack that cannot be loaded yet.
    pub fn add_uninstantiated(&mut self, placeholder: UninstStack) -> Result<(), BindError> {
        let parts = placeholder.reference.parse()?;
        self.uninstantiated.insert(parts.name, placeholder);
        Ok(())
    }

    /// Uses `spec` when a ref to `name` carries no version of its own.
    pub fn pin(&mut self, name: Name, spec: VersionSpec) {
        self.pins.insert(name, spec);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StackId> + '_ {
        (0..self.entries.len()).map(StackId)
    }

    pub fn get(&self, id: StackId) -> Option<&Stack> {
        self.entries.get(id.0).map(|e| &e.stack)
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this arena.
    pub fn stack(&self, id: StackId) -> &Stack {
        &self.entries[id.0].stack
    }

    pub fn stack_mut(&mut self, id: StackId) -> &mut Stack {
        &mut self.entries[id.0].stack
    }

    pub fn state(&self, id: StackId) -> StackState {
        self.entries[id.0].state
    }

    /// The error that moved `id` into [`StackState::Error`].
    pub fn error(&self, id: StackId) -> Option<&BindError> {
        self.entries[id.0].error.as_ref()
    }

    pub fn effective(&self, id: StackId) -> Option<&Effective> {
        self.entries[id.0].effective.get()
    }

    pub(crate) fn set_effective(&self, id: StackId, effective: Effective) -> Result<(), BindError> {
        self.entries[id.0]
            .effective
            .set(effective)
            .map_err(|_| BindError::AlreadyBound {
                what: format!("effective declarations of `{}`", self.label(id)),
            })
    }

    /// Moves `id` to `to`, refusing to leave a terminal state.
    pub(crate) fn transition(&mut self, id: StackId, to: StackState) -> Result<(), BindError> {
        let label = self.label(id);
        let entry = &mut self.entries[id.0];
        if entry.state.is_terminal() {
            return Err(BindError::AlreadyBound { what: label });
        }
        entry.state = to;
        Ok(())
    }

    /// Moves `id` to [`StackState::Error`], recording the first cause.
    pub(crate) fn fail(&mut self, id: StackId, error: BindError) {
        let entry = &mut self.entries[id.0];
        if entry.state.is_terminal() {
            return;
        }
        entry.state = StackState::Error;
        entry.error = Some(error);
    }

    pub fn label(&self, id: StackId) -> String {
        self.entries
            .get(id.0)
            .map(|e| e.stack.label())
            .unwrap_or_else(|| format!("stack#{}", id.0))
    }

    /// Resolves a ref to a stack in this arena.
    ///
    /// The ref's name selects candidates; its version spec (or a pinned
    /// workspace dependency, or `latest`) selects among their versions.
    /// Protocol and base only matter to external lookups.
    pub fn find(&self, reference: &Ref) -> Result<StackId, BindError> {
        let parts = reference.parse()?;
        self.find_parts(&parts)
    }

    pub fn find_parts(&self, parts: &RefParts) -> Result<StackId, BindError> {
        let Some(candidates) = self.by_name.get(&parts.name) else {
            if self.uninstantiated.contains_key(&parts.name) {
                return Err(BindError::UninstantiatedStack {
                    reference: parts.to_string(),
                });
            }
            return Err(BindError::UnknownType {
                ty: parts.to_string(),
            });
        };

        let spec = parts
            .version
            .clone()
            .or_else(|| self.pins.get(&parts.name).cloned())
            .unwrap_or(VersionSpec::Latest);

        if spec == VersionSpec::Latest && candidates.len() == 1 {
            return Ok(candidates[0]);
        }

        let versions: Vec<Version> = candidates
            .iter()
            .map(|id| self.stack(*id).version.clone())
            .filter(|v| !v.is_empty())
            .collect();
        let picked = spec.resolve(&versions)?;
        candidates
            .iter()
            .copied()
            .find(|id| self.stack(*id).version == picked)
            .ok_or(BindError::UnsatisfiableVersion {
                spec: spec.to_string(),
            })
    }

    /// Looks up an expanded service by key.
    pub fn service(&self, key: &ServiceKey) -> Option<&Service> {
        self.get(key.stack).and_then(|s| s.service(key.name.as_str()))
    }

    /// Whether `id` is `ancestor` or inherits from it through bound bases.
    pub fn derives_from(&self, id: StackId, ancestor: StackId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.entries.len() {
                return false;
            }
            current = self.stack(cur).bound_base.get().copied();
        }
        false
    }
}

impl AvailableVersions for StackArena {
    fn available_versions(&self, name: &Name) -> Vec<Version> {
        self.by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .map(|id| self.stack(*id).version.clone())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_picks_versions() {
        let mut arena = StackArena::new();
        let v1 = arena.add(Stack::new("web").with_version("1.0.0"));
        let v2 = arena.add(Stack::new("web").with_version("1.5.0"));
        let v3 = arena.add(Stack::new("web").with_version("2.0.0"));

        assert_eq!(arena.find(&Ref::new("web")).unwrap(), v3);
        assert_eq!(arena.find(&Ref::new("web@^1")).unwrap(), v2);
        assert_eq!(arena.find(&Ref::new("web@1.0.0")).unwrap(), v1);
        assert!(matches!(
            arena.find(&Ref::new("web@^3")),
            Err(BindError::UnsatisfiableVersion { .. })
        ));
    }

    #[test]
    fn test_pins_apply_to_unversioned_refs() {
        let mut arena = StackArena::new();
        let v1 = arena.add(Stack::new("db").with_version("1.0.0"));
        arena.add(Stack::new("db").with_version("2.0.0"));
        arena.pin(Name::new("db"), VersionSpec::parse("~1.0").unwrap());
        assert_eq!(arena.find(&Ref::new("db")).unwrap(), v1);
    }

    #[test]
    fn test_find_reports_unknown_and_uninstantiated() {
        let mut arena = StackArena::new();
        arena
            .add_uninstantiated(UninstStack::new(Ref::new("hub.example.com/acme/cache"), None))
            .unwrap();
        assert!(matches!(
            arena.find(&Ref::new("acme/cache")),
            Err(BindError::UninstantiatedStack { .. })
        ));
        assert!(matches!(
            arena.find(&Ref::new("nope")),
            Err(BindError::UnknownType { .. })
        ));
        assert!(matches!(
            arena.find(&Ref::new("bad name")),
            Err(BindError::MalformedRef { .. })
        ));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut arena = StackArena::new();
        let id = arena.add(Stack::new("web"));
        arena.transition(id, StackState::Resolving).unwrap();
        arena.transition(id, StackState::Bound).unwrap();
        assert!(matches!(
            arena.transition(id, StackState::Unbound),
            Err(BindError::AlreadyBound { .. })
        ));
        arena.fail(id, BindError::UnknownService { name: "x".into() });
        assert_eq!(arena.state(id), StackState::Bound);
        assert!(arena.error(id).is_none());
    }

    #[test]
    fn test_duplicate_stacks_are_rejected() {
        let mut arena = StackArena::new();
        let first = arena.add(Stack::new("db"));
        let second = arena.add(Stack::new("db"));
        let v1 = arena.add(Stack::new("db").with_version("1.0.0"));
        let again = arena.add(Stack::new("db").with_version("v1.0.0"));

        assert_eq!(arena.state(second), StackState::Error);
        assert_eq!(
            arena.error(second),
            Some(&BindError::DuplicateStack {
                stack: "db".to_string()
            })
        );
        assert_eq!(arena.state(again), StackState::Error);
        assert_eq!(arena.take_duplicates(), vec![second, again]);
        assert!(arena.take_duplicates().is_empty());

        assert_eq!(arena.find(&Ref::new("db@1.0.0")).unwrap(), v1);
        assert_eq!(arena.state(first), StackState::Unbound);
    }

    #[test]
    fn test_available_versions_skip_unversioned() {
        let mut arena = StackArena::new();
        arena.add(Stack::new("web"));
        arena.add(Stack::new("web").with_version("1.0.0"));
        assert_eq!(
            arena.available_versions(&Name::new("web")),
            vec![Version::new("1.0.0")]
        );
    }
}
