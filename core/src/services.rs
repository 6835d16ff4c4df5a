//! Service graph resolution.
//!
//! Expands a stack's untyped service entries into typed [`Service`]s bound to
//! their target stacks, and resolves [`ServiceRef`]s against the services
//! visible in a stack. Visibility is decided by the stack that declared the
//! service: a private service only resolves for references written inside
//! that same stack.

use serde_json::Value;

use crate::arena::{StackArena, StackId};
use crate::ast::{PropertyBag, Service, ServiceKey, ServiceMap, ServiceRef};
use crate::error::{BindError, Diagnostic};
use crate::ident::{Name, Ref, check_name};
use crate::node::Node;
use crate::validate::{Validator, kind_of};

/// The ref a service entry instantiates: its `type`, or its own name.
pub fn target_ref(name: &Name, bag: &PropertyBag) -> Ref {
    match bag.get("type") {
        Some(Value::String(ty)) => Ref::new(ty.as_str()),
        _ => Ref::from(name),
    }
}

/// Looks up services and service references in a [`StackArena`].
#[derive(Debug, Clone, Copy)]
pub struct ServiceResolver<'a> {
    arena: &'a StackArena,
}

impl<'a> ServiceResolver<'a> {
    pub fn new(arena: &'a StackArena) -> Self {
        Self { arena }
    }

    /// Finds the service `name` visible in stack `owner`, as referenced from
    /// stack `from`.
    ///
    /// Own services are found first, then inherited ones. A private service
    /// is only visible when `from` is the stack that declared it.
    ///
    /// # Examples
    ///
    /// ```
    /// use stackdef_core::*;
    ///
    /// let mut arena = StackArena::new();
    /// let db = arena.add(Stack::new("db").with_service("admin", PropertyBag::new(), false));
    /// let app = arena.add(Stack::new("app"));
    /// resolve_inheritance(&mut arena, &BindOptions::default());
    ///
    /// let services = ServiceResolver::new(&arena);
    /// assert!(services.resolve_in(db, db, "admin").is_ok());
    /// assert!(matches!(
    ///     services.resolve_in(db, app, "admin"),
    ///     Err(BindError::PrivateServiceAccess { .. })
    /// ));
    /// ```
    pub fn resolve_in(&self, owner: StackId, from: StackId, name: &str) -> Result<ServiceKey, BindError> {
        let (declared_by, public) = self
            .find(owner, name)
            .ok_or_else(|| BindError::UnknownService {
                name: name.to_string(),
            })?;
        if !public && from != declared_by {
            return Err(BindError::PrivateServiceAccess {
                service: name.to_string(),
                stack: self.arena.label(declared_by),
            });
        }
        Ok(ServiceKey {
            stack: declared_by,
            name: Name::new(name),
        })
    }

    fn find(&self, owner: StackId, name: &str) -> Option<(StackId, bool)> {
        let stack = self.arena.get(owner)?;
        if stack.services.public_untyped.contains_key(name) {
            return Some((owner, true));
        }
        if stack.services.private_untyped.contains_key(name) {
            return Some((owner, false));
        }
        self.arena
            .effective(owner)?
            .services
            .get(name)
            .map(|entry| (entry.owner, entry.public))
    }

    /// The stack a service instantiates.
    ///
    /// Uses the bound type once the declaring stack is bound, and resolves
    /// the untyped entry's ref otherwise.
    pub fn target(&self, key: &ServiceKey) -> Result<StackId, BindError> {
        if let Some(bound) = self.arena.service(key).and_then(|s| s.bound_type.get()) {
            return Ok(*bound);
        }
        let stack = self.arena.stack(key.stack);
        let bag = stack
            .services
            .public_untyped
            .get(key.name.as_str())
            .or_else(|| stack.services.private_untyped.get(key.name.as_str()))
            .ok_or_else(|| BindError::UnknownService {
                name: key.name.to_string(),
            })?;
        self.arena.find(&target_ref(&key.name, bag))
    }

    /// Resolves a reference written in stack `site`, recording the service
    /// it names and the service it selects.
    ///
    /// Returns the stack instantiated by the selected service.
    pub fn bind_ref(&self, service_ref: &ServiceRef, site: StackId) -> Result<StackId, BindError> {
        let key = self.resolve_in(site, site, service_ref.name.as_str())?;
        let target = self.target(&key)?;
        let (selected, selected_type) = match &service_ref.selector {
            Some(selector) => {
                let selected = self.resolve_in(target, site, selector.as_str())?;
                let selected_type = self.target(&selected)?;
                (selected, selected_type)
            }
            None => (key.clone(), target),
        };
        let already = || BindError::AlreadyBound {
            what: format!("service reference `{}`", service_ref.name),
        };
        service_ref.service.set(key).map_err(|_| already())?;
        service_ref.selected.set(selected).map_err(|_| already())?;
        Ok(selected_type)
    }

    /// Expands every untyped service of stack `id` into bound services,
    /// split into public and private maps.
    pub fn expand(
        &self,
        id: StackId,
        validator: &Validator<'_>,
    ) -> Result<(ServiceMap, ServiceMap), Vec<Diagnostic>> {
        let stack = self.arena.stack(id);
        let label = stack.label();
        let mut diagnostics = Vec::new();
        let mut public = ServiceMap::new();
        let mut private = ServiceMap::new();

        for name in stack.services.public_untyped.keys() {
            if stack.services.private_untyped.contains_key(name) {
                diagnostics.push(
                    Diagnostic::new(
                        BindError::DuplicateServiceName {
                            name: name.to_string(),
                        },
                        &stack.node,
                    )
                    .in_stack(&label),
                );
            }
        }

        for (name, bag, is_public) in stack.untyped_services() {
            if !is_public && stack.services.public_untyped.contains_key(name) {
                continue;
            }
            let mut node = Node::new();
            node.inherit_doc(&stack.node);
            if let Err(e) = check_name(name.as_str(), &format!("services of `{label}`")) {
                diagnostics.push(Diagnostic::new(e, &node).in_stack(&label));
                continue;
            }
            if let Some(ty) = bag.get("type").filter(|v| !v.is_string() && !v.is_null()) {
                let error = BindError::TypeMismatch {
                    path: format!("{name}.type"),
                    expected: "a stack reference".to_string(),
                    actual: kind_of(ty).to_string(),
                };
                diagnostics.push(Diagnostic::new(error, &node).in_stack(&label));
                continue;
            }
            let service = Service::from_untyped(name, bag, is_public, node);
            match self.instantiate(&service, id, validator) {
                Ok(()) => {
                    if is_public {
                        public.insert(name.clone(), service);
                    } else {
                        private.insert(name.clone(), service);
                    }
                }
                Err(errors) => diagnostics.extend(
                    errors
                        .into_iter()
                        .map(|e| Diagnostic::new(e, &service.node).in_stack(&label)),
                ),
            }
        }

        if diagnostics.is_empty() {
            Ok((public, private))
        } else {
            Err(diagnostics)
        }
    }

    /// Binds one service's target stack and properties.
    fn instantiate(
        &self,
        service: &Service,
        site: StackId,
        validator: &Validator<'_>,
    ) -> Result<(), Vec<BindError>> {
        let target = self.arena.find(&service.target()).map_err(|e| vec![e])?;
        let target_stack = self.arena.stack(target);
        if target_stack.is_abstract {
            return Err(vec![BindError::AbstractInstantiation {
                service: service.name.to_string(),
                stack: target_stack.label(),
            }]);
        }
        let properties = validator.validate_bag(&service.properties, target, site, &service.node)?;
        let already = |what: &str| {
            vec![BindError::AlreadyBound {
                what: format!("{what} of service `{}`", service.name),
            }]
        };
        service.bound_type.set(target).map_err(|_| already("type"))?;
        service
            .bound_properties
            .set(properties)
            .map_err(|_| already("properties"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ast::{Property, Stack};
    use crate::inherit::resolve_inheritance;
    use crate::options::BindOptions;

    fn bag(entries: &[(&str, Value)]) -> PropertyBag {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_target_defaults_to_service_name() {
        assert_eq!(target_ref(&Name::new("mysql"), &PropertyBag::new()), Ref::new("mysql"));
        assert_eq!(
            target_ref(&Name::new("db"), &bag(&[("type", json!("mysql"))])),
            Ref::new("mysql")
        );
    }

    #[test]
    fn test_expand_binds_targets_and_properties() {
        let mut arena = StackArena::new();
        let mysql = arena.add(
            Stack::new("mysql").with_property("size", Property::new("number")),
        );
        let app = arena.add(
            Stack::new("app")
                .with_service("db", bag(&[("type", json!("mysql")), ("size", json!(10))]), true)
                .with_service("mysql", bag(&[("size", json!(2))]), false),
        );
        resolve_inheritance(&mut arena, &BindOptions::default());

        let options = BindOptions::default();
        let validator = Validator::new(&arena, &options);
        let (public, private) = ServiceResolver::new(&arena).expand(app, &validator).unwrap();

        let db = &public[&Name::new("db")];
        assert_eq!(db.bound_type.get(), Some(&mysql));
        let size = &db.bound_properties.get().unwrap()["size"];
        assert_eq!(size.as_number(), Some(10.0));
        assert_eq!(private[&Name::new("mysql")].bound_type.get(), Some(&mysql));
    }

    #[test]
    fn test_expand_reports_every_problem() {
        let mut arena = StackArena::new();
        arena.add(Stack::new("base").abstract_stack());
        arena.add(Stack::new("mysql").with_property("size", Property::new("number")));
        let app = arena.add(
            Stack::new("app")
                .with_service("base", PropertyBag::new(), true)
                .with_service("db", bag(&[("type", json!("mysql")), ("color", json!("red"))]), true)
                .with_service("dup", bag(&[("type", json!("mysql")), ("size", json!(1))]), true)
                .with_service("dup", bag(&[("type", json!("mysql")), ("size", json!(1))]), false),
        );
        resolve_inheritance(&mut arena, &BindOptions::default());

        let options = BindOptions::default();
        let validator = Validator::new(&arena, &options);
        let diagnostics = ServiceResolver::new(&arena).expand(app, &validator).unwrap_err();
        let errors: Vec<&BindError> = diagnostics.iter().map(|d| &d.error).collect();

        assert!(errors.iter().any(|e| matches!(e, BindError::DuplicateServiceName { name } if name == "dup")));
        assert!(errors.iter().any(|e| matches!(e, BindError::AbstractInstantiation { stack, .. } if stack == "base")));
        assert!(errors.iter().any(|e| matches!(e, BindError::UnknownProperty { property, .. } if property == "color")));
        assert!(errors.iter().any(|e| matches!(e, BindError::MissingRequiredProperty { property, .. } if property == "size")));
    }

    #[test]
    fn test_non_string_service_type_is_rejected() {
        let mut arena = StackArena::new();
        arena.add(Stack::new("db").with_property("type", Property::new("number")));
        let web = arena.add(Stack::new("web").with_service("db", bag(&[("type", json!(5))]), true));
        resolve_inheritance(&mut arena, &BindOptions::default());

        let options = BindOptions::default();
        let validator = Validator::new(&arena, &options);
        let diagnostics = ServiceResolver::new(&arena).expand(web, &validator).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].error,
            BindError::TypeMismatch {
                path: "db.type".to_string(),
                expected: "a stack reference".to_string(),
                actual: "number".to_string(),
            }
        );
    }

    #[test]
    fn test_selector_picks_public_service_of_target() {
        let mut arena = StackArena::new();
        let endpoint = arena.add(Stack::new("endpoint"));
        arena.add(
            Stack::new("mysql")
                .with_service("primary", bag(&[("type", json!("endpoint"))]), true)
                .with_service("admin", bag(&[("type", json!("endpoint"))]), false),
        );
        let app = arena.add(Stack::new("app").with_service("db", bag(&[("type", json!("mysql"))]), true));
        resolve_inheritance(&mut arena, &BindOptions::default());
        let services = ServiceResolver::new(&arena);

        let primary = ServiceRef::new("db", Some("primary"));
        assert_eq!(services.bind_ref(&primary, app).unwrap(), endpoint);
        assert_eq!(primary.selected.get().map(|k| k.name.as_str()), Some("primary"));
        assert_eq!(primary.service.get().map(|k| k.stack), Some(app));

        let admin = ServiceRef::new("db", Some("admin"));
        assert!(matches!(
            services.bind_ref(&admin, app),
            Err(BindError::PrivateServiceAccess { .. })
        ));
        assert!(matches!(
            services.bind_ref(&ServiceRef::new("cache", None), app),
            Err(BindError::UnknownService { .. })
        ));
    }

    #[test]
    fn test_inherited_private_service_is_outside_access() {
        let mut arena = StackArena::new();
        arena.add(Stack::new("cache"));
        let base = arena.add(
            Stack::new("base")
                .abstract_stack()
                .with_service("cache", PropertyBag::new(), false),
        );
        let child = arena.add(Stack::new("child").with_base("base"));
        resolve_inheritance(&mut arena, &BindOptions::default());
        let services = ServiceResolver::new(&arena);

        assert!(services.resolve_in(base, base, "cache").is_ok());
        assert!(matches!(
            services.resolve_in(child, child, "cache"),
            Err(BindError::PrivateServiceAccess { .. })
        ));
    }
}
