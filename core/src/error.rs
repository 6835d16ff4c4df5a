//! Binding errors and diagnostics.
//!
//! Binding never stops at the first problem: every failure becomes a
//! [`Diagnostic`] that pairs a [`BindError`] with the node it came from, and
//! the binder returns all of them at once.

use std::fmt;

use thiserror::Error;

use crate::node::{Document, Location, Node};

/// Errors produced while resolving, validating and binding stacks.
///
/// Each variant describes one specific problem. The `Display` impl provides a
/// human-readable message; rendering with source context is left to callers
/// via [`Diagnostic::where_`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// A ref does not follow `[protocol://][base/]name[@version]`.
    #[error("malformed ref `{reference}`: {reason}")]
    MalformedRef { reference: String, reason: String },
    /// A declared name is not a valid identifier.
    #[error("invalid name `{name}` in {container}")]
    InvalidName { name: String, container: String },
    /// A version spec is neither `latest`, an exact version, nor a range.
    #[error("malformed version spec `{spec}`")]
    MalformedVersion { spec: String },
    /// No available version satisfies a version spec.
    #[error("no satisfying version for `{spec}`")]
    UnsatisfiableVersion { spec: String },
    /// A chain of bases (or schema bases) loops back on itself.
    #[error("inheritance cycle: {}", .chain.join(" -> "))]
    InheritanceCycle { chain: Vec<String> },
    /// Stacks instantiate each other through their services.
    #[error("instantiation cycle: {}", .chain.join(" -> "))]
    InstantiationCycle { chain: Vec<String> },
    /// A service targets an abstract stack.
    #[error("service `{service}` cannot instantiate abstract stack `{stack}`")]
    AbstractInstantiation { service: String, stack: String },
    /// A type or base ref names nothing known.
    #[error("unknown type `{ty}`")]
    UnknownType { ty: String },
    /// A ref names a stack from a document that has not been loaded.
    #[error("stack `{reference}` has not been instantiated")]
    UninstantiatedStack { reference: String },
    /// A property bag carries a key the target stack does not declare.
    #[error("unknown property `{property}` for stack `{stack}`")]
    UnknownProperty { property: String, stack: String },
    /// A required property has no value and no default.
    #[error("missing required property `{property}` for `{stack}`")]
    MissingRequiredProperty { property: String, stack: String },
    /// A value has the wrong shape for its declared type.
    #[error("type mismatch at `{path}`: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    /// A value is not one of the declared enum members.
    #[error("value {value} at `{path}` is not one of [{}]", .allowed.join(", "))]
    EnumViolation {
        path: String,
        value: String,
        allowed: Vec<String>,
    },
    /// A string length or numeric bound is violated.
    #[error("value {value} at `{path}` is out of range: {constraint}")]
    RangeViolation {
        path: String,
        value: String,
        constraint: String,
    },
    /// A string does not fully match the schema pattern.
    #[error("value {value} at `{path}` does not match pattern `{pattern}`")]
    PatternMismatch {
        path: String,
        value: String,
        pattern: String,
    },
    /// A schema pattern is not a valid regular expression.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    /// A schema sets an inclusive and an exclusive bound on the same side.
    #[error("schema `{schema}` sets both {side} and exclusive{side}")]
    ConflictingBounds { schema: String, side: String },
    /// An array or map mixes element, key or value types.
    #[error("heterogeneous collection at `{path}`: expected {expected}, found {found}")]
    HeterogeneousCollection {
        path: String,
        expected: String,
        found: String,
    },
    /// A service reference names no known service.
    #[error("unknown service `{name}`")]
    UnknownService { name: String },
    /// A private service is referenced from outside its stack.
    #[error("service `{service}` is private to stack `{stack}`")]
    PrivateServiceAccess { service: String, stack: String },
    /// The same service name appears in both public and private sections.
    #[error("duplicate service name `{name}`")]
    DuplicateServiceName { name: String },
    /// The same schema name appears in both public and private sections.
    #[error("duplicate schema name `{name}`")]
    DuplicateSchemaName { name: String },
    /// A second stack reuses the name and version of a registered one.
    #[error("duplicate stack `{stack}`")]
    DuplicateStack { stack: String },
    /// More than one cluster is marked as the default.
    #[error("multiple default clusters: {}", .clusters.join(", "))]
    MultipleDefaultClusters { clusters: Vec<String> },
    /// A write-once bound field was written twice.
    #[error("{what} is already bound")]
    AlreadyBound { what: String },
    /// A stack could not bind because something it depends on failed.
    #[error("dependency `{dependency}` of `{stack}` failed: {root_cause}")]
    DependencyFailed {
        stack: String,
        dependency: String,
        root_cause: Box<BindError>,
    },
}

impl BindError {
    /// Innermost cause, looking through [`BindError::DependencyFailed`].
    pub fn root_cause(&self) -> &BindError {
        match self {
            Self::DependencyFailed { root_cause, .. } => root_cause.root_cause(),
            other => other,
        }
    }
}

/// A [`BindError`] attributed to the node it was raised for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub error: BindError,
    /// Name of the stack being bound when the error was raised.
    pub stack: Option<String>,
    pub node: Node,
}

impl Diagnostic {
    pub fn new(error: BindError, node: &Node) -> Self {
        Self {
            error,
            stack: None,
            node: node.clone(),
        }
    }

    pub fn in_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Originating document and location, for diagnostic rendering.
    pub fn where_(&self) -> (Option<&Document>, Option<Location>) {
        self.node.where_()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(doc) = self.node.doc() {
            write!(f, "{}", doc.uri)?;
            if let Some(loc) = self.node.loc() {
                write!(f, ":{}:{}", loc.line, loc.column)?;
            }
            write!(f, ": ")?;
        }
        if let Some(stack) = &self.stack {
            write!(f, "[{stack}] ")?;
        }
        write!(f, "{}", self.error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_root_cause_looks_through_dependency_failures() {
        let cause = BindError::UnknownType {
            ty: "nope".to_string(),
        };
        let err = BindError::DependencyFailed {
            stack: "app".to_string(),
            dependency: "web".to_string(),
            root_cause: Box::new(BindError::DependencyFailed {
                stack: "web".to_string(),
                dependency: "base".to_string(),
                root_cause: Box::new(cause.clone()),
            }),
        };
        assert_eq!(err.root_cause(), &cause);
    }

    #[test]
    fn test_diagnostic_display_includes_location() {
        let doc = Arc::new(Document::new("stacks/web.yaml"));
        let node = Node::at(doc, Location::new(3, 5));
        let diag = Diagnostic::new(
            BindError::UnknownService {
                name: "db".to_string(),
            },
            &node,
        )
        .in_stack("web");
        assert_eq!(
            diag.to_string(),
            "stacks/web.yaml:3:5: [web] unknown service `db`"
        );
    }

    #[test]
    fn test_cycle_message_names_chain() {
        let err = BindError::InheritanceCycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "inheritance cycle: a -> b -> a");
    }
}
