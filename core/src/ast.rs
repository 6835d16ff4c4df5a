//! Document-shaped AST for workspaces and stacks.
//!
//! Every type here starts life as a direct deserialization of a source
//! document. Fields marked `#[serde(skip)]` are either decorated right after
//! parsing (contextual names, public flags, documents) or written exactly
//! once by the binder (`bound_*` fields, expanded service maps). The untyped
//! fields stay untouched after parsing; once a stack is bound its typed
//! fields are the source of truth.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arena::StackId;
use crate::error::BindError;
use crate::ident::{Name, Ref, Version, VersionSpec};
use crate::literal::Literal;
use crate::node::{Document, Locate, Node};
use crate::validate::compile_pattern;

/// Raw, untyped property values as they appeared in a document.
pub type PropertyBag = BTreeMap<String, Value>;

/// Property values after validation.
pub type LiteralBag = BTreeMap<String, Literal>;

/// Declared properties keyed by name.
pub type Properties = BTreeMap<String, Property>;

/// Named deployment targets.
pub type Clusters = BTreeMap<String, Cluster>;

/// Dependency refs mapped to the version spec the consumer depends on.
pub type Dependencies = BTreeMap<Ref, Dependency>;

/// Placeholders for every dependency of a workspace.
pub type DependencyRefs = BTreeMap<Ref, UninstStack>;

/// Settings shared by a group of related stacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(skip)]
    pub node: Node,
    /// Optional namespace for the project space.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Predefined target clusters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clusters: Clusters,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: Dependencies,
}

impl Locate for Workspace {
    fn node(&self) -> &Node {
        &self.node
    }
}

/// A predefined cloud runtime target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(skip)]
    pub node: Node,
    /// At most one cluster in a workspace may be the default.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheduler: String,
    /// Options passed to the cloud provider.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: PropertyBag,
    /// Decorated after parsing from the cluster's key.
    #[serde(skip)]
    pub name: String,
}

impl Locate for Cluster {
    fn node(&self) -> &Node {
        &self.node
    }
}

/// The version spec a workspace depends on for one ref.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dependency(String);

impl Dependency {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn spec(&self) -> Result<VersionSpec, BindError> {
        VersionSpec::parse(&self.0)
    }
}

/// A named, versioned unit of resources and the recipe for building them.
///
/// # Examples
///
/// ```
/// use stackdef_core::Stack;
///
/// let stack: Stack = serde_json::from_str(r#"{
///     "name": "web",
///     "base": "server",
///     "properties": { "port": { "type": "number", "default": 80 } },
///     "services": { "public": { "db": { "type": "mysql", "size": 10 } } }
/// }"#).unwrap();
///
/// assert_eq!(stack.name.as_str(), "web");
/// assert!(stack.properties["port"].is_optional());
/// assert!(stack.services.public_untyped.contains_key("db"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stack {
    #[serde(skip)]
    pub node: Node,

    #[serde(default)]
    pub name: Name,
    #[serde(default, skip_serializing_if = "Version::is_empty")]
    pub version: Version,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub website: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,

    /// Optional base stack (single inheritance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Ref>,
    #[serde(skip)]
    pub bound_base: OnceLock<StackId>,
    /// Abstract stacks may only be used as a base.
    #[serde(rename = "abstract", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_abstract: bool,
    /// Intrinsic stacks are built in and never have a base.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub intrinsic: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    /// Values used to construct this stack, when it is instantiated directly.
    #[serde(skip)]
    pub property_values: Option<PropertyBag>,
    #[serde(skip)]
    pub bound_property_values: OnceLock<LiteralBag>,
    #[serde(rename = "schema", default, skip_serializing_if = "Schemas::is_empty")]
    pub schemas: Schemas,
    #[serde(default, skip_serializing_if = "Services::is_empty")]
    pub services: Services,
}

impl Stack {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Version::new(version);
        self
    }

    pub fn with_base(mut self, base: &str) -> Self {
        self.base = Some(Ref::new(base));
        self
    }

    pub fn abstract_stack(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn with_property(mut self, name: &str, property: Property) -> Self {
        self.properties.insert(name.to_string(), property);
        self
    }

    pub fn with_schema(mut self, name: &str, schema: Schema, public: bool) -> Self {
        let map = if public {
            &mut self.schemas.public
        } else {
            &mut self.schemas.private
        };
        map.insert(Name::new(name), schema);
        self
    }

    /// Adds an untyped service entry, exactly as a document would.
    pub fn with_service(mut self, name: &str, bag: PropertyBag, public: bool) -> Self {
        let map = if public {
            &mut self.services.public_untyped
        } else {
            &mut self.services.private_untyped
        };
        map.insert(Name::new(name), bag);
        self
    }

    pub fn with_property_values(mut self, values: PropertyBag) -> Self {
        self.property_values = Some(values);
        self
    }

    /// Fills in contextual names, public flags and documents after parsing.
    ///
    /// Nodes without their own document inherit the stack's.
    pub fn decorate(&mut self, doc: Option<Arc<Document>>) {
        if let Some(doc) = doc {
            self.node.set_doc(doc);
        }
        for (name, property) in &mut self.properties {
            property.decorate(name, &self.node);
        }
        for (public, map) in [
            (true, &mut self.schemas.public),
            (false, &mut self.schemas.private),
        ] {
            for (name, schema) in map.iter_mut() {
                schema.name = name.clone();
                schema.public = public;
                schema.node.inherit_doc(&self.node);
                for (prop_name, property) in &mut schema.properties {
                    property.decorate(prop_name, &schema.node);
                }
            }
        }
    }

    /// Untyped service entries, public ones first.
    pub fn untyped_services(&self) -> impl Iterator<Item = (&Name, &PropertyBag, bool)> {
        self.services
            .public_untyped
            .iter()
            .map(|(name, bag)| (name, bag, true))
            .chain(
                self.services
                    .private_untyped
                    .iter()
                    .map(|(name, bag)| (name, bag, false)),
            )
    }

    /// Declared schemas, public ones first.
    pub fn declared_schemas(&self) -> impl Iterator<Item = (&Name, &Schema)> {
        self.schemas
            .public
            .iter()
            .chain(self.schemas.private.iter())
    }

    /// Looks up an expanded service; `None` before the stack is bound.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services
            .public
            .get()
            .and_then(|map| map.get(name))
            .or_else(|| self.services.private.get().and_then(|map| map.get(name)))
    }

    /// Display label, `name@version` when a version is set.
    pub fn label(&self) -> String {
        if self.version.is_empty() {
            self.name.to_string()
        } else {
            format!("{}@{}", self.name, self.version)
        }
    }
}

impl Locate for Stack {
    fn node(&self) -> &Node {
        &self.node
    }
}

/// A stack from a document that has not been loaded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstStack {
    pub node: Node,
    pub reference: Ref,
}

impl UninstStack {
    pub fn new(reference: Ref, doc: Option<Arc<Document>>) -> Self {
        Self {
            node: doc.map(Node::in_doc).unwrap_or_default(),
            reference,
        }
    }
}

impl Locate for UninstStack {
    fn node(&self) -> &Node {
        &self.node
    }
}

/// One named input to a stack.
///
/// # Examples
///
/// ```
/// use stackdef_core::Property;
///
/// let required = Property::new("string");
/// assert!(!required.is_optional());
///
/// let defaulted = Property::new("number").with_default(serde_json::json!(8080));
/// assert!(defaulted.is_optional());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Property {
    #[serde(skip)]
    pub node: Node,
    /// Type of the property: a primitive, collection, schema or stack.
    #[serde(rename = "type", default)]
    pub type_ref: Ref,
    /// Set when the type resolves to a stack.
    #[serde(skip)]
    pub bound_type: OnceLock<StackId>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
    /// Changing the value after creation is a disruptive change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perturbs: Option<bool>,
    /// Decorated after parsing from the property's key.
    #[serde(skip)]
    pub name: String,
}

impl Property {
    pub fn new(type_ref: &str) -> Self {
        Self {
            type_ref: Ref::new(type_ref),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = Some(readonly);
        self
    }

    pub fn perturbs(mut self, perturbs: bool) -> Self {
        self.perturbs = Some(perturbs);
        self
    }

    /// A default value makes a property optional.
    pub fn is_optional(&self) -> bool {
        self.optional || self.default.is_some()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.unwrap_or(false)
    }

    pub fn is_perturbing(&self) -> bool {
        self.perturbs.unwrap_or(false)
    }

    fn decorate(&mut self, name: &str, parent: &Node) {
        self.name = name.to_string();
        self.node.inherit_doc(parent);
    }
}

impl Locate for Property {
    fn node(&self) -> &Node {
        &self.node
    }
}

pub type SchemaMap = BTreeMap<Name, Schema>;

/// Public and private custom types of a stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schemas {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub public: SchemaMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub private: SchemaMap,
}

impl Schemas {
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.private.is_empty()
    }
}

/// A reusable named type with validation constraints.
///
/// String constraints apply only to string-based schemas and numeric ones
/// only to number-based schemas; `enum` applies to every type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(skip)]
    pub node: Node,
    /// The type this schema derives from; `any` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Ref>,
    /// Properties of an object-shaped schema.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,

    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "exclusiveMaximum", default, skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(rename = "exclusiveMinimum", default, skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,

    /// Decorated after parsing from the schema's key.
    #[serde(skip)]
    pub name: Name,
    /// Decorated after parsing from the section the schema was declared in.
    #[serde(skip)]
    pub public: bool,
    #[serde(skip)]
    compiled: OnceLock<Result<Regex, BindError>>,
}

impl Schema {
    pub fn new(base: &str) -> Self {
        Self {
            base: Some(Ref::new(base)),
            ..Default::default()
        }
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = values;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self.compiled = OnceLock::new();
        self
    }

    /// The compiled `pattern`, built on first use and reused afterwards.
    pub fn regex(&self) -> Option<Result<&Regex, BindError>> {
        let pattern = self.pattern.as_deref()?;
        let compiled = self.compiled.get_or_init(|| compile_pattern(pattern));
        Some(compiled.as_ref().map_err(Clone::clone))
    }

    pub fn with_length(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_property(mut self, name: &str, property: Property) -> Self {
        self.properties.insert(name.to_string(), property);
        self
    }

    /// Base type ref, defaulting to `any`.
    pub fn base_ref(&self) -> Ref {
        self.base.clone().unwrap_or_else(|| Ref::new("any"))
    }

    /// Object-shaped schemas declare their own properties.
    pub fn is_object(&self) -> bool {
        !self.properties.is_empty()
    }
}

impl Locate for Schema {
    fn node(&self) -> &Node {
        &self.node
    }
}

pub type ServiceMap = BTreeMap<Name, Service>;

/// Raw service entries, one property bag per service name.
pub type UntypedServiceMap = BTreeMap<Name, PropertyBag>;

/// Public and private services of a stack.
///
/// Services are per-type extensible, so a document only yields untyped bags;
/// the binder expands them into [`Service`] values once target stacks are
/// known.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Services {
    #[serde(skip)]
    pub public: OnceLock<ServiceMap>,
    #[serde(skip)]
    pub private: OnceLock<ServiceMap>,
    #[serde(rename = "public", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub public_untyped: UntypedServiceMap,
    #[serde(rename = "private", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub private_untyped: UntypedServiceMap,
}

impl Services {
    pub fn is_empty(&self) -> bool {
        self.public_untyped.is_empty() && self.private_untyped.is_empty()
    }

    pub fn is_expanded(&self) -> bool {
        self.public.get().is_some() && self.private.get().is_some()
    }
}

/// A directive instantiating another stack inside a stack.
#[derive(Debug, Clone, Default)]
pub struct Service {
    pub node: Node,
    /// Explicit type; the service name is used when absent.
    pub type_ref: Option<Ref>,
    pub bound_type: OnceLock<StackId>,
    /// Custom properties (every key of the untyped entry except `type`).
    pub properties: PropertyBag,
    pub bound_properties: OnceLock<LiteralBag>,
    pub name: Name,
    pub public: bool,
}

impl Service {
    /// Expands an untyped entry, splitting off its `type` key.
    ///
    /// `type` is never a property; a non-string value is dropped here and
    /// reported by the binder.
    pub fn from_untyped(name: &Name, bag: &PropertyBag, public: bool, node: Node) -> Self {
        let mut properties = bag.clone();
        let type_ref = match properties.remove("type") {
            Some(Value::String(ty)) => Some(Ref::new(ty)),
            _ => None,
        };
        Self {
            node,
            type_ref,
            properties,
            name: name.clone(),
            public,
            ..Default::default()
        }
    }

    /// The ref this service instantiates.
    pub fn target(&self) -> Ref {
        self.type_ref
            .clone()
            .unwrap_or_else(|| Ref::from(&self.name))
    }
}

impl Locate for Service {
    fn node(&self) -> &Node {
        &self.node
    }
}

/// Arena address of a service: its declaring stack and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub stack: StackId,
    pub name: Name,
}

/// A reference to a service, written `service[:selector]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRef {
    pub node: Node,
    pub name: Name,
    /// Picks one public service of the referenced service's stack.
    pub selector: Option<Name>,
    /// The service named by `name`, once resolved.
    pub service: OnceLock<ServiceKey>,
    /// The service the reference ultimately designates, once resolved.
    pub selected: OnceLock<ServiceKey>,
}

impl ServiceRef {
    pub fn new(name: &str, selector: Option<&str>) -> Self {
        Self {
            name: Name::new(name),
            selector: selector.map(Name::new),
            ..Default::default()
        }
    }

    pub fn parse(s: &str, node: Node) -> Result<Self, BindError> {
        let (name, selector) = match s.split_once(':') {
            Some((name, selector)) => (name, Some(selector)),
            None => (s, None),
        };
        crate::ident::check_name(name, "service reference")?;
        if let Some(selector) = selector {
            crate::ident::check_name(selector, "service selector")?;
        }
        Ok(Self {
            node,
            ..Self::new(name, selector)
        })
    }
}

impl Locate for ServiceRef {
    fn node(&self) -> &Node {
        &self.node
    }
}
