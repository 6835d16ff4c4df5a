//! Types and typed literal values.
//!
//! [`TypeExpr`] is the syntactic form of a declared type (`[]string`,
//! `map[string]number`, a schema name, a stack ref); [`Type`] is what it
//! resolves to. A [`Literal`] is a validated value tagged with its resolved
//! type and the node it came from. Literals are only ever produced by the
//! validator, and collection literals refuse heterogeneous contents at
//! construction.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::arena::StackId;
use crate::ast::ServiceRef;
use crate::error::BindError;
use crate::ident::{Name, Ref};
use crate::node::{Locate, Node};

/// A resolved type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Any,
    Bool,
    Number,
    String,
    Array(Box<Type>),
    Map(Box<Type>, Box<Type>),
    /// A custom schema declared by `owner`.
    Schema { owner: StackId, name: Name },
    /// A stack; values of this type are service references.
    Stack(StackId),
}

impl Type {
    /// Maps a primitive type name to its type.
    pub fn primitive(name: &str) -> Option<Self> {
        match name {
            "any" => Some(Self::Any),
            "bool" => Some(Self::Bool),
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            "array" => Some(Self::Array(Box::new(Self::Any))),
            "map" => Some(Self::Map(Box::new(Self::String), Box::new(Self::Any))),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Bool | Self::Number | Self::String)
    }

    /// Whether a value of type `other` may stand where `self` is expected.
    pub fn accepts(&self, other: &Type) -> bool {
        match self {
            Self::Any => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Bool => f.write_str("bool"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Array(elem) => write!(f, "[]{elem}"),
            Self::Map(key, value) => write!(f, "map[{key}]{value}"),
            Self::Schema { name, .. } => write!(f, "{name}"),
            Self::Stack(id) => write!(f, "stack#{}", id.index()),
        }
    }
}

/// The syntactic form of a declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// A primitive, schema or stack name.
    Named(Ref),
    Array(Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
}

impl TypeExpr {
    /// Parses `T`, `[]T` or `map[K]V`; bare `array` and `map` expand to
    /// `[]any` and `map[string]any`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stackdef_core::TypeExpr;
    ///
    /// let expr = TypeExpr::parse("map[string][]number").unwrap();
    /// assert_eq!(expr.to_string(), "map[string][]number");
    /// assert_eq!(TypeExpr::parse("array").unwrap().to_string(), "[]any");
    /// ```
    pub fn parse(s: &str) -> Result<Self, BindError> {
        let s = s.trim();
        let unknown = || BindError::UnknownType { ty: s.to_string() };
        if s.is_empty() {
            return Err(unknown());
        }
        if let Some(elem) = s.strip_prefix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(elem)?)));
        }
        if let Some(rest) = s.strip_prefix("map[") {
            let mut depth = 1usize;
            let mut close = None;
            for (idx, ch) in rest.char_indices() {
                match ch {
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(idx);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let close = close.ok_or_else(unknown)?;
            let key = Self::parse(&rest[..close])?;
            let value = Self::parse(&rest[close + 1..])?;
            return Ok(Self::Map(Box::new(key), Box::new(value)));
        }
        match s {
            "array" => Ok(Self::Array(Box::new(Self::Named(Ref::new("any"))))),
            "map" => Ok(Self::Map(
                Box::new(Self::Named(Ref::new("string"))),
                Box::new(Self::Named(Ref::new("any"))),
            )),
            _ if s.contains('[') || s.contains(']') => Err(unknown()),
            _ => Ok(Self::Named(Ref::new(s))),
        }
    }

    /// Named leaves that are not primitives (schema or stack candidates).
    pub fn named_leaves(&self) -> Vec<&Ref> {
        match self {
            Self::Named(name) if Type::primitive(name.as_str()).is_some() => Vec::new(),
            Self::Named(name) => vec![name],
            Self::Array(elem) => elem.named_leaves(),
            Self::Map(key, value) => {
                let mut leaves = key.named_leaves();
                leaves.extend(value.named_leaves());
                leaves
            }
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Array(elem) => write!(f, "[]{elem}"),
            Self::Map(key, value) => write!(f, "map[{key}]{value}"),
        }
    }
}

/// The payload of a [`Literal`].
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Any(Value),
    Bool(bool),
    Number(f64),
    String(String),
    Service(ServiceRef),
    Array { elem: Type, items: Vec<Literal> },
    Map {
        key: Type,
        value: Type,
        entries: Vec<(Literal, Literal)>,
    },
    /// A schema-typed value too complex to model structurally.
    Complex(Value),
}

/// A validated value, tagged with its type and originating node.
///
/// # Examples
///
/// ```
/// use stackdef_core::{Literal, Node, Type};
///
/// let items = vec![
///     Literal::number(Node::new(), 1.0),
///     Literal::number(Node::new(), 2.0),
/// ];
/// let array = Literal::array(Node::new(), Type::Number, items).unwrap();
/// assert_eq!(array.as_array().map(|a| a.len()), Some(2));
///
/// let mixed = vec![Literal::number(Node::new(), 1.0), Literal::string(Node::new(), "x")];
/// assert!(Literal::array(Node::new(), Type::Number, mixed).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Literal {
    node: Node,
    ty: Type,
    value: LiteralValue,
}

impl Literal {
    pub fn any(node: Node, value: Value) -> Self {
        Self {
            node,
            ty: Type::Any,
            value: LiteralValue::Any(value),
        }
    }

    pub fn bool(node: Node, value: bool) -> Self {
        Self {
            node,
            ty: Type::Bool,
            value: LiteralValue::Bool(value),
        }
    }

    pub fn number(node: Node, value: f64) -> Self {
        Self {
            node,
            ty: Type::Number,
            value: LiteralValue::Number(value),
        }
    }

    pub fn string(node: Node, value: impl Into<String>) -> Self {
        Self {
            node,
            ty: Type::String,
            value: LiteralValue::String(value.into()),
        }
    }

    /// A reference to a service whose stack is `stack`.
    pub fn service(node: Node, stack: StackId, service: ServiceRef) -> Self {
        Self {
            node,
            ty: Type::Stack(stack),
            value: LiteralValue::Service(service),
        }
    }

    pub fn complex(node: Node, ty: Type, value: Value) -> Self {
        Self {
            node,
            ty,
            value: LiteralValue::Complex(value),
        }
    }

    /// Builds an array literal; every item must be of type `elem`.
    pub fn array(node: Node, elem: Type, items: Vec<Literal>) -> Result<Self, BindError> {
        for (index, item) in items.iter().enumerate() {
            if !elem.accepts(&item.ty) {
                return Err(BindError::HeterogeneousCollection {
                    path: format!("[{index}]"),
                    expected: elem.to_string(),
                    found: item.ty.to_string(),
                });
            }
        }
        Ok(Self {
            node,
            ty: Type::Array(Box::new(elem.clone())),
            value: LiteralValue::Array { elem, items },
        })
    }

    /// Builds a map literal; keys and values must match `key` and `value`.
    pub fn map(
        node: Node,
        key: Type,
        value: Type,
        entries: Vec<(Literal, Literal)>,
    ) -> Result<Self, BindError> {
        for (k, v) in &entries {
            let path = format!("[{}]", k.to_value());
            if !key.accepts(&k.ty) {
                return Err(BindError::HeterogeneousCollection {
                    path,
                    expected: key.to_string(),
                    found: k.ty.to_string(),
                });
            }
            if !value.accepts(&v.ty) {
                return Err(BindError::HeterogeneousCollection {
                    path,
                    expected: value.to_string(),
                    found: v.ty.to_string(),
                });
            }
        }
        Ok(Self {
            node,
            ty: Type::Map(Box::new(key.clone()), Box::new(value.clone())),
            value: LiteralValue::Map {
                key,
                value,
                entries,
            },
        })
    }

    /// Retags a literal with a schema type it was validated against.
    pub fn with_type(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn value(&self) -> &LiteralValue {
        &self.value
    }

    pub fn kind(&self) -> &'static str {
        match &self.value {
            LiteralValue::Any(_) => "any",
            LiteralValue::Bool(_) => "bool",
            LiteralValue::Number(_) => "number",
            LiteralValue::String(_) => "string",
            LiteralValue::Service(_) => "service",
            LiteralValue::Array { .. } => "array",
            LiteralValue::Map { .. } => "map",
            LiteralValue::Complex(_) => "complex",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            LiteralValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match &self.value {
            LiteralValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            LiteralValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceRef> {
        match &self.value {
            LiteralValue::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Literal]> {
        match &self.value {
            LiteralValue::Array { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Literal, Literal)]> {
        match &self.value {
            LiteralValue::Map { entries, .. } => Some(entries),
            _ => None,
        }
    }

    /// Converts back to an untyped document value.
    pub fn to_value(&self) -> Value {
        match &self.value {
            LiteralValue::Any(v) | LiteralValue::Complex(v) => v.clone(),
            LiteralValue::Bool(b) => Value::Bool(*b),
            LiteralValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            LiteralValue::String(s) => Value::String(s.clone()),
            LiteralValue::Service(service) => Value::String(match &service.selector {
                Some(selector) => format!("{}:{}", service.name, selector),
                None => service.name.to_string(),
            }),
            LiteralValue::Array { items, .. } => {
                Value::Array(items.iter().map(Literal::to_value).collect())
            }
            LiteralValue::Map { entries, .. } => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k.to_value() {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, v.to_value())
                    })
                    .collect(),
            ),
        }
    }
}

impl Locate for Literal {
    fn node(&self) -> &Node {
        &self.node
    }
}

/// Structural equality: type and value, ignoring source position.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.value == other.value
    }
}

/// Ordering is defined between same-typed scalars and, element-wise, arrays.
impl PartialOrd for Literal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.ty != other.ty {
            return None;
        }
        match (&self.value, &other.value) {
            (LiteralValue::Bool(a), LiteralValue::Bool(b)) => a.partial_cmp(b),
            (LiteralValue::Number(a), LiteralValue::Number(b)) => a.partial_cmp(b),
            (LiteralValue::String(a), LiteralValue::String(b)) => a.partial_cmp(b),
            (LiteralValue::Array { items: a, .. }, LiteralValue::Array { items: b, .. }) => {
                a.partial_cmp(b)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_type_expr_parse_forms() {
        assert_eq!(
            TypeExpr::parse("[]string").unwrap(),
            TypeExpr::Array(Box::new(TypeExpr::Named(Ref::new("string"))))
        );
        let map = TypeExpr::parse("map[string]map[string]number").unwrap();
        assert_eq!(map.to_string(), "map[string]map[string]number");
        assert_eq!(TypeExpr::parse("map").unwrap().to_string(), "map[string]any");
        assert!(TypeExpr::parse("map[string").is_err());
        assert!(TypeExpr::parse("").is_err());
        assert!(TypeExpr::parse("str]ing").is_err());
    }

    #[test]
    fn test_named_leaves_skip_primitives() {
        let expr = TypeExpr::parse("map[string][]acme/db").unwrap();
        let leaves: Vec<&str> = expr.named_leaves().iter().map(|r| r.as_str()).collect();
        assert_eq!(leaves, vec!["acme/db"]);
        assert!(TypeExpr::parse("[]number").unwrap().named_leaves().is_empty());
    }

    #[test]
    fn test_map_rejects_mixed_values() {
        let entries = vec![
            (
                Literal::string(Node::new(), "a"),
                Literal::number(Node::new(), 1.0),
            ),
            (
                Literal::string(Node::new(), "b"),
                Literal::bool(Node::new(), true),
            ),
        ];
        let err = Literal::map(Node::new(), Type::String, Type::Number, entries).unwrap_err();
        assert_eq!(
            err,
            BindError::HeterogeneousCollection {
                path: "[\"b\"]".to_string(),
                expected: "number".to_string(),
                found: "bool".to_string(),
            }
        );
    }

    #[test]
    fn test_any_element_type_accepts_mixed_items() {
        let items = vec![
            Literal::number(Node::new(), 1.0),
            Literal::string(Node::new(), "x"),
        ];
        assert!(Literal::array(Node::new(), Type::Any, items).is_ok());
    }

    #[test]
    fn test_equality_ignores_position() {
        use std::sync::Arc;

        use crate::node::{Document, Location};

        let placed = Node::at(Arc::new(Document::new("a.yaml")), Location::new(1, 1));
        assert_eq!(
            Literal::string(placed, "x"),
            Literal::string(Node::new(), "x")
        );
        assert_ne!(
            Literal::string(Node::new(), "x"),
            Literal::string(Node::new(), "x").with_type(Type::Any)
        );
    }

    #[test]
    fn test_ordering_between_scalars() {
        let one = Literal::number(Node::new(), 1.0);
        let two = Literal::number(Node::new(), 2.0);
        assert!(one < two);
        assert_eq!(one.partial_cmp(&Literal::string(Node::new(), "1")), None);
    }

    #[test]
    fn test_to_value_round_trips_structure() {
        let items = vec![
            Literal::number(Node::new(), 1.5),
            Literal::number(Node::new(), 2.0),
        ];
        let array = Literal::array(Node::new(), Type::Number, items).unwrap();
        assert_eq!(array.to_value(), json!([1.5, 2.0]));
    }
}
