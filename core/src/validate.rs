//! Property and schema validation.
//!
//! Turns raw document values into typed [`Literal`]s, checking them against
//! declared property types and schema constraints, and checks schema and
//! property declarations themselves (names, patterns, bounds, defaults).
//!
//! Types are always resolved in the context of the stack that declared
//! them. Service references inside values are resolved in the context of the
//! stack the value is written in (the `site`).
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use stackdef_core::*;
//!
//! let mut schema = Schema::new("number");
//! schema.minimum = Some(0.0);
//! schema.exclusive_maximum = Some(10.0);
//!
//! let mut arena = StackArena::new();
//! let id = arena.add(
//!     Stack::new("web")
//!         .with_schema("Level", schema, true)
//!         .with_property("level", Property::new("Level")),
//! );
//! resolve_inheritance(&mut arena, &BindOptions::default());
//!
//! let options = BindOptions::default();
//! let validator = Validator::new(&arena, &options);
//! let ok = validator.validate_bag(&[("level".to_string(), json!(9.999))].into(), id, id, &Node::new());
//! assert!(ok.is_ok());
//!
//! let errors = validator
//!     .validate_bag(&[("level".to_string(), json!(10))].into(), id, id, &Node::new())
//!     .unwrap_err();
//! assert!(matches!(errors[0], BindError::RangeViolation { .. }));
//! ```

use regex::Regex;
use serde_json::Value;

use crate::arena::{EffectiveProperty, StackArena, StackId};
use crate::ast::{LiteralBag, Property, PropertyBag, Schema, ServiceRef};
use crate::error::BindError;
use crate::ident::{Name, check_name};
use crate::literal::{Literal, Type};
use crate::node::Node;
use crate::options::{BindOptions, BoundPrecedence};
use crate::services::ServiceResolver;
use crate::types::TypeResolver;

/// Validates values and declarations against a [`StackArena`].
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    arena: &'a StackArena,
    types: TypeResolver<'a>,
    services: ServiceResolver<'a>,
    options: &'a BindOptions,
}

impl<'a> Validator<'a> {
    pub fn new(arena: &'a StackArena, options: &'a BindOptions) -> Self {
        Self {
            arena,
            types: TypeResolver::new(arena),
            services: ServiceResolver::new(arena),
            options,
        }
    }

    pub fn types(&self) -> &TypeResolver<'a> {
        &self.types
    }

    /// Validates a raw property bag against `target`'s effective properties.
    ///
    /// Unknown keys, missing required properties and invalid values are all
    /// reported; nothing stops at the first error.
    pub fn validate_bag(
        &self,
        bag: &PropertyBag,
        target: StackId,
        site: StackId,
        node: &Node,
    ) -> Result<LiteralBag, Vec<BindError>> {
        let label = self.arena.label(target);
        let Some(effective) = self.arena.effective(target) else {
            return Err(vec![BindError::UnknownType { ty: label }]);
        };

        let mut errors = Vec::new();
        for key in bag.keys() {
            if !effective.properties.contains_key(key) {
                errors.push(BindError::UnknownProperty {
                    property: key.clone(),
                    stack: label.clone(),
                });
            }
        }

        let mut literals = LiteralBag::new();
        for (name, property) in &effective.properties {
            match self.validate_property(name, bag.get(name), property, target, site, node) {
                Ok(Some(literal)) => {
                    literals.insert(name.clone(), literal);
                }
                Ok(None) => {}
                Err(e) => errors.extend(e),
            }
        }

        if errors.is_empty() {
            Ok(literals)
        } else {
            Err(errors)
        }
    }

    /// Validates one property value.
    ///
    /// A missing (or `null`) value takes the property's default. Without a
    /// default, an optional property yields `None` and a required one fails
    /// with [`BindError::MissingRequiredProperty`]. Every invalid field of
    /// an object-shaped value is reported.
    pub fn validate_property(
        &self,
        name: &str,
        raw: Option<&Value>,
        property: &EffectiveProperty,
        target: StackId,
        site: StackId,
        node: &Node,
    ) -> Result<Option<Literal>, Vec<BindError>> {
        let declared = &property.property;
        let value = match raw.filter(|v| !v.is_null()).or(declared.default.as_ref()) {
            Some(value) => value,
            None if declared.is_optional() => return Ok(None),
            None => {
                return Err(vec![BindError::MissingRequiredProperty {
                    property: name.to_string(),
                    stack: self.arena.label(target),
                }]);
            }
        };
        let ty = self
            .types
            .resolve(property.owner, &declared.type_ref)
            .map_err(|e| vec![e])?;
        self.validate_all(value, &ty, name, site, node).map(Some)
    }

    /// Like [`Validator::validate_value`], but keeps every error found in
    /// the fields of object-shaped schemas.
    fn validate_all(
        &self,
        value: &Value,
        ty: &Type,
        path: &str,
        site: StackId,
        node: &Node,
    ) -> Result<Literal, Vec<BindError>> {
        match ty {
            Type::Schema { owner, name } => self.validate_schema(value, *owner, name, path, site, node),
            _ => self.validate_value(value, ty, path, site, node).map_err(|e| vec![e]),
        }
    }

    /// Validates `value` against a resolved type, stopping at the first error.
    pub fn validate_value(
        &self,
        value: &Value,
        ty: &Type,
        path: &str,
        site: StackId,
        node: &Node,
    ) -> Result<Literal, BindError> {
        let wrong = || mismatch(path, ty, value);
        match ty {
            Type::Any => Ok(Literal::any(node.clone(), value.clone())),
            Type::Bool => value
                .as_bool()
                .map(|b| Literal::bool(node.clone(), b))
                .ok_or_else(wrong),
            Type::Number => value
                .as_f64()
                .map(|n| Literal::number(node.clone(), n))
                .ok_or_else(wrong),
            Type::String => value
                .as_str()
                .map(|s| Literal::string(node.clone(), s))
                .ok_or_else(wrong),
            Type::Array(elem) => {
                let items = value.as_array().ok_or_else(wrong)?;
                let mut literals = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    let literal = self
                        .validate_value(item, elem, &item_path, site, node)
                        .map_err(|e| heterogeneous(e, &item_path))?;
                    literals.push(literal);
                }
                Literal::array(node.clone(), (**elem).clone(), literals)
                    .map_err(|e| prefixed(e, path))
            }
            Type::Map(key, val) => {
                let object = value.as_object().ok_or_else(wrong)?;
                let mut entries = Vec::with_capacity(object.len());
                for (k, v) in object {
                    let entry_path = format!("{path}.{k}");
                    let key_literal = map_key(k, key, &entry_path, node)?;
                    let value_literal = self
                        .validate_value(v, val, &entry_path, site, node)
                        .map_err(|e| heterogeneous(e, &entry_path))?;
                    entries.push((key_literal, value_literal));
                }
                Literal::map(node.clone(), (**key).clone(), (**val).clone(), entries)
                    .map_err(|e| prefixed(e, path))
            }
            Type::Schema { owner, name } => self
                .validate_schema(value, *owner, name, path, site, node)
                .map_err(|errors| errors.into_iter().next().unwrap_or_else(wrong)),
            Type::Stack(expected) => self.validate_service_ref(value, *expected, path, site, node),
        }
    }

    fn validate_schema(
        &self,
        value: &Value,
        owner: StackId,
        name: &Name,
        path: &str,
        site: StackId,
        node: &Node,
    ) -> Result<Literal, Vec<BindError>> {
        let chain = self.types.schema_chain(owner, name).map_err(|e| vec![e])?;
        let ty = Type::Schema {
            owner,
            name: name.clone(),
        };
        for (_, schema) in &chain.schemas {
            check_enum(value, schema, path).map_err(|e| vec![e])?;
        }

        if let Some((object_owner, object)) = chain.object() {
            let fields = value
                .as_object()
                .ok_or_else(|| vec![mismatch(path, &ty, value)])?;
            let mut errors = Vec::new();
            for key in fields.keys() {
                if !object.properties.contains_key(key) {
                    errors.push(BindError::UnknownProperty {
                        property: format!("{path}.{key}"),
                        stack: name.to_string(),
                    });
                }
            }
            for (field, property) in &object.properties {
                let field_path = format!("{path}.{field}");
                let raw = fields.get(field).filter(|v| !v.is_null());
                match raw.or(property.default.as_ref()) {
                    Some(v) => {
                        let checked = self
                            .types
                            .resolve(object_owner, &property.type_ref)
                            .map_err(|e| vec![e])
                            .and_then(|field_type| self.validate_all(v, &field_type, &field_path, site, node));
                        if let Err(e) = checked {
                            errors.extend(e);
                        }
                    }
                    None if property.is_optional() => {}
                    None => errors.push(BindError::MissingRequiredProperty {
                        property: field_path,
                        stack: name.to_string(),
                    }),
                }
            }
            return if errors.is_empty() {
                Ok(Literal::complex(node.clone(), ty, value.clone()))
            } else {
                Err(errors)
            };
        }

        let literal = self.validate_all(value, &chain.root, path, site, node)?;
        for (_, schema) in &chain.schemas {
            self.check_constraints(&literal, schema, path).map_err(|e| vec![e])?;
        }
        Ok(literal.with_type(ty))
    }

    fn validate_service_ref(
        &self,
        value: &Value,
        expected: StackId,
        path: &str,
        site: StackId,
        node: &Node,
    ) -> Result<Literal, BindError> {
        let text = value.as_str().ok_or_else(|| BindError::TypeMismatch {
            path: path.to_string(),
            expected: format!("a service reference to `{}`", self.arena.label(expected)),
            actual: kind_of(value).to_string(),
        })?;
        let service_ref = ServiceRef::parse(text, node.clone())?;
        let selected = self.services.bind_ref(&service_ref, site)?;
        if !self.arena.derives_from(selected, expected) {
            return Err(BindError::TypeMismatch {
                path: path.to_string(),
                expected: self.arena.label(expected),
                actual: self.arena.label(selected),
            });
        }
        Ok(Literal::service(node.clone(), expected, service_ref))
    }

    /// String and numeric constraints of one schema.
    fn check_constraints(&self, literal: &Literal, schema: &Schema, path: &str) -> Result<(), BindError> {
        if let Some(s) = literal.as_str() {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.min_length {
                if len < min {
                    return Err(range(path, format!("{s:?}"), format!("minLength {min}")));
                }
            }
            if let Some(max) = schema.max_length {
                if len > max {
                    return Err(range(path, format!("{s:?}"), format!("maxLength {max}")));
                }
            }
            if let Some(regex) = schema.regex() {
                if !regex?.is_match(s) {
                    return Err(BindError::PatternMismatch {
                        path: path.to_string(),
                        value: format!("{s:?}"),
                        pattern: schema.pattern.clone().unwrap_or_default(),
                    });
                }
            }
        }
        if let Some(n) = literal.as_number() {
            check_bounds(n, schema, path, self.options.bound_precedence)?;
        }
        Ok(())
    }

    /// Checks a property declaration and resolves its type.
    pub fn check_property(&self, owner: StackId, name: &str, property: &Property) -> Result<Type, BindError> {
        check_name(name, &format!("properties of `{}`", self.arena.label(owner)))?;
        let ty = self.types.resolve(owner, &property.type_ref)?;
        if let Some(default) = property.default.as_ref().filter(|v| !v.is_null()) {
            self.validate_value(default, &ty, name, owner, &property.node)?;
        }
        Ok(ty)
    }

    /// Checks a schema declaration: its name, base chain, pattern, bounds,
    /// enum members and nested properties.
    pub fn check_schema(&self, owner: StackId, name: &Name, schema: &Schema) -> Vec<BindError> {
        let mut errors = Vec::new();
        if let Err(e) = check_name(name.as_str(), &format!("schemas of `{}`", self.arena.label(owner))) {
            errors.push(e);
        }
        let base = self
            .types
            .resolve(owner, &schema.base_ref())
            .and_then(|base| match base {
                Type::Schema { owner, name } => {
                    let chain = self.types.schema_chain(owner, &name)?;
                    let is_object = chain.object().is_some();
                    Ok((chain.root, is_object))
                }
                other => Ok((other, false)),
            });
        let (root, base_is_object) = match base {
            Ok(base) => base,
            Err(e) => {
                errors.push(e);
                return errors;
            }
        };
        let is_object = schema.is_object() || base_is_object;

        let has_string = schema.pattern.is_some() || schema.min_length.is_some() || schema.max_length.is_some();
        if has_string && !matches!(root, Type::String | Type::Any) {
            errors.push(BindError::TypeMismatch {
                path: name.to_string(),
                expected: "string".to_string(),
                actual: root.to_string(),
            });
        }
        if let Some(Err(e)) = schema.regex() {
            errors.push(e);
        }

        let has_numeric = schema.minimum.is_some()
            || schema.maximum.is_some()
            || schema.exclusive_minimum.is_some()
            || schema.exclusive_maximum.is_some();
        if has_numeric && !matches!(root, Type::Number | Type::Any) {
            errors.push(BindError::TypeMismatch {
                path: name.to_string(),
                expected: "number".to_string(),
                actual: root.to_string(),
            });
        }
        let precedence = self.options.bound_precedence;
        for (side, inclusive, exclusive) in [
            ("Minimum", schema.minimum, schema.exclusive_minimum),
            ("Maximum", schema.maximum, schema.exclusive_maximum),
        ] {
            if let Err(e) = side_limits(inclusive, exclusive, precedence, name.as_str(), side) {
                errors.push(e);
            }
        }

        if !is_object && !matches!(root, Type::Stack(_)) {
            for (index, member) in schema.enum_values.iter().enumerate() {
                let path = format!("{name}.enum[{index}]");
                if let Err(e) = self.validate_value(member, &root, &path, owner, &schema.node) {
                    errors.push(e);
                }
            }
        }

        for (prop_name, property) in &schema.properties {
            let path = format!("{name}.{prop_name}");
            if let Err(e) = check_name(prop_name, &format!("schema `{name}`")) {
                errors.push(e);
                continue;
            }
            match self.types.resolve(owner, &property.type_ref) {
                Ok(ty) => {
                    if let Some(default) = property.default.as_ref().filter(|v| !v.is_null()) {
                        if let Err(e) = self.validate_value(default, &ty, &path, owner, &property.node) {
                            errors.push(e);
                        }
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        errors
    }
}

/// Deep equality with numbers compared by value (`1` equals `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Compiles a schema pattern anchored to match the full value.
pub fn compile_pattern(pattern: &str) -> Result<Regex, BindError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| BindError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn check_enum(value: &Value, schema: &Schema, path: &str) -> Result<(), BindError> {
    if schema.enum_values.is_empty() || schema.enum_values.iter().any(|m| values_equal(value, m)) {
        return Ok(());
    }
    Err(BindError::EnumViolation {
        path: path.to_string(),
        value: value.to_string(),
        allowed: schema.enum_values.iter().map(Value::to_string).collect(),
    })
}

/// The inclusive and exclusive limits left in force on one side.
fn side_limits(
    inclusive: Option<f64>,
    exclusive: Option<f64>,
    precedence: BoundPrecedence,
    schema: &str,
    side: &str,
) -> Result<(Option<f64>, Option<f64>), BindError> {
    match (inclusive, exclusive) {
        (Some(i), Some(x)) => match precedence {
            BoundPrecedence::ExclusiveWins => Ok((None, Some(x))),
            BoundPrecedence::InclusiveWins => Ok((Some(i), None)),
            BoundPrecedence::Both => Ok((Some(i), Some(x))),
            BoundPrecedence::Reject => Err(BindError::ConflictingBounds {
                schema: schema.to_string(),
                side: side.to_string(),
            }),
        },
        other => Ok(other),
    }
}

fn check_bounds(n: f64, schema: &Schema, path: &str, precedence: BoundPrecedence) -> Result<(), BindError> {
    let name = schema.name.as_str();
    let (min, exclusive_min) = side_limits(schema.minimum, schema.exclusive_minimum, precedence, name, "Minimum")?;
    let (max, exclusive_max) = side_limits(schema.maximum, schema.exclusive_maximum, precedence, name, "Maximum")?;

    let value = n.to_string();
    if let Some(m) = min {
        if n < m {
            return Err(range(path, value, format!("minimum {m}")));
        }
    }
    if let Some(x) = exclusive_min {
        if n <= x {
            return Err(range(path, value, format!("exclusiveMinimum {x}")));
        }
    }
    if let Some(m) = max {
        if n > m {
            return Err(range(path, value, format!("maximum {m}")));
        }
    }
    if let Some(x) = exclusive_max {
        if n >= x {
            return Err(range(path, value, format!("exclusiveMaximum {x}")));
        }
    }
    Ok(())
}

fn map_key(key: &str, ty: &Type, path: &str, node: &Node) -> Result<Literal, BindError> {
    let wrong_key = |expected: &Type| BindError::HeterogeneousCollection {
        path: path.to_string(),
        expected: expected.to_string(),
        found: "string".to_string(),
    };
    match ty {
        Type::Any | Type::String => Ok(Literal::string(node.clone(), key)),
        Type::Number => key
            .parse::<f64>()
            .map(|n| Literal::number(node.clone(), n))
            .map_err(|_| wrong_key(ty)),
        Type::Bool => key
            .parse::<bool>()
            .map(|b| Literal::bool(node.clone(), b))
            .map_err(|_| wrong_key(ty)),
        other => Err(wrong_key(other)),
    }
}

/// An item of the wrong kind inside a collection.
fn heterogeneous(error: BindError, item_path: &str) -> BindError {
    match error {
        BindError::TypeMismatch {
            path,
            expected,
            actual,
        } if path == item_path => BindError::HeterogeneousCollection {
            path,
            expected,
            found: actual,
        },
        other => other,
    }
}

fn prefixed(error: BindError, prefix: &str) -> BindError {
    match error {
        BindError::HeterogeneousCollection {
            path,
            expected,
            found,
        } => BindError::HeterogeneousCollection {
            path: format!("{prefix}{path}"),
            expected,
            found,
        },
        other => other,
    }
}

fn mismatch(path: &str, expected: &Type, value: &Value) -> BindError {
    BindError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: kind_of(value).to_string(),
    }
}

fn range(path: &str, value: String, constraint: String) -> BindError {
    BindError::RangeViolation {
        path: path.to_string(),
        value,
        constraint,
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
