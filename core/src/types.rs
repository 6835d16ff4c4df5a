//! Resolution of declared type refs to [`Type`]s.
//!
//! A type ref is resolved in the context of the stack that declared it:
//! primitives first, then schemas visible in that stack (its own schemas of
//! either visibility, then public schemas it inherits), then stacks in the
//! arena.

use crate::arena::{StackArena, StackId};
use crate::ast::Schema;
use crate::error::BindError;
use crate::ident::{Name, Ref};
use crate::literal::{Type, TypeExpr};

/// A schema, its bases, and the non-schema type at the root of the chain.
#[derive(Debug)]
pub struct SchemaChain<'a> {
    /// Most-derived schema first.
    pub schemas: Vec<(StackId, &'a Schema)>,
    pub root: Type,
}

impl<'a> SchemaChain<'a> {
    /// The most-derived object-shaped schema in the chain, if any.
    pub fn object(&self) -> Option<(StackId, &'a Schema)> {
        self.schemas.iter().copied().find(|(_, s)| s.is_object())
    }
}

/// Resolves type refs against a [`StackArena`].
#[derive(Debug, Clone, Copy)]
pub struct TypeResolver<'a> {
    arena: &'a StackArena,
}

impl<'a> TypeResolver<'a> {
    pub fn new(arena: &'a StackArena) -> Self {
        Self { arena }
    }

    /// Resolves `type_ref` as written in stack `context`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stackdef_core::*;
    ///
    /// let mut arena = StackArena::new();
    /// let db = arena.add(Stack::new("db"));
    /// let web = arena.add(Stack::new("web").with_schema("Port", Schema::new("number"), true));
    ///
    /// let types = TypeResolver::new(&arena);
    /// assert_eq!(types.resolve(web, &Ref::new("[]string")).unwrap().to_string(), "[]string");
    /// assert_eq!(types.resolve(web, &Ref::new("db")).unwrap(), Type::Stack(db));
    /// assert!(matches!(types.resolve(web, &Ref::new("Port")).unwrap(), Type::Schema { .. }));
    /// assert!(types.resolve(web, &Ref::new("nothing")).is_err());
    /// ```
    pub fn resolve(&self, context: StackId, type_ref: &Ref) -> Result<Type, BindError> {
        let expr = TypeExpr::parse(type_ref.as_str())?;
        self.resolve_expr(context, &expr)
    }

    pub fn resolve_expr(&self, context: StackId, expr: &TypeExpr) -> Result<Type, BindError> {
        match expr {
            TypeExpr::Named(name) => self.resolve_named(context, name),
            TypeExpr::Array(elem) => Ok(Type::Array(Box::new(self.resolve_expr(context, elem)?))),
            TypeExpr::Map(key, value) => {
                let key_type = self.resolve_expr(context, key)?;
                if !matches!(key_type, Type::Any | Type::Bool | Type::Number | Type::String) {
                    return Err(BindError::TypeMismatch {
                        path: expr.to_string(),
                        expected: "a primitive map key".to_string(),
                        actual: key_type.to_string(),
                    });
                }
                let value_type = self.resolve_expr(context, value)?;
                Ok(Type::Map(Box::new(key_type), Box::new(value_type)))
            }
        }
    }

    fn resolve_named(&self, context: StackId, name: &Ref) -> Result<Type, BindError> {
        if let Some(primitive) = Type::primitive(name.as_str()) {
            return Ok(primitive);
        }
        if let Some((owner, _)) = self.visible_schema(context, name.as_str()) {
            return Ok(Type::Schema {
                owner,
                name: Name::new(name.as_str()),
            });
        }
        self.arena.find(name).map(Type::Stack)
    }

    /// Finds the schema `name` as seen from stack `context`.
    pub fn visible_schema(&self, context: StackId, name: &str) -> Option<(StackId, &'a Schema)> {
        if let Some(schema) = self.schema(context, name) {
            return Some((context, schema));
        }
        let entry = self.arena.effective(context)?.schemas.get(name)?;
        if !entry.public {
            return None;
        }
        self.schema(entry.owner, name).map(|s| (entry.owner, s))
    }

    /// A schema declared directly by `owner`.
    pub fn schema(&self, owner: StackId, name: &str) -> Option<&'a Schema> {
        let stack = self.arena.get(owner)?;
        stack
            .schemas
            .public
            .get(name)
            .or_else(|| stack.schemas.private.get(name))
    }

    /// Walks a schema's base chain down to its root type.
    ///
    /// Each base is resolved in the context of the schema declaring it. A
    /// chain that revisits a schema fails with
    /// [`BindError::InheritanceCycle`].
    pub fn schema_chain(&self, owner: StackId, name: &Name) -> Result<SchemaChain<'a>, BindError> {
        let mut schemas = Vec::new();
        let mut seen: Vec<(StackId, Name)> = Vec::new();
        let mut current = (owner, name.clone());
        loop {
            if let Some(start) = seen.iter().position(|s| *s == current) {
                let mut chain: Vec<String> =
                    seen[start..].iter().map(|(_, n)| n.to_string()).collect();
                chain.push(current.1.to_string());
                return Err(BindError::InheritanceCycle { chain });
            }
            let schema = self
                .schema(current.0, current.1.as_str())
                .ok_or_else(|| BindError::UnknownType {
                    ty: current.1.to_string(),
                })?;
            schemas.push((current.0, schema));
            let base = self.resolve(current.0, &schema.base_ref())?;
            seen.push(current);
            match base {
                Type::Schema { owner, name } => current = (owner, name),
                root => return Ok(SchemaChain { schemas, root }),
            }
        }
    }
}
