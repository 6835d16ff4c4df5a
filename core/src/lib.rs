//! Stack definitions and the binding model that validates them.
//!
//! Documents describe reusable, parameterized *stacks* organized under a
//! workspace. This crate holds both phases of their representation:
//!
//! - The document-shaped AST ([`Workspace`], [`Stack`], [`Property`],
//!   [`Schema`], [`Services`]) as parsed, with untyped property bags and
//!   service maps.
//! - The bound model, filled in exactly once by a [`Binder`]: base stacks,
//!   typed [`Service`]s, validated [`Literal`]s and resolved
//!   [`ServiceRef`]s.
//!
//! Identifiers ([`Name`], [`Ref`], [`Version`], [`VersionSpec`]) follow
//! `[protocol://][base/]name[@version]`. Stacks live in a [`StackArena`] and
//! refer to each other by [`StackId`].
//!
//! Binding never stops at the first failure: every problem becomes a
//! [`Diagnostic`] pointing at the node it came from, and a failing stack only
//! takes down the stacks that depend on it.
//!
//! # Example
//!
//! ```
//! use stackdef_core::*;
//!
//! let server: Stack = serde_yaml::from_str(r#"
//! name: server
//! abstract: true
//! properties:
//!   port: { type: number, default: 80 }
//! "#).unwrap();
//!
//! let web: Stack = serde_yaml::from_str(r#"
//! name: web
//! base: server
//! "#).unwrap();
//!
//! let (arena, report) = bind_stacks([server, web], BindOptions::default());
//! assert!(report.is_ok());
//!
//! let web = arena.find(&Ref::new("web")).unwrap();
//! assert!(arena.effective(web).unwrap().properties.contains_key("port"));
//! ```

mod arena;
mod ast;
mod bind;
mod error;
mod ident;
mod inherit;
mod literal;
mod node;
mod options;
mod services;
mod types;
mod validate;
mod workspace;

pub use arena::{
    Effective, EffectiveProperty, EffectiveSchema, EffectiveService, Lookup, NoLookup,
    StackArena, StackId, StackLookup, StackState,
};
pub use ast::*;
pub use bind::{BindReport, Binder, bind_stacks};
pub use error::{BindError, Diagnostic};
pub use ident::{
    AvailableVersions, Name, Ref, RefParts, Version, VersionSpec, check_name, is_valid_name,
    is_valid_qualified_name, resolve_version_spec,
};
pub use inherit::{merge_declarations, resolve_inheritance};
pub use literal::{Literal, LiteralValue, Type, TypeExpr};
pub use node::{Document, Locate, Location, Node};
pub use options::{BindOptions, BoundPrecedence, FlagInheritance};
pub use services::{ServiceResolver, target_ref};
pub use types::{SchemaChain, TypeResolver};
pub use validate::{Validator, compile_pattern, values_equal};
