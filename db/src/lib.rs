//! Loading stack and workspace documents for binding.
//!
//! This crate reads stack documents (JSON or YAML) from files and
//! directories into a [`StackRegistry`], which serves as the external stack
//! lookup and version source for a [`Binder`](stackdef_core::Binder).
//!
//! # Quick start
//!
//! ```no_run
//! use stackdef_core::BindOptions;
//! use stackdef_db::{BindConfig, StackRegistry};
//!
//! // Load stacks from a directory
//! let registry = StackRegistry::from_dir("stacks/").unwrap();
//! let (arena, report) = registry.bind(BindOptions::default());
//! for diagnostic in &report.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//!
//! // Or let a config file name the search paths and options
//! let config = BindConfig::load(".stackdef.yml").unwrap();
//! let (arena, report) = config.registry().unwrap().bind(config.options.clone());
//! ```

mod config;
mod error;
mod loader;

pub use config::BindConfig;
pub use error::{LoadError, Result};
pub use loader::{RegistryBuilder, RegistrySource, StackRegistry};
