//! Bind configuration for a project.
//!
//! Defines the YAML-serializable configuration that controls where stack
//! documents are found and how they are bound.
//!
//! # Example YAML
//!
//! ```yaml
//! version: "1.0"
//! search_paths:
//!   - stacks/
//!   - vendor/stacks/
//! options:
//!   bound_precedence: exclusive_wins
//!   flag_inheritance: inherit
//!   jobs: 4
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stackdef_core::BindOptions;
use tracing::debug;

use crate::error::Result;
use crate::loader::StackRegistry;

/// Top-level bind configuration.
///
/// Loaded from a YAML file (typically `.stackdef.yml` in the project root).
///
/// # Examples
///
/// ```
/// use stackdef_core::BoundPrecedence;
/// use stackdef_db::BindConfig;
///
/// let config: BindConfig = serde_yaml::from_str(r#"
/// version: "1.0"
/// options:
///   bound_precedence: reject
/// "#).unwrap();
/// assert_eq!(config.options.bound_precedence, BoundPrecedence::Reject);
/// assert!(config.search_paths.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Configuration format version (e.g., `"1.0"`).
    pub version: String,
    /// Binding knobs.
    #[serde(default)]
    pub options: BindOptions,
    /// Directories of stack documents, loaded in order.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            options: BindOptions::default(),
            search_paths: Vec::new(),
        }
    }
}

impl BindConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::LoadError::IoError) if the file cannot
    /// be read, or [`YamlError`](crate::LoadError::YamlError) if parsing
    /// fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Loads every search path into one registry.
    ///
    /// Unlike [`RegistryBuilder`](crate::RegistryBuilder), every path must
    /// load; the first failure is returned.
    pub fn registry(&self) -> Result<StackRegistry> {
        let mut registry = StackRegistry::new();
        for path in &self.search_paths {
            debug!(path = %path.display(), "Loading search path");
            registry.load_dir(path)?;
        }
        Ok(registry)
    }
}
