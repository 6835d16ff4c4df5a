//! Stack registry loading with builder pattern and fallback chains.
//!
//! Provides [`StackRegistry`] for in-memory stack lookup and
//! [`RegistryBuilder`] for constructing a registry from multiple sources with
//! automatic fallback.
//!
//! # Loading patterns
//!
//! ```no_run
//! use stackdef_core::{BindOptions, Ref};
//! use stackdef_db::StackRegistry;
//!
//! // Load every JSON/YAML document in a directory
//! let registry = StackRegistry::from_dir("stacks/").unwrap();
//! assert!(registry.get(&Ref::new("acme/db@^1")).is_some());
//!
//! // Use the builder for a fallback chain
//! let registry = StackRegistry::builder()
//!     .from_dir("stacks/")
//!     .from_file("stacks.yaml")
//!     .build()
//!     .unwrap();
//!
//! let (arena, report) = registry.bind(BindOptions::default());
//! println!("{} bound, {} failed", report.bound.len(), report.failed.len());
//! ```
//!
//! A directory may hold one `workspace.yaml` (or `.yml`/`.json`); every other
//! document holds either a single stack or a list of stacks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use stackdef_core::{
    AvailableVersions, BindOptions, BindReport, Binder, Document, Lookup, Name, Ref, RefParts,
    Stack, StackArena, StackLookup, Version, VersionSpec, Workspace,
};
use tracing::{debug, info};

use crate::error::{LoadError, Result};

const WORKSPACE_STEM: &str = "workspace";

/// Describes where a [`StackRegistry`] was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    /// Loaded from a directory of stack documents.
    Directory(PathBuf),
    /// Loaded from a single document.
    File(PathBuf),
    /// Built in memory.
    Memory,
    /// Loaded via a fallback chain of multiple sources.
    Multiple(Vec<RegistrySource>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(Self::Json),
            Some("yaml" | "yml") => Some(Self::Yaml),
            _ => None,
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        Ok(match self {
            Self::Json => serde_json::from_slice(bytes)?,
            Self::Yaml => serde_yaml::from_slice(bytes)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StackFile {
    Many(Vec<Stack>),
    One(Box<Stack>),
}

/// Reads a document, returning its bytes and their SHA-256 digest.
fn read_document(path: &Path) -> Result<(Vec<u8>, Arc<Document>)> {
    let bytes = std::fs::read(path)?;
    let digest = format!("{:x}", Sha256::digest(&bytes));
    let doc = Document::new(path.display().to_string()).with_digest(digest);
    Ok((bytes, Arc::new(doc)))
}

fn is_workspace(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some(WORKSPACE_STEM)
}

/// In-memory collection of stacks indexed by qualified name.
///
/// Several versions of the same stack may be registered; lookups pick
/// among them with the ref's version spec, the workspace's pin for that
/// name, or `latest`.
///
/// # Examples
///
/// ```
/// use stackdef_core::{Ref, Stack};
/// use stackdef_db::StackRegistry;
///
/// let mut registry = StackRegistry::new();
/// registry.insert(Stack::new("acme/db").with_version("1.0.0"));
/// registry.insert(Stack::new("acme/db").with_version("1.4.2"));
///
/// let picked = registry.get(&Ref::new("acme/db@~1.4")).unwrap();
/// assert_eq!(picked.version.as_str(), "1.4.2");
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Debug)]
pub struct StackRegistry {
    stacks: BTreeMap<Name, Vec<Stack>>,
    workspace: Option<Workspace>,
    documents: Vec<Arc<Document>>,
    source: RegistrySource,
}

impl Default for StackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StackRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            stacks: BTreeMap::new(),
            workspace: None,
            documents: Vec::new(),
            source: RegistrySource::Memory,
        }
    }

    /// Returns a new [`RegistryBuilder`] for configuring a fallback chain.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Loads every `*.json`, `*.yaml` and `*.yml` document in a directory.
    ///
    /// Files are read in path order; other files are skipped. The directory
    /// is not searched recursively.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::IoError`] if the directory or a file cannot be
    /// read, or a JSON/YAML error if any document fails to parse.
    pub fn from_dir(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registry = Self::new();
        registry.load_dir(path)?;
        registry.source = RegistrySource::Directory(path.to_path_buf());
        Ok(registry)
    }

    /// Adds every document in a directory to this registry.
    pub fn load_dir(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.is_file() && Format::of(&file_path).is_some() {
                files.push(file_path);
            } else {
                debug!(path = %file_path.display(), "Skipping non-document entry");
            }
        }
        files.sort();

        let before = self.len();
        for file in &files {
            self.load_file(file)?;
        }
        info!(
            path = %path.display(),
            documents = files.len(),
            stacks = self.len() - before,
            "Loaded stack directory"
        );
        Ok(())
    }

    /// Loads a single stack or workspace document.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnsupportedFormat`] for extensions other than
    /// JSON or YAML, otherwise as [`StackRegistry::from_dir`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registry = Self::new();
        registry.load_file(path)?;
        registry.source = RegistrySource::File(path.to_path_buf());
        Ok(registry)
    }

    /// Parses one document into this registry.
    ///
    /// A file whose stem is `workspace` replaces the registry's workspace.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = Format::of(path).ok_or_else(|| LoadError::UnsupportedFormat(path.into()))?;
        let (bytes, doc) = read_document(path)?;

        if is_workspace(path) {
            let mut workspace: Workspace = format.parse(&bytes)?;
            workspace.decorate(Some(Arc::clone(&doc)));
            debug!(
                path = %path.display(),
                dependencies = workspace.dependencies.len(),
                "Loaded workspace"
            );
            self.workspace = Some(workspace);
        } else {
            let stacks = match format.parse::<StackFile>(&bytes)? {
                StackFile::Many(stacks) => stacks,
                StackFile::One(stack) => vec![*stack],
            };
            debug!(path = %path.display(), stacks = stacks.len(), "Loaded stack document");
            for mut stack in stacks {
                stack.decorate(Some(Arc::clone(&doc)));
                self.insert(stack);
            }
        }
        self.documents.push(doc);
        Ok(())
    }

    /// Registers a stack next to any other versions of the same name.
    pub fn insert(&mut self, stack: Stack) {
        self.stacks.entry(stack.name.clone()).or_default().push(stack);
    }

    /// Sets the workspace whose dependencies pin and placehold refs.
    pub fn set_workspace(&mut self, workspace: Workspace) {
        self.workspace = Some(workspace);
    }

    /// Finds the stack a ref selects, if any.
    pub fn get(&self, reference: &Ref) -> Option<&Stack> {
        reference.parse().ok().and_then(|parts| self.select(&parts))
    }

    /// Returns `true` if any version of `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.stacks.contains_key(name)
    }

    /// Returns the number of stacks, counting every version.
    pub fn len(&self) -> usize {
        self.stacks.values().map(Vec::len).sum()
    }

    /// Returns `true` if the registry holds no stacks.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Returns an iterator over every registered stack.
    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.values().flatten()
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Every document read, in load order.
    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    /// Returns a reference to the source metadata.
    pub fn source(&self) -> &RegistrySource {
        &self.source
    }

    /// Binds every registered stack, with the workspace applied.
    pub fn bind(&self, options: BindOptions) -> (StackArena, BindReport) {
        let mut binder = Binder::new(options).with_lookup(self);
        if let Some(workspace) = &self.workspace {
            binder = binder.with_workspace(workspace);
        }
        for stack in self.stacks() {
            binder.add(stack.clone());
        }
        let report = binder.bind();
        (binder.into_arena(), report)
    }

    fn pin(&self, name: &Name) -> Option<VersionSpec> {
        let workspace = self.workspace.as_ref()?;
        workspace
            .pins()
            .into_iter()
            .find(|(pinned, _)| pinned == name)
            .map(|(_, spec)| spec)
    }

    fn select(&self, parts: &RefParts) -> Option<&Stack> {
        let candidates = self.stacks.get(&parts.name)?;
        let spec = parts
            .version
            .clone()
            .or_else(|| self.pin(&parts.name))
            .unwrap_or(VersionSpec::Latest);
        if spec == VersionSpec::Latest && candidates.len() == 1 {
            return candidates.first();
        }
        let picked = spec.resolve(&self.available_versions(&parts.name)).ok()?;
        candidates.iter().find(|s| s.version == picked)
    }
}

impl StackLookup for StackRegistry {
    fn lookup(&self, reference: &RefParts) -> Lookup {
        if let Some(stack) = self.select(reference) {
            return Lookup::Stack(Box::new(stack.clone()));
        }
        let placeholder = self.workspace.as_ref().and_then(|workspace| {
            workspace
                .dependency_refs()
                .into_iter()
                .find(|(dependency, _)| {
                    dependency
                        .parse()
                        .is_ok_and(|parts| parts.name == reference.name)
                })
                .map(|(_, placeholder)| placeholder)
        });
        match placeholder {
            Some(placeholder) => Lookup::Uninstantiated(placeholder),
            None => Lookup::NotFound,
        }
    }
}

impl AvailableVersions for StackRegistry {
    fn available_versions(&self, name: &Name) -> Vec<Version> {
        self.stacks
            .get(name)
            .map(|stacks| {
                stacks
                    .iter()
                    .map(|s| s.version.clone())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builder for constructing a [`StackRegistry`] with a fallback chain.
///
/// Sources are tried in the order they are added. The first successful load
/// wins; if all fail, [`LoadError::NoSourcesAvailable`] is returned.
///
/// # Example
///
/// ```no_run
/// use stackdef_db::StackRegistry;
///
/// let registry = StackRegistry::builder()
///     .from_dir("/opt/stacks/")
///     .from_file("/opt/stacks.yaml")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    sources: Vec<RegistrySource>,
}

impl RegistryBuilder {
    /// Creates a new builder with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory of stack documents as a source.
    pub fn from_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(RegistrySource::Directory(path.into()));
        self
    }

    /// Adds a single document as a source.
    pub fn from_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(RegistrySource::File(path.into()));
        self
    }

    /// Attempts to load stacks from configured sources in order.
    pub fn build(self) -> Result<StackRegistry> {
        if self.sources.is_empty() {
            return Err(LoadError::NoSourcesAvailable);
        }

        for source in &self.sources {
            let result = match source {
                RegistrySource::Directory(path) => StackRegistry::from_dir(path),
                RegistrySource::File(path) => StackRegistry::from_file(path),
                RegistrySource::Memory | RegistrySource::Multiple(_) => continue,
            };

            match result {
                Ok(mut registry) => {
                    registry.source = RegistrySource::Multiple(self.sources.clone());
                    return Ok(registry);
                }
                Err(e) => debug!(source = ?source, error = %e, "Registry source failed"),
            }
        }

        Err(LoadError::NoSourcesAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DB_V1: &str = r#"
name: acme/db
version: 1.0.0
properties:
  size: { type: number, default: 10 }
"#;

    const DB_V2: &str = r#"{"name": "acme/db", "version": "2.1.0"}"#;

    #[test]
    fn test_from_dir_reads_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("db1.yaml"), DB_V1).unwrap();
        fs::write(dir.path().join("db2.json"), DB_V2).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = StackRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("acme/db"));
        assert_eq!(registry.documents().len(), 2);
        assert_eq!(
            registry.source(),
            &RegistrySource::Directory(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_document_digest_is_sha256_of_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.yaml");
        fs::write(&path, DB_V1).unwrap();

        let registry = StackRegistry::from_file(&path).unwrap();
        let expected = format!("{:x}", Sha256::digest(DB_V1.as_bytes()));
        assert_eq!(registry.documents()[0].digest.as_deref(), Some(expected.as_str()));

        let stack = registry.stacks().next().unwrap();
        assert_eq!(stack.node.doc().and_then(|d| d.digest.clone()), Some(expected));
    }

    #[test]
    fn test_list_document_holds_many_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.yaml");
        fs::write(
            &path,
            "- name: server\n  abstract: true\n- name: web\n  base: server\n",
        )
        .unwrap();

        let registry = StackRegistry::from_file(&path).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&Ref::new("web")).is_some());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.toml");
        fs::write(&path, "name = 'db'").unwrap();

        let err = StackRegistry::from_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(p) if p == path));
    }

    #[test]
    fn test_select_by_version_spec() {
        let mut registry = StackRegistry::new();
        registry.insert(Stack::new("acme/db").with_version("1.0.0"));
        registry.insert(Stack::new("acme/db").with_version("1.5.0"));
        registry.insert(Stack::new("acme/db").with_version("2.0.0"));

        let version = |r: &str| registry.get(&Ref::new(r)).map(|s| s.version.to_string());
        assert_eq!(version("acme/db").as_deref(), Some("2.0.0"));
        assert_eq!(version("acme/db@^1").as_deref(), Some("1.5.0"));
        assert_eq!(version("acme/db@1.0.0").as_deref(), Some("1.0.0"));
        assert_eq!(version("acme/db@^3"), None);
        assert_eq!(version("acme/queue"), None);
    }

    #[test]
    fn test_workspace_pin_applies_to_unversioned_lookup() {
        let mut registry = StackRegistry::new();
        registry.insert(Stack::new("acme/db").with_version("1.0.0"));
        registry.insert(Stack::new("acme/db").with_version("2.0.0"));
        let workspace: Workspace =
            serde_yaml::from_str("dependencies:\n  acme/db: \"^1\"\n").unwrap();
        registry.set_workspace(workspace);

        let parts = RefParts::parse("acme/db").unwrap();
        match registry.lookup(&parts) {
            Lookup::Stack(stack) => assert_eq!(stack.version.as_str(), "1.0.0"),
            other => panic!("expected a stack, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_placeholder_for_workspace_dependency() {
        let mut registry = StackRegistry::new();
        let workspace: Workspace =
            serde_yaml::from_str("dependencies:\n  hub.example.com/acme/cache: latest\n").unwrap();
        registry.set_workspace(workspace);

        let parts = RefParts::parse("acme/cache").unwrap();
        assert!(matches!(registry.lookup(&parts), Lookup::Uninstantiated(_)));
        let parts = RefParts::parse("acme/other").unwrap();
        assert!(matches!(registry.lookup(&parts), Lookup::NotFound));
    }

    #[test]
    fn test_builder_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("db.yaml"), DB_V1).unwrap();

        let registry = StackRegistry::builder()
            .from_dir("/nonexistent/stacks")
            .from_dir(dir.path())
            .build()
            .unwrap();
        assert!(registry.contains("acme/db"));
        assert!(matches!(registry.source(), RegistrySource::Multiple(s) if s.len() == 2));
    }

    #[test]
    fn test_builder_all_fail() {
        let result = StackRegistry::builder()
            .from_dir("/nonexistent/a")
            .from_file("/nonexistent/b.yaml")
            .build();
        assert!(matches!(result, Err(LoadError::NoSourcesAvailable)));
        assert!(matches!(
            RegistryBuilder::new().build(),
            Err(LoadError::NoSourcesAvailable)
        ));
    }
}
