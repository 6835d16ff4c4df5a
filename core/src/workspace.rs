//! Workspace-level operations: clusters and dependency pins.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{Cluster, DependencyRefs, UninstStack, Workspace};
use crate::error::BindError;
use crate::ident::{AvailableVersions, Name, Ref, Version, VersionSpec, check_name};
use crate::node::Document;

impl Workspace {
    /// Fills in cluster names and documents after parsing.
    pub fn decorate(&mut self, doc: Option<Arc<Document>>) {
        if let Some(doc) = doc {
            self.node.set_doc(doc);
        }
        for (name, cluster) in &mut self.clusters {
            cluster.name = name.clone();
            cluster.node.inherit_doc(&self.node);
        }
    }

    /// The cluster marked as default, if exactly one is.
    ///
    /// # Examples
    ///
    /// ```
    /// use stackdef_core::Workspace;
    ///
    /// let mut workspace: Workspace = serde_json::from_str(r#"{
    ///     "clusters": {
    ///         "dev": { "cloud": "aws" },
    ///         "prod": { "cloud": "aws", "default": true }
    ///     }
    /// }"#).unwrap();
    /// workspace.decorate(None);
    ///
    /// assert_eq!(workspace.default_cluster().map(|c| c.name.as_str()), Some("prod"));
    /// assert!(workspace.validate().is_empty());
    /// ```
    pub fn default_cluster(&self) -> Option<&Cluster> {
        let mut defaults = self.clusters.values().filter(|c| c.default);
        let first = defaults.next()?;
        match defaults.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    /// Checks cluster names, the single-default rule, and every dependency
    /// ref and version spec.
    pub fn validate(&self) -> Vec<BindError> {
        let mut errors = Vec::new();

        for name in self.clusters.keys() {
            if let Err(e) = check_name(name, "clusters") {
                errors.push(e);
            }
        }
        let defaults: Vec<String> = self
            .clusters
            .iter()
            .filter(|(_, c)| c.default)
            .map(|(name, _)| name.clone())
            .collect();
        if defaults.len() > 1 {
            errors.push(BindError::MultipleDefaultClusters { clusters: defaults });
        }

        for (reference, dependency) in &self.dependencies {
            if let Err(e) = reference.parse() {
                errors.push(e);
            }
            if let Err(e) = dependency.spec() {
                errors.push(e);
            }
        }

        errors
    }

    /// Version specs to apply to unversioned refs, keyed by qualified name.
    pub fn pins(&self) -> Vec<(Name, VersionSpec)> {
        self.dependencies
            .iter()
            .filter_map(|(reference, dependency)| {
                let parts = reference.parse().ok()?;
                let spec = dependency.spec().ok()?;
                Some((parts.name, spec))
            })
            .collect()
    }

    /// Resolves every dependency to one concrete version.
    pub fn resolve_dependencies(
        &self,
        available: &dyn AvailableVersions,
    ) -> Result<BTreeMap<Ref, Version>, Vec<BindError>> {
        let mut resolved = BTreeMap::new();
        let mut errors = Vec::new();
        for (reference, dependency) in &self.dependencies {
            let result = reference.parse().and_then(|parts| {
                let spec = dependency.spec()?;
                spec.resolve(&available.available_versions(&parts.name))
            });
            match result {
                Ok(version) => {
                    resolved.insert(reference.clone(), version);
                }
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(resolved)
        } else {
            Err(errors)
        }
    }

    /// One placeholder per dependency, carrying this workspace's document.
    pub fn dependency_refs(&self) -> DependencyRefs {
        self.dependencies
            .keys()
            .map(|reference| {
                (
                    reference.clone(),
                    UninstStack::new(reference.clone(), self.node.doc_arc().cloned()),
                )
            })
            .collect()
    }
}
