//! Document identity and source positions for AST nodes.
//!
//! Nodes never render diagnostics themselves; they only answer "where did I
//! come from" through [`Locate::where_`]. Documents and locations are filled
//! in by whatever parsed the source (a loader or an editor integration).

use std::fmt;
use std::sync::Arc;

/// A source document that AST nodes were parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Document {
    /// Path or URI of the document.
    pub uri: String,
    /// SHA-256 hex digest of the document bytes, when known.
    pub digest: Option<String>,
}

impl Document {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// A 1-based line/column position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Position data shared by every AST node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    doc: Option<Arc<Document>>,
    loc: Option<Location>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node with a known document but no precise location.
    pub fn in_doc(doc: Arc<Document>) -> Self {
        Self {
            doc: Some(doc),
            loc: None,
        }
    }

    pub fn at(doc: Arc<Document>, loc: Location) -> Self {
        Self {
            doc: Some(doc),
            loc: Some(loc),
        }
    }

    pub fn doc(&self) -> Option<&Document> {
        self.doc.as_deref()
    }

    pub fn doc_arc(&self) -> Option<&Arc<Document>> {
        self.doc.as_ref()
    }

    pub fn loc(&self) -> Option<Location> {
        self.loc
    }

    pub fn set_doc(&mut self, doc: Arc<Document>) {
        self.doc = Some(doc);
    }

    pub fn set_loc(&mut self, loc: Location) {
        self.loc = Some(loc);
    }

    /// Copies the document of `parent` when this node has none of its own.
    pub fn inherit_doc(&mut self, parent: &Node) {
        if self.doc.is_none() {
            self.doc = parent.doc.clone();
        }
    }

    pub fn where_(&self) -> (Option<&Document>, Option<Location>) {
        (self.doc(), self.loc)
    }
}

/// Implemented by every AST node type so diagnostics can be attributed.
pub trait Locate {
    fn node(&self) -> &Node;

    fn where_(&self) -> (Option<&Document>, Option<Location>) {
        self.node().where_()
    }
}

impl Locate for Node {
    fn node(&self) -> &Node {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_reports_document_and_location() {
        let doc = Arc::new(Document::new("web.yaml").with_digest("abc"));
        let node = Node::at(doc, Location::new(1, 2));
        let (doc, loc) = node.where_();
        assert_eq!(doc.map(|d| d.uri.as_str()), Some("web.yaml"));
        assert_eq!(loc, Some(Location::new(1, 2)));
    }

    #[test]
    fn test_inherit_doc_keeps_own_document() {
        let parent = Node::in_doc(Arc::new(Document::new("parent.yaml")));
        let mut child = Node::new();
        child.inherit_doc(&parent);
        assert_eq!(child.doc().map(|d| d.uri.as_str()), Some("parent.yaml"));

        let mut own = Node::in_doc(Arc::new(Document::new("own.yaml")));
        own.inherit_doc(&parent);
        assert_eq!(own.doc().map(|d| d.uri.as_str()), Some("own.yaml"));
    }
}
