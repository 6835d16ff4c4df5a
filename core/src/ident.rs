//! Identifier parsing for names, refs, versions and version specs.
//!
//! Every cross-document reference in a stack document goes through this
//! module before anything else looks at it. A [`Ref`] is kept as written in
//! the source document and parsed on demand into [`RefParts`]; equality and
//! hashing of refs always use the normalized form.
//!
//! # Examples
//!
//! ```
//! use stackdef_core::{Ref, VersionSpec};
//!
//! let parts = Ref::new("https://Hub.Example.com/acme/web@^1.2").parse().unwrap();
//! assert_eq!(parts.protocol.as_deref(), Some("https"));
//! assert_eq!(parts.base.as_deref(), Some("hub.example.com"));
//! assert_eq!(parts.name.as_str(), "acme/web");
//! assert!(matches!(parts.version, Some(VersionSpec::Range(_))));
//! ```

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BindError;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name regex"));

static PROTOCOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*$").expect("protocol regex"));

static HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{7,64}$").expect("hash regex"));

/// Returns `true` if `s` is a simple name (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_name(s: &str) -> bool {
    NAME_RE.is_match(s)
}

/// Returns `true` if `s` is one or more simple names joined by `/`.
pub fn is_valid_qualified_name(s: &str) -> bool {
    !s.is_empty() && s.split('/').all(is_valid_name)
}

/// Checks a declared name, reporting the container it was declared in.
pub fn check_name(name: &str, container: &str) -> Result<(), BindError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(BindError::InvalidName {
            name: name.to_string(),
            container: container.to_string(),
        })
    }
}

/// An identifier, optionally qualified with `/` (e.g. `acme/web`).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for a simple, unqualified name.
    pub fn is_simple(&self) -> bool {
        is_valid_name(&self.0)
    }

    /// Returns `true` for a simple or `/`-qualified name.
    pub fn is_valid(&self) -> bool {
        is_valid_qualified_name(&self.0)
    }

    /// Last `/`-separated segment of the name.
    pub fn simple(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A precise version: a semantic version or a content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the version as semver, accepting a leading `v`.
    pub fn semver(&self) -> Option<semver::Version> {
        let trimmed = self.0.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        semver::Version::parse(trimmed).ok()
    }

    pub fn is_semver(&self) -> bool {
        self.semver().is_some()
    }

    pub fn is_hash(&self) -> bool {
        HASH_RE.is_match(self.0.trim())
    }

    pub fn is_valid(&self) -> bool {
        self.is_semver() || self.is_hash()
    }

    /// Orders semantic versions by precedence, ranks them above hashes, and
    /// falls back to lexical order between hashes.
    pub fn precedence(&self, other: &Self) -> Ordering {
        match (self.semver(), other.semver()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.0.cmp(&other.0),
        }
    }

    pub(crate) fn matches_exactly(&self, other: &Self) -> bool {
        match (self.semver(), other.semver()) {
            (Some(a), Some(b)) => a == b,
            _ => self.0.trim().eq_ignore_ascii_case(other.0.trim()),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A version requirement bound to a precise [`Version`] at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// The greatest available version.
    Latest,
    /// Exactly this version.
    Exact(Version),
    /// The greatest version satisfying a semantic range.
    Range(semver::VersionReq),
}

impl VersionSpec {
    /// Parses `latest`, an exact version or hash, or a semver range.
    pub fn parse(s: &str) -> Result<Self, BindError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BindError::MalformedVersion {
                spec: s.to_string(),
            });
        }
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        let exact = Version::new(s);
        if exact.is_valid() {
            return Ok(Self::Exact(exact));
        }
        semver::VersionReq::parse(s)
            .map(Self::Range)
            .map_err(|_| BindError::MalformedVersion {
                spec: s.to_string(),
            })
    }

    /// Picks exactly one version out of `available`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stackdef_core::{Version, VersionSpec};
    ///
    /// let available = vec![Version::new("1.0.0"), Version::new("1.4.2"), Version::new("2.0.0")];
    /// let spec = VersionSpec::parse("^1.0").unwrap();
    /// assert_eq!(spec.resolve(&available).unwrap().as_str(), "1.4.2");
    /// assert!(VersionSpec::parse("^3").unwrap().resolve(&available).is_err());
    /// ```
    pub fn resolve(&self, available: &[Version]) -> Result<Version, BindError> {
        let picked = match self {
            Self::Latest => available.iter().max_by(|a, b| a.precedence(b)),
            Self::Exact(version) => available.iter().find(|a| a.matches_exactly(version)),
            Self::Range(req) => available
                .iter()
                .filter_map(|a| a.semver().map(|parsed| (a, parsed)))
                .filter(|(_, parsed)| req.matches(parsed))
                .max_by(|(_, a), (_, b)| a.cmp(b))
                .map(|(a, _)| a),
        };
        picked.cloned().ok_or_else(|| BindError::UnsatisfiableVersion {
            spec: self.to_string(),
        })
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(version) => write!(f, "{version}"),
            Self::Range(req) => write!(f, "{req}"),
        }
    }
}

/// Resolves `spec` against a set of available versions.
pub fn resolve_version_spec(spec: &VersionSpec, available: &[Version]) -> Result<Version, BindError> {
    spec.resolve(available)
}

/// Source of known versions for a (qualified) name.
pub trait AvailableVersions {
    fn available_versions(&self, name: &Name) -> Vec<Version>;
}

impl AvailableVersions for BTreeMap<Name, Vec<Version>> {
    fn available_versions(&self, name: &Name) -> Vec<Version> {
        self.get(name).cloned().unwrap_or_default()
    }
}

/// The parsed pieces of a [`Ref`]: `[protocol://][base/]name[@version]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefParts {
    pub protocol: Option<String>,
    pub base: Option<String>,
    pub name: Name,
    pub version: Option<VersionSpec>,
}

impl RefParts {
    pub fn parse(s: &str) -> Result<Self, BindError> {
        let raw = s.trim();
        let malformed = |reason: &str| BindError::MalformedRef {
            reference: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(malformed("empty reference"));
        }

        let (protocol, rest) = match raw.find("://") {
            Some(idx) => {
                let protocol = &raw[..idx];
                if !PROTOCOL_RE.is_match(protocol) {
                    return Err(malformed("invalid protocol"));
                }
                (Some(protocol.to_ascii_lowercase()), &raw[idx + 3..])
            }
            None => (None, raw),
        };

        let (path, version) = match rest.rfind('@') {
            Some(idx) => {
                let spec = VersionSpec::parse(&rest[idx + 1..])
                    .map_err(|_| malformed("invalid version"))?;
                (&rest[..idx], Some(spec))
            }
            None => (rest, None),
        };

        let (base, name) = match path.split_once('/') {
            Some((first, remainder)) if first.contains('.') || first.contains(':') => {
                (Some(first.to_ascii_lowercase()), remainder)
            }
            _ => (None, path),
        };

        if protocol.is_some() && base.is_none() {
            return Err(malformed("a protocol requires a base"));
        }
        if !is_valid_qualified_name(name) {
            return Err(malformed("invalid name"));
        }

        Ok(Self {
            protocol,
            base,
            name: Name::new(name),
            version,
        })
    }

    /// Same reference with the version suffix removed.
    pub fn without_version(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for RefParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(protocol) = &self.protocol {
            write!(f, "{protocol}://")?;
        }
        if let Some(base) = &self.base {
            write!(f, "{base}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

/// A dependency or type reference, kept as written in the source document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(String);

impl Ref {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn parse(&self) -> Result<RefParts, BindError> {
        RefParts::parse(&self.0)
    }

    /// Normalized form; malformed refs normalize to their trimmed source.
    pub fn normalized(&self) -> String {
        self.parse()
            .map(|parts| parts.to_string())
            .unwrap_or_else(|_| self.0.trim().to_string())
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ref {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&Name> for Ref {
    fn from(name: &Name) -> Self {
        Self(name.as_str().to_string())
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Ref {}

impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Ref {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ref {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}
