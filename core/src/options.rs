//! Knobs that change how binding resolves ambiguous declarations.

use serde::{Deserialize, Serialize};

/// How an inclusive and an exclusive numeric bound on the same side combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundPrecedence {
    /// The exclusive bound replaces the inclusive one (the default).
    #[default]
    ExclusiveWins,
    /// The inclusive bound replaces the exclusive one.
    InclusiveWins,
    /// Both bounds are enforced.
    Both,
    /// The schema is rejected with `ConflictingBounds`.
    Reject,
}

/// Whether `readonly`/`perturbs` flags flow from a base property to a
/// same-named redeclaration in a derived stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlagInheritance {
    /// Flags left unset by the redeclaration are taken from the base.
    #[default]
    Inherit,
    /// A redeclaration must restate its flags; unset means `false`.
    Redeclare,
}

/// Options for a binding run.
///
/// # Examples
///
/// ```
/// use stackdef_core::{BindOptions, BoundPrecedence};
///
/// let options: BindOptions = serde_json::from_str(r#"{"bound_precedence": "both"}"#).unwrap();
/// assert_eq!(options.bound_precedence, BoundPrecedence::Both);
/// assert_eq!(options.jobs, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindOptions {
    pub bound_precedence: BoundPrecedence,
    pub flag_inheritance: FlagInheritance,
    /// Worker threads for the scheduler (default: rayon's choice).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}
