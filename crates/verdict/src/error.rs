//! Error types.
//!
//! Only structural problems are errors. Anything that goes wrong while
//! evaluating a single request is folded into `Indeterminate` instead.

use thiserror::Error;

/// A policy tree or document that must not become the active tree.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A rule, policy, or policy set has an empty id.
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },

    /// Two nodes in the same tree share an id.
    #[error("Duplicate id '{0}' in policy tree")]
    DuplicateId(String),

    /// A policy set references a child that the document does not define.
    #[error("Policy set '{parent}' references unknown child '{child}'")]
    UnknownReference { parent: String, child: String },

    /// A policy set (transitively) contains itself.
    #[error("Cyclic policy set reference: {}", path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    /// Combining algorithm name is not one of the supported names.
    #[error("Unknown combining algorithm '{0}'")]
    UnknownAlgorithm(String),

    /// A literal pattern cannot be compiled.
    #[error("Malformed pattern in '{owner}': {source}")]
    MalformedPattern {
        owner: String,
        #[source]
        source: PatternError,
    },

    /// Nesting exceeds the configured limit.
    #[error("'{id}' exceeds the {what} depth limit of {limit}")]
    TooDeep {
        id: String,
        what: &'static str,
        limit: usize,
    },

    /// The policy document is not valid JSON for the expected schema.
    #[error("Invalid policy document: {0}")]
    Document(#[from] serde_json::Error),
}

/// A raw attribute value that has no typed counterpart.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Objects, nested arrays, and arrays of non-strings are not attribute values.
    #[error("Unsupported value for {category}.{name}: {reason}")]
    UnsupportedValue {
        category: String,
        name: String,
        reason: String,
    },

    /// Category name is not subject/resource/action/environment.
    #[error("Unknown attribute category '{0}'")]
    UnknownCategory(String),
}

/// Pattern compilation or matching failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern '{0}' ends with a dangling escape")]
    DanglingEscape(String),

    #[error("match exceeded the step limit of {0}")]
    StepLimitExceeded(u64),
}

/// Result type for policy construction.
pub type Result<T, E = PolicyError> = std::result::Result<T, E>;
