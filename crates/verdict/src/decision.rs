//! Decisions and their audit trail.

use serde::{Deserialize, Serialize};

use crate::rule::{Effect, Obligation};

// ============================================================================
// Outcome
// ============================================================================

/// Result of evaluating a rule, policy, policy set, or a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Permit,
    Deny,
    /// Nothing applied. Distinct from `Deny`; the caller picks the default.
    NotApplicable,
    /// Something applied but could not be resolved.
    Indeterminate,
}

impl Outcome {
    pub fn is_applicable(self) -> bool {
        self != Self::NotApplicable
    }
}

impl From<Effect> for Outcome {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Permit => Self::Permit,
            Effect::Deny => Self::Deny,
        }
    }
}

// ============================================================================
// Trace
// ============================================================================

/// Kind of node a trace entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Rule,
    Policy,
    PolicySet,
}

/// One evaluated node whose outcome was not `NotApplicable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: String,
    pub kind: NodeKind,
    pub outcome: Outcome,
    /// Root policy set is depth 0.
    pub depth: usize,
}

// ============================================================================
// Decision
// ============================================================================

/// The answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    /// Ids of the rules (or of nodes whose target faulted) that determined the outcome.
    pub determined_by: Vec<String>,
    /// Every contributing node, children before parents.
    pub trace: Vec<TraceEntry>,
    /// Obligations of determining rules whose effect matches the outcome.
    pub obligations: Vec<Obligation>,
}

impl Decision {
    /// A decision with nothing applicable.
    pub fn not_applicable() -> Self {
        Self {
            outcome: Outcome::NotApplicable,
            determined_by: Vec::new(),
            trace: Vec::new(),
            obligations: Vec::new(),
        }
    }

    pub fn is_permit(&self) -> bool {
        self.outcome == Outcome::Permit
    }

    /// Collapses the outcome to allow/deny using `default` for anything
    /// other than an explicit permit or deny.
    pub fn resolve_with_default(&self, default: Effect) -> Effect {
        match self.outcome {
            Outcome::Permit => Effect::Permit,
            Outcome::Deny => Effect::Deny,
            Outcome::NotApplicable | Outcome::Indeterminate => default,
        }
    }
}
