//! Rules: an effect, an applicability matcher, and a condition.

use serde::{Deserialize, Serialize};

use crate::attributes::Request;
use crate::condition::{self, Condition, EvalOptions, TriState};
use crate::decision::Outcome;
use crate::matcher::Matcher;

// ============================================================================
// Effect
// ============================================================================

/// The effect a rule declares when it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Permit,
    Deny,
}

impl Default for Effect {
    /// Defaults to `Deny` (deny unless explicitly permitted).
    fn default() -> Self {
        Self::Deny
    }
}

// ============================================================================
// Obligation
// ============================================================================

/// Advisory directive attached to a rule and passed through to the caller.
///
/// The engine never inspects the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Obligation {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

// ============================================================================
// Rule
// ============================================================================

/// A single rule within a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Identifier reported in traces and audit logs.
    pub id: String,
    pub effect: Effect,
    /// Requests the rule applies to. Checked before the condition.
    #[serde(default)]
    pub matcher: Matcher,
    /// Must be true for the effect to apply. Defaults to `true`.
    #[serde(default)]
    pub condition: Condition,
    /// Higher values are evaluated first; ties keep declared order.
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Obligation>,
}

impl Rule {
    /// An unconditional rule that applies to every request.
    pub fn new(id: impl Into<String>, effect: Effect) -> Self {
        Self {
            id: id.into(),
            effect,
            matcher: Matcher::Any,
            condition: Condition::Constant(true),
            priority: 0,
            obligations: Vec::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_obligation(mut self, obligation: Obligation) -> Self {
        self.obligations.push(obligation);
        self
    }

    /// Applies the rule to a request.
    ///
    /// The matcher is checked first; the condition is only evaluated for
    /// applicable requests. A false condition means `NotApplicable`.
    pub fn apply(&self, request: &Request, options: &EvalOptions) -> Outcome {
        match self.matcher.applies(request, options) {
            TriState::False => return Outcome::NotApplicable,
            TriState::Indeterminate => return Outcome::Indeterminate,
            TriState::True => {}
        }

        match condition::evaluate(&self.condition, request, options) {
            TriState::True => self.effect.into(),
            TriState::False => Outcome::NotApplicable,
            TriState::Indeterminate => Outcome::Indeterminate,
        }
    }
}
