//! Combining algorithms.
//!
//! The same closed family is used by policies (over rule outcomes) and by
//! policy sets (over child outcomes). Combining is incremental so the tree
//! walk can stop feeding children once the result can no longer change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::decision::Outcome;
use crate::error::PolicyError;

/// Strategy for merging child outcomes into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    /// First outcome that is not `NotApplicable`, in declared order.
    FirstApplicable,
    /// Deny, then Indeterminate, then Permit, then `NotApplicable`.
    DenyOverrides,
    /// Permit, then Indeterminate, then Deny, then `NotApplicable`.
    PermitOverrides,
    /// At most one child may apply; more is an authoring conflict.
    OnlyOneApplicable,
}

impl CombiningAlgorithm {
    pub const ALL: [Self; 4] = [
        Self::FirstApplicable,
        Self::DenyOverrides,
        Self::PermitOverrides,
        Self::OnlyOneApplicable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstApplicable => "first-applicable",
            Self::DenyOverrides => "deny-overrides",
            Self::PermitOverrides => "permit-overrides",
            Self::OnlyOneApplicable => "only-one-applicable",
        }
    }

    /// Combines a complete list of outcomes.
    pub fn combine(self, outcomes: impl IntoIterator<Item = Outcome>) -> Outcome {
        let mut combiner = Combiner::new(self);
        for outcome in outcomes {
            if combiner.is_settled() {
                break;
            }
            combiner.push(outcome);
        }
        combiner.finish().0
    }
}

impl fmt::Display for CombiningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombiningAlgorithm {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownAlgorithm(s.to_string()))
    }
}

/// Incremental combiner.
///
/// Children are pushed in declared order. Once [`Combiner::is_settled`]
/// returns true further pushes are ignored.
#[derive(Debug, Clone)]
pub struct Combiner {
    algorithm: CombiningAlgorithm,
    next_index: usize,
    permits: Vec<usize>,
    denies: Vec<usize>,
    indeterminates: Vec<usize>,
    settled: bool,
}

impl Combiner {
    pub fn new(algorithm: CombiningAlgorithm) -> Self {
        Self {
            algorithm,
            next_index: 0,
            permits: Vec::new(),
            denies: Vec::new(),
            indeterminates: Vec::new(),
            settled: false,
        }
    }

    pub fn algorithm(&self) -> CombiningAlgorithm {
        self.algorithm
    }

    /// True when no further child can change the result.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    fn applicable_count(&self) -> usize {
        self.permits.len() + self.denies.len() + self.indeterminates.len()
    }

    pub fn push(&mut self, outcome: Outcome) {
        if self.settled {
            return;
        }

        let index = self.next_index;
        self.next_index += 1;

        match outcome {
            Outcome::Permit => self.permits.push(index),
            Outcome::Deny => self.denies.push(index),
            Outcome::Indeterminate => self.indeterminates.push(index),
            Outcome::NotApplicable => return,
        }

        self.settled = match self.algorithm {
            CombiningAlgorithm::FirstApplicable => true,
            CombiningAlgorithm::DenyOverrides => outcome == Outcome::Deny,
            CombiningAlgorithm::PermitOverrides => outcome == Outcome::Permit,
            CombiningAlgorithm::OnlyOneApplicable => self.applicable_count() > 1,
        };
    }

    /// Final outcome plus the indices of the children that determined it.
    pub fn finish(self) -> (Outcome, Vec<usize>) {
        let Self {
            algorithm,
            permits,
            denies,
            indeterminates,
            ..
        } = self;

        match algorithm {
            CombiningAlgorithm::FirstApplicable => {
                // At most one applicable child was accepted.
                if let Some(&i) = permits.first() {
                    (Outcome::Permit, vec![i])
                } else if let Some(&i) = denies.first() {
                    (Outcome::Deny, vec![i])
                } else if let Some(&i) = indeterminates.first() {
                    (Outcome::Indeterminate, vec![i])
                } else {
                    (Outcome::NotApplicable, Vec::new())
                }
            }
            CombiningAlgorithm::DenyOverrides => {
                overrides(Outcome::Deny, denies, indeterminates, Outcome::Permit, permits)
            }
            CombiningAlgorithm::PermitOverrides => {
                overrides(Outcome::Permit, permits, indeterminates, Outcome::Deny, denies)
            }
            CombiningAlgorithm::OnlyOneApplicable => {
                let mut applicable: Vec<(usize, Outcome)> = permits
                    .into_iter()
                    .map(|i| (i, Outcome::Permit))
                    .chain(denies.into_iter().map(|i| (i, Outcome::Deny)))
                    .chain(indeterminates.into_iter().map(|i| (i, Outcome::Indeterminate)))
                    .collect();
                applicable.sort_unstable_by_key(|(i, _)| *i);

                match applicable.as_slice() {
                    [] => (Outcome::NotApplicable, Vec::new()),
                    [(i, outcome)] => (*outcome, vec![*i]),
                    conflicting => (
                        Outcome::Indeterminate,
                        conflicting.iter().map(|(i, _)| *i).collect(),
                    ),
                }
            }
        }
    }
}

fn overrides(
    dominant: Outcome,
    dominant_at: Vec<usize>,
    indeterminate_at: Vec<usize>,
    weaker: Outcome,
    weaker_at: Vec<usize>,
) -> (Outcome, Vec<usize>) {
    if !dominant_at.is_empty() {
        (dominant, dominant_at)
    } else if !indeterminate_at.is_empty() {
        (Outcome::Indeterminate, indeterminate_at)
    } else if !weaker_at.is_empty() {
        (weaker, weaker_at)
    } else {
        (Outcome::NotApplicable, Vec::new())
    }
}
