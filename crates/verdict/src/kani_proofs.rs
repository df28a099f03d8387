//! Kani proofs for policy evaluation
//!
//! These proofs verify the algebraic properties the combining algorithms and
//! the three-valued logic rely on, using bounded model checking.
//!
//! **Proof Count**: 4 proofs
//!
//! Run with: `cargo kani --tests --harness verify_*`

#[cfg(kani)]
use crate::attributes::{Category, Request};
#[cfg(kani)]
use crate::combining::CombiningAlgorithm;
#[cfg(kani)]
use crate::condition::{Condition, TriState};
#[cfg(kani)]
use crate::decision::Outcome;
#[cfg(kani)]
use crate::evaluator;
#[cfg(kani)]
use crate::policy::{CompiledPolicySet, Policy, PolicySet, TreeLimits};
#[cfg(kani)]
use crate::rule::{Effect, Rule};

#[cfg(kani)]
fn any_tristate() -> TriState {
    match kani::any::<u8>() % 3 {
        0 => TriState::True,
        1 => TriState::False,
        _ => TriState::Indeterminate,
    }
}

#[cfg(kani)]
fn any_outcome() -> Outcome {
    match kani::any::<u8>() % 4 {
        0 => Outcome::Permit,
        1 => Outcome::Deny,
        2 => Outcome::NotApplicable,
        _ => Outcome::Indeterminate,
    }
}

/// Proof #1: Kleene AND/OR are commutative and obey De Morgan
///
/// **Property**: `a ∧ b = b ∧ a`, `a ∨ b = b ∨ a`, `¬(a ∧ b) = ¬a ∨ ¬b`
#[cfg(kani)]
#[kani::proof]
fn verify_kleene_laws() {
    let a = any_tristate();
    let b = any_tristate();

    assert_eq!(a.and(b), b.and(a));
    assert_eq!(a.or(b), b.or(a));
    assert_eq!(!(a.and(b)), (!a).or(!b));
    assert_eq!(!!a, a);
}

/// Proof #2: Deny-overrides dominance
///
/// **Property**: Any Deny among three child outcomes forces Deny
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(5)]
fn verify_deny_overrides_dominance() {
    let mut outcomes = [any_outcome(), any_outcome(), any_outcome()];
    let at = usize::from(kani::any::<u8>() % 3);
    outcomes[at] = Outcome::Deny;

    assert_eq!(CombiningAlgorithm::DenyOverrides.combine(outcomes), Outcome::Deny);
}

/// Proof #3: Permit-overrides dominance
///
/// **Property**: Any Permit among three child outcomes forces Permit
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(5)]
fn verify_permit_overrides_dominance() {
    let mut outcomes = [any_outcome(), any_outcome(), any_outcome()];
    let at = usize::from(kani::any::<u8>() % 3);
    outcomes[at] = Outcome::Permit;

    assert_eq!(CombiningAlgorithm::PermitOverrides.combine(outcomes), Outcome::Permit);
}

/// Proof #4: Evaluation determinism
///
/// **Property**: Same request and tree always produce the same decision
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(10)]
fn verify_evaluation_determinism() {
    let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
        Policy::new("p", CombiningAlgorithm::FirstApplicable)
            .with_rule(
                Rule::new("admin", Effect::Permit)
                    .with_condition(Condition::attribute_equals(Category::Subject, "role", "admin")),
            )
            .with_rule(Rule::new("fallback", Effect::Deny)),
    );
    let Ok(compiled) = CompiledPolicySet::compile(root, &TreeLimits::default()) else {
        return;
    };
    let request = Request::builder().subject("role", "admin").build();

    let first = evaluator::evaluate(&request, &compiled);
    let second = evaluator::evaluate(&request, &compiled);

    assert_eq!(first, second);
    assert_eq!(first.outcome, Outcome::Permit);
}
