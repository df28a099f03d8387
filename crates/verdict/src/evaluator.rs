//! Policy tree evaluation.
//!
//! Walks a compiled tree in post-order: rules resolve inside their policy,
//! policies and nested sets resolve before the set that contains them. The
//! walk keeps its own stack of open policy sets, so tree depth is bounded by
//! heap, not by the call stack.

use tracing::trace;

use crate::attributes::Request;
use crate::combining::Combiner;
use crate::condition::{EvalOptions, TriState};
use crate::decision::{Decision, NodeKind, Outcome, TraceEntry};
use crate::matcher::Matcher;
use crate::policy::{CompiledPolicySet, Policy, PolicyNode, PolicySet};
use crate::rule::Rule;

// ============================================================================
// Public API
// ============================================================================

/// Evaluates a request against a compiled tree with default options.
pub fn evaluate(request: &Request, policies: &CompiledPolicySet) -> Decision {
    evaluate_with(request, policies, &EvalOptions::default())
}

/// Evaluates a request against a compiled tree.
///
/// # Postcondition
///
/// Always returns a `Decision`. Undefined attributes, type mismatches,
/// pattern faults and only-one-applicable conflicts all surface as
/// `Outcome::Indeterminate`.
pub fn evaluate_with(
    request: &Request,
    policies: &CompiledPolicySet,
    options: &EvalOptions,
) -> Decision {
    let mut walk = Walk {
        request,
        options,
        trace: Vec::new(),
    };
    let result = walk.run(policies.root());

    let obligations = result
        .determinants
        .iter()
        .filter_map(|d| match d {
            Determinant::Rule(rule) if Outcome::from(rule.effect) == result.outcome => {
                Some(rule.obligations.iter().cloned())
            }
            _ => None,
        })
        .flatten()
        .collect();

    Decision {
        outcome: result.outcome,
        determined_by: result
            .determinants
            .iter()
            .map(|d| d.id().to_string())
            .collect(),
        trace: walk.trace,
        obligations,
    }
}

// ============================================================================
// Walk
// ============================================================================

/// What determined a node's outcome.
#[derive(Debug, Clone, Copy)]
enum Determinant<'t> {
    Rule(&'t Rule),
    /// A policy or set whose target could not be resolved.
    Target(&'t str),
}

impl Determinant<'_> {
    fn id(&self) -> &str {
        match self {
            Self::Rule(rule) => &rule.id,
            Self::Target(id) => id,
        }
    }
}

#[derive(Debug)]
struct NodeResult<'t> {
    outcome: Outcome,
    determinants: Vec<Determinant<'t>>,
}

impl NodeResult<'_> {
    fn not_applicable() -> Self {
        Self {
            outcome: Outcome::NotApplicable,
            determinants: Vec::new(),
        }
    }
}

/// An open policy set awaiting child results.
struct SetFrame<'t> {
    set: &'t PolicySet,
    depth: usize,
    next: usize,
    combiner: Combiner,
    /// Determinants of every child pushed into the combiner, by push order.
    children: Vec<Vec<Determinant<'t>>>,
}

impl<'t> SetFrame<'t> {
    fn accept(&mut self, result: NodeResult<'t>) {
        self.combiner.push(result.outcome);
        self.children.push(result.determinants);
    }

    /// Next child to evaluate, or `None` once the set is resolved.
    fn advance(&mut self) -> Option<&'t PolicyNode> {
        if self.combiner.is_settled() {
            return None;
        }
        let child = self.set.children.get(self.next)?;
        self.next += 1;
        Some(child)
    }
}

struct Walk<'r> {
    request: &'r Request,
    options: &'r EvalOptions,
    trace: Vec<TraceEntry>,
}

enum Entered<'t> {
    Open(SetFrame<'t>),
    Resolved(NodeResult<'t>),
}

impl Walk<'_> {
    fn run<'t>(&mut self, root: &'t PolicySet) -> NodeResult<'t> {
        let mut stack: Vec<SetFrame<'t>> = Vec::new();
        let mut pending = match self.enter_set(root, 0) {
            Entered::Open(frame) => {
                stack.push(frame);
                None
            }
            Entered::Resolved(result) => return result,
        };

        while let Some(frame) = stack.last_mut() {
            if let Some(result) = pending.take() {
                frame.accept(result);
            }
            let depth = frame.depth + 1;

            match frame.advance() {
                None => {
                    let Some(frame) = stack.pop() else { break };
                    pending = Some(self.close_set(frame));
                }
                Some(PolicyNode::Policy(policy)) => {
                    pending = Some(self.evaluate_policy(policy, depth));
                }
                Some(PolicyNode::PolicySet(nested)) => match self.enter_set(nested, depth) {
                    Entered::Open(frame) => stack.push(frame),
                    Entered::Resolved(result) => pending = Some(result),
                },
            }
        }

        pending.unwrap_or_else(NodeResult::not_applicable)
    }

    fn enter_set<'t>(&mut self, set: &'t PolicySet, depth: usize) -> Entered<'t> {
        match self.check_target(&set.target, &set.id, NodeKind::PolicySet, depth) {
            Some(result) => Entered::Resolved(result),
            None => Entered::Open(SetFrame {
                set,
                depth,
                next: 0,
                combiner: Combiner::new(set.algorithm),
                children: Vec::new(),
            }),
        }
    }

    fn close_set<'t>(&mut self, frame: SetFrame<'t>) -> NodeResult<'t> {
        let SetFrame {
            set,
            depth,
            combiner,
            mut children,
            ..
        } = frame;
        let (outcome, indices) = combiner.finish();
        let determinants = indices
            .into_iter()
            .flat_map(|i| std::mem::take(&mut children[i]))
            .collect();

        self.record(&set.id, NodeKind::PolicySet, outcome, depth);
        NodeResult {
            outcome,
            determinants,
        }
    }

    fn evaluate_policy<'t>(&mut self, policy: &'t Policy, depth: usize) -> NodeResult<'t> {
        if let Some(result) = self.check_target(&policy.target, &policy.id, NodeKind::Policy, depth)
        {
            return result;
        }

        let mut combiner = Combiner::new(policy.algorithm);
        let mut evaluated: Vec<&'t Rule> = Vec::new();

        for rule in &policy.rules {
            if combiner.is_settled() {
                break;
            }
            let outcome = rule.apply(self.request, self.options);
            self.record(&rule.id, NodeKind::Rule, outcome, depth + 1);
            combiner.push(outcome);
            evaluated.push(rule);
        }

        let (outcome, indices) = combiner.finish();
        self.record(&policy.id, NodeKind::Policy, outcome, depth);
        NodeResult {
            outcome,
            determinants: indices
                .into_iter()
                .map(|i| Determinant::Rule(evaluated[i]))
                .collect(),
        }
    }

    /// `None` when the node applies and its children must be evaluated.
    fn check_target<'t>(
        &mut self,
        target: &Matcher,
        id: &'t str,
        kind: NodeKind,
        depth: usize,
    ) -> Option<NodeResult<'t>> {
        match target.applies(self.request, self.options) {
            TriState::True => None,
            TriState::False => Some(NodeResult::not_applicable()),
            TriState::Indeterminate => {
                self.record(id, kind, Outcome::Indeterminate, depth);
                Some(NodeResult {
                    outcome: Outcome::Indeterminate,
                    determinants: vec![Determinant::Target(id)],
                })
            }
        }
    }

    fn record(&mut self, id: &str, kind: NodeKind, outcome: Outcome, depth: usize) {
        trace!(id, ?kind, ?outcome, depth, "node evaluated");
        if outcome.is_applicable() {
            self.trace.push(TraceEntry {
                id: id.to_string(),
                kind,
                outcome,
                depth,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Category;
    use crate::combining::CombiningAlgorithm;
    use crate::condition::Condition;
    use crate::matcher::AttributeMatch;
    use crate::policy::TreeLimits;
    use crate::rule::{Effect, Obligation};

    fn compile(root: PolicySet) -> CompiledPolicySet {
        CompiledPolicySet::compile(root, &TreeLimits::default()).unwrap()
    }

    fn admin_request() -> Request {
        Request::builder()
            .subject("role", "admin")
            .resource("id", "doc1")
            .action("id", "read")
            .build()
    }

    #[test]
    fn test_trace_is_post_order_and_skips_not_applicable() {
        let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides)
            .with_policy(
                Policy::new("docs", CombiningAlgorithm::PermitOverrides)
                    .with_rule(
                        Rule::new("guest-read", Effect::Permit).with_condition(
                            Condition::attribute_equals(Category::Subject, "role", "guest"),
                        ),
                    )
                    .with_rule(
                        Rule::new("admin-read", Effect::Permit).with_condition(
                            Condition::attribute_equals(Category::Subject, "role", "admin"),
                        ),
                    ),
            )
            .with_policy(
                Policy::new("billing", CombiningAlgorithm::DenyOverrides)
                    .with_target(Matcher::all_of([AttributeMatch::equals(
                        Category::Resource,
                        "id",
                        "invoice",
                    )]))
                    .with_rule(Rule::new("deny-all", Effect::Deny)),
            );

        let decision = evaluate(&admin_request(), &compile(root));
        assert_eq!(decision.outcome, Outcome::Permit);
        assert_eq!(decision.determined_by, ["admin-read"]);

        let trace: Vec<(&str, NodeKind, usize)> = decision
            .trace
            .iter()
            .map(|e| (e.id.as_str(), e.kind, e.depth))
            .collect();
        assert_eq!(
            trace,
            [
                ("admin-read", NodeKind::Rule, 2),
                ("docs", NodeKind::Policy, 1),
                ("root", NodeKind::PolicySet, 0),
            ]
        );
    }

    #[test]
    fn test_nested_sets_combine_upwards() {
        let inner = PolicySet::new("inner", CombiningAlgorithm::PermitOverrides).with_policy(
            Policy::new("inner-p", CombiningAlgorithm::FirstApplicable)
                .with_rule(Rule::new("inner-permit", Effect::Permit)),
        );
        let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides)
            .with_set(inner)
            .with_policy(
                Policy::new("outer-p", CombiningAlgorithm::FirstApplicable)
                    .with_rule(Rule::new("outer-deny", Effect::Deny)),
            );

        let decision = evaluate(&admin_request(), &compile(root));
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.determined_by, ["outer-deny"]);
        assert_eq!(decision.trace.last().map(|e| e.id.as_str()), Some("root"));
        assert!(decision.trace.iter().any(|e| e.id == "inner" && e.depth == 1));
    }

    #[test]
    fn test_short_circuit_skips_remaining_children() {
        let root = PolicySet::new("root", CombiningAlgorithm::FirstApplicable)
            .with_policy(
                Policy::new("first", CombiningAlgorithm::FirstApplicable)
                    .with_rule(Rule::new("first-deny", Effect::Deny)),
            )
            .with_policy(
                Policy::new("second", CombiningAlgorithm::FirstApplicable)
                    .with_rule(Rule::new("second-permit", Effect::Permit)),
            );

        let decision = evaluate(&admin_request(), &compile(root));
        assert_eq!(decision.outcome, Outcome::Deny);
        assert!(decision.trace.iter().all(|e| e.id != "second"));
    }

    #[test]
    fn test_only_one_applicable_conflict_reports_both_rules() {
        let root = PolicySet::new("root", CombiningAlgorithm::FirstApplicable).with_policy(
            Policy::new("p", CombiningAlgorithm::OnlyOneApplicable)
                .with_rule(Rule::new("a", Effect::Permit))
                .with_rule(Rule::new("b", Effect::Permit)),
        );

        let decision = evaluate(&admin_request(), &compile(root));
        assert_eq!(decision.outcome, Outcome::Indeterminate);
        assert_eq!(decision.determined_by, ["a", "b"]);
        assert!(decision.obligations.is_empty());
    }

    #[test]
    fn test_obligations_follow_winning_effect() {
        let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
            Policy::new("p", CombiningAlgorithm::PermitOverrides)
                .with_rule(
                    Rule::new("permit", Effect::Permit)
                        .with_obligation(Obligation::new("log-access", serde_json::json!({}))),
                )
                .with_rule(
                    Rule::new("deny", Effect::Deny)
                        .with_obligation(Obligation::new("alert", serde_json::Value::Null)),
                ),
        );

        let decision = evaluate(&admin_request(), &compile(root));
        assert_eq!(decision.outcome, Outcome::Permit);
        let ids: Vec<&str> = decision.obligations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["log-access"]);
    }

    #[test]
    fn test_target_fault_is_indeterminate() {
        let pattern = crate::pattern::GlobPattern::new("*a*a*a*b").unwrap();
        let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
            Policy::new("p", CombiningAlgorithm::DenyOverrides)
                .with_target(Matcher::all_of([AttributeMatch::pattern(
                    Category::Resource,
                    "id",
                    pattern,
                )]))
                .with_rule(Rule::new("r", Effect::Permit)),
        );
        let request = Request::builder().resource("id", "a".repeat(500)).build();
        let options = EvalOptions {
            pattern_step_limit: 10,
        };

        let decision = evaluate_with(&request, &compile(root), &options);
        assert_eq!(decision.outcome, Outcome::Indeterminate);
        assert_eq!(decision.determined_by, ["p"]);
    }

    #[test]
    fn test_empty_root_is_not_applicable() {
        let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides);
        let decision = evaluate(&admin_request(), &compile(root));
        assert_eq!(decision, Decision::not_applicable());
    }

    #[test]
    fn test_deep_tree_is_evaluated_iteratively() {
        let depth = 20_000;
        let mut set = PolicySet::new("leaf-set", CombiningAlgorithm::FirstApplicable).with_policy(
            Policy::new("p", CombiningAlgorithm::FirstApplicable)
                .with_rule(Rule::new("permit", Effect::Permit)),
        );
        for level in 0..depth {
            set = PolicySet::new(format!("set-{level}"), CombiningAlgorithm::FirstApplicable)
                .with_set(set);
        }
        let limits = TreeLimits {
            max_policy_depth: depth + 2,
            max_condition_depth: 8,
        };
        let compiled = CompiledPolicySet::compile(set, &limits).unwrap();

        let decision = evaluate(&admin_request(), &compiled);
        assert_eq!(decision.outcome, Outcome::Permit);
        assert_eq!(decision.trace.len(), depth + 3);
    }
}
