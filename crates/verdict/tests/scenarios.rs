//! End-to-end decision scenarios.
//!
//! These tests drive the public API only: build a tree, hand it to an
//! engine, decide requests.

use verdict::attributes::{AttributeValue, Category, Request};
use verdict::combining::CombiningAlgorithm;
use verdict::condition::{AttributeRef, Condition, Operand, Operator};
use verdict::decision::{NodeKind, Outcome};
use verdict::engine::{Engine, EngineConfig};
use verdict::matcher::{AttributeMatch, Matcher};
use verdict::policy::{Policy, PolicySet};
use verdict::rule::{Effect, Obligation, Rule};
use verdict::{PolicyDocument, PolicyError};

fn doc1() -> Matcher {
    Matcher::all_of([AttributeMatch::equals(Category::Resource, "id", "doc1")])
}

/// Rule A permits admins on doc1, rule B denies everyone on doc1.
fn doc1_policy(algorithm: CombiningAlgorithm) -> PolicySet {
    PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
        Policy::new("doc1-access", algorithm)
            .with_rule(
                Rule::new("rule-a", Effect::Permit)
                    .with_matcher(doc1())
                    .with_condition(Condition::attribute_equals(Category::Subject, "role", "admin")),
            )
            .with_rule(Rule::new("rule-b", Effect::Deny).with_matcher(doc1())),
    )
}

fn engine(root: PolicySet) -> Engine {
    Engine::new(root, EngineConfig::default().without_audit()).unwrap()
}

#[test]
fn test_deny_overrides_beats_matching_permit() {
    let engine = engine(doc1_policy(CombiningAlgorithm::DenyOverrides));
    let request = Request::builder()
        .subject("role", "admin")
        .resource("id", "doc1")
        .build();

    let decision = engine.decide(&request);
    assert_eq!(decision.outcome, Outcome::Deny);
    assert_eq!(decision.determined_by, ["rule-b"]);
}

#[test]
fn test_matcher_mismatch_is_not_applicable() {
    let engine = engine(doc1_policy(CombiningAlgorithm::DenyOverrides));
    let request = Request::builder()
        .subject("role", "guest")
        .resource("id", "doc2")
        .build();

    let decision = engine.decide(&request);
    assert_eq!(decision.outcome, Outcome::NotApplicable);
    assert!(decision.trace.is_empty());
    assert_eq!(decision.resolve_with_default(Effect::Deny), Effect::Deny);
}

#[test]
fn test_missing_attribute_with_only_one_applicable_is_indeterminate() {
    let root = PolicySet::new("root", CombiningAlgorithm::OnlyOneApplicable).with_policy(
        Policy::new("clearance", CombiningAlgorithm::OnlyOneApplicable).with_rule(
            Rule::new("cleared", Effect::Permit).with_condition(Condition::leaf(
                Operator::GreaterThan,
                Operand::attribute(Category::Subject, "clearance"),
                Operand::literal(2_i64),
            )),
        ),
    );
    let engine = engine(root);

    let decision = engine.decide(&Request::builder().subject("role", "admin").build());
    assert_eq!(decision.outcome, Outcome::Indeterminate);
    assert_eq!(decision.determined_by, ["cleared"]);
}

#[test]
fn test_first_applicable_is_order_sensitive() {
    let permit_first = PolicySet::new("root", CombiningAlgorithm::FirstApplicable).with_policy(
        Policy::new("p", CombiningAlgorithm::FirstApplicable)
            .with_rule(Rule::new("permit", Effect::Permit))
            .with_rule(Rule::new("deny", Effect::Deny)),
    );
    let deny_first = PolicySet::new("root", CombiningAlgorithm::FirstApplicable).with_policy(
        Policy::new("p", CombiningAlgorithm::FirstApplicable)
            .with_rule(Rule::new("deny", Effect::Deny))
            .with_rule(Rule::new("permit", Effect::Permit)),
    );

    let request = Request::default();
    assert_eq!(engine(permit_first).decide(&request).outcome, Outcome::Permit);
    assert_eq!(engine(deny_first).decide(&request).outcome, Outcome::Deny);
}

#[test]
fn test_priority_reorders_rules() {
    let root = PolicySet::new("root", CombiningAlgorithm::FirstApplicable).with_policy(
        Policy::new("p", CombiningAlgorithm::FirstApplicable)
            .with_rule(Rule::new("permit", Effect::Permit))
            .with_rule(Rule::new("urgent-deny", Effect::Deny).with_priority(100)),
    );
    assert_eq!(
        engine(root).decide(&Request::default()).determined_by,
        ["urgent-deny"]
    );
}

#[test]
fn test_repeated_decisions_are_identical() {
    let engine = engine(doc1_policy(CombiningAlgorithm::PermitOverrides));
    let request = Request::builder()
        .subject("role", "admin")
        .resource("id", "doc1")
        .build();

    let first = engine.decide(&request);
    let second = engine.decide(&request);
    let third = engine.decide(&request);
    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(first.outcome, Outcome::Permit);
}

#[test]
fn test_cache_never_serves_decision_from_replaced_tree() {
    let engine = engine(doc1_policy(CombiningAlgorithm::PermitOverrides));
    let request = Request::builder()
        .subject("role", "admin")
        .resource("id", "doc1")
        .build();
    assert_eq!(engine.decide(&request).outcome, Outcome::Permit);
    assert_eq!(engine.decide(&request).outcome, Outcome::Permit);

    // Same relevant keys, so the fingerprint collides under the new tree.
    engine
        .replace_policy_set(doc1_policy(CombiningAlgorithm::DenyOverrides))
        .unwrap();
    assert_eq!(engine.decide(&request).outcome, Outcome::Deny);
}

#[test]
fn test_trace_lists_contributing_nodes() {
    let engine = engine(doc1_policy(CombiningAlgorithm::PermitOverrides));
    let request = Request::builder()
        .subject("role", "admin")
        .resource("id", "doc1")
        .build();

    let decision = engine.decide(&request);
    let trace: Vec<(&str, NodeKind, Outcome)> = decision
        .trace
        .iter()
        .map(|e| (e.id.as_str(), e.kind, e.outcome))
        .collect();
    assert_eq!(
        trace,
        [
            ("rule-a", NodeKind::Rule, Outcome::Permit),
            ("doc1-access", NodeKind::Policy, Outcome::Permit),
            ("root", NodeKind::PolicySet, Outcome::Permit),
        ]
    );
}

#[test]
fn test_obligations_reach_the_caller() {
    let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
        Policy::new("p", CombiningAlgorithm::DenyOverrides).with_rule(
            Rule::new("audited-read", Effect::Permit).with_obligation(Obligation::new(
                "log",
                serde_json::json!({ "level": "high" }),
            )),
        ),
    );

    let decision = engine(root).decide(&Request::default());
    assert_eq!(decision.obligations.len(), 1);
    assert_eq!(decision.obligations[0].payload["level"], "high");

    let audit = serde_json::to_value(&decision).unwrap();
    assert_eq!(audit["determined_by"][0], "audited-read");
}

#[test]
fn test_set_membership_and_patterns() {
    let condition = Condition::And(vec![
        Condition::leaf(
            Operator::InSet,
            Operand::attribute(Category::Subject, "groups"),
            Operand::literal(AttributeValue::set(["clinicians", "nurses"])),
        ),
        Condition::leaf(
            Operator::MatchesPattern,
            Operand::attribute(Category::Resource, "stream"),
            Operand::literal("patient_*"),
        ),
        Condition::leaf(
            Operator::NotInSet,
            Operand::attribute(Category::Environment, "country"),
            Operand::literal(AttributeValue::set(["XX"])),
        ),
    ]);
    let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
        Policy::new("phi", CombiningAlgorithm::DenyOverrides)
            .with_rule(Rule::new("clinical-access", Effect::Permit).with_condition(condition)),
    );
    let engine = engine(root);

    let request = Request::builder()
        .subject("groups", AttributeValue::set(["nurses", "staff"]))
        .resource("stream", "patient_records")
        .environment("country", "US")
        .build();
    assert_eq!(engine.decide(&request).outcome, Outcome::Permit);

    let request = request.to_builder().resource("stream", "billing").build();
    assert_eq!(engine.decide(&request).outcome, Outcome::NotApplicable);
}

#[test]
fn test_typed_reference_coerces_raw_strings() {
    let condition = Condition::leaf(
        Operator::GreaterThan,
        Operand::Attribute(
            AttributeRef::new(Category::Subject, "clearance").typed(verdict::attributes::ValueKind::Number),
        ),
        Operand::literal(1_i64),
    );
    let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
        Policy::new("p", CombiningAlgorithm::DenyOverrides)
            .with_rule(Rule::new("cleared", Effect::Permit).with_condition(condition)),
    );
    let engine = engine(root);

    let raw = serde_json::json!({ "subject": { "clearance": "3" } });
    let request = Request::from_raw(raw.as_object().unwrap()).unwrap();
    assert_eq!(engine.decide(&request).outcome, Outcome::Permit);

    let raw = serde_json::json!({ "subject": { "clearance": "high" } });
    let request = Request::from_raw(raw.as_object().unwrap()).unwrap();
    assert_eq!(engine.decide(&request).outcome, Outcome::Indeterminate);
}

#[test]
fn test_document_swap_rejects_cycles_and_keeps_old_tree() {
    let engine = engine(doc1_policy(CombiningAlgorithm::DenyOverrides));
    let cyclic = PolicyDocument::from_json(
        r#"{
            "root": "a",
            "policy_sets": [
                { "id": "a", "algorithm": "deny-overrides", "children": ["b"] },
                { "id": "b", "algorithm": "deny-overrides", "children": ["a"] }
            ]
        }"#,
    )
    .unwrap();

    assert!(matches!(
        engine.replace_document(cyclic),
        Err(PolicyError::CyclicReference { .. })
    ));
    assert_eq!(engine.version(), 1);

    let request = Request::builder()
        .subject("role", "admin")
        .resource("id", "doc1")
        .build();
    assert_eq!(engine.decide(&request).outcome, Outcome::Deny);
}
