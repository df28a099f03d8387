//! Policy documents.
//!
//! A document is the language-neutral ingress form of a policy tree: flat
//! lists of policies and policy sets, where sets name their children by id.
//! [`PolicyDocument::build`] resolves the references into an owned tree and
//! compiles it.
//!
//! ```json
//! {
//!   "root": "main",
//!   "policy_sets": [
//!     { "id": "main", "algorithm": "deny-overrides", "children": ["docs"] }
//!   ],
//!   "policies": [
//!     { "id": "docs", "algorithm": "first-applicable",
//!       "rules": [{ "id": "deny-all", "effect": "deny" }] }
//!   ]
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::combining::CombiningAlgorithm;
use crate::error::{PolicyError, Result};
use crate::matcher::Matcher;
use crate::policy::{CompiledPolicySet, Policy, PolicyNode, PolicySet, TreeLimits};
use crate::rule::Rule;

/// A policy as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub target: Matcher,
    /// Combining algorithm name, e.g. `deny-overrides`.
    pub algorithm: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A policy set as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySetDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub target: Matcher,
    pub algorithm: String,
    /// Ids of child policies or policy sets, in evaluation order.
    #[serde(default)]
    pub children: Vec<String>,
}

/// Flat, reference-based description of a policy tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Id of the policy set at the top of the tree.
    pub root: String,
    #[serde(default)]
    pub policy_sets: Vec<PolicySetDef>,
    #[serde(default)]
    pub policies: Vec<PolicyDef>,
}

enum Definition {
    Policy(PolicyDef),
    Set(PolicySetDef),
}

/// A set whose children are still being resolved.
struct Pending {
    set: PolicySet,
    children: std::vec::IntoIter<String>,
}

impl Pending {
    fn new(def: PolicySetDef) -> Result<Self> {
        let mut set = PolicySet::new(def.id, def.algorithm.parse::<CombiningAlgorithm>()?)
            .with_target(def.target);
        set.description = def.description;
        Ok(Self {
            set,
            children: def.children.into_iter(),
        })
    }
}

impl PolicyDocument {
    /// Parses a document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Document`] when the JSON does not match the
    /// document schema.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves references into an owned tree and compiles it.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::UnknownReference`] for a child id (or root) that is not defined
    /// - [`PolicyError::CyclicReference`] when a set transitively contains itself
    /// - [`PolicyError::DuplicateId`] for a repeated definition or a child
    ///   referenced from more than one place
    /// - [`PolicyError::UnknownAlgorithm`] for an unsupported algorithm name
    /// - anything [`CompiledPolicySet::compile`] rejects
    pub fn build(self, limits: &TreeLimits) -> Result<CompiledPolicySet> {
        let root_id = self.root;
        let mut definitions: HashMap<String, Definition> = HashMap::new();

        let named = self
            .policy_sets
            .into_iter()
            .map(|def| (def.id.clone(), Definition::Set(def)))
            .chain(
                self.policies
                    .into_iter()
                    .map(|def| (def.id.clone(), Definition::Policy(def))),
            );
        for (id, definition) in named {
            if id.is_empty() {
                let kind = match definition {
                    Definition::Policy(_) => "policy",
                    Definition::Set(_) => "policy set",
                };
                return Err(PolicyError::EmptyId { kind });
            }
            if definitions.contains_key(&id) {
                return Err(PolicyError::DuplicateId(id));
            }
            definitions.insert(id, definition);
        }
        let defined: Vec<String> = definitions.keys().cloned().collect();

        let root_def = match definitions.remove(&root_id) {
            Some(Definition::Set(def)) => def,
            Some(Definition::Policy(_)) | None => {
                return Err(PolicyError::UnknownReference {
                    parent: "document root".to_string(),
                    child: root_id,
                });
            }
        };

        let mut stack = vec![Pending::new(root_def)?];
        let mut root = None;

        while let Some(top) = stack.last_mut() {
            let Some(child_id) = top.children.next() else {
                let Some(done) = stack.pop() else { break };
                match stack.last_mut() {
                    Some(parent) => parent.set.children.push(PolicyNode::PolicySet(done.set)),
                    None => root = Some(done.set),
                }
                continue;
            };

            match definitions.remove(&child_id) {
                Some(Definition::Policy(def)) => {
                    let mut policy =
                        Policy::new(def.id, def.algorithm.parse::<CombiningAlgorithm>()?)
                            .with_target(def.target);
                    policy.description = def.description;
                    policy.rules = def.rules;
                    top.set.children.push(PolicyNode::Policy(policy));
                }
                Some(Definition::Set(def)) => stack.push(Pending::new(def)?),
                None => return Err(unresolved(&stack, &defined, child_id)),
            }
        }

        let Some(root) = root else {
            return Err(PolicyError::UnknownReference {
                parent: "document root".to_string(),
                child: root_id,
            });
        };

        if !definitions.is_empty() {
            let mut unused: Vec<&str> = definitions.keys().map(String::as_str).collect();
            unused.sort_unstable();
            warn!(root = %root.id, ?unused, "policy document has unreachable definitions");
        }

        CompiledPolicySet::compile(root, limits)
    }
}

/// Explains why `child` could not be taken from the definitions.
fn unresolved(stack: &[Pending], defined: &[String], child: String) -> PolicyError {
    if let Some(start) = stack.iter().position(|p| p.set.id == child) {
        let mut path: Vec<String> = stack[start..].iter().map(|p| p.set.id.clone()).collect();
        path.push(child);
        return PolicyError::CyclicReference { path };
    }

    if defined.contains(&child) {
        // Already placed elsewhere in the tree.
        return PolicyError::DuplicateId(child);
    }

    let parent = stack
        .last()
        .map_or_else(String::new, |p| p.set.id.clone());
    PolicyError::UnknownReference { parent, child }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Request;
    use crate::decision::Outcome;
    use crate::evaluator;

    fn build(json: serde_json::Value) -> Result<CompiledPolicySet> {
        let document: PolicyDocument = serde_json::from_value(json)?;
        document.build(&TreeLimits::default())
    }

    #[test]
    fn test_builds_nested_tree_in_declared_order() {
        let compiled = build(serde_json::json!({
            "root": "main",
            "policy_sets": [
                { "id": "main", "algorithm": "first-applicable", "children": ["inner", "fallback"] },
                { "id": "inner", "algorithm": "deny-overrides", "children": ["docs"],
                  "description": "document access" }
            ],
            "policies": [
                { "id": "docs", "algorithm": "permit-overrides",
                  "rules": [{ "id": "permit-docs", "effect": "permit" }] },
                { "id": "fallback", "algorithm": "first-applicable",
                  "rules": [{ "id": "deny-all", "effect": "deny" }] }
            ]
        }))
        .unwrap();

        let root = compiled.root();
        let ids: Vec<&str> = root.children.iter().map(PolicyNode::id).collect();
        assert_eq!(ids, ["inner", "fallback"]);
        let PolicyNode::PolicySet(inner) = &root.children[0] else {
            panic!("expected nested set");
        };
        assert_eq!(inner.description.as_deref(), Some("document access"));
        assert_eq!(inner.algorithm, CombiningAlgorithm::DenyOverrides);

        let decision = evaluator::evaluate(&Request::default(), &compiled);
        assert_eq!(decision.outcome, Outcome::Permit);
        assert_eq!(decision.determined_by, ["permit-docs"]);
    }

    #[test]
    fn test_unknown_reference() {
        let err = build(serde_json::json!({
            "root": "main",
            "policy_sets": [{ "id": "main", "algorithm": "deny-overrides", "children": ["ghost"] }]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UnknownReference { parent, child } if parent == "main" && child == "ghost"
        ));
    }

    #[test]
    fn test_missing_root() {
        let err = build(serde_json::json!({ "root": "main" })).unwrap_err();
        assert!(matches!(err, PolicyError::UnknownReference { child, .. } if child == "main"));
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let err = build(serde_json::json!({
            "root": "a",
            "policy_sets": [
                { "id": "a", "algorithm": "deny-overrides", "children": ["b"] },
                { "id": "b", "algorithm": "deny-overrides", "children": ["c"] },
                { "id": "c", "algorithm": "deny-overrides", "children": ["a"] }
            ]
        }))
        .unwrap_err();
        assert!(matches!(&err, PolicyError::CyclicReference { path } if path == &["a", "b", "c", "a"]));
        assert_eq!(err.to_string(), "Cyclic policy set reference: a -> b -> c -> a");
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = build(serde_json::json!({
            "root": "a",
            "policy_sets": [{ "id": "a", "algorithm": "deny-overrides", "children": ["a"] }]
        }))
        .unwrap_err();
        assert!(matches!(err, PolicyError::CyclicReference { path } if path == ["a", "a"]));
    }

    #[test]
    fn test_shared_child_rejected() {
        let err = build(serde_json::json!({
            "root": "main",
            "policy_sets": [
                { "id": "main", "algorithm": "deny-overrides", "children": ["left", "right"] },
                { "id": "left", "algorithm": "deny-overrides", "children": ["shared"] },
                { "id": "right", "algorithm": "deny-overrides", "children": ["shared"] }
            ],
            "policies": [{ "id": "shared", "algorithm": "deny-overrides" }]
        }))
        .unwrap_err();
        assert!(matches!(err, PolicyError::DuplicateId(id) if id == "shared"));
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let err = build(serde_json::json!({
            "root": "main",
            "policy_sets": [{ "id": "main", "algorithm": "deny-overrides" }],
            "policies": [{ "id": "main", "algorithm": "deny-overrides" }]
        }))
        .unwrap_err();
        assert!(matches!(err, PolicyError::DuplicateId(id) if id == "main"));
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = build(serde_json::json!({
            "root": "main",
            "policy_sets": [{ "id": "main", "algorithm": "majority-vote" }]
        }))
        .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownAlgorithm(name) if name == "majority-vote"));
    }

    #[test]
    fn test_invalid_json() {
        let err = PolicyDocument::from_json("{ \"root\": ").unwrap_err();
        assert!(matches!(err, PolicyError::Document(_)));
    }
}
