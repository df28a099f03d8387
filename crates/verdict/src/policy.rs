//! Policies, policy sets, and the validated tree.
//!
//! A [`Policy`] combines rule outcomes; a [`PolicySet`] combines the outcomes
//! of child policies and nested sets. Each node owns its children, so a tree
//! cannot contain cycles. [`CompiledPolicySet`] is the validated, immutable
//! form the engine evaluates.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use verdict_config::LimitsSection;

use crate::attributes::AttributeKey;
use crate::combining::CombiningAlgorithm;
use crate::error::{PolicyError, Result};
use crate::matcher::Matcher;
use crate::rule::Rule;

// ============================================================================
// Policy
// ============================================================================

/// An ordered collection of rules plus a rule-combining algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Requests the policy applies to.
    #[serde(default)]
    pub target: Matcher,
    pub algorithm: CombiningAlgorithm,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn new(id: impl Into<String>, algorithm: CombiningAlgorithm) -> Self {
        Self {
            id: id.into(),
            description: None,
            target: Matcher::Any,
            algorithm,
            rules: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_target(mut self, target: Matcher) -> Self {
        self.target = target;
        self
    }

    /// Adds a rule to the policy (builder pattern).
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

// ============================================================================
// PolicySet
// ============================================================================

/// A child of a policy set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyNode {
    Policy(Policy),
    PolicySet(PolicySet),
}

impl PolicyNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Policy(policy) => &policy.id,
            Self::PolicySet(set) => &set.id,
        }
    }
}

impl From<Policy> for PolicyNode {
    fn from(policy: Policy) -> Self {
        Self::Policy(policy)
    }
}

impl From<PolicySet> for PolicyNode {
    fn from(set: PolicySet) -> Self {
        Self::PolicySet(set)
    }
}

/// An ordered collection of policies and nested sets plus a
/// policy-combining algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub target: Matcher,
    pub algorithm: CombiningAlgorithm,
    #[serde(default)]
    pub children: Vec<PolicyNode>,
}

impl PolicySet {
    pub fn new(id: impl Into<String>, algorithm: CombiningAlgorithm) -> Self {
        Self {
            id: id.into(),
            description: None,
            target: Matcher::Any,
            algorithm,
            children: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_target(mut self, target: Matcher) -> Self {
        self.target = target;
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.children.push(PolicyNode::Policy(policy));
        self
    }

    pub fn with_set(mut self, set: PolicySet) -> Self {
        self.children.push(PolicyNode::PolicySet(set));
        self
    }
}

impl Drop for PolicySet {
    // Unlinks nested sets onto a heap stack so dropping a deep tree does not
    // recurse once per level.
    fn drop(&mut self) {
        let mut pending: Vec<PolicySet> = Vec::new();
        take_nested_sets(&mut self.children, &mut pending);
        while let Some(mut set) = pending.pop() {
            take_nested_sets(&mut set.children, &mut pending);
        }
    }
}

fn take_nested_sets(children: &mut Vec<PolicyNode>, into: &mut Vec<PolicySet>) {
    for child in children.drain(..) {
        if let PolicyNode::PolicySet(set) = child {
            into.push(set);
        }
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Structural limits enforced when a tree is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLimits {
    /// Deepest allowed policy or policy set; the root is depth 0.
    pub max_policy_depth: usize,
    pub max_condition_depth: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self::from(&LimitsSection::default())
    }
}

impl From<&LimitsSection> for TreeLimits {
    fn from(limits: &LimitsSection) -> Self {
        Self {
            max_policy_depth: limits.max_policy_depth,
            max_condition_depth: limits.max_condition_depth,
        }
    }
}

/// Node counts of a compiled tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub policy_sets: usize,
    pub policies: usize,
    pub rules: usize,
    /// Depth of the deepest policy or set.
    pub depth: usize,
}

/// A validated, immutable policy tree.
///
/// Rules inside every policy are ordered by descending priority (stable, so
/// equal priorities keep their declared order).
#[derive(Debug, Clone)]
pub struct CompiledPolicySet {
    root: PolicySet,
    relevant_keys: BTreeSet<AttributeKey>,
    stats: TreeStats,
}

impl CompiledPolicySet {
    /// Validates `root` and prepares it for evaluation.
    ///
    /// # Errors
    ///
    /// Rejects empty or duplicate ids, trees deeper than
    /// `limits.max_policy_depth`, conditions deeper than
    /// `limits.max_condition_depth`, and malformed literal patterns.
    pub fn compile(mut root: PolicySet, limits: &TreeLimits) -> Result<Self> {
        let mut ids: HashSet<String> = HashSet::new();
        let mut relevant_keys = BTreeSet::new();
        let mut stats = TreeStats::default();

        let mut claim = |kind: &'static str, id: &str| -> Result<()> {
            if id.is_empty() {
                return Err(PolicyError::EmptyId { kind });
            }
            if !ids.insert(id.to_string()) {
                return Err(PolicyError::DuplicateId(id.to_string()));
            }
            Ok(())
        };

        let mut stack: Vec<(&mut PolicySet, usize)> = vec![(&mut root, 0)];

        while let Some((set, depth)) = stack.pop() {
            claim("policy set", &set.id)?;
            check_depth(&set.id, depth, limits)?;
            set.target.collect_keys(&mut relevant_keys);
            stats.policy_sets += 1;
            stats.depth = stats.depth.max(depth);

            for child in &mut set.children {
                match child {
                    PolicyNode::PolicySet(nested) => stack.push((nested, depth + 1)),
                    PolicyNode::Policy(policy) => {
                        claim("policy", &policy.id)?;
                        check_depth(&policy.id, depth + 1, limits)?;
                        policy.target.collect_keys(&mut relevant_keys);
                        stats.policies += 1;
                        stats.depth = stats.depth.max(depth + 1);

                        policy.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
                        for rule in &policy.rules {
                            claim("rule", &rule.id)?;
                            rule.matcher.collect_keys(&mut relevant_keys);
                            rule.condition.check(
                                &rule.id,
                                limits.max_condition_depth,
                                &mut relevant_keys,
                            )?;
                            stats.rules += 1;
                        }
                    }
                }
            }
        }

        Ok(Self {
            root,
            relevant_keys,
            stats,
        })
    }

    pub fn root(&self) -> &PolicySet {
        &self.root
    }

    /// Every attribute any matcher or condition in the tree reads.
    pub fn relevant_keys(&self) -> &BTreeSet<AttributeKey> {
        &self.relevant_keys
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }
}

fn check_depth(id: &str, depth: usize, limits: &TreeLimits) -> Result<()> {
    if depth > limits.max_policy_depth {
        return Err(PolicyError::TooDeep {
            id: id.to_string(),
            what: "policy",
            limit: limits.max_policy_depth,
        });
    }
    Ok(())
}
