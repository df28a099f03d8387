//! # verdict: Attribute-Based Policy Decisions
//!
//! Evaluates a request (subject, resource, action and environment attributes)
//! against a hierarchical policy tree and returns a single decision together
//! with the trace of every rule and policy that contributed to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Request                                     │
//! │  (subject / resource / action / environment) │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Engine                                      │
//! │  ├─ Snapshot of the active tree (Arc swap)   │
//! │  ├─ Decision cache (versioned, SIEVE)        │
//! │  └─ Post-order walk of the policy tree       │
//! │       ├─ Targets / matchers                  │
//! │       ├─ Conditions (three-valued logic)     │
//! │       └─ Combining algorithms                │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Decision                                    │
//! │  - Permit / Deny / NotApplicable /           │
//! │    Indeterminate                             │
//! │  - Determining rule ids and trace            │
//! │  - Obligations of the winning rules          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! `NotApplicable` is never turned into `Deny` by the engine. Callers pick
//! their own default, usually with [`Decision::resolve_with_default`].
//!
//! ## Examples
//!
//! ```
//! use verdict::attributes::{Category, Request};
//! use verdict::combining::CombiningAlgorithm;
//! use verdict::condition::Condition;
//! use verdict::decision::Outcome;
//! use verdict::engine::{Engine, EngineConfig};
//! use verdict::matcher::{AttributeMatch, Matcher};
//! use verdict::policy::{Policy, PolicySet};
//! use verdict::rule::{Effect, Rule};
//!
//! let doc1 = Matcher::all_of([AttributeMatch::equals(Category::Resource, "id", "doc1")]);
//!
//! let root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides).with_policy(
//!     Policy::new("documents", CombiningAlgorithm::DenyOverrides)
//!         .with_rule(
//!             Rule::new("admins-read", Effect::Permit)
//!                 .with_matcher(doc1.clone())
//!                 .with_condition(Condition::attribute_equals(Category::Subject, "role", "admin")),
//!         )
//!         .with_rule(Rule::new("locked", Effect::Deny).with_matcher(doc1)),
//! );
//!
//! let engine = Engine::new(root, EngineConfig::default()).unwrap();
//! let request = Request::builder()
//!     .subject("role", "admin")
//!     .resource("id", "doc1")
//!     .build();
//!
//! let decision = engine.decide(&request);
//! assert_eq!(decision.outcome, Outcome::Deny);
//! assert_eq!(decision.determined_by, ["locked"]);
//! ```

pub mod attributes;
pub mod cache;
pub mod combining;
pub mod condition;
pub mod decision;
pub mod document;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod pattern;
pub mod policy;
pub mod rule;

// Kani proofs for bounded model checking
#[cfg(any(test, kani))]
mod kani_proofs;

pub use attributes::{Attribute, AttributeKey, AttributeValue, Category, Request, RequestBuilder};
pub use combining::CombiningAlgorithm;
pub use condition::{Condition, EvalOptions, TriState};
pub use decision::{Decision, Outcome, TraceEntry};
pub use document::PolicyDocument;
pub use engine::{Engine, EngineConfig, Snapshot};
pub use error::{PatternError, PolicyError, RequestError};
pub use evaluator::evaluate;
pub use policy::{CompiledPolicySet, Policy, PolicyNode, PolicySet, TreeLimits};
pub use rule::{Effect, Obligation, Rule};
