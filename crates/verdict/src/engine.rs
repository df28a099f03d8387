//! Evaluation engine.
//!
//! Holds the active policy tree as an immutable snapshot behind a pointer
//! swap. Readers clone the `Arc` and evaluate without holding any lock, so an
//! in-flight evaluation keeps using the tree it started with even if the tree
//! is replaced underneath it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};
use verdict_config::{ConfigError, VerdictConfig};

use crate::attributes::{Category, Request};
use crate::cache::{CacheStats, DecisionCache};
use crate::condition::EvalOptions;
use crate::decision::Decision;
use crate::document::PolicyDocument;
use crate::error::Result;
use crate::evaluator;
use crate::policy::{CompiledPolicySet, PolicySet, TreeLimits, TreeStats};

/// Attribute set by [`Engine::decide_for_action`].
pub const ACTION_ID: &str = "id";

// ============================================================================
// Configuration
// ============================================================================

/// Runtime settings of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Emit a `debug!` event per decision.
    pub audit_enabled: bool,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub limits: TreeLimits,
    pub eval: EvalOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_validated(&VerdictConfig::default())
    }
}

impl TryFrom<&VerdictConfig> for EngineConfig {
    type Error = ConfigError;

    /// Validates `config` before deriving engine settings from it.
    fn try_from(config: &VerdictConfig) -> std::result::Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }
}

impl EngineConfig {
    fn from_validated(config: &VerdictConfig) -> Self {
        Self {
            audit_enabled: config.engine.audit_enabled,
            cache_enabled: config.cache.enabled,
            cache_capacity: config.cache.capacity,
            limits: TreeLimits::from(&config.limits),
            eval: EvalOptions {
                pattern_step_limit: config.limits.pattern_step_limit,
            },
        }
    }

    /// Disables decision events (for testing).
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One immutable version of the active policy tree.
#[derive(Debug)]
pub struct Snapshot {
    version: u64,
    policies: CompiledPolicySet,
}

impl Snapshot {
    /// Starts at 1 and increases by one on every successful swap.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn policies(&self) -> &CompiledPolicySet {
        &self.policies
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Decides requests against the active policy tree.
///
/// `decide` is total: every request yields exactly one decision. The only
/// mutation is an atomic swap of the whole tree.
#[derive(Debug)]
pub struct Engine {
    current: RwLock<Arc<Snapshot>>,
    cache: Option<DecisionCache>,
    config: EngineConfig,
}

impl Engine {
    /// Compiles `root` and creates an engine for it.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`](crate::PolicyError) that rejected the tree.
    pub fn new(root: PolicySet, config: EngineConfig) -> Result<Self> {
        let policies = CompiledPolicySet::compile(root, &config.limits)?;
        Ok(Self::with_compiled(policies, config))
    }

    /// Builds the tree described by `document` and creates an engine for it.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`](crate::PolicyError) that rejected the document.
    pub fn from_document(document: PolicyDocument, config: EngineConfig) -> Result<Self> {
        let policies = document.build(&config.limits)?;
        Ok(Self::with_compiled(policies, config))
    }

    pub fn with_compiled(policies: CompiledPolicySet, config: EngineConfig) -> Self {
        const INITIAL_VERSION: u64 = 1;

        let cache = (config.cache_enabled && config.cache_capacity > 0)
            .then(|| DecisionCache::new(config.cache_capacity, INITIAL_VERSION));

        Self {
            current: RwLock::new(Arc::new(Snapshot {
                version: INITIAL_VERSION,
                policies,
            })),
            cache,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The active tree. The snapshot stays valid after a swap.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a complete snapshot.
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }

    /// Decides a request against the active tree.
    pub fn decide(&self, request: &Request) -> Decision {
        let snapshot = self.snapshot();

        let (decision, cached) = match &self.cache {
            Some(cache) => {
                let fingerprint = request.fingerprint(snapshot.policies.relevant_keys());
                match cache.get(snapshot.version, &fingerprint) {
                    Some(decision) => (decision, true),
                    None => {
                        let decision = self.evaluate(request, &snapshot);
                        cache.insert(snapshot.version, fingerprint, decision.clone());
                        (decision, false)
                    }
                }
            }
            None => (self.evaluate(request, &snapshot), false),
        };

        if self.config.audit_enabled {
            debug!(
                outcome = ?decision.outcome,
                determined_by = ?decision.determined_by,
                version = snapshot.version,
                cached,
                "Decision"
            );
        }

        decision
    }

    /// Decides `request` with `action.id` set to `action`.
    pub fn decide_for_action(&self, request: &Request, action: &str) -> Decision {
        let request = request
            .to_builder()
            .attribute(Category::Action, ACTION_ID, action)
            .build();
        self.decide(&request)
    }

    /// Decides `request` once per action.
    pub fn decide_all_actions<I, S>(&self, request: &Request, actions: I) -> BTreeMap<String, Decision>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        actions
            .into_iter()
            .map(|action| {
                let action: String = action.into();
                let decision = self.decide_for_action(request, &action);
                (action, decision)
            })
            .collect()
    }

    /// Compiles `root` and swaps it in.
    ///
    /// Returns the new version. On error the active tree is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`](crate::PolicyError) that rejected the tree.
    pub fn replace_policy_set(&self, root: PolicySet) -> Result<u64> {
        let root_id = root.id.clone();
        match CompiledPolicySet::compile(root, &self.config.limits) {
            Ok(policies) => Ok(self.replace_compiled(policies)),
            Err(error) => {
                warn!(root = %root_id, %error, version = self.version(), "Policy set rejected");
                Err(error)
            }
        }
    }

    /// Builds the tree described by `document` and swaps it in.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`](crate::PolicyError) that rejected the document.
    pub fn replace_document(&self, document: PolicyDocument) -> Result<u64> {
        let root_id = document.root.clone();
        match document.build(&self.config.limits) {
            Ok(policies) => Ok(self.replace_compiled(policies)),
            Err(error) => {
                warn!(root = %root_id, %error, version = self.version(), "Policy document rejected");
                Err(error)
            }
        }
    }

    /// Swaps in an already compiled tree and returns its version.
    pub fn replace_compiled(&self, policies: CompiledPolicySet) -> u64 {
        let stats: TreeStats = policies.stats();
        let root_id = policies.root().id.clone();

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = current.version;
        let version = previous + 1;
        let replaced = std::mem::replace(&mut *current, Arc::new(Snapshot { version, policies }));
        drop(current);
        // Freed outside the lock when no reader still holds it.
        drop(replaced);

        // Until this runs, readers of the new snapshot miss and their inserts
        // are dropped as stale.
        if let Some(cache) = &self.cache {
            cache.invalidate(version);
        }

        info!(
            root = %root_id,
            previous,
            version,
            policy_sets = stats.policy_sets,
            policies = stats.policies,
            rules = stats.rules,
            "Policy set replaced"
        );
        version
    }

    fn evaluate(&self, request: &Request, snapshot: &Snapshot) -> Decision {
        evaluator::evaluate_with(request, &snapshot.policies, &self.config.eval)
    }
}
