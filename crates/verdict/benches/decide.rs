//! Decision benchmarks.
//!
//! Measures uncached tree evaluation against wide policy trees and the
//! cached path through the engine.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use verdict::attributes::{Category, Request};
use verdict::combining::CombiningAlgorithm;
use verdict::condition::Condition;
use verdict::engine::{Engine, EngineConfig};
use verdict::matcher::{AttributeMatch, Matcher};
use verdict::policy::{CompiledPolicySet, Policy, PolicySet, TreeLimits};
use verdict::rule::{Effect, Rule};

fn wide_tree(policies: usize) -> PolicySet {
    let mut root = PolicySet::new("root", CombiningAlgorithm::DenyOverrides);
    for p in 0..policies {
        root = root.with_policy(
            Policy::new(format!("policy-{p}"), CombiningAlgorithm::FirstApplicable)
                .with_target(Matcher::all_of([AttributeMatch::equals(
                    Category::Resource,
                    "tenant",
                    format!("tenant-{}", p % 16),
                )]))
                .with_rule(
                    Rule::new(format!("admin-{p}"), Effect::Permit).with_condition(
                        Condition::attribute_equals(Category::Subject, "role", "admin"),
                    ),
                )
                .with_rule(Rule::new(format!("fallback-{p}"), Effect::Deny)),
        );
    }
    root
}

fn request() -> Request {
    Request::builder()
        .subject("role", "admin")
        .resource("tenant", "tenant-3")
        .action("id", "read")
        .build()
}

// ============================================================================
// Evaluation Benchmarks
// ============================================================================

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let request = request();

    for policies in [10, 100, 1000] {
        let compiled = CompiledPolicySet::compile(wide_tree(policies), &TreeLimits::default())
            .expect("benchmark tree compiles");

        group.bench_with_input(
            BenchmarkId::from_parameter(policies),
            &compiled,
            |b, compiled| {
                b.iter(|| {
                    let decision = verdict::evaluate(black_box(&request), compiled);
                    black_box(decision);
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Engine Benchmarks
// ============================================================================

fn bench_engine_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_decide");
    let request = request();

    let cached = Engine::new(wide_tree(100), EngineConfig::default().without_audit())
        .expect("benchmark tree compiles");
    group.bench_function("cached", |b| {
        b.iter(|| black_box(cached.decide(black_box(&request))));
    });

    let uncached = Engine::new(
        wide_tree(100),
        EngineConfig::default().without_audit().without_cache(),
    )
    .expect("benchmark tree compiles");
    group.bench_function("uncached", |b| {
        b.iter(|| black_box(uncached.decide(black_box(&request))));
    });

    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_engine_decide);
criterion_main!(benches);
