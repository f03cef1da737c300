//! 作用域解析与拦截分发的性能基准测试

use aspectcore::aspect::{AspectRule, Operations};
use aspectcore::errors::BoxError;
use aspectcore::infrastructure::container::{ExecutionContext, ProviderRule, ScopeKind};
use aspectcore::{RuleSet, Runtime, RuntimeConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::sync::Arc;

/// 测试用的简单服务
struct SimpleService {
    value: i32,
}

impl Operations for SimpleService {
    fn invoke(&self, _operation: &str, _args: &[Value]) -> Result<Value, BoxError> {
        Ok(json!(self.value))
    }
}

fn rules(aspect_count: usize) -> RuleSet {
    let mut rules = RuleSet::new()
        .provider(ProviderRule::new("single", ScopeKind::Singleton, |_| {
            Ok(SimpleService { value: 1 })
        }))
        .provider(ProviderRule::new("proto", ScopeKind::Prototype, |_| {
            Ok(SimpleService { value: 2 })
        }))
        .provider(ProviderRule::new("req", ScopeKind::Request, |_| {
            Ok(SimpleService { value: 3 })
        }));
    for i in 0..aspect_count {
        let aspect = AspectRule::new(&format!("aspect-{}", i))
            .include(None, Some("single"), Some("get*"))
            .unwrap()
            .before(|_| Ok(()));
        rules = rules.aspect(aspect);
    }
    rules
}

/// 基准测试：各作用域的解析
fn bench_scope_resolution(c: &mut Criterion) {
    let runtime = Runtime::new(rules(0), RuntimeConfig::default()).unwrap();
    let mut group = c.benchmark_group("scope_resolution");

    group.bench_function("singleton", |b| {
        b.iter(|| runtime.resolve(black_box("single"), None))
    });
    group.bench_function("prototype", |b| {
        b.iter(|| runtime.resolve(black_box("proto"), None))
    });
    group.bench_function("request", |b| {
        let context = ExecutionContext::new();
        b.iter(|| runtime.resolve(black_box("req"), Some(&context)))
    });

    group.finish();
}

/// 基准测试：不同切面数量下的拦截调用
fn bench_intercepted_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("intercepted_call");

    for aspect_count in [0usize, 1, 10, 50] {
        let runtime = Arc::new(Runtime::new(rules(aspect_count), RuntimeConfig::default()).unwrap());
        let service = runtime
            .resolve_intercepted::<SimpleService>("single", None)
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(aspect_count),
            &aspect_count,
            |b, _| b.iter(|| service.invoke(black_box("getValue"), &[])),
        );
    }

    group.finish();
}

/// 基准测试：重置规则集
fn bench_reset(c: &mut Criterion) {
    let runtime = Runtime::new(rules(10), RuntimeConfig::default()).unwrap();
    c.bench_function("runtime_reset", |b| {
        b.iter(|| runtime.reset(rules(10), Default::default()))
    });
}

criterion_group!(benches, bench_scope_resolution, bench_intercepted_call, bench_reset);

criterion_main!(benches);
