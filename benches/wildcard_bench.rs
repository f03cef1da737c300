//! 通配符匹配的性能基准测试

use aspectcore::pointcut::{Joinpoint, PointcutPattern};
use aspectcore::wildcard::WildcardPattern;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// 基准测试：不同模式的匹配
fn bench_wildcard_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("wildcard_matching");
    let cases = [
        ("literal", "com.example.OrderService", "com.example.OrderService"),
        ("single", "com.*.OrderService", "com.example.OrderService"),
        ("double", "com.**.Service", "com.example.shop.orders.Service"),
        ("mixed", "c?m.**.*Serv+ce", "com.example.shop.OrderService"),
    ];

    for (name, pattern, input) in cases {
        let compiled = WildcardPattern::with_separator(pattern, ".").unwrap();
        group.bench_with_input(BenchmarkId::new("matches", name), &input, |b, input| {
            b.iter(|| compiled.matches(black_box(input)))
        });
        group.bench_with_input(BenchmarkId::new("captures", name), &input, |b, input| {
            b.iter(|| {
                compiled
                    .captures(black_box(input))
                    .map(|m| m.groups().count())
            })
        });
    }

    group.finish();
}

/// 基准测试：模式编译
fn bench_pattern_compile(c: &mut Criterion) {
    c.bench_function("wildcard_compile", |b| {
        b.iter(|| WildcardPattern::with_separator(black_box("admin/**/orders/*/\\*raw"), "/"))
    });
}

/// 基准测试：切点三元组匹配
fn bench_pointcut_captures(c: &mut Criterion) {
    let pattern = PointcutPattern::new(
        Some("admin/**"),
        Some("class:shop.**.*Service"),
        Some("find*"),
    )
    .unwrap();
    let joinpoint = Joinpoint::operation("orderService", "shop.orders.OrderService", "findOrder")
        .with_container(Some("admin/orders/list"));

    c.bench_function("pointcut_captures", |b| {
        b.iter(|| pattern.captures(black_box(&joinpoint)))
    });
}

criterion_group!(
    benches,
    bench_wildcard_matching,
    bench_pattern_compile,
    bench_pointcut_captures
);

criterion_main!(benches);
