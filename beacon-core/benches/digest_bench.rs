//! Benchmarks for the digest and request building
//!
//! Request building runs on every tracked interaction, so it is measured
//! alongside the raw hash.

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use beacon_core::hash::digest;
use beacon_core::{
    Hook, MemoryCookieJar, MockClock, PluginRegistry, RequestBuilder, StaticEnvironment,
    TrackerConfig,
};

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");
    for size in [16usize, 256, 4096] {
        let input = "x".repeat(size);
        group.bench_function(BenchmarkId::new("bytes", size), |b| {
            b.iter(|| digest(black_box(&input)))
        });
    }
    group.finish();
}

fn bench_build_page_view(c: &mut Criterion) {
    let clock = MockClock::default();
    let jar = Rc::new(MemoryCookieJar::new(Rc::new(clock.clone())));
    let mut builder = RequestBuilder::new(
        TrackerConfig::new("https://stats.example.com/piwik.php", "1"),
        Rc::new(
            StaticEnvironment::for_page("https://example.com/blog/post?utm_campaign=spring")
                .with_referrer("https://search.example.org/?q=beacon"),
        ),
        Rc::new(clock),
        jar,
        Rc::new(PluginRegistry::new()),
    );

    c.bench_function("build_page_view", |b| {
        b.iter(|| builder.build(black_box("action_name=Post"), None, Some(Hook::Log), None))
    });
}

criterion_group!(benches, bench_digest, bench_build_page_view);
criterion_main!(benches);
