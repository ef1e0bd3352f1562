//! Benchmarks for clone ordering.
//!
//! A freshly seeded mirror clones tens of thousands of repositories in one
//! batch, many of them borrowing objects from a handful of large parents.
//! These measure ordering over deep reference chains and wide fan-outs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use repo_mirror::clone_order;
use repo_mirror::manifest::{Manifest, ManifestEntry};

/// `/chain/0.git <- /chain/1.git <- ... <- /chain/{n-1}.git`
fn chain(n: usize) -> (Vec<String>, Manifest) {
    let mut manifest = Manifest::new();
    let mut pending = Vec::with_capacity(n);
    for i in 0..n {
        let path = format!("/chain/{}.git", i);
        let mut entry = ManifestEntry::new(i as i64);
        if i > 0 {
            entry = entry.with_reference(format!("/chain/{}.git", i - 1));
        }
        manifest.insert(path.clone(), entry);
        pending.push(path);
    }
    // Worst case for the resolver: dependents listed before their parents.
    pending.reverse();
    (pending, manifest)
}

/// `parents` roots, each borrowed by `n / parents` forks.
fn fan_out(n: usize, parents: usize) -> (Vec<String>, Manifest) {
    let mut manifest = Manifest::new();
    let mut pending = Vec::with_capacity(n + parents);
    for p in 0..parents {
        let parent = format!("/pub/parent{}.git", p);
        manifest.insert(parent.clone(), ManifestEntry::new(0));
        pending.push(parent);
    }
    for i in 0..n {
        let fork = format!("/forks/{}/fork{}.git", i % parents, i);
        manifest.insert(
            fork.clone(),
            ManifestEntry::new(1).with_reference(format!("/pub/parent{}.git", i % parents)),
        );
        pending.push(fork);
    }
    pending.reverse();
    (pending, manifest)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone_order_chain");
    for n in [100, 1_000, 5_000] {
        let (pending, manifest) = chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| clone_order::resolve(black_box(&pending), black_box(&manifest), |_| false))
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone_order_fan_out");
    for n in [1_000, 10_000, 50_000] {
        let (pending, manifest) = fan_out(n, 20);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| clone_order::resolve(black_box(&pending), black_box(&manifest), |_| false))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out);
criterion_main!(benches);
