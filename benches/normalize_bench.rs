use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lsra::eh::clauses::RawClause;
use lsra::eh::normalize::{normalize_regions, NormalizeOptions};
use lsra::eh::verify::Verifier;
use lsra::graph::FlowGraph;
use lsra::ir::block::BlockKind;

/// n fallthrough blocks ending in a return
fn linear_graph(n: usize) -> FlowGraph {
    let mut graph = FlowGraph::new("bench");
    for i in 0..n {
        let kind = if i + 1 == n {
            BlockKind::Return
        } else {
            BlockKind::Fallthrough
        };
        graph.add_block(kind);
    }
    graph
}

/// `count` disjoint try/handler pairs laid out back to back
fn sequential_clauses(count: u32) -> Vec<RawClause> {
    (0..count)
        .map(|i| RawClause::catch((1 + 3 * i, 2 + 3 * i), (2 + 3 * i, 3 + 3 * i)))
        .collect()
}

/// One nesting chain `depth` regions deep, innermost first
fn nested_clauses(depth: u32) -> Vec<RawClause> {
    (0..depth)
        .map(|i| {
            RawClause::catch(
                (depth - i, depth + 1 + 2 * i),
                (depth + 1 + 2 * i, depth + 2 + 2 * i),
            )
        })
        .collect()
}

/// Regions stacked on one shared try begin, the worst case for header
/// insertion
fn shared_begin_clauses(count: u32) -> Vec<RawClause> {
    (0..count)
        .map(|i| RawClause::catch((1, 3 + 2 * i), (3 + 2 * i, 4 + 2 * i)))
        .collect()
}

/// Benchmark clause intake for flat and deeply nested tables
fn bench_attach(c: &mut Criterion) {
    let mut group = c.benchmark_group("attach_regions");

    for count in [4u32, 16, 64] {
        let clauses = sequential_clauses(count);
        let blocks = 3 * count as usize + 2;
        group.bench_with_input(
            BenchmarkId::new("sequential", count),
            &clauses,
            |b, clauses| {
                b.iter(|| {
                    let mut graph = linear_graph(blocks);
                    graph.attach_regions(black_box(clauses)).unwrap();
                    graph
                })
            },
        );
    }

    for depth in [4u32, 16, 64] {
        let clauses = nested_clauses(depth);
        let blocks = 3 * depth as usize + 2;
        group.bench_with_input(
            BenchmarkId::new("nested", depth),
            &clauses,
            |b, clauses| {
                b.iter(|| {
                    let mut graph = linear_graph(blocks);
                    graph.attach_regions(black_box(clauses)).unwrap();
                    graph
                })
            },
        );
    }

    group.finish();
}

/// Benchmark header-block insertion on stacked try begins
fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_regions");

    for count in [4u32, 16, 64] {
        let clauses = shared_begin_clauses(count);
        let blocks = 2 * count as usize + 4;
        group.bench_with_input(
            BenchmarkId::new("shared_begins", count),
            &clauses,
            |b, clauses| {
                b.iter(|| {
                    let mut graph = linear_graph(blocks);
                    graph.attach_regions(clauses).unwrap();
                    graph.compute_pred_edges();
                    black_box(normalize_regions(&mut graph, &NormalizeOptions::new()))
                })
            },
        );
    }

    group.finish();
}

/// Benchmark the quadratic verification oracle over nested tables
fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");

    for depth in [4u32, 16, 64] {
        let mut graph = linear_graph(3 * depth as usize + 2);
        graph.attach_regions(&nested_clauses(depth)).unwrap();
        graph.compute_pred_edges();
        normalize_regions(&mut graph, &NormalizeOptions::new());

        group.bench_with_input(BenchmarkId::new("nested", depth), &graph, |b, graph| {
            b.iter(|| black_box(Verifier::new().begins_normalized().verify(black_box(graph))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_attach, bench_normalize, bench_verify);
criterion_main!(benches);
