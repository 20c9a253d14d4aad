//! Benchmarks `build_task_graph` (spec §4.2) over lattices of increasing
//! cell count, the cost an engine step pays on every rebuild.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cellmesh_space::{Boundary, Space};
use cellmesh_tasks::{build_task_graph, GraphConfig};
use cellmesh_types::{NodeId, Part, Vec3, XPart};

fn lattice_space(n_per_axis: usize, target_leaf: usize) -> Space {
    let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 1);
    space.target_leaf_count = target_leaf;
    let mut parts = Vec::new();
    let mut xparts = Vec::new();
    let mut id = 0u64;
    for i in 0..n_per_axis {
        for j in 0..n_per_axis {
            for k in 0..n_per_axis {
                let x = Vec3::new(
                    (i as f64 + 0.5) / n_per_axis as f64,
                    (j as f64 + 0.5) / n_per_axis as f64,
                    (k as f64 + 0.5) / n_per_axis as f64,
                );
                parts.push(Part::new_at(id, x, 0.02));
                xparts.push(XPart::default());
                id += 1;
            }
        }
    }
    space.parts = parts;
    space.xparts = xparts;
    space.rebuild().unwrap();
    space
}

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_task_graph");
    for &n in &[4usize, 8, 12] {
        let space = lattice_space(n, 8);
        group.bench_with_input(BenchmarkId::from_parameter(n * n * n), &space, |b, space| {
            b.iter(|| build_task_graph(black_box(space), &GraphConfig::default()).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_graph_build);
criterion_main!(benches);
