//! Benchmarks one full `unskip` + `WorkerPool::run_step` drain (spec §4.2
//! Activation, §4.3 Dispatch/Post-execution), the hot path an engine step
//! pays every time it does not need a rebuild.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use cellmesh_physics::ReferenceKernel;
use cellmesh_space::{Boundary, Space};
use cellmesh_tasks::{build_task_graph, unskip, GraphConfig, Kernels, PoolConfig, TaskGraph, ThreadPool, WorkerPool};
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
                let mut p = Part::new_at(id, x, 0.02);
                p.v = Vec3::new(x.y, -x.x, 0.0);
                parts.push(p);
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

fn bench_scheduler_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_drain");
    let pool = WorkerPool::new(PoolConfig { nr_workers: 4, pin_cores: false });
    let thread_pool = ThreadPool::new(4);
    let kernel = ReferenceKernel;
    let kernels = Kernels { hydro: &kernel, gravity: None, lifecycle: &kernel };

    for &n in &[4usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(n * n * n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let space = lattice_space(n, 8);
                    let graph: TaskGraph = build_task_graph(&space, &GraphConfig::default()).unwrap();
                    (space, graph)
                },
                |(mut space, mut graph)| {
                    unskip(&mut graph, &space, 0, 0.1, &thread_pool);
                    pool.run_step(&graph, &mut space, &kernels, 0.01).unwrap();
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scheduler_drain);
criterion_main!(benches);
