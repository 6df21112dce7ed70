//! Scheduler benchmarks.
//!
//! - Creating and matching a batch of entities in one tick.
//! - Running a plain system over a steady population.
//! - Running an only-active system where half the population goes idle.
//! - Mute/unmute churn across flushes.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cadence_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Velocity {
    dx: f64,
    dy: f64,
}

const POSITION: ComponentId = ComponentId(0);
const VELOCITY: ComponentId = ComponentId(1);

const MOVE: SystemId = SystemId(0);
const MOVE_ACTIVE: SystemId = SystemId(1);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn integrate(world: &mut World, e: EntityId) {
    let v = world.entity_component_req::<Velocity>(e, VELOCITY).clone();
    let p = world.entity_component_req_mut::<Position>(e, POSITION);
    p.x += v.dx;
    p.y += v.dy;
}

fn setup_world() -> World {
    let mut world = World::with_capacity(2, 2);
    world.component_new(POSITION, ComponentKind::new::<Position>("position"));
    world.component_new(VELOCITY, ComponentKind::new::<Velocity>("velocity"));

    world.system_new(MOVE, integrate, false);
    world.system_add(MOVE, POSITION);
    world.system_add(MOVE, VELOCITY);

    world.system_new(MOVE_ACTIVE, integrate, true);
    world.system_add(MOVE_ACTIVE, POSITION);
    world.system_add(MOVE_ACTIVE, VELOCITY);
    world
}

fn populate(world: &mut World, count: usize) -> Vec<EntityId> {
    (0..count)
        .map(|i| {
            let e = world.entity_new(None, None);
            world.entity_component_add::<Position>(e, POSITION).unwrap();
            *world.entity_component_add::<Velocity>(e, VELOCITY).unwrap() = Velocity {
                dx: i as f64,
                dy: 1.0,
            };
            e
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_spawn_and_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_and_match");
    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                setup_world,
                |mut world| {
                    populate(&mut world, count);
                    world.tick();
                    black_box(world.system_len(MOVE));
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_system_run(c: &mut Criterion) {
    let mut world = setup_world();
    populate(&mut world, 10_000);
    world.tick();

    c.bench_function("system_run_10k", |b| {
        b.iter(|| {
            world.tick();
            world.system_run(MOVE);
        });
    });
}

fn bench_only_active_run(c: &mut Criterion) {
    let mut world = setup_world();
    let ids = populate(&mut world, 10_000);
    world.tick();

    c.bench_function("only_active_run_half_idle_10k", |b| {
        b.iter(|| {
            for e in ids.iter().step_by(2) {
                world.entity_active_set(*e).unwrap();
            }
            world.tick();
            world.system_run(MOVE_ACTIVE);
        });
    });
}

fn bench_mute_churn(c: &mut Criterion) {
    let mut world = setup_world();
    let ids = populate(&mut world, 1_000);
    world.tick();

    c.bench_function("mute_unmute_1k", |b| {
        b.iter(|| {
            for &e in &ids {
                world.entity_mute_inc(e).unwrap();
            }
            world.tick();
            for &e in &ids {
                world.entity_mute_dec(e).unwrap();
            }
            world.tick();
            black_box(world.system_len(MOVE));
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_spawn_and_match,
    bench_system_run,
    bench_only_active_run,
    bench_mute_churn,
);
criterion_main!(benches);
