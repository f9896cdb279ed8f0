//! Pool Benchmark Suite
//!
//! Measures allocation patterns that dominate graph preparation:
//! - fresh roots vs. free-list reuse
//! - split-heavy traffic carving many tensors out of one root
//! - plan-guided placement vs. best-fit lookup
//!
//! Run with: `cargo bench --bench pool_bench`

use std::hint::black_box;
use std::time::Instant;

use memforge::source::shared;
use memforge::{BufferAllocator, HostSource, PlacementPlan, PlanEntry};

fn pool() -> BufferAllocator {
    BufferAllocator::new(shared(HostSource::new(BufferAllocator::ALIGN_DEFAULT)))
}

fn report(label: &str, iterations: usize, start: Instant) {
    let elapsed = start.elapsed();
    let per_op = elapsed.as_nanos() as f64 / iterations as f64;
    println!("{:<40} {:>10} ops  {:>10.1} ns/op", label, iterations, per_op);
}

fn bench_fresh_roots() {
    let mut pool = pool();
    let iterations = 10_000;
    let start = Instant::now();
    for index in 0..iterations {
        let chunk = pool.alloc(256 + (index % 16) * 64, true).unwrap();
        black_box(chunk);
    }
    report("fresh roots (separate)", iterations, start);
}

fn bench_reuse_hit() {
    let mut pool = pool();
    let warm = pool.alloc(4096, false).unwrap();
    pool.free(warm).unwrap();

    let iterations = 100_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let chunk = pool.alloc(4096, false).unwrap();
        black_box(chunk);
        pool.free(chunk).unwrap();
    }
    report("exact-fit reuse alloc/free pair", iterations, start);
}

fn bench_split_churn() {
    let mut pool = pool();
    let root = pool.alloc(1 << 20, false).unwrap();
    pool.free(root).unwrap();

    let iterations = 10_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let mut chunks = Vec::with_capacity(16);
        for _ in 0..16 {
            chunks.push(pool.alloc(4096, false).unwrap());
        }
        for chunk in chunks.drain(..) {
            pool.free(chunk).unwrap();
        }
    }
    report("16-way split and merge cycle", iterations * 16, start);
}

fn bench_heuristic_placement() {
    let mut entry = PlanEntry::new("bench", 1, 1 << 20);
    for index in 0..64 {
        entry = entry.with_offset(format!("tensor{}", index), index * 4096);
    }
    let mut plan = PlacementPlan::new();
    plan.insert(entry);

    let mut pool = pool();
    pool.set_heuristic_strategy(&plan, "bench", 1, 1 << 20, false, true)
        .unwrap();

    let names: Vec<String> = (0..64).map(|index| format!("tensor{}", index)).collect();
    let iterations = 10_000;
    let start = Instant::now();
    for _ in 0..iterations {
        for name in &names {
            let chunk = pool.alloc_heuristically(name, 4096).unwrap();
            black_box(chunk);
        }
    }
    report("plan-guided placement", iterations * 64, start);
}

fn main() {
    println!("====================================");
    println!("MemForge Pool Benchmark Suite");
    println!("====================================");

    bench_fresh_roots();
    bench_reuse_hit();
    bench_split_churn();
    bench_heuristic_placement();

    println!("====================================");
    println!("Benchmark Complete");
    println!("====================================");
}
