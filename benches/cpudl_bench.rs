// benches/cpudl_bench.rs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use cpudl::skiplist::SkipList;
use cpudl::{CpuMask, Cpudl, CpudlConfig, EarliestFirst, FindQuery, LatestFirst};

// Single-threaded benchmarks
fn bench_single_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cpudl-SingleThreaded");

    // Benchmark deadline updates (one combining pass each)
    group.bench_function("set_deadline", |b| {
        let cpudl = Cpudl::new(CpudlConfig::new(64), LatestFirst).unwrap();
        let mut i: u64 = 0; // Explicit type

        b.iter(|| {
            i = i.wrapping_add(1);
            cpudl.set_deadline(black_box((i % 64) as usize), black_box(i * 10), i % 5 != 0)
        });
    });

    // Benchmark pull lookups
    group.bench_function("find_best_pull", |b| {
        let cpudl = Cpudl::new(CpudlConfig::new(64), LatestFirst).unwrap();

        // Populate every processor first
        for cpu in 0..64 {
            cpudl.set_deadline(cpu, cpu as u64 * 100, true);
        }

        let query = FindQuery::pull();
        b.iter(|| cpudl.find_best(black_box(&query)));
    });

    // Benchmark push lookups with no free processor
    group.bench_function("find_best_push", |b| {
        let cpudl = Cpudl::new(CpudlConfig::new(64), LatestFirst).unwrap();

        for cpu in 0..64 {
            cpudl.set_deadline(cpu, cpu as u64 * 100, true);
        }

        let query = FindQuery::push(CpuMask::first_n(64), 50);
        b.iter(|| cpudl.find_best(black_box(&query)));
    });

    group.finish();
}

// Multi-threaded benchmark comparison
fn bench_multi_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cpudl-MultiThreaded");

    // Test with different thread counts
    for thread_count in [1, 2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("mixed_operations", thread_count),
            thread_count,
            |b, &num_threads| {
                b.iter_batched(
                    // Setup
                    || Arc::new(Cpudl::new(CpudlConfig::new(num_threads), EarliestFirst).unwrap()),
                    // Benchmark
                    |cpudl| {
                        use rand::prelude::*;
                        use std::sync::Barrier;
                        use std::thread;

                        let ops_per_thread = 1000;
                        let barrier = Arc::new(Barrier::new(num_threads));

                        let mut handles = Vec::new();

                        for cpu in 0..num_threads {
                            let cpudl_clone = Arc::clone(&cpudl);
                            let barrier_clone = Arc::clone(&barrier);

                            let handle = thread::spawn(move || {
                                let mut rng = rand::rng();

                                let _ = barrier_clone.wait();

                                for _ in 0..ops_per_thread {
                                    let deadline = rng.random::<u64>() % 1_000_000;

                                    // Randomly choose operation: 50% set, 20% clear, 30% find
                                    let op = rng.random::<u8>() % 100;

                                    if op < 50 {
                                        cpudl_clone.set_deadline(cpu, deadline, true);
                                    } else if op < 70 {
                                        cpudl_clone.set_deadline(cpu, 0, false);
                                    } else {
                                        black_box(cpudl_clone.find_best(&FindQuery::pull()));
                                    }
                                }
                            });

                            handles.push(handle);
                        }

                        for handle in handles {
                            match handle.join() {
                                Ok(_) => {}
                                Err(e) => eprintln!("Thread panicked: {:?}", e),
                            }
                        }
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

// Raw skip list churn at different level ceilings
fn bench_skiplist_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("SkipList-Levels");

    for max_level in [4, 8, 16] {
        group.bench_with_input(
            BenchmarkId::new("mixed_ops", max_level),
            &max_level,
            |b, &max_level| {
                let config = CpudlConfig::new(64).with_max_level(max_level).with_seed(1);
                let mut skiplist = SkipList::new(&config, EarliestFirst).unwrap();

                // Populate with some data
                for cpu in 0..48 {
                    skiplist.insert(cpu, cpu as u64 * 10);
                }

                let mut round: u64 = 0;
                b.iter(|| {
                    round = round.wrapping_add(1);
                    for cpu in 0..64 {
                        if (cpu as u64 + round) % 3 == 0 {
                            skiplist.remove(cpu);
                        } else {
                            skiplist.insert(cpu, black_box(round * 64 + cpu as u64));
                        }
                    }
                    black_box(skiplist.best())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_threaded,
    bench_multi_threaded,
    bench_skiplist_levels
);
criterion_main!(benches);
