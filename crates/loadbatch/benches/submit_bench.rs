//! Benchmarks for the submit hot path.
//! Run with: cargo bench

use loadbatch::{Batcher, BatcherConfig, NoopHandler};
use std::sync::Arc;
use std::thread;

fn bench_single_producer(iterations: u32) {
    let batcher = Batcher::new(
        BatcherConfig {
            initial_batch_size: 100,
            ..Default::default()
        },
        Arc::new(NoopHandler),
    )
    .expect("failed to create batcher");

    // Warmup
    for i in 0..1_000u32 {
        batcher.submit(i).unwrap();
    }

    let start = std::time::Instant::now();
    for i in 0..iterations {
        batcher.submit(i).unwrap();
    }
    let elapsed = start.elapsed();
    batcher.close().unwrap();

    println!("=== Submit Benchmark (single producer) ===");
    println!("Iterations:  {}", iterations);
    println!("Total time:  {:?}", elapsed);
    println!("Per call:    {:?}", elapsed / iterations);
    println!(
        "Throughput:  {:.0} submits/sec",
        f64::from(iterations) / elapsed.as_secs_f64()
    );
}

fn bench_contended(producers: u32, per_producer: u32) {
    let batcher = Batcher::new(
        BatcherConfig {
            initial_batch_size: 100,
            ..Default::default()
        },
        Arc::new(NoopHandler),
    )
    .expect("failed to create batcher");

    let start = std::time::Instant::now();
    thread::scope(|scope| {
        for _ in 0..producers {
            let batcher = batcher.clone();
            scope.spawn(move || {
                for i in 0..per_producer {
                    batcher.submit(i).unwrap();
                }
            });
        }
    });
    let elapsed = start.elapsed();
    batcher.close().unwrap();

    let total = u64::from(producers) * u64::from(per_producer);
    println!("=== Submit Benchmark ({} producers) ===", producers);
    println!("Items:       {}", total);
    println!("Total time:  {:?}", elapsed);
    println!(
        "Throughput:  {:.0} submits/sec",
        total as f64 / elapsed.as_secs_f64()
    );
}

fn main() {
    bench_single_producer(1_000_000);
    bench_contended(8, 250_000);
}
