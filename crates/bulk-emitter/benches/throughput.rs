use bulk_emitter::{Batch, BulkEmitter, EmitterConfig, VecBatchOperations};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const MSG_PER_PRODUCER: u64 = 100_000;

fn counting_emitter(
    max_size: usize,
) -> (Arc<BulkEmitter<VecBatchOperations<u64>>>, Arc<AtomicU64>) {
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    let emitter = BulkEmitter::new(
        EmitterConfig::new(max_size, Duration::from_millis(100)),
        VecBatchOperations::<u64>::with_capacity_hint(max_size),
        move |batch: Batch<u64>| {
            counter.fetch_add(black_box(batch.len()) as u64, Ordering::Relaxed);
            true
        },
    )
    .unwrap();
    (Arc::new(emitter), delivered)
}

fn bench_single_producer(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_producer");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    for max_size in [64usize, 1024, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(max_size), &max_size, |b, &max_size| {
            b.iter(|| {
                let (emitter, delivered) = counting_emitter(max_size);
                for i in 0..MSG_PER_PRODUCER {
                    emitter.add(i);
                }
                emitter.shutdown();
                assert_eq!(delivered.load(Ordering::Relaxed), MSG_PER_PRODUCER);
            });
        });
    }

    group.finish();
}

fn bench_contended_producers(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_producers");

    for num_producers in [2usize, 4, 8] {
        let total = MSG_PER_PRODUCER * num_producers as u64;
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(
            BenchmarkId::from_parameter(num_producers),
            &num_producers,
            |b, &num_producers| {
                b.iter(|| {
                    let (emitter, delivered) = counting_emitter(1024);
                    let handles: Vec<_> = (0..num_producers)
                        .map(|_| {
                            let emitter = Arc::clone(&emitter);
                            thread::spawn(move || {
                                for i in 0..MSG_PER_PRODUCER {
                                    emitter.add(i);
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    emitter.shutdown();
                    assert_eq!(delivered.load(Ordering::Relaxed), total);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_producer, bench_contended_producers);
criterion_main!(benches);
