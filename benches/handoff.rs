use criterion::{black_box, criterion_group, criterion_main, Criterion};
use handoff_pipeline::Handoff;
use std::sync::Arc;
use std::thread;

fn benchmark_rendezvous_swap(c: &mut Criterion) {
    c.bench_function("handoff_1000_swaps_u64", |b| {
        b.iter(|| {
            let buffer = Arc::new(Handoff::<u64>::new("bench"));
            let peer = Arc::clone(&buffer);
            let consumer = thread::spawn(move || {
                let mut cell = 0u64;
                let mut sum = 0u64;
                for _ in 0..1000 {
                    if peer.receive(&mut cell).is_terminated() {
                        break;
                    }
                    sum += cell;
                }
                sum
            });

            let mut cell = 0u64;
            for i in 0..1000u64 {
                cell = i;
                let _ = buffer.send(&mut cell);
            }
            black_box(consumer.join().expect("consumer panicked"));
        });
    });
}

fn benchmark_rendezvous_large_payload(c: &mut Criterion) {
    c.bench_function("handoff_1000_swaps_64k", |b| {
        b.iter(|| {
            let buffer = Arc::new(Handoff::<Vec<u8>>::new("bench_large"));
            let peer = Arc::clone(&buffer);
            let consumer = thread::spawn(move || {
                let mut cell = Vec::new();
                for _ in 0..1000 {
                    if peer.receive(&mut cell).is_terminated() {
                        break;
                    }
                }
                cell.len()
            });

            // One allocation up front; the swap recycles it for the rest
            // of the run.
            let mut cell = vec![0u8; 64 * 1024];
            for i in 0..1000usize {
                if cell.len() < 64 * 1024 {
                    cell.resize(64 * 1024, 0);
                }
                cell[0] = i as u8;
                let _ = buffer.send(&mut cell);
            }
            black_box(consumer.join().expect("consumer panicked"));
        });
    });
}

criterion_group!(
    benches,
    benchmark_rendezvous_swap,
    benchmark_rendezvous_large_payload
);
criterion_main!(benches);
