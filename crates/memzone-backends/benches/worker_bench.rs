//! Benchmarks for worker round trips
//!
//! Measures the cost of the actor → poller path that every asynchronous instruction pays.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memzone_backends::backends::{HostDevice, SimulatedBackend};
use memzone_backends::{Channel, DeviceBackend, DeviceWorker, StreamOp, WorkerConfig};
use memzone_core::{DeviceKind, ZoneId};
use std::sync::mpsc;
use std::sync::Arc;

fn benchmark_channel(c: &mut Criterion) {
    let channel = Channel::unbounded();
    c.bench_function("channel_send_receive", |b| {
        b.iter(|| {
            channel.send(black_box(7u64)).unwrap();
            black_box(channel.receive().unwrap())
        })
    });
}

fn benchmark_host_round_trip(c: &mut Criterion) {
    let worker = DeviceWorker::spawn(Arc::new(HostDevice::new()), ZoneId::HOST, &WorkerConfig::default()).unwrap();
    c.bench_function("host_instruction_callback_round_trip", |b| {
        b.iter(|| {
            let (tx, rx) = mpsc::channel();
            worker
                .execute("ping", move |context| context.add_callback(move || tx.send(()).unwrap()))
                .unwrap();
            rx.recv().unwrap();
        })
    });
    worker.shutdown();
}

fn benchmark_simulated_round_trip(c: &mut Criterion) {
    let backend = SimulatedBackend::new(DeviceKind::FakeDevice, 1);
    let worker = backend.create_worker(0, &WorkerConfig::default()).unwrap();
    c.bench_function("simulated_launch_fence_callback", |b| {
        b.iter(|| {
            let (tx, rx) = mpsc::channel();
            worker
                .execute("launch", move |context| {
                    context.launch(StreamOp::new("noop", || {}));
                    context.add_callback(move || tx.send(()).unwrap());
                })
                .unwrap();
            rx.recv().unwrap();
        })
    });
    worker.shutdown();
}

criterion_group!(
    benches,
    benchmark_channel,
    benchmark_host_round_trip,
    benchmark_simulated_round_trip
);
criterion_main!(benches);
