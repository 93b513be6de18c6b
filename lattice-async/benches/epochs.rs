//! Epoch turnover benchmarks.
//!
//! Measures how quickly a computed cell moves from one epoch to the next when
//! its input changes, for immediate results and for superseded futures.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lattice_async::compute::{ComputedAsync, ComputedAsyncOptions, Evaluation};
use lattice_async::reactive::Signal;

fn immediate_epochs(c: &mut Criterion) {
    let input = Signal::new(0u64);
    let reader = input.clone();
    let computed = ComputedAsync::new(
        move |_| Ok(Evaluation::ready(reader.get() * 2)),
        ComputedAsyncOptions::new(),
    );

    c.bench_function("immediate_epoch", |b| {
        b.iter(|| {
            input.update(|n| n + 1);
            black_box(computed.get_untracked())
        })
    });
}

fn superseded_deferred_epochs(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");

    let input = Signal::new(0u64);
    let reader = input.clone();
    let computed = ComputedAsync::new(
        move |token| {
            reader.get();
            token.on_cancel(|| {});
            Ok(Evaluation::deferred(futures_util::future::pending::<u64>()))
        },
        ComputedAsyncOptions::new().runtime(runtime.handle().clone()),
    );

    c.bench_function("superseded_deferred_epoch", |b| {
        b.iter(|| {
            input.update(|n| n + 1);
            black_box(computed.epoch())
        })
    });
}

criterion_group!(benches, immediate_epochs, superseded_deferred_epochs);
criterion_main!(benches);
